//! Stocked subset of the pool and the purchase flow.

use std::sync::Arc;

use log::{info, warn};

use crate::crew::economy::Economy;
use crate::crew::errors::{CrewError, StorageError};
use crate::crew::storage::CrewStore;
use crate::crew::types::{FruitDefinition, GuildId, PlayerId, ShopEntry};

impl ShopEntry {
    pub fn new(name: &str, stock: Option<u32>) -> Self {
        Self {
            name: name.trim().to_string(),
            stock,
        }
    }

    pub fn in_stock(&self) -> bool {
        self.stock.map_or(true, |q| q > 0)
    }

    /// Reduce stock by amount (returns actual amount reduced)
    pub fn reduce_stock(&mut self, amount: u32) -> u32 {
        if let Some(qty) = self.stock {
            let actual = amount.min(qty);
            self.stock = Some(qty - actual);
            actual
        } else {
            amount
        }
    }
}

/// A shop entry joined with its pool definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ShopListing {
    pub fruit: FruitDefinition,
    pub stock: Option<u32>,
}

pub struct ShopManager {
    store: Arc<CrewStore>,
}

impl ShopManager {
    pub fn new(store: Arc<CrewStore>) -> Self {
        Self { store }
    }

    /// Put a pool fruit on sale (or change its stock). `None` is unlimited.
    pub fn stock(&self, guild_id: GuildId, name: &str, stock: Option<u32>) -> Result<ShopEntry, CrewError> {
        let fruit = self
            .store
            .get_fruit(guild_id, name)?
            .ok_or_else(|| CrewError::UnknownFruit(name.to_string()))?;
        let entry = ShopEntry::new(&fruit.name, stock);
        self.store.put_shop_entry(guild_id, &entry)?;
        Ok(entry)
    }

    pub fn unstock(&self, guild_id: GuildId, name: &str) -> Result<bool, StorageError> {
        self.store.remove_shop_entry(guild_id, name)
    }

    /// Current listings with pool prices, ordered by name.
    pub fn listings(&self, guild_id: GuildId) -> Result<Vec<ShopListing>, StorageError> {
        let mut listings = Vec::new();
        for entry in self.store.list_shop(guild_id)? {
            match self.store.get_fruit(guild_id, &entry.name)? {
                Some(fruit) => listings.push(ShopListing {
                    fruit,
                    stock: entry.stock,
                }),
                None => warn!(
                    "shop entry {:?} in guild {} has no pool definition",
                    entry.name, guild_id
                ),
            }
        }
        Ok(listings)
    }

    /// Purchase and equip a fruit. The charge happens before stock and the
    /// fruit slot change; a storage failure afterwards propagates with the
    /// charge already taken.
    pub fn buy(
        &self,
        economy: &Economy,
        guild_id: GuildId,
        player_id: PlayerId,
        name: &str,
    ) -> Result<FruitDefinition, CrewError> {
        let mut record = self.store.get_player(guild_id, player_id)?;
        if !record.started {
            return Err(CrewError::NotStarted);
        }

        let mut entry = self
            .store
            .get_shop_entry(guild_id, name)?
            .ok_or_else(|| CrewError::NotStocked(name.to_string()))?;
        let fruit = self
            .store
            .get_fruit(guild_id, name)?
            .ok_or_else(|| CrewError::NotStocked(name.to_string()))?;
        if !entry.in_stock() {
            return Err(CrewError::OutOfStock(fruit.name));
        }
        if let Some(current) = &record.fruit {
            return Err(CrewError::AlreadyEquipped(current.clone()));
        }

        economy.debit(
            guild_id,
            player_id,
            fruit.price,
            &format!("fruit purchase: {}", fruit.name),
        )?;

        entry.reduce_stock(1);
        self.store.put_shop_entry(guild_id, &entry)?;
        record.fruit = Some(fruit.name.clone());
        self.store.save_player(guild_id, player_id, &record)?;
        crate::metrics::inc_purchases();
        info!(
            "player {} in guild {} bought {} for {}",
            player_id, guild_id, fruit.name, fruit.price
        );
        Ok(fruit)
    }

    /// Unequip without refund.
    pub fn remove_fruit(&self, guild_id: GuildId, player_id: PlayerId) -> Result<String, CrewError> {
        let mut record = self.store.get_player(guild_id, player_id)?;
        if !record.started {
            return Err(CrewError::NotStarted);
        }
        let removed = record.fruit.take().ok_or(CrewError::NotEquipped)?;
        self.store.save_player(guild_id, player_id, &record)?;
        Ok(removed)
    }
}
