//! Fruit pool administration and dynamic pricing.

use std::sync::Arc;

use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::crew::errors::{CrewError, StorageError};
use crate::crew::seed::{default_pool, SEED_STOCK};
use crate::crew::storage::CrewStore;
use crate::crew::types::{FruitDefinition, FruitType, GuildId, PriceRules, ShopEntry};

/// `clamp(base[type] + bonus × per_bonus[type], min, max)`.
///
/// Types missing from the rule tables use the paramecia row.
pub fn compute_price(fruit: &FruitDefinition, rules: &PriceRules) -> i64 {
    let lookup = |table: &std::collections::BTreeMap<String, i64>| {
        table
            .get(fruit.kind.key())
            .or_else(|| table.get(FruitType::Paramecia.key()))
            .copied()
            .unwrap_or(0)
    };
    let raw = lookup(&rules.base).saturating_add(fruit.bonus.saturating_mul(lookup(&rules.per_bonus)));
    let (lo, hi) = if rules.min <= rules.max {
        (rules.min, rules.max)
    } else {
        (rules.max, rules.min)
    };
    raw.clamp(lo, hi)
}

/// Guild-scoped view over the fruit pool.
pub struct FruitCatalog {
    store: Arc<CrewStore>,
}

impl FruitCatalog {
    pub fn new(store: Arc<CrewStore>) -> Self {
        Self { store }
    }

    /// Install the default pool (priced, each stocked once) if the guild has none.
    /// Returns the number of fruits added.
    pub fn ensure_seeded(&self, guild_id: GuildId, rules: &PriceRules) -> Result<usize, StorageError> {
        if !self.store.pool_is_empty(guild_id)? {
            return Ok(0);
        }
        let pool = default_pool();
        for mut fruit in pool.iter().cloned() {
            fruit.price = compute_price(&fruit, rules);
            self.store.put_fruit(guild_id, &fruit)?;
            self.store.put_shop_entry(
                guild_id,
                &ShopEntry {
                    name: fruit.name.clone(),
                    stock: SEED_STOCK,
                },
            )?;
        }
        info!("Seeded {} fruits for guild {}", pool.len(), guild_id);
        Ok(pool.len())
    }

    pub fn get(&self, guild_id: GuildId, name: &str) -> Result<Option<FruitDefinition>, StorageError> {
        self.store.get_fruit(guild_id, name)
    }

    pub fn pool(&self, guild_id: GuildId) -> Result<Vec<FruitDefinition>, StorageError> {
        self.store.list_pool(guild_id)
    }

    /// Add or replace a pool entry. The type text goes through the alias table; an
    /// explicit price locks the entry, otherwise the guild rules price it.
    pub fn add_fruit(
        &self,
        guild_id: GuildId,
        name: &str,
        kind: &str,
        bonus: i64,
        ability: &str,
        price: Option<i64>,
        rules: &PriceRules,
    ) -> Result<FruitDefinition, StorageError> {
        let mut fruit = FruitDefinition::new(name, FruitType::normalize(kind), bonus, ability);
        match price {
            Some(price) => {
                fruit.price = price.max(0);
                fruit.price_locked = true;
            }
            None => fruit.price = compute_price(&fruit, rules),
        }
        self.store.put_fruit(guild_id, &fruit)?;
        debug!("pool[{}] <- {} ({}, {})", guild_id, fruit.name, fruit.kind, fruit.price);
        Ok(fruit)
    }

    /// Remove a pool entry together with its shop listing.
    pub fn remove_fruit(&self, guild_id: GuildId, name: &str) -> Result<FruitDefinition, CrewError> {
        let fruit = self
            .store
            .get_fruit(guild_id, name)?
            .ok_or_else(|| CrewError::UnknownFruit(name.to_string()))?;
        self.store.remove_fruit(guild_id, name)?;
        self.store.remove_shop_entry(guild_id, name)?;
        Ok(fruit)
    }

    /// Recompute prices of unlocked entries, or of every entry when `force` is set.
    /// Forcing also clears the locks. Returns how many prices changed.
    pub fn reprice(&self, guild_id: GuildId, rules: &PriceRules, force: bool) -> Result<usize, StorageError> {
        let mut changed = 0usize;
        for mut fruit in self.store.list_pool(guild_id)? {
            if fruit.price_locked && !force {
                continue;
            }
            let price = compute_price(&fruit, rules);
            if price != fruit.price || fruit.price_locked {
                fruit.price = price;
                fruit.price_locked = false;
                self.store.put_fruit(guild_id, &fruit)?;
                changed += 1;
            }
        }
        info!("Repriced {} fruits in guild {} (force={})", changed, guild_id, force);
        Ok(changed)
    }

    /// Admin price override; the entry is skipped by later non-forced reprices.
    pub fn set_price(&self, guild_id: GuildId, name: &str, price: i64) -> Result<FruitDefinition, CrewError> {
        let mut fruit = self
            .store
            .get_fruit(guild_id, name)?
            .ok_or_else(|| CrewError::UnknownFruit(name.to_string()))?;
        fruit.price = price.max(0);
        fruit.price_locked = true;
        self.store.put_fruit(guild_id, &fruit)?;
        Ok(fruit)
    }

    pub fn unlock_price(&self, guild_id: GuildId, name: &str) -> Result<FruitDefinition, CrewError> {
        let mut fruit = self
            .store
            .get_fruit(guild_id, name)?
            .ok_or_else(|| CrewError::UnknownFruit(name.to_string()))?;
        fruit.price_locked = false;
        self.store.put_fruit(guild_id, &fruit)?;
        Ok(fruit)
    }

    /// Roll the starter fruit for a new character. Shop stock is not touched.
    pub fn draw_starter<R: Rng>(
        &self,
        guild_id: GuildId,
        chance: f64,
        rng: &mut R,
    ) -> Result<Option<FruitDefinition>, StorageError> {
        if !(chance > 0.0) || !rng.gen_bool(chance.min(1.0)) {
            return Ok(None);
        }
        let pool = self.store.list_pool(guild_id)?;
        Ok(pool.choose(rng).cloned())
    }
}
