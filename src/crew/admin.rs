//! Admin maintenance: resets, wipes, catalog management and guild snapshots.
//!
//! Snapshots are gzip-compressed JSON. The envelope carries the payload as a
//! string together with its SHA-256 so import can verify the exact bytes that
//! were exported.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crew::errors::{CrewError, StorageError};
use crate::crew::progression;
use crate::crew::service::CrewBattles;
use crate::crew::storage::CrewStore;
use crate::crew::types::{
    fruit_key, FruitDefinition, GuildEconomyConfig, GuildId, PlayerId, PlayerRecord, ShopEntry,
};

pub const SNAPSHOT_FORMAT: u32 = 1;

/// Every document of one guild.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuildSnapshot {
    pub guild_id: GuildId,
    pub exported_at: DateTime<Utc>,
    /// Absent when the guild runs on the defaults
    #[serde(default)]
    pub config: Option<GuildEconomyConfig>,
    #[serde(default)]
    pub players: BTreeMap<PlayerId, PlayerRecord>,
    #[serde(default)]
    pub pool: Vec<FruitDefinition>,
    #[serde(default)]
    pub shop: Vec<ShopEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    format: u32,
    checksum: String,
    payload: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WipeSummary {
    pub players: usize,
    pub ledger_accounts: usize,
    pub fruits: usize,
}

fn checksum(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Collect a guild's documents from the store.
pub fn collect_snapshot(store: &CrewStore, guild_id: GuildId, now: DateTime<Utc>) -> Result<GuildSnapshot, StorageError> {
    let config = store
        .list_guild_ids()?
        .contains(&guild_id)
        .then(|| store.guild_config(guild_id, &GuildEconomyConfig::default()))
        .transpose()?;
    Ok(GuildSnapshot {
        guild_id,
        exported_at: now,
        config,
        players: store.all_players(guild_id)?,
        pool: store.list_pool(guild_id)?,
        shop: store.list_shop(guild_id)?,
    })
}

pub fn write_snapshot(snapshot: &GuildSnapshot, path: &Path) -> Result<(), StorageError> {
    let payload = serde_json::to_string(snapshot)?;
    let envelope = SnapshotEnvelope {
        format: SNAPSHOT_FORMAT,
        checksum: checksum(&payload),
        payload,
    };
    let file = File::create(path)?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    serde_json::to_writer(&mut encoder, &envelope)?;
    let mut writer = encoder.finish()?;
    writer.flush()?;
    Ok(())
}

pub fn read_snapshot(path: &Path) -> Result<GuildSnapshot, StorageError> {
    let file = File::open(path)?;
    let mut decoder = GzDecoder::new(BufReader::new(file));
    let mut raw = String::new();
    decoder.read_to_string(&mut raw)?;
    let envelope: SnapshotEnvelope = serde_json::from_str(&raw)?;
    if envelope.format > SNAPSHOT_FORMAT {
        return Err(StorageError::Internal(format!(
            "snapshot format {} is newer than supported {}",
            envelope.format, SNAPSHOT_FORMAT
        )));
    }
    let found = checksum(&envelope.payload);
    if found != envelope.checksum {
        return Err(StorageError::ChecksumMismatch {
            expected: envelope.checksum,
            found,
        });
    }
    Ok(serde_json::from_str(&envelope.payload)?)
}

/// Check that the snapshot's documents agree with each other. Nothing is written.
fn validate_snapshot(snapshot: &GuildSnapshot) -> Result<(), StorageError> {
    let mut pool = HashSet::new();
    for fruit in &snapshot.pool {
        if !pool.insert(fruit_key(&fruit.name)) {
            return Err(StorageError::InvalidSnapshot(format!(
                "fruit '{}' appears twice in the pool",
                fruit.name
            )));
        }
    }
    if let Some(entry) = snapshot.shop.iter().find(|e| !pool.contains(&fruit_key(&e.name))) {
        return Err(StorageError::InvalidSnapshot(format!(
            "shop entry '{}' has no fruit in the pool",
            entry.name
        )));
    }
    Ok(())
}

/// Replace a guild's documents with the snapshot's. Returns the number of players written.
/// A snapshot that fails validation leaves the guild untouched.
pub fn restore_snapshot(store: &CrewStore, guild_id: GuildId, snapshot: &GuildSnapshot) -> Result<usize, StorageError> {
    if snapshot.guild_id != guild_id {
        warn!(
            "restoring snapshot of guild {} into guild {}",
            snapshot.guild_id, guild_id
        );
    }
    validate_snapshot(snapshot)?;
    store.clear_players(guild_id)?;
    store.clear_catalog(guild_id)?;
    match &snapshot.config {
        Some(config) => store.put_guild_config(guild_id, config)?,
        None => {
            store.delete_guild_config(guild_id)?;
        }
    }
    for fruit in &snapshot.pool {
        store.put_fruit(guild_id, fruit)?;
    }
    for entry in &snapshot.shop {
        store.put_shop_entry(guild_id, entry)?;
    }
    for (player_id, record) in &snapshot.players {
        let mut record = record.clone();
        progression::apply_exp(&mut record, 0);
        store.save_player(guild_id, *player_id, &record)?;
    }
    Ok(snapshot.players.len())
}

impl CrewBattles {
    /// Delete one player's record. Returns whether one existed.
    pub fn reset_player(&self, guild_id: GuildId, player_id: PlayerId) -> Result<bool, StorageError> {
        let removed = self.store().delete_player(guild_id, player_id)?;
        info!("reset player {} in guild {} (existed: {})", player_id, guild_id, removed);
        Ok(removed)
    }

    /// Season reset: every started player gets a fresh started record. Creation
    /// time is kept; balances are untouched.
    pub fn reset_started(&self, guild_id: GuildId, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut count = 0usize;
        for (player_id, record) in self.store().all_players(guild_id)? {
            if !record.started {
                continue;
            }
            let mut fresh = PlayerRecord::started(now);
            fresh.created_at = record.created_at.or(Some(now));
            self.store().save_player(guild_id, player_id, &fresh)?;
            count += 1;
        }
        info!("reset {} started players in guild {}", count, guild_id);
        Ok(count)
    }

    /// Remove every document of a guild, local ledger included.
    pub fn wipe(&self, guild_id: GuildId) -> Result<WipeSummary, StorageError> {
        let summary = WipeSummary {
            players: self.store().clear_players(guild_id)?,
            ledger_accounts: self.store().clear_ledger(guild_id)?,
            fruits: self.store().clear_catalog(guild_id)?,
        };
        self.store().delete_guild_config(guild_id)?;
        warn!("wiped guild {}: {:?}", guild_id, summary);
        Ok(summary)
    }

    /// Admin level/exp override, normalized onto the curve.
    pub fn set_level(&self, guild_id: GuildId, player_id: PlayerId, level: u32, exp: u64) -> Result<PlayerRecord, CrewError> {
        let mut record = self.store().get_player(guild_id, player_id)?;
        if !record.started {
            return Err(CrewError::NotStarted);
        }
        progression::set_level(&mut record, level, exp);
        self.store().save_player(guild_id, player_id, &record)?;
        Ok(record)
    }

    pub fn export_guild(&self, guild_id: GuildId, path: &Path, now: DateTime<Utc>) -> Result<GuildSnapshot, StorageError> {
        let snapshot = collect_snapshot(self.store(), guild_id, now)?;
        write_snapshot(&snapshot, path)?;
        info!(
            "exported guild {} ({} players) to {}",
            guild_id,
            snapshot.players.len(),
            path.display()
        );
        Ok(snapshot)
    }

    pub fn import_guild(&self, guild_id: GuildId, path: &Path) -> Result<usize, StorageError> {
        let snapshot = read_snapshot(path)?;
        let restored = restore_snapshot(self.store(), guild_id, &snapshot)?;
        info!("imported {} players into guild {} from {}", restored, guild_id, path.display());
        Ok(restored)
    }

    // ------------------------------------------------------------------
    // Catalog administration
    // ------------------------------------------------------------------

    pub fn add_fruit(
        &self,
        guild_id: GuildId,
        name: &str,
        kind: &str,
        bonus: i64,
        ability: &str,
        price: Option<i64>,
    ) -> Result<FruitDefinition, StorageError> {
        let config = self.guild_config(guild_id)?;
        self.catalog()
            .add_fruit(guild_id, name, kind, bonus, ability, price, &config.price_rules)
    }

    pub fn remove_pool_fruit(&self, guild_id: GuildId, name: &str) -> Result<FruitDefinition, CrewError> {
        self.catalog().remove_fruit(guild_id, name)
    }

    pub fn stock_fruit(&self, guild_id: GuildId, name: &str, stock: Option<u32>) -> Result<ShopEntry, CrewError> {
        self.shop_manager().stock(guild_id, name, stock)
    }

    pub fn unstock_fruit(&self, guild_id: GuildId, name: &str) -> Result<bool, StorageError> {
        self.shop_manager().unstock(guild_id, name)
    }

    pub fn set_price(&self, guild_id: GuildId, name: &str, price: i64) -> Result<FruitDefinition, CrewError> {
        self.catalog().set_price(guild_id, name, price)
    }

    pub fn unlock_price(&self, guild_id: GuildId, name: &str) -> Result<FruitDefinition, CrewError> {
        self.catalog().unlock_price(guild_id, name)
    }

    pub fn reprice(&self, guild_id: GuildId, force: bool) -> Result<usize, StorageError> {
        let config = self.guild_config(guild_id)?;
        self.catalog().reprice(guild_id, &config.price_rules, force)
    }
}
