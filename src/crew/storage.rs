use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use sled::IVec;

use crate::crew::errors::StorageError;
use crate::crew::migration::Migratable;
use crate::crew::types::{
    fruit_key, FruitDefinition, GuildEconomyConfig, GuildId, PlayerId, PlayerRecord, ShopEntry,
    GUILD_SCHEMA_VERSION, PLAYER_SCHEMA_VERSION,
};

const TREE_PLAYERS: &str = "crew_players";
const TREE_GUILDS: &str = "crew_guilds";
const TREE_POOL: &str = "crew_pool";
const TREE_SHOP: &str = "crew_shop";
const TREE_LEDGER: &str = "crew_ledger";
const TREE_LEDGER_LOG: &str = "crew_ledger_log";

/// One entry of the local ledger's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerTransaction {
    pub id: String,
    /// Unix timestamp in milliseconds
    pub timestamp_ms: i64,
    pub guild_id: GuildId,
    pub player_id: PlayerId,
    pub delta: i64,
    pub balance_after: i64,
    /// Opaque audit text supplied by the caller
    pub reason: String,
}

/// Helper builder so tests can easily create throwaway stores with custom paths.
pub struct CrewStoreBuilder {
    path: PathBuf,
    migrate_on_open: bool,
}

impl CrewStoreBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            migrate_on_open: true,
        }
    }

    /// Skip the load-time migration sweep (documents are still upgraded on read).
    pub fn without_migration(mut self) -> Self {
        self.migrate_on_open = false;
        self
    }

    pub fn open(self) -> Result<CrewStore, StorageError> {
        CrewStore::open_with_options(self.path, self.migrate_on_open)
    }
}

/// Sled-backed persistence for player, guild, catalog and ledger documents.
///
/// Reads hand out owned copies and writes serialize the caller's value, so no two
/// holders ever share one in-memory record.
pub struct CrewStore {
    db: sled::Db,
    players: sled::Tree,
    guilds: sled::Tree,
    pool: sled::Tree,
    shop: sled::Tree,
    ledger: sled::Tree,
    ledger_log: sled::Tree,
}

impl CrewStore {
    /// Open (or create) the store rooted at `path` and upgrade outdated documents.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::open_with_options(path, true)
    }

    fn open_with_options<P: AsRef<Path>>(path: P, migrate: bool) -> Result<Self, StorageError> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::open(path_ref)?;
        let store = Self {
            players: db.open_tree(TREE_PLAYERS)?,
            guilds: db.open_tree(TREE_GUILDS)?,
            pool: db.open_tree(TREE_POOL)?,
            shop: db.open_tree(TREE_SHOP)?,
            ledger: db.open_tree(TREE_LEDGER)?,
            ledger_log: db.open_tree(TREE_LEDGER_LOG)?,
            db,
        };

        if migrate {
            let upgraded = store.migrate_outdated_documents()?;
            if upgraded > 0 {
                info!("Upgraded {} stored documents to the current schema", upgraded);
            }
        }

        Ok(store)
    }

    fn guild_prefix(guild_id: GuildId) -> Vec<u8> {
        format!("{}:", guild_id).into_bytes()
    }

    fn player_key(guild_id: GuildId, player_id: PlayerId) -> Vec<u8> {
        format!("{}:{}", guild_id, player_id).into_bytes()
    }

    fn fruit_tree_key(guild_id: GuildId, name: &str) -> Vec<u8> {
        format!("{}:{}", guild_id, fruit_key(name)).into_bytes()
    }

    fn guild_key(guild_id: GuildId) -> Vec<u8> {
        guild_id.to_string().into_bytes()
    }

    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode<T: serde::de::DeserializeOwned>(bytes: IVec) -> Result<T, StorageError> {
        Ok(serde_json::from_slice::<T>(&bytes)?)
    }

    fn parse_player_id(key: &[u8], prefix: &[u8]) -> Option<PlayerId> {
        let rest = key.strip_prefix(prefix)?;
        std::str::from_utf8(rest).ok()?.parse().ok()
    }

    /// Rewrite every player and guild document older than the current schema.
    pub fn migrate_outdated_documents(&self) -> Result<usize, StorageError> {
        let mut upgraded = 0usize;
        for entry in self.players.iter() {
            let (key, bytes) = entry?;
            let (record, migrated) = PlayerRecord::load_document(&bytes)?;
            if migrated {
                self.players.insert(key, Self::encode(&record)?)?;
                upgraded += 1;
            }
        }
        for entry in self.guilds.iter() {
            let (key, bytes) = entry?;
            let (config, migrated) = GuildEconomyConfig::load_document(&bytes)?;
            if migrated {
                self.guilds.insert(key, Self::encode(&config)?)?;
                upgraded += 1;
            }
        }
        if upgraded > 0 {
            self.db.flush()?;
        }
        Ok(upgraded)
    }

    pub fn size_on_disk(&self) -> Result<u64, StorageError> {
        Ok(self.db.size_on_disk()?)
    }

    // ------------------------------------------------------------------
    // Players
    // ------------------------------------------------------------------

    /// Fetch a player record, or a fresh default (not persisted) when absent.
    pub fn get_player(
        &self,
        guild_id: GuildId,
        player_id: PlayerId,
    ) -> Result<PlayerRecord, StorageError> {
        Ok(self
            .find_player(guild_id, player_id)?
            .unwrap_or_default())
    }

    /// Fetch a player record only if one has been stored.
    pub fn find_player(
        &self,
        guild_id: GuildId,
        player_id: PlayerId,
    ) -> Result<Option<PlayerRecord>, StorageError> {
        let key = Self::player_key(guild_id, player_id);
        let Some(bytes) = self.players.get(&key)? else {
            return Ok(None);
        };
        let (record, _) = PlayerRecord::load_document(&bytes)?;
        Ok(Some(record))
    }

    /// Overwrite the whole player document.
    pub fn save_player(
        &self,
        guild_id: GuildId,
        player_id: PlayerId,
        record: &PlayerRecord,
    ) -> Result<(), StorageError> {
        let mut record = record.clone();
        record.schema_version = PLAYER_SCHEMA_VERSION;
        record.touch();
        let key = Self::player_key(guild_id, player_id);
        self.players.insert(key, Self::encode(&record)?)?;
        self.players.flush()?;
        Ok(())
    }

    /// Every stored player of a guild.
    pub fn all_players(
        &self,
        guild_id: GuildId,
    ) -> Result<BTreeMap<PlayerId, PlayerRecord>, StorageError> {
        let prefix = Self::guild_prefix(guild_id);
        let mut players = BTreeMap::new();
        for entry in self.players.scan_prefix(&prefix) {
            let (key, bytes) = entry?;
            let Some(player_id) = Self::parse_player_id(&key, &prefix) else {
                debug!("skipping malformed player key {:?}", String::from_utf8_lossy(&key));
                continue;
            };
            let (record, _) = PlayerRecord::load_document(&bytes)?;
            players.insert(player_id, record);
        }
        Ok(players)
    }

    pub fn delete_player(&self, guild_id: GuildId, player_id: PlayerId) -> Result<bool, StorageError> {
        let removed = self.players.remove(Self::player_key(guild_id, player_id))?;
        self.players.flush()?;
        Ok(removed.is_some())
    }

    /// Remove every player document of a guild. Returns the number removed.
    pub fn clear_players(&self, guild_id: GuildId) -> Result<usize, StorageError> {
        Self::clear_prefix(&self.players, &Self::guild_prefix(guild_id))
    }

    fn clear_prefix(tree: &sled::Tree, prefix: &[u8]) -> Result<usize, StorageError> {
        let keys: Result<Vec<_>, _> = tree
            .scan_prefix(prefix)
            .map(|result| result.map(|(key, _value)| key))
            .collect();
        let keys = keys?;
        for key in keys.iter() {
            tree.remove(key)?;
        }
        tree.flush()?;
        Ok(keys.len())
    }

    // ------------------------------------------------------------------
    // Guild configuration
    // ------------------------------------------------------------------

    /// Stored guild config, or `defaults` when the guild has none.
    pub fn guild_config(
        &self,
        guild_id: GuildId,
        defaults: &GuildEconomyConfig,
    ) -> Result<GuildEconomyConfig, StorageError> {
        let Some(bytes) = self.guilds.get(Self::guild_key(guild_id))? else {
            return Ok(defaults.clone());
        };
        let (config, _) = GuildEconomyConfig::load_document(&bytes)?;
        Ok(config)
    }

    pub fn put_guild_config(
        &self,
        guild_id: GuildId,
        config: &GuildEconomyConfig,
    ) -> Result<(), StorageError> {
        let mut config = config.clone();
        config.schema_version = GUILD_SCHEMA_VERSION;
        self.guilds
            .insert(Self::guild_key(guild_id), Self::encode(&config)?)?;
        self.guilds.flush()?;
        Ok(())
    }

    pub fn delete_guild_config(&self, guild_id: GuildId) -> Result<bool, StorageError> {
        let removed = self.guilds.remove(Self::guild_key(guild_id))?;
        self.guilds.flush()?;
        Ok(removed.is_some())
    }

    /// Guild ids that have a stored config.
    pub fn list_guild_ids(&self) -> Result<Vec<GuildId>, StorageError> {
        let mut ids = Vec::new();
        for entry in self.guilds.iter() {
            let (key, _) = entry?;
            if let Some(id) = std::str::from_utf8(&key).ok().and_then(|s| s.parse().ok()) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Guilds with a stored config or at least one player.
    pub fn known_guilds(&self) -> Result<BTreeSet<GuildId>, StorageError> {
        let mut guilds: BTreeSet<GuildId> = self.list_guild_ids()?.into_iter().collect();
        for entry in self.players.iter() {
            let (key, _) = entry?;
            let guild = std::str::from_utf8(&key)
                .ok()
                .and_then(|k| k.split(':').next())
                .and_then(|g| g.parse().ok());
            if let Some(guild) = guild {
                guilds.insert(guild);
            }
        }
        Ok(guilds)
    }

    // ------------------------------------------------------------------
    // Fruit pool and shop
    // ------------------------------------------------------------------

    pub fn get_fruit(
        &self,
        guild_id: GuildId,
        name: &str,
    ) -> Result<Option<FruitDefinition>, StorageError> {
        self.pool
            .get(Self::fruit_tree_key(guild_id, name))?
            .map(Self::decode)
            .transpose()
    }

    pub fn put_fruit(&self, guild_id: GuildId, fruit: &FruitDefinition) -> Result<(), StorageError> {
        self.pool
            .insert(Self::fruit_tree_key(guild_id, &fruit.name), Self::encode(fruit)?)?;
        self.pool.flush()?;
        Ok(())
    }

    pub fn remove_fruit(&self, guild_id: GuildId, name: &str) -> Result<bool, StorageError> {
        let removed = self.pool.remove(Self::fruit_tree_key(guild_id, name))?;
        self.pool.flush()?;
        Ok(removed.is_some())
    }

    /// The whole pool of a guild, ordered by lowercase name.
    pub fn list_pool(&self, guild_id: GuildId) -> Result<Vec<FruitDefinition>, StorageError> {
        self.pool
            .scan_prefix(Self::guild_prefix(guild_id))
            .map(|result| {
                result
                    .map_err(StorageError::from)
                    .and_then(|(_key, value)| Self::decode(value))
            })
            .collect()
    }

    pub fn pool_is_empty(&self, guild_id: GuildId) -> Result<bool, StorageError> {
        Ok(self
            .pool
            .scan_prefix(Self::guild_prefix(guild_id))
            .next()
            .transpose()?
            .is_none())
    }

    pub fn get_shop_entry(
        &self,
        guild_id: GuildId,
        name: &str,
    ) -> Result<Option<ShopEntry>, StorageError> {
        self.shop
            .get(Self::fruit_tree_key(guild_id, name))?
            .map(Self::decode)
            .transpose()
    }

    pub fn put_shop_entry(&self, guild_id: GuildId, entry: &ShopEntry) -> Result<(), StorageError> {
        self.shop
            .insert(Self::fruit_tree_key(guild_id, &entry.name), Self::encode(entry)?)?;
        self.shop.flush()?;
        Ok(())
    }

    pub fn remove_shop_entry(&self, guild_id: GuildId, name: &str) -> Result<bool, StorageError> {
        let removed = self.shop.remove(Self::fruit_tree_key(guild_id, name))?;
        self.shop.flush()?;
        Ok(removed.is_some())
    }

    /// Remove the pool and shop of a guild. Returns the number of pool entries removed.
    pub fn clear_catalog(&self, guild_id: GuildId) -> Result<usize, StorageError> {
        let prefix = Self::guild_prefix(guild_id);
        Self::clear_prefix(&self.shop, &prefix)?;
        Self::clear_prefix(&self.pool, &prefix)
    }

    pub fn list_shop(&self, guild_id: GuildId) -> Result<Vec<ShopEntry>, StorageError> {
        self.shop
            .scan_prefix(Self::guild_prefix(guild_id))
            .map(|result| {
                result
                    .map_err(StorageError::from)
                    .and_then(|(_key, value)| Self::decode(value))
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Local ledger
    // ------------------------------------------------------------------

    fn decode_balance(bytes: &[u8]) -> i64 {
        let mut buf = [0u8; 8];
        if bytes.len() == buf.len() {
            buf.copy_from_slice(bytes);
        }
        i64::from_be_bytes(buf)
    }

    pub fn ledger_balance(&self, guild_id: GuildId, player_id: PlayerId) -> Result<i64, StorageError> {
        Ok(self
            .ledger
            .get(Self::player_key(guild_id, player_id))?
            .map(|bytes| Self::decode_balance(&bytes))
            .unwrap_or(0))
    }

    /// Apply `delta` to a ledger balance unless it would go negative or overflow.
    /// Returns the new balance when applied, `None` when refused.
    pub fn adjust_ledger_balance(
        &self,
        guild_id: GuildId,
        player_id: PlayerId,
        delta: i64,
    ) -> Result<Option<i64>, StorageError> {
        let key = Self::player_key(guild_id, player_id);
        let mut applied = false;
        let updated = self.ledger.update_and_fetch(&key, |old| {
            let current = old.map(Self::decode_balance).unwrap_or(0);
            match current.checked_add(delta) {
                Some(next) if next >= 0 => {
                    applied = true;
                    Some(next.to_be_bytes().to_vec())
                }
                _ => {
                    applied = false;
                    old.map(|bytes| bytes.to_vec())
                }
            }
        })?;
        self.ledger.flush()?;
        if !applied {
            return Ok(None);
        }
        Ok(Some(updated.map(|bytes| Self::decode_balance(&bytes)).unwrap_or(0)))
    }

    pub fn append_ledger_transaction(&self, tx: &LedgerTransaction) -> Result<(), StorageError> {
        let key = format!(
            "{}:{}:{:020}:{}",
            tx.guild_id,
            tx.player_id,
            tx.timestamp_ms.max(0),
            tx.id
        )
        .into_bytes();
        self.ledger_log.insert(key, bincode::serialize(tx)?)?;
        self.ledger_log.flush()?;
        Ok(())
    }

    /// Audit trail of one player, oldest first.
    pub fn ledger_transactions(
        &self,
        guild_id: GuildId,
        player_id: PlayerId,
    ) -> Result<Vec<LedgerTransaction>, StorageError> {
        let prefix = format!("{}:{}:", guild_id, player_id);
        self.ledger_log
            .scan_prefix(prefix.as_bytes())
            .map(|result| {
                let (_key, value) = result?;
                Ok(bincode::deserialize::<LedgerTransaction>(&value)?)
            })
            .collect()
    }

    /// Drop all ledger balances and audit entries of a guild (full wipe).
    pub fn clear_ledger(&self, guild_id: GuildId) -> Result<usize, StorageError> {
        let prefix = Self::guild_prefix(guild_id);
        Self::clear_prefix(&self.ledger_log, &prefix)?;
        Self::clear_prefix(&self.ledger, &prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crew::types::FruitType;
    use chrono::Utc;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> CrewStore {
        CrewStoreBuilder::new(dir.path()).open().expect("store")
    }

    #[test]
    fn missing_player_reads_as_default_without_writing() {
        let dir = TempDir::new().expect("tempdir");
        let store = open_store(&dir);
        let player = store.get_player(1, 42).expect("get");
        assert!(!player.started);
        assert_eq!(player.level, 1);
        assert!(store.find_player(1, 42).expect("find").is_none());
        assert!(store.all_players(1).expect("all").is_empty());
    }

    #[test]
    fn store_round_trip_player() {
        let dir = TempDir::new().expect("tempdir");
        let store = open_store(&dir);
        let mut player = PlayerRecord::started(Utc::now());
        player.wins = 7;
        player.fruit = Some("Mera Mera".to_string());
        store.save_player(1, 42, &player).expect("save");

        // Mutating the caller's copy must not leak into storage
        player.wins = 99;
        let fetched = store.get_player(1, 42).expect("get");
        assert_eq!(fetched.wins, 7);
        assert_eq!(fetched.fruit.as_deref(), Some("Mera Mera"));
        assert_eq!(fetched.schema_version, PLAYER_SCHEMA_VERSION);
    }

    #[test]
    fn all_players_is_guild_scoped() {
        let dir = TempDir::new().expect("tempdir");
        let store = open_store(&dir);
        let player = PlayerRecord::started(Utc::now());
        store.save_player(1, 10, &player).expect("save");
        store.save_player(1, 11, &player).expect("save");
        store.save_player(12, 10, &player).expect("save");

        let guild_one = store.all_players(1).expect("all");
        assert_eq!(guild_one.keys().copied().collect::<Vec<_>>(), vec![10, 11]);
        assert_eq!(store.all_players(12).expect("all").len(), 1);

        assert_eq!(store.clear_players(1).expect("clear"), 2);
        assert!(store.all_players(1).expect("all").is_empty());
        assert_eq!(store.all_players(12).expect("all").len(), 1);
    }

    #[test]
    fn legacy_documents_are_migrated_on_open() {
        let dir = TempDir::new().expect("tempdir");
        {
            let store = CrewStoreBuilder::new(dir.path())
                .without_migration()
                .open()
                .expect("store");
            store
                .players
                .insert(
                    CrewStore::player_key(5, 6),
                    br#"{"started":true,"level":1,"exp":0,"fruit":""}"#.to_vec(),
                )
                .expect("raw insert");
            store.players.flush().expect("flush");
        }
        let store = open_store(&dir);
        let raw = store
            .players
            .get(CrewStore::player_key(5, 6))
            .expect("get")
            .expect("present");
        let doc: serde_json::Value = serde_json::from_slice(&raw).expect("json");
        assert_eq!(doc["schema_version"], PLAYER_SCHEMA_VERSION);
        assert!(doc["fruit"].is_null());
    }

    #[test]
    fn pool_keys_are_case_insensitive() {
        let dir = TempDir::new().expect("tempdir");
        let store = open_store(&dir);
        let fruit = FruitDefinition::new("Hie Hie", FruitType::Logia, 9, "ice");
        store.put_fruit(3, &fruit).expect("put");
        assert!(store.get_fruit(3, "hie hie").expect("get").is_some());
        assert!(store.get_fruit(3, "  HIE HIE ").expect("get").is_some());
        assert!(store.get_fruit(4, "hie hie").expect("get").is_none());
        assert!(!store.pool_is_empty(3).expect("empty"));
        assert!(store.remove_fruit(3, "HIE HIE").expect("remove"));
        assert!(store.pool_is_empty(3).expect("empty"));
    }

    #[test]
    fn ledger_refuses_negative_balances() {
        let dir = TempDir::new().expect("tempdir");
        let store = open_store(&dir);
        assert_eq!(store.adjust_ledger_balance(1, 1, 500).expect("credit"), Some(500));
        assert_eq!(store.adjust_ledger_balance(1, 1, -200).expect("debit"), Some(300));
        assert_eq!(store.adjust_ledger_balance(1, 1, -301).expect("debit"), None);
        assert_eq!(store.ledger_balance(1, 1).expect("balance"), 300);
        assert_eq!(store.ledger_balance(1, 2).expect("balance"), 0);
    }
}
