//! Schema migration for persisted Crew Battles documents.
//!
//! Player and guild documents are stored as JSON and carry a `schema_version`.
//! Older documents are upgraded in two passes: a document-level rewrite for fields
//! that were renamed or reshaped, then a typed fix-up once the document parses into
//! the current struct. Documents written by a newer build are refused rather than
//! silently truncated.
//!
//! # Adding New Migrations
//!
//! 1. Increment the `*_SCHEMA_VERSION` constant in `types.rs`
//! 2. Add an `if from < N` step to the entity's `upgrade_document`
//! 3. Add a test with a literal document of the old shape

use chrono::{DateTime, Utc};
use log::info;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::crew::errors::StorageError;
use crate::crew::progression::apply_exp;
use crate::crew::types::{
    GuildEconomyConfig, HakiStat, PlayerRecord, GUILD_SCHEMA_VERSION, PLAYER_SCHEMA_VERSION,
};

/// Trait for documents that support load-time schema migration
pub trait Migratable: Sized + DeserializeOwned {
    const ENTITY: &'static str;

    fn current_schema_version() -> u8;

    /// Rewrite an older document in place so it parses as the current struct.
    fn upgrade_document(doc: &mut Map<String, Value>, from: u8);

    /// Typed fix-ups after parsing an upgraded document.
    fn finish_upgrade(&mut self, _from: u8) {}

    fn set_schema_version(&mut self, version: u8);

    /// Parse a stored document, upgrading it if needed. The flag reports whether
    /// the returned value differs from what is on disk.
    fn load_document(bytes: &[u8]) -> Result<(Self, bool), StorageError> {
        let value: Value = serde_json::from_slice(bytes)?;
        let Value::Object(mut doc) = value else {
            return Err(StorageError::Internal(format!(
                "{} document is not an object",
                Self::ENTITY
            )));
        };

        // Documents predating versioning count as v1
        let found = doc
            .get("schema_version")
            .and_then(Value::as_u64)
            .map(|v| v.min(u64::from(u8::MAX)) as u8)
            .filter(|v| *v > 0)
            .unwrap_or(1);
        let current = Self::current_schema_version();
        if found > current {
            return Err(StorageError::SchemaMismatch {
                entity: Self::ENTITY,
                expected: current,
                found,
            });
        }

        let migrated = found < current;
        if migrated {
            Self::upgrade_document(&mut doc, found);
        }
        let mut record: Self = serde_json::from_value(Value::Object(doc))?;
        if migrated {
            record.finish_upgrade(found);
            info!(
                "Migrated {} document from schema v{} to v{}",
                Self::ENTITY,
                found,
                current
            );
        }
        record.set_schema_version(current);
        Ok((record, migrated))
    }
}

impl Migratable for PlayerRecord {
    const ENTITY: &'static str = "player";

    fn current_schema_version() -> u8 {
        PLAYER_SCHEMA_VERSION
    }

    /// v1 → v2:
    /// - the single shared `last_haki_train` timestamp becomes one entry per stat
    /// - `conquerors_unlocked` moved into the `haki` object as `conqueror_unlocked`
    /// - an empty `fruit` string meant "no fruit"
    fn upgrade_document(doc: &mut Map<String, Value>, from: u8) {
        if from < 2 {
            if let Some(shared) = doc.remove("last_haki_train") {
                let parsed = shared
                    .as_str()
                    .and_then(|s| s.parse::<DateTime<Utc>>().ok());
                if let Some(at) = parsed {
                    let per_stat: Map<String, Value> = HakiStat::ALL
                        .iter()
                        .map(|stat| (stat.as_str().to_string(), Value::String(at.to_rfc3339())))
                        .collect();
                    doc.insert("last_haki_train_at".to_string(), Value::Object(per_stat));
                }
            }

            if let Some(flag) = doc.remove("conquerors_unlocked") {
                let haki = doc
                    .entry("haki".to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(haki) = haki {
                    haki.entry("conqueror_unlocked".to_string()).or_insert(flag);
                }
            }

            if doc.get("fruit").and_then(Value::as_str) == Some("") {
                doc.insert("fruit".to_string(), Value::Null);
            }
        }
    }

    fn finish_upgrade(&mut self, _from: u8) {
        // Older builds let admins write exp past the curve
        apply_exp(self, 0);
        for stat in HakiStat::ALL {
            let value = self.haki.get_mut(stat);
            *value = (*value).min(crate::crew::types::HAKI_MAX);
        }
    }

    fn set_schema_version(&mut self, version: u8) {
        self.schema_version = version;
    }
}

impl Migratable for GuildEconomyConfig {
    const ENTITY: &'static str = "guild config";

    fn current_schema_version() -> u8 {
        GUILD_SCHEMA_VERSION
    }

    /// v1 → v2: flat `price_min`/`price_max` moved under `price_rules`.
    fn upgrade_document(doc: &mut Map<String, Value>, from: u8) {
        if from < 2 {
            let min = doc.remove("price_min");
            let max = doc.remove("price_max");
            if min.is_some() || max.is_some() {
                let defaults = crate::crew::types::PriceRules::default();
                let rules = doc.entry("price_rules".to_string()).or_insert_with(|| {
                    serde_json::to_value(&defaults).unwrap_or(Value::Object(Map::new()))
                });
                if let Value::Object(rules) = rules {
                    if let Some(min) = min {
                        rules.insert("min".to_string(), min);
                    }
                    if let Some(max) = max {
                        rules.insert("max".to_string(), max);
                    }
                }
            }
        }
    }

    fn set_schema_version(&mut self, version: u8) {
        self.schema_version = version;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_player_document_loads_unchanged() {
        let player = PlayerRecord::started(Utc::now());
        let bytes = serde_json::to_vec(&player).unwrap();
        let (loaded, migrated) = PlayerRecord::load_document(&bytes).unwrap();
        assert!(!migrated);
        assert_eq!(loaded, player);
    }

    #[test]
    fn v1_player_document_is_upgraded() {
        let legacy = r#"{
            "started": true,
            "level": 2,
            "exp": 450,
            "wins": 3,
            "losses": 1,
            "fruit": "",
            "haki": {"armament": 140, "observation": 2},
            "conquerors_unlocked": true,
            "last_haki_train": "2024-05-01T10:00:00Z"
        }"#;
        let (player, migrated) = PlayerRecord::load_document(legacy.as_bytes()).unwrap();
        assert!(migrated);
        assert_eq!(player.schema_version, PLAYER_SCHEMA_VERSION);
        assert_eq!(player.fruit, None);
        assert!(player.haki.conqueror_unlocked);
        assert_eq!(player.haki.armament, 100);
        assert_eq!(player.last_haki_train_at.len(), 3);
        // 450 at level 2 crosses the 200 requirement once
        assert_eq!(player.level, 3);
        assert_eq!(player.exp, 250);
    }

    #[test]
    fn newer_document_is_refused() {
        let doc = format!(r#"{{"started": true, "schema_version": {}}}"#, PLAYER_SCHEMA_VERSION + 1);
        let err = PlayerRecord::load_document(doc.as_bytes()).unwrap_err();
        assert!(matches!(err, StorageError::SchemaMismatch { .. }));
    }

    #[test]
    fn v1_guild_config_moves_price_bounds() {
        let legacy = r#"{"price_min": 1000, "price_max": 9000, "haki_cost": 250}"#;
        let (config, migrated) = GuildEconomyConfig::load_document(legacy.as_bytes()).unwrap();
        assert!(migrated);
        assert_eq!(config.price_rules.min, 1_000);
        assert_eq!(config.price_rules.max, 9_000);
        assert_eq!(config.haki_cost, 250);
        assert!(!config.price_rules.base.is_empty());
    }
}
