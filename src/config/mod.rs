//! # Configuration Management Module
//!
//! TOML configuration for the `crewbattles` binary and for embedding the service.
//!
//! ## Configuration Structure
//!
//! - [`StorageConfig`] - where the Sled database lives
//! - [`LoggingConfig`] - log level and optional log file
//! - [`EconomyConfig`] - optional shared bank file used as the primary ledger
//! - [`BattleConfig`] - optional fixed seed for reproducible battles
//! - `defaults` - a full [`GuildEconomyConfig`] for guilds without a stored config
//!
//! ## Usage
//!
//! ```rust,no_run
//! use crewbattles::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Config::create_default("config.toml").await?;
//!     let config = Config::load("config.toml").await?;
//!     println!("Database: {}", config.db_path().display());
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [storage]
//! data_dir = "./data"
//! database = "crewbattles.db"
//!
//! [logging]
//! level = "info"
//! file = "crewbattles.log"
//!
//! [economy]
//! bank_file = "/srv/bank/accounts.json"
//!
//! [battle]
//! seed = 42
//!
//! [defaults]
//! haki_cost = 500
//! turn_delay_ms = 1500
//! ```

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

use crate::crew::types::GuildEconomyConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub economy: EconomyConfig,
    #[serde(default)]
    pub battle: BattleConfig,
    /// Economy settings for guilds that have no stored config
    #[serde(default)]
    pub defaults: GuildEconomyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
    /// Sled directory, relative to `data_dir` unless absolute
    #[serde(default = "default_database")]
    pub database: String,
}

fn default_database() -> String {
    "crewbattles.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            database: default_database(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("crewbattles.log".to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EconomyConfig {
    /// Shared bank file; when unset only the local ledger is used
    #[serde(default)]
    pub bank_file: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BattleConfig {
    /// Fixed master seed. Unset means seeded from OS entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Reject settings the game cannot run with.
    pub fn validate(&self) -> Result<()> {
        let defaults = &self.defaults;
        let rules = &defaults.price_rules;
        if rules.min < 0 || rules.min > rules.max {
            bail!(
                "defaults.price_rules: min ({}) must be >= 0 and <= max ({})",
                rules.min,
                rules.max
            );
        }
        if !(0.0..=1.0).contains(&defaults.starter_fruit_chance) {
            bail!(
                "defaults.starter_fruit_chance must be within 0..=1 (got {})",
                defaults.starter_fruit_chance
            );
        }
        if defaults.haki_cost < 0 || defaults.haki_costs.values().any(|cost| *cost < 0) {
            bail!("defaults: haki costs must not be negative");
        }
        if defaults.haki_cooldown_secs < 0 || defaults.battle_cooldown_secs < 0 {
            bail!("defaults: cooldowns must not be negative");
        }
        if self.storage.data_dir.trim().is_empty() {
            bail!("storage.data_dir must not be empty");
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        let database = PathBuf::from(&self.storage.database);
        if database.is_absolute() {
            database
        } else {
            PathBuf::from(&self.storage.data_dir).join(database)
        }
    }
}
