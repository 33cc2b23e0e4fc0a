//! # Crew Battles - progression and duel engine
//!
//! Crew Battles is the game core behind a chat-driven role-playing feature: players
//! start a character, buy or roll a devil fruit, train haki, earn and spend beri,
//! and fight turn-based duels that permanently change both records.
//!
//! ## Features
//!
//! - **Persistent records**: per-guild player documents in Sled with load-time schema migration.
//! - **Progression**: `level × 100` experience curve capped at level 100.
//! - **Fruit shop**: a per-guild fruit pool, a stocked shop subset, rule-based pricing with admin locks.
//! - **Haki**: three stats with per-stat cooldowns and costs and a level-gated conqueror unlock.
//! - **Duels**: seeded turn-based battles streamed turn by turn over a tokio channel.
//! - **Economy**: a shared bank file ledger with a local Sled fallback ledger.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use crewbattles::crew::{CrewBattles, CrewStore, Economy, LocalLedger, GuildEconomyConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(CrewStore::open("./data/crewbattles.db")?);
//!     let economy = Economy::local_only(LocalLedger::new(store.clone()));
//!     let crew = CrewBattles::new(store, economy, GuildEconomyConfig::default());
//!
//!     let now = chrono::Utc::now();
//!     crew.start(1, 100, now)?;
//!     crew.start(1, 200, now)?;
//!     let report = crew.challenge(1, 42, 100, 200, now, None).await?;
//!     println!("{} won in {} turns", report.winner_id, report.outcome.turns);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`crew`] - game core: records, shop, haki, battles, guard, economy, admin
//! - [`config`] - TOML configuration for the binary
//! - [`metrics`] - process-wide battle and economy counters

pub mod config;
pub mod crew;
pub mod metrics;
