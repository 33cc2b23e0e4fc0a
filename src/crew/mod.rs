//! Crew Battles game core.
//! Player records, the experience curve, the fruit pool and shop, haki
//! training, turn-based duels, the channel guard and the economy boundary, all
//! persisted in one Sled store and driven through [`CrewBattles`].

pub mod admin;
pub mod battle;
pub mod catalog;
pub mod economy;
pub mod errors;
pub mod guard;
pub mod haki;
pub mod migration;
pub mod progression;
pub mod seed;
pub mod service;
pub mod shop;
pub mod storage;
pub mod types;

pub use admin::{collect_snapshot, read_snapshot, restore_snapshot, write_snapshot, GuildSnapshot, WipeSummary};
pub use battle::{simulate, BattleEvent, BattleOutcome, BattleSession, Combatant, Side};
pub use catalog::{compute_price, FruitCatalog};
pub use economy::{BankTransaction, Economy, EconomyPort, FileBankLedger, LocalLedger};
pub use errors::{CrewError, EconomyError, LockReason, StorageError};
pub use guard::{BattleReservation, ChannelGuard};
pub use haki::HakiTrainer;
pub use migration::Migratable;
pub use progression::{apply_exp, exp_to_next, set_level};
pub use service::{BattleReport, CrewBattles, LeaderboardEntry, Profile, RewardFailure, StartReport};
pub use shop::{ShopListing, ShopManager};
pub use storage::{CrewStore, CrewStoreBuilder, LedgerTransaction};
pub use types::*;
