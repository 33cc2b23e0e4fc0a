//! The Crew Battles service.
//!
//! One `CrewBattles` value owns the store, the economy, the channel guard and the
//! random source. Command handlers hold it behind an `Arc` and call one method per
//! command; every method returns a `CrewError` the caller renders.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::crew::battle::{BattleEvent, BattleOutcome, BattleSession, Combatant, Side};
use crate::crew::catalog::FruitCatalog;
use crate::crew::economy::{Economy, EconomyPort, FileBankLedger, LocalLedger};
use crate::crew::errors::{CrewError, StorageError};
use crate::crew::guard::ChannelGuard;
use crate::crew::haki::HakiTrainer;
use crate::crew::progression::{apply_exp, exp_to_next};
use crate::crew::shop::{ShopListing, ShopManager};
use crate::crew::storage::CrewStore;
use crate::crew::types::{
    ChannelId, FruitDefinition, GuildEconomyConfig, GuildId, HakiStat, PlayerId, PlayerRecord,
};
use crate::metrics;

/// Result of starting a character.
#[derive(Debug, Clone)]
pub struct StartReport {
    pub record: PlayerRecord,
    pub starter_fruit: Option<FruitDefinition>,
    pub starting_beri: i64,
    /// Set when the starting grant could not be paid
    pub reward_failure: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RewardFailure {
    pub player_id: PlayerId,
    pub amount: i64,
    pub error: String,
}

/// Everything a resolved duel changed.
#[derive(Debug, Clone)]
pub struct BattleReport {
    pub winner_id: PlayerId,
    pub loser_id: PlayerId,
    pub outcome: BattleOutcome,
    pub winner_exp: u64,
    pub loser_exp: u64,
    pub winner_levels_gained: u32,
    pub loser_levels_gained: u32,
    pub winner_beri: i64,
    pub loser_beri: i64,
    /// Currency rewards that failed; experience and counters were still applied
    pub reward_failures: Vec<RewardFailure>,
    /// Players reset while the battle ran. Neither their result nor their reward
    /// was applied.
    pub dropped_results: Vec<PlayerId>,
}

#[derive(Debug, Clone)]
pub struct Profile {
    pub player_id: PlayerId,
    pub record: PlayerRecord,
    /// Equipped fruit, if it still exists in the pool
    pub fruit: Option<FruitDefinition>,
    pub max_hp: i64,
    /// 0 at the level cap
    pub exp_to_next: u64,
    pub balance: i64,
    pub battle_cooldown: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardEntry {
    /// 1-based
    pub rank: usize,
    pub player_id: PlayerId,
    pub level: u32,
    pub wins: u32,
    pub losses: u32,
}

pub struct CrewBattles {
    store: Arc<CrewStore>,
    economy: Economy,
    guard: Arc<ChannelGuard>,
    catalog: FruitCatalog,
    shop: ShopManager,
    haki: HakiTrainer,
    defaults: GuildEconomyConfig,
    rng: Mutex<StdRng>,
}

impl CrewBattles {
    pub fn new(store: Arc<CrewStore>, economy: Economy, defaults: GuildEconomyConfig) -> Self {
        Self {
            catalog: FruitCatalog::new(Arc::clone(&store)),
            shop: ShopManager::new(Arc::clone(&store)),
            haki: HakiTrainer::new(Arc::clone(&store)),
            store,
            economy,
            guard: Arc::new(ChannelGuard::new()),
            defaults,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Open the store and economy described by `config`.
    pub fn from_config(config: &Config) -> Result<Self, StorageError> {
        let store = Arc::new(CrewStore::open(config.db_path())?);
        let local = LocalLedger::new(Arc::clone(&store));
        let economy = match &config.economy.bank_file {
            Some(path) => {
                info!("Using bank file ledger at {} with local fallback", path);
                Economy::with_primary(Box::new(FileBankLedger::new(path)), local)
            }
            None => Economy::local_only(local),
        };
        let crew = Self::new(store, economy, config.defaults.clone());
        Ok(match config.battle.seed {
            Some(seed) => crew.with_seed(seed),
            None => crew,
        })
    }

    /// Reseed the master random source for reproducible runs.
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    pub fn store(&self) -> &Arc<CrewStore> {
        &self.store
    }

    pub fn economy(&self) -> &Economy {
        &self.economy
    }

    pub fn guard(&self) -> &Arc<ChannelGuard> {
        &self.guard
    }

    pub fn catalog(&self) -> &FruitCatalog {
        &self.catalog
    }

    pub fn shop_manager(&self) -> &ShopManager {
        &self.shop
    }

    pub fn defaults(&self) -> &GuildEconomyConfig {
        &self.defaults
    }

    fn master_rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Independent generator for one battle so concurrent battles never share state.
    fn battle_rng(&self) -> StdRng {
        StdRng::seed_from_u64(self.master_rng().gen())
    }

    // ------------------------------------------------------------------
    // Guild configuration
    // ------------------------------------------------------------------

    pub fn guild_config(&self, guild_id: GuildId) -> Result<GuildEconomyConfig, StorageError> {
        self.store.guild_config(guild_id, &self.defaults)
    }

    pub fn set_guild_config(&self, guild_id: GuildId, config: &GuildEconomyConfig) -> Result<(), StorageError> {
        self.store.put_guild_config(guild_id, config)
    }

    /// Config of the guild with its default pool installed.
    fn prepare_guild(&self, guild_id: GuildId) -> Result<GuildEconomyConfig, StorageError> {
        let config = self.guild_config(guild_id)?;
        self.catalog.ensure_seeded(guild_id, &config.price_rules)?;
        Ok(config)
    }

    // ------------------------------------------------------------------
    // Player commands
    // ------------------------------------------------------------------

    pub fn start(&self, guild_id: GuildId, player_id: PlayerId, now: DateTime<Utc>) -> Result<StartReport, CrewError> {
        let config = self.prepare_guild(guild_id)?;
        if self.store.get_player(guild_id, player_id)?.started {
            return Err(CrewError::AlreadyStarted);
        }

        let mut record = PlayerRecord::started(now);
        let starter_fruit = {
            let mut rng = self.master_rng();
            self.catalog
                .draw_starter(guild_id, config.starter_fruit_chance, &mut *rng)?
        };
        record.fruit = starter_fruit.as_ref().map(|fruit| fruit.name.clone());
        self.store.save_player(guild_id, player_id, &record)?;

        let reward_failure = match self
            .economy
            .credit(guild_id, player_id, config.starting_beri, "starting beri")
        {
            Ok(()) => None,
            Err(e) => {
                error!("starting beri for {} in guild {} failed: {}", player_id, guild_id, e);
                metrics::inc_reward_failures();
                Some(e.to_string())
            }
        };

        info!(
            "player {} started in guild {}{}",
            player_id,
            guild_id,
            starter_fruit
                .as_ref()
                .map(|f| format!(" with starter fruit {}", f.name))
                .unwrap_or_default()
        );
        Ok(StartReport {
            record,
            starter_fruit,
            starting_beri: config.starting_beri,
            reward_failure,
        })
    }

    pub fn shop(&self, guild_id: GuildId) -> Result<Vec<ShopListing>, CrewError> {
        self.prepare_guild(guild_id)?;
        Ok(self.shop.listings(guild_id)?)
    }

    pub fn buy(&self, guild_id: GuildId, player_id: PlayerId, fruit: &str) -> Result<FruitDefinition, CrewError> {
        self.prepare_guild(guild_id)?;
        self.shop.buy(&self.economy, guild_id, player_id, fruit)
    }

    pub fn remove_fruit(&self, guild_id: GuildId, player_id: PlayerId) -> Result<String, CrewError> {
        self.shop.remove_fruit(guild_id, player_id)
    }

    pub fn train(
        &self,
        guild_id: GuildId,
        player_id: PlayerId,
        stat: HakiStat,
        now: DateTime<Utc>,
    ) -> Result<u32, CrewError> {
        let config = self.guild_config(guild_id)?;
        self.haki
            .train(&self.economy, guild_id, player_id, stat, &config, now)
    }

    pub fn unlock_conqueror(&self, guild_id: GuildId, player_id: PlayerId) -> Result<(), CrewError> {
        let config = self.guild_config(guild_id)?;
        self.haki
            .unlock_conqueror(&self.economy, guild_id, player_id, &config)
    }

    pub fn balance(&self, guild_id: GuildId, player_id: PlayerId) -> Result<i64, CrewError> {
        Ok(self.economy.balance(guild_id, player_id)?)
    }

    pub fn profile(&self, guild_id: GuildId, player_id: PlayerId, now: DateTime<Utc>) -> Result<Profile, CrewError> {
        let record = self.store.get_player(guild_id, player_id)?;
        if !record.started {
            return Err(CrewError::NotStarted);
        }
        let fruit = self.resolve_fruit(guild_id, &record)?;
        Ok(Profile {
            player_id,
            max_hp: crate::crew::battle::max_hp(record.level),
            exp_to_next: exp_to_next(record.level),
            balance: self.economy.balance(guild_id, player_id)?,
            battle_cooldown: record.battle_cooldown_remaining(now),
            fruit,
            record,
        })
    }

    /// Started players by wins desc, then level desc, then losses asc.
    pub fn leaderboard(&self, guild_id: GuildId, limit: usize) -> Result<Vec<LeaderboardEntry>, CrewError> {
        let mut players: Vec<(PlayerId, PlayerRecord)> = self
            .store
            .all_players(guild_id)?
            .into_iter()
            .filter(|(_, record)| record.started)
            .collect();
        players.sort_by(|(a_id, a), (b_id, b)| {
            b.wins
                .cmp(&a.wins)
                .then(b.level.cmp(&a.level))
                .then(a.losses.cmp(&b.losses))
                .then(a_id.cmp(b_id))
        });
        Ok(players
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, (player_id, record))| LeaderboardEntry {
                rank: i + 1,
                player_id,
                level: record.level,
                wins: record.wins,
                losses: record.losses,
            })
            .collect())
    }

    fn resolve_fruit(&self, guild_id: GuildId, record: &PlayerRecord) -> Result<Option<FruitDefinition>, StorageError> {
        let Some(name) = record.fruit.as_deref() else {
            return Ok(None);
        };
        let fruit = self.store.get_fruit(guild_id, name)?;
        if fruit.is_none() {
            debug!("equipped fruit {:?} no longer in pool of guild {}", name, guild_id);
        }
        Ok(fruit)
    }

    // ------------------------------------------------------------------
    // Battles
    // ------------------------------------------------------------------

    fn load_combatant(&self, guild_id: GuildId, player_id: PlayerId, now: DateTime<Utc>) -> Result<Combatant, CrewError> {
        let record = self.store.get_player(guild_id, player_id)?;
        if !record.started {
            return Err(CrewError::NotStarted);
        }
        if let Some(remaining) = record.battle_cooldown_remaining(now) {
            return Err(CrewError::OnCooldown { remaining });
        }
        let fruit = self.resolve_fruit(guild_id, &record)?;
        Ok(Combatant::from_record(player_id, &record, fruit.as_ref()))
    }

    /// Run a duel in `channel_id`. The challenger is side A and opens.
    ///
    /// Turn events go to `events` as they happen; a dropped receiver does not stop
    /// the battle. The channel is released on every exit path.
    pub async fn challenge(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        challenger: PlayerId,
        opponent: PlayerId,
        now: DateTime<Utc>,
        events: Option<mpsc::Sender<BattleEvent>>,
    ) -> Result<BattleReport, CrewError> {
        if challenger == opponent {
            return Err(CrewError::SelfChallenge);
        }
        let Some(_reservation) = self.guard.try_acquire(channel_id) else {
            metrics::inc_guard_denials();
            return Err(CrewError::AlreadyInBattle(channel_id));
        };

        let config = self.guild_config(guild_id)?;
        let a = self.load_combatant(guild_id, challenger, now)?;
        let b = self.load_combatant(guild_id, opponent, now)?;
        let mut rng = self.battle_rng();

        metrics::record_battle_start(guild_id);
        let started_at = Instant::now();
        info!(
            "battle in guild {} channel {}: {} (lv {}) vs {} (lv {})",
            guild_id, channel_id, challenger, a.level, opponent, b.level
        );
        let delay = std::time::Duration::from_millis(config.turn_delay_ms);
        let outcome = run_session(BattleSession::new(a, b), &mut rng, delay, events).await;
        metrics::add_battle_turns(u64::from(outcome.turns));
        metrics::observe_battle_duration(started_at);

        let result = self.resolve_battle(guild_id, challenger, opponent, outcome, &config, &mut rng, now);
        metrics::record_battle_end(guild_id, result.is_ok());
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_battle(
        &self,
        guild_id: GuildId,
        a_id: PlayerId,
        b_id: PlayerId,
        outcome: BattleOutcome,
        config: &GuildEconomyConfig,
        rng: &mut StdRng,
        now: DateTime<Utc>,
    ) -> Result<BattleReport, CrewError> {
        let (winner_id, loser_id) = match outcome.winner {
            Side::A => (a_id, b_id),
            Side::B => (b_id, a_id),
        };
        let winner_exp = config.winner_exp.roll(rng);
        let loser_exp = config.loser_exp.roll(rng);
        let cooldown_until = config.battle_cooldown().map(|cooldown| now + cooldown);

        // Both saves are attempted; the first failure is returned afterwards
        let mut storage_error: Option<StorageError> = None;
        let mut dropped_results = Vec::new();
        let mut record_side = |player_id: PlayerId, won: bool, gain: u64| -> u32 {
            match self.record_result(guild_id, player_id, won, gain, cooldown_until) {
                Ok(Some(levels)) => levels,
                Ok(None) => {
                    dropped_results.push(player_id);
                    0
                }
                Err(e) => {
                    error!("saving battle result for {} in guild {} failed: {}", player_id, guild_id, e);
                    storage_error.get_or_insert(e);
                    0
                }
            }
        };
        let winner_levels_gained = record_side(winner_id, true, winner_exp);
        let loser_levels_gained = record_side(loser_id, false, loser_exp);

        let mut reward_failures = Vec::new();
        for (player_id, amount, reason) in [
            (winner_id, config.winner_beri, "battle reward: win"),
            (loser_id, config.loser_beri, "battle reward: loss"),
        ] {
            if dropped_results.contains(&player_id) {
                continue;
            }
            if let Err(e) = self.economy.credit(guild_id, player_id, amount, reason) {
                error!("battle reward of {} for {} in guild {} failed: {}", amount, player_id, guild_id, e);
                metrics::inc_reward_failures();
                reward_failures.push(RewardFailure {
                    player_id,
                    amount,
                    error: e.to_string(),
                });
            }
        }

        if let Some(e) = storage_error {
            return Err(e.into());
        }

        info!(
            "battle resolved in guild {}: {} beat {} in {} turns",
            guild_id, winner_id, loser_id, outcome.turns
        );
        Ok(BattleReport {
            winner_id,
            loser_id,
            outcome,
            winner_exp,
            loser_exp,
            winner_levels_gained,
            loser_levels_gained,
            winner_beri: config.winner_beri,
            loser_beri: config.loser_beri,
            reward_failures,
            dropped_results,
        })
    }

    /// Re-read the record so changes made during the battle survive, then apply
    /// the result. `None` when the player was reset in the meantime.
    fn record_result(
        &self,
        guild_id: GuildId,
        player_id: PlayerId,
        won: bool,
        gain: u64,
        cooldown_until: Option<DateTime<Utc>>,
    ) -> Result<Option<u32>, StorageError> {
        let mut record = self.store.get_player(guild_id, player_id)?;
        if !record.started {
            warn!("player {} in guild {} was reset during a battle; result dropped", player_id, guild_id);
            return Ok(None);
        }
        if won {
            record.wins = record.wins.saturating_add(1);
        } else {
            record.losses = record.losses.saturating_add(1);
        }
        let levels = apply_exp(&mut record, gain);
        if cooldown_until.is_some() {
            record.battle_cooldown_until = cooldown_until;
        }
        self.store.save_player(guild_id, player_id, &record)?;
        Ok(Some(levels))
    }
}

async fn run_session(
    mut session: BattleSession,
    rng: &mut StdRng,
    delay: std::time::Duration,
    mut events: Option<mpsc::Sender<BattleEvent>>,
) -> BattleOutcome {
    loop {
        if let Some(outcome) = session.outcome() {
            return outcome;
        }
        let Some(event) = session.step(rng) else {
            continue;
        };
        if let Some(tx) = events.as_ref() {
            if tx.send(event).await.is_err() {
                debug!("battle event receiver dropped");
                events = None;
            }
        }
        if !session.is_resolved() && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crew::storage::CrewStoreBuilder;
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> CrewBattles {
        let store = Arc::new(CrewStoreBuilder::new(dir.path()).open().expect("store"));
        let economy = Economy::local_only(LocalLedger::new(Arc::clone(&store)));
        let defaults = GuildEconomyConfig {
            turn_delay_ms: 0,
            starter_fruit_chance: 0.0,
            ..GuildEconomyConfig::default()
        };
        CrewBattles::new(store, economy, defaults).with_seed(42)
    }

    #[test]
    fn start_twice_is_refused() {
        let dir = TempDir::new().expect("tempdir");
        let crew = service(&dir);
        let report = crew.start(1, 10, Utc::now()).unwrap();
        assert!(report.record.started);
        assert!(report.starter_fruit.is_none());
        assert!(report.reward_failure.is_none());
        assert_eq!(crew.balance(1, 10).unwrap(), 1_000);
        assert!(matches!(crew.start(1, 10, Utc::now()), Err(CrewError::AlreadyStarted)));
    }

    #[test]
    fn profile_requires_start() {
        let dir = TempDir::new().expect("tempdir");
        let crew = service(&dir);
        assert!(matches!(crew.profile(1, 10, Utc::now()), Err(CrewError::NotStarted)));
        crew.start(1, 10, Utc::now()).unwrap();
        let profile = crew.profile(1, 10, Utc::now()).unwrap();
        assert_eq!(profile.max_hp, 156);
        assert_eq!(profile.exp_to_next, 100);
        assert_eq!(profile.balance, 1_000);
        assert!(profile.fruit.is_none());
    }

    #[test]
    fn leaderboard_ordering() {
        let dir = TempDir::new().expect("tempdir");
        let crew = service(&dir);
        let now = Utc::now();
        let put = |id: PlayerId, wins: u32, level: u32, losses: u32| {
            let mut record = PlayerRecord::started(now);
            record.wins = wins;
            record.level = level;
            record.losses = losses;
            crew.store().save_player(1, id, &record).unwrap();
        };
        put(1, 5, 3, 2);
        put(2, 5, 4, 9);
        put(3, 5, 4, 1);
        put(4, 9, 1, 0);
        put(5, 0, 1, 0);

        let board = crew.leaderboard(1, 4).unwrap();
        let order: Vec<PlayerId> = board.iter().map(|e| e.player_id).collect();
        assert_eq!(order, vec![4, 3, 2, 1]);
        assert_eq!(board[0].rank, 1);
    }

    #[tokio::test]
    async fn self_challenge_and_unstarted_players_are_refused() {
        let dir = TempDir::new().expect("tempdir");
        let crew = service(&dir);
        crew.start(1, 10, Utc::now()).unwrap();
        assert!(matches!(
            crew.challenge(1, 7, 10, 10, Utc::now(), None).await,
            Err(CrewError::SelfChallenge)
        ));
        assert!(matches!(
            crew.challenge(1, 7, 10, 11, Utc::now(), None).await,
            Err(CrewError::NotStarted)
        ));
        // The failed attempt released the channel
        assert!(!crew.guard().is_busy(7));
    }
}
