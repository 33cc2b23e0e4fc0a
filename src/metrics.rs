//! Process-wide counters for battle activity and the economy.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::Instant;

use crate::crew::types::GuildId;

static GUARD_DENIALS: AtomicU64 = AtomicU64::new(0);
static REWARD_FAILURES: AtomicU64 = AtomicU64::new(0);
static PURCHASES: AtomicU64 = AtomicU64::new(0);
static TRAININGS: AtomicU64 = AtomicU64::new(0);
static BATTLE_TURNS: AtomicU64 = AtomicU64::new(0);
static BATTLE_DURATION_SUM_MS: AtomicU64 = AtomicU64::new(0);
static BATTLE_DURATION_COUNT: AtomicU64 = AtomicU64::new(0);

static BATTLE_COUNTERS: OnceLock<Mutex<HashMap<GuildId, BattleCounter>>> = OnceLock::new();

pub fn inc_guard_denials() {
    GUARD_DENIALS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_reward_failures() {
    REWARD_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_purchases() {
    PURCHASES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_trainings() {
    TRAININGS.fetch_add(1, Ordering::Relaxed);
}
pub fn add_battle_turns(turns: u64) {
    BATTLE_TURNS.fetch_add(turns, Ordering::Relaxed);
}
pub fn observe_battle_duration(started_at: Instant) {
    let ms = started_at.elapsed().as_millis() as u64;
    BATTLE_DURATION_SUM_MS.fetch_add(ms, Ordering::Relaxed);
    BATTLE_DURATION_COUNT.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BattleCounter {
    pub started: u64,
    pub resolved: u64,
    pub currently_active: u64,
    pub concurrent_peak: u64,
}

fn battle_counter_lock() -> MutexGuard<'static, HashMap<GuildId, BattleCounter>> {
    BATTLE_COUNTERS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn record_battle_start(guild_id: GuildId) -> BattleCounter {
    let mut guard = battle_counter_lock();
    let counter = guard.entry(guild_id).or_default();
    counter.started = counter.started.saturating_add(1);
    counter.currently_active = counter.currently_active.saturating_add(1);
    if counter.currently_active > counter.concurrent_peak {
        counter.concurrent_peak = counter.currently_active;
    }
    *counter
}

/// Called once per started battle, whether it resolved or failed.
pub fn record_battle_end(guild_id: GuildId, resolved: bool) -> BattleCounter {
    let mut guard = battle_counter_lock();
    let counter = guard.entry(guild_id).or_default();
    if resolved {
        counter.resolved = counter.resolved.saturating_add(1);
    }
    if counter.currently_active > 0 {
        counter.currently_active -= 1;
    }
    *counter
}

pub fn battle_counters_snapshot() -> HashMap<GuildId, BattleCounter> {
    battle_counter_lock().clone()
}

#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    pub battles_started: u64,
    pub battles_resolved: u64,
    pub battle_turns: u64,
    pub battle_duration_avg_ms: Option<u64>,
    pub guard_denials: u64,
    pub reward_failures: u64,
    pub purchases: u64,
    pub trainings: u64,
}

pub fn snapshot() -> Snapshot {
    let (started, resolved) = battle_counter_lock()
        .values()
        .fold((0u64, 0u64), |(s, r), c| (s + c.started, r + c.resolved));
    let sum = BATTLE_DURATION_SUM_MS.load(Ordering::Relaxed);
    let count = BATTLE_DURATION_COUNT.load(Ordering::Relaxed);
    Snapshot {
        battles_started: started,
        battles_resolved: resolved,
        battle_turns: BATTLE_TURNS.load(Ordering::Relaxed),
        battle_duration_avg_ms: if count > 0 { Some(sum / count) } else { None },
        guard_denials: GUARD_DENIALS.load(Ordering::Relaxed),
        reward_failures: REWARD_FAILURES.load(Ordering::Relaxed),
        purchases: PURCHASES.load(Ordering::Relaxed),
        trainings: TRAININGS.load(Ordering::Relaxed),
    }
}
