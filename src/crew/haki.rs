//! Haki training: per-stat cooldown and cost, conqueror unlock gate.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::info;

use crate::crew::economy::Economy;
use crate::crew::errors::{CrewError, LockReason};
use crate::crew::storage::CrewStore;
use crate::crew::types::{
    GuildEconomyConfig, GuildId, HakiStat, PlayerId, PlayerRecord, CONQUEROR_UNLOCK_LEVEL, HAKI_MAX,
};

/// Remaining cooldown of `stat` at `now`, if any.
pub fn cooldown_remaining(
    record: &PlayerRecord,
    stat: HakiStat,
    cooldown: Duration,
    now: DateTime<Utc>,
) -> Option<Duration> {
    let last = record.last_haki_train_at.get(&stat)?;
    let remaining = *last + cooldown - now;
    (remaining > Duration::zero()).then_some(remaining)
}

/// Validate a training attempt and return the cost to charge.
pub fn check_train(
    record: &PlayerRecord,
    stat: HakiStat,
    config: &GuildEconomyConfig,
    now: DateTime<Utc>,
) -> Result<i64, CrewError> {
    if !record.started {
        return Err(CrewError::NotStarted);
    }
    if stat == HakiStat::Conqueror && !record.haki.conqueror_unlocked {
        return Err(CrewError::Locked(LockReason::ConquerorLocked));
    }
    if record.haki.get(stat) >= HAKI_MAX {
        return Err(CrewError::Locked(LockReason::MaxedOut));
    }
    if let Some(remaining) = cooldown_remaining(record, stat, config.haki_cooldown(), now) {
        return Err(CrewError::OnCooldown { remaining });
    }
    Ok(config.haki_cost_for(stat).max(0))
}

/// Grant one point (clamped) and restart the stat's cooldown. Returns the new value.
pub fn apply_train(record: &mut PlayerRecord, stat: HakiStat, now: DateTime<Utc>) -> u32 {
    let value = record.haki.get_mut(stat);
    *value = (*value + 1).min(HAKI_MAX);
    let value = *value;
    record.last_haki_train_at.insert(stat, now);
    value
}

/// Validate a conqueror unlock and return its cost.
pub fn check_unlock(record: &PlayerRecord, config: &GuildEconomyConfig) -> Result<i64, CrewError> {
    if !record.started {
        return Err(CrewError::NotStarted);
    }
    if record.level < CONQUEROR_UNLOCK_LEVEL {
        return Err(CrewError::Locked(LockReason::LevelTooLow {
            required: CONQUEROR_UNLOCK_LEVEL,
            level: record.level,
        }));
    }
    if record.haki.conqueror_unlocked {
        return Err(CrewError::AlreadyUnlocked);
    }
    Ok(config.conqueror_unlock_cost.max(0))
}

/// Loads, charges and saves around the pure checks above.
pub struct HakiTrainer {
    store: Arc<CrewStore>,
}

impl HakiTrainer {
    pub fn new(store: Arc<CrewStore>) -> Self {
        Self { store }
    }

    pub fn train(
        &self,
        economy: &Economy,
        guild_id: GuildId,
        player_id: PlayerId,
        stat: HakiStat,
        config: &GuildEconomyConfig,
        now: DateTime<Utc>,
    ) -> Result<u32, CrewError> {
        let mut record = self.store.get_player(guild_id, player_id)?;
        let cost = check_train(&record, stat, config, now)?;
        economy.debit(guild_id, player_id, cost, &format!("haki training: {}", stat))?;
        let value = apply_train(&mut record, stat, now);
        self.store.save_player(guild_id, player_id, &record)?;
        crate::metrics::inc_trainings();
        info!(
            "player {} in guild {} trained {} to {} for {}",
            player_id, guild_id, stat, value, cost
        );
        Ok(value)
    }

    pub fn unlock_conqueror(
        &self,
        economy: &Economy,
        guild_id: GuildId,
        player_id: PlayerId,
        config: &GuildEconomyConfig,
    ) -> Result<(), CrewError> {
        let mut record = self.store.get_player(guild_id, player_id)?;
        let cost = check_unlock(&record, config)?;
        economy.debit(guild_id, player_id, cost, "conqueror haki unlock")?;
        record.haki.conqueror_unlocked = true;
        self.store.save_player(guild_id, player_id, &record)?;
        info!("player {} in guild {} unlocked conqueror haki", player_id, guild_id);
        Ok(())
    }
}
