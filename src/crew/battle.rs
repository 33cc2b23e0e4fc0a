//! Turn-based duel simulator.
//!
//! A [`BattleSession`] is a pure state machine over two combatant snapshots and a
//! random source. Side A always opens; sides alternate one attack per turn and the
//! battle resolves the moment a side reaches 0 HP, with no counter-attack.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::crew::types::{FruitDefinition, PlayerId, PlayerRecord};

pub const BASE_HP: i64 = 150;
pub const HP_PER_LEVEL: i64 = 6;
pub const DAMAGE_MIN: i64 = 10;
pub const DAMAGE_MAX: i64 = 20;
pub const CRIT_CHANCE: f64 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }

    fn index(self) -> usize {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }
}

/// Snapshot of one participant taken when the battle starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Combatant {
    pub player_id: PlayerId,
    pub level: u32,
    pub fruit: Option<String>,
    pub fruit_bonus: i64,
    pub armament: u32,
}

impl Combatant {
    /// `fruit` is the resolved definition of the equipped fruit, if it still exists.
    pub fn from_record(player_id: PlayerId, record: &PlayerRecord, fruit: Option<&FruitDefinition>) -> Self {
        Self {
            player_id,
            level: record.level,
            fruit: fruit.map(|f| f.name.clone()),
            fruit_bonus: fruit.map_or(0, |f| f.bonus),
            armament: record.haki.armament,
        }
    }

    pub fn max_hp(&self) -> i64 {
        max_hp(self.level)
    }

    pub fn attack_bonus(&self) -> i64 {
        self.fruit_bonus + i64::from(self.armament / 10)
    }
}

pub fn max_hp(level: u32) -> i64 {
    BASE_HP + i64::from(level) * HP_PER_LEVEL
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleEvent {
    /// 1-based
    pub turn: u32,
    pub attacker: Side,
    pub damage: i64,
    pub critical: bool,
    pub defender_hp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleOutcome {
    pub winner: Side,
    pub final_hp_a: i64,
    pub final_hp_b: i64,
    pub turns: u32,
    pub events: Vec<BattleEvent>,
}

impl BattleOutcome {
    pub fn loser(&self) -> Side {
        self.winner.other()
    }
}

#[derive(Debug, Clone)]
pub struct BattleSession {
    combatants: [Combatant; 2],
    hp: [i64; 2],
    turn: u32,
    next: Side,
    winner: Option<Side>,
    events: Vec<BattleEvent>,
}

impl BattleSession {
    pub fn new(a: Combatant, b: Combatant) -> Self {
        let hp = [a.max_hp(), b.max_hp()];
        Self {
            combatants: [a, b],
            hp,
            turn: 0,
            next: Side::A,
            winner: None,
            events: Vec::new(),
        }
    }

    pub fn combatant(&self, side: Side) -> &Combatant {
        &self.combatants[side.index()]
    }

    pub fn hp(&self, side: Side) -> i64 {
        self.hp[side.index()]
    }

    pub fn is_resolved(&self) -> bool {
        self.winner.is_some()
    }

    pub fn events(&self) -> &[BattleEvent] {
        &self.events
    }

    /// Play one attack. Returns `None` once the battle is resolved.
    pub fn step<R: Rng>(&mut self, rng: &mut R) -> Option<BattleEvent> {
        if self.is_resolved() {
            return None;
        }
        let attacker = self.next;
        let defender = attacker.other();

        let roll = rng.gen_range(DAMAGE_MIN..=DAMAGE_MAX);
        // Negative fruit bonuses still land a scratch so the battle terminates
        let mut damage = (roll + self.combatant(attacker).attack_bonus()).max(1);
        let critical = rng.gen_bool(CRIT_CHANCE);
        if critical {
            damage = damage * 3 / 2;
        }

        let hp = &mut self.hp[defender.index()];
        *hp = (*hp - damage).max(0);
        let defender_hp = *hp;

        self.turn += 1;
        let event = BattleEvent {
            turn: self.turn,
            attacker,
            damage,
            critical,
            defender_hp,
        };
        self.events.push(event.clone());

        if defender_hp == 0 {
            self.winner = Some(attacker);
        } else {
            self.next = defender;
        }
        Some(event)
    }

    /// Final result, available once resolved.
    pub fn outcome(&self) -> Option<BattleOutcome> {
        let winner = self.winner?;
        Some(BattleOutcome {
            winner,
            final_hp_a: self.hp[0],
            final_hp_b: self.hp[1],
            turns: self.turn,
            events: self.events.clone(),
        })
    }

    pub fn into_outcome(self) -> Option<BattleOutcome> {
        let winner = self.winner?;
        Some(BattleOutcome {
            winner,
            final_hp_a: self.hp[0],
            final_hp_b: self.hp[1],
            turns: self.turn,
            events: self.events,
        })
    }
}

/// Run a whole battle without pauses.
pub fn simulate<R: Rng>(a: Combatant, b: Combatant, rng: &mut R) -> BattleOutcome {
    let mut session = BattleSession::new(a, b);
    loop {
        if let Some(outcome) = session.outcome() {
            return outcome;
        }
        session.step(rng);
    }
}
