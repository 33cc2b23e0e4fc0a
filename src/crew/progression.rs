//! Experience curve and leveling loop.
//!
//! Each level needs `level × EXP_PER_LEVEL` experience to advance; the requirement
//! never depends on the exp already held. Level [`MAX_LEVEL`] is terminal.

use crate::crew::types::{PlayerRecord, MAX_LEVEL};

pub const EXP_PER_LEVEL: u64 = 100;

/// Experience required to advance from `level`, or 0 at the ceiling.
pub fn exp_to_next(level: u32) -> u64 {
    if level >= MAX_LEVEL {
        0
    } else {
        u64::from(level.max(1)) * EXP_PER_LEVEL
    }
}

/// Highest exp a max-level record may hold.
pub fn max_level_exp_cap() -> u64 {
    exp_to_next(MAX_LEVEL - 1) - 1
}

/// Add `gain` to the record and level it up as far as the curve allows.
/// Returns the number of levels gained. A zero gain normalizes a record after an
/// external edit (out-of-range level, oversized exp) without adding experience.
pub fn apply_exp(record: &mut PlayerRecord, gain: u64) -> u32 {
    let start_level = record.level.clamp(1, MAX_LEVEL);
    record.level = start_level;
    record.exp = record.exp.saturating_add(gain);

    while record.level < MAX_LEVEL {
        let needed = exp_to_next(record.level);
        if record.exp < needed {
            break;
        }
        record.exp -= needed;
        record.level += 1;
    }

    if record.level >= MAX_LEVEL {
        record.level = MAX_LEVEL;
        record.exp = record.exp.min(max_level_exp_cap());
    }

    record.level - start_level
}

/// Admin override: set level and exp, then normalize onto the curve.
pub fn set_level(record: &mut PlayerRecord, level: u32, exp: u64) -> u32 {
    record.level = level.clamp(1, MAX_LEVEL);
    record.exp = exp;
    apply_exp(record, 0);
    record.level
}

/// Progress toward the next level as (current, needed). `needed` is 0 at the cap.
pub fn progress(record: &PlayerRecord) -> (u64, u64) {
    (record.exp, exp_to_next(record.level))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn record_at(level: u32, exp: u64) -> PlayerRecord {
        PlayerRecord {
            started: true,
            level,
            exp,
            ..PlayerRecord::default()
        }
    }

    #[test]
    fn exp_to_next_is_terminal_at_cap() {
        assert_eq!(exp_to_next(1), 100);
        assert_eq!(exp_to_next(42), 4_200);
        assert_eq!(exp_to_next(99), 9_900);
        assert_eq!(exp_to_next(100), 0);
        assert_eq!(exp_to_next(150), 0);
    }

    #[test]
    fn single_level_up_carries_remainder() {
        let mut player = record_at(1, 90);
        assert_eq!(apply_exp(&mut player, 30), 1);
        assert_eq!(player.level, 2);
        assert_eq!(player.exp, 20);
    }

    #[test]
    fn large_gain_levels_multiple_times() {
        let mut player = record_at(1, 0);
        // 100 + 200 + 300 = 600 reaches level 4 exactly
        assert_eq!(apply_exp(&mut player, 650), 3);
        assert_eq!(player.level, 4);
        assert_eq!(player.exp, 50);
    }

    #[test]
    fn zero_gain_normalizes_edited_record() {
        let mut player = record_at(3, 1_000);
        let gained = apply_exp(&mut player, 0);
        // 300 + 400 = 700 consumed, 300 left at level 5 (needs 500)
        assert_eq!(gained, 2);
        assert_eq!(player.level, 5);
        assert_eq!(player.exp, 300);

        let mut untouched = record_at(7, 12);
        assert_eq!(apply_exp(&mut untouched, 0), 0);
        assert_eq!((untouched.level, untouched.exp), (7, 12));
    }

    #[test]
    fn ceiling_clamps_exp() {
        let mut player = record_at(99, 0);
        apply_exp(&mut player, 1_000_000);
        assert_eq!(player.level, MAX_LEVEL);
        assert_eq!(player.exp, exp_to_next(99) - 1);

        assert_eq!(apply_exp(&mut player, 5_000_000), 0);
        assert_eq!(player.level, MAX_LEVEL);
        assert_eq!(player.exp, exp_to_next(99) - 1);
    }

    #[test]
    fn out_of_range_levels_are_clamped() {
        let mut zero = record_at(0, 0);
        apply_exp(&mut zero, 0);
        assert_eq!(zero.level, 1);

        let mut over = record_at(250, u64::MAX);
        apply_exp(&mut over, 10);
        assert_eq!(over.level, MAX_LEVEL);
        assert_eq!(over.exp, max_level_exp_cap());
    }

    #[test]
    fn set_level_normalizes() {
        let mut player = record_at(1, 0);
        // 1_000 to reach 11, 1_100 more to reach 12
        assert_eq!(set_level(&mut player, 10, 2_500), 12);
        assert_eq!(player.exp, 400);
        assert_eq!(set_level(&mut player, 0, 0), 1);
    }

    #[test]
    fn invariant_holds_for_random_gains() {
        let mut rng = StdRng::seed_from_u64(0xC0FFEE);
        for _ in 0..200 {
            let mut player = record_at(rng.gen_range(1..=100), 0);
            apply_exp(&mut player, 0);
            for _ in 0..50 {
                let before = player.level;
                apply_exp(&mut player, rng.gen_range(0..5_000));
                assert!(player.level >= before);
                if player.level < MAX_LEVEL {
                    assert!(player.exp < exp_to_next(player.level));
                } else {
                    assert!(player.exp <= max_level_exp_cap());
                }
            }
        }
    }
}
