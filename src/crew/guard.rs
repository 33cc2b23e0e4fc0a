use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, warn};

use crate::crew::types::ChannelId;

/// Set of channels with a battle in progress.
///
/// Only the channel is locked: one player may still fight in two channels at the
/// same time.
#[derive(Debug, Default)]
pub struct ChannelGuard {
    busy: Mutex<HashSet<ChannelId>>,
}

impl ChannelGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn busy(&self) -> MutexGuard<'_, HashSet<ChannelId>> {
        // A panic while holding the lock leaves the set itself consistent
        self.busy.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark `channel` busy. False if it already was.
    pub fn reserve(&self, channel: ChannelId) -> bool {
        let inserted = self.busy().insert(channel);
        if inserted {
            debug!("channel {} reserved", channel);
        }
        inserted
    }

    pub fn release(&self, channel: ChannelId) {
        if !self.busy().remove(&channel) {
            warn!("release of idle channel {}", channel);
        }
    }

    pub fn is_busy(&self, channel: ChannelId) -> bool {
        self.busy().contains(&channel)
    }

    pub fn busy_count(&self) -> usize {
        self.busy().len()
    }

    /// Reserve `channel` for the lifetime of the returned handle.
    pub fn try_acquire(self: &Arc<Self>, channel: ChannelId) -> Option<BattleReservation> {
        self.reserve(channel).then(|| BattleReservation {
            guard: Arc::clone(self),
            channel,
        })
    }
}

/// Releases its channel when dropped, including on early returns and panics.
#[derive(Debug)]
pub struct BattleReservation {
    guard: Arc<ChannelGuard>,
    channel: ChannelId,
}

impl BattleReservation {
    pub fn channel(&self) -> ChannelId {
        self.channel
    }
}

impl Drop for BattleReservation {
    fn drop(&mut self) {
        self.guard.release(self.channel);
        debug!("channel {} released", self.channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_twice_is_refused_until_release() {
        let guard = ChannelGuard::new();
        assert!(guard.reserve(7));
        assert!(!guard.reserve(7));
        assert!(guard.reserve(8));
        guard.release(7);
        assert!(guard.reserve(7));
        assert_eq!(guard.busy_count(), 2);
    }

    #[test]
    fn reservation_releases_on_drop() {
        let guard = Arc::new(ChannelGuard::new());
        {
            let held = guard.try_acquire(3).expect("free channel");
            assert_eq!(held.channel(), 3);
            assert!(guard.is_busy(3));
            assert!(guard.try_acquire(3).is_none());
        }
        assert!(!guard.is_busy(3));
        assert!(guard.try_acquire(3).is_some());
    }

    #[test]
    fn reservation_releases_on_panic() {
        let guard = Arc::new(ChannelGuard::new());
        let cloned = Arc::clone(&guard);
        let result = std::panic::catch_unwind(move || {
            let _held = cloned.try_acquire(9).expect("free channel");
            panic!("battle blew up");
        });
        assert!(result.is_err());
        assert!(!guard.is_busy(9));
    }
}
