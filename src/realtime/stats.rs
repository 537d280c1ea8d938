use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Monotonic runtime counters shared by the engine's tasks.
#[derive(Debug, Default)]
pub struct EngineStats {
    pub(crate) events_received: AtomicU64,
    pub(crate) events_suppressed: AtomicU64,
    pub(crate) stale_epoch_dropped: AtomicU64,
    pub(crate) flush_rounds: AtomicU64,
    pub(crate) invalidations_committed: AtomicU64,
    pub(crate) invalidation_failures: AtomicU64,
    pub(crate) notifications_shown: AtomicU64,
    pub(crate) notifications_suppressed: AtomicU64,
    pub(crate) notification_failures: AtomicU64,
    pub(crate) reconnects: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub events_received: u64,
    pub events_suppressed: u64,
    pub stale_epoch_dropped: u64,
    pub flush_rounds: u64,
    pub invalidations_committed: u64,
    pub invalidation_failures: u64,
    pub notifications_shown: u64,
    pub notifications_suppressed: u64,
    pub notification_failures: u64,
    pub reconnects: u64,
}

impl EngineStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            events_received: load(&self.events_received),
            events_suppressed: load(&self.events_suppressed),
            stale_epoch_dropped: load(&self.stale_epoch_dropped),
            flush_rounds: load(&self.flush_rounds),
            invalidations_committed: load(&self.invalidations_committed),
            invalidation_failures: load(&self.invalidation_failures),
            notifications_shown: load(&self.notifications_shown),
            notifications_suppressed: load(&self.notifications_suppressed),
            notification_failures: load(&self.notification_failures),
            reconnects: load(&self.reconnects),
        }
    }
}
