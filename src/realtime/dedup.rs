//! Time-bounded "have I seen this recently" oracle.
//!
//! Windows slide: every sighting, suppressed or not, refreshes the entry.
//! A key that keeps arriving faster than its window is suppressed for as long
//! as the stream lasts; a key that goes quiet for longer than the window is
//! forgotten and allowed through again.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::event::DedupKey;

#[derive(Debug, Clone, Copy)]
struct DedupEntry {
    last_seen_at: Instant,
    window: Duration,
}

#[derive(Debug)]
pub struct DedupWindow {
    label: &'static str,
    entries: DashMap<String, DedupEntry>,
    default_window: Duration,
}

impl DedupWindow {
    pub fn new(label: &'static str, default_window: Duration) -> Self {
        Self {
            label,
            entries: DashMap::new(),
            default_window,
        }
    }

    /// Returns true if `key` was already seen within the default window.
    pub fn should_suppress(&self, key: &DedupKey) -> bool {
        self.should_suppress_within(key, self.default_window)
    }

    /// Returns true if `key` was already seen within `window`.
    pub fn should_suppress_within(&self, key: &DedupKey, window: Duration) -> bool {
        self.check_at(key.as_str(), window, Instant::now())
    }

    pub(crate) fn check_at(&self, key: &str, window: Duration, now: Instant) -> bool {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                let suppress = now.saturating_duration_since(entry.last_seen_at) <= window;
                entry.last_seen_at = now;
                entry.window = window;
                suppress
            }
            Entry::Vacant(vacant) => {
                vacant.insert(DedupEntry {
                    last_seen_at: now,
                    window,
                });
                false
            }
        }
    }

    /// Drop every entry whose window has elapsed. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub(crate) fn sweep_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.last_seen_at) <= entry.window);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Spawn the periodic sweep. The task holds only a weak reference and
    /// exits once the window is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let window: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(window) = window.upgrade() else {
                    break;
                };
                let removed = window.sweep();
                if removed > 0 {
                    tracing::debug!(
                        "dedup window '{}' swept {removed} expired entries, {} remain",
                        window.label,
                        window.len()
                    );
                }
            }
        })
    }
}
