// tests/common/mock_cache.rs
//! Cache port that records every invalidation with its (virtual) timestamp.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use leadsync_lib::realtime::{CachePort, InvalidationTarget, PortError};

#[derive(Debug, Clone)]
pub struct Invalidation {
    pub target: InvalidationTarget,
    pub at: Instant,
}

#[derive(Clone, Default)]
pub struct RecordingCache {
    calls: Arc<Mutex<Vec<Invalidation>>>,
    failing: Arc<Mutex<HashSet<InvalidationTarget>>>,
    panicking: Arc<Mutex<HashSet<InvalidationTarget>>>,
}

impl RecordingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every invalidation of `target` reject. The call is still recorded.
    pub async fn fail_on(&self, target: InvalidationTarget) {
        self.failing.lock().await.insert(target);
    }

    /// Make every invalidation of `target` panic. The call is still recorded.
    pub async fn panic_on(&self, target: InvalidationTarget) {
        self.panicking.lock().await.insert(target);
    }

    pub async fn calls(&self) -> Vec<Invalidation> {
        self.calls.lock().await.clone()
    }

    pub async fn targets(&self) -> Vec<InvalidationTarget> {
        self.calls
            .lock()
            .await
            .iter()
            .map(|call| call.target.clone())
            .collect()
    }

    pub async fn count_for(&self, target: &InvalidationTarget) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|call| &call.target == target)
            .count()
    }
}

#[async_trait]
impl CachePort for RecordingCache {
    async fn invalidate(&self, target: &InvalidationTarget) -> Result<(), PortError> {
        self.calls.lock().await.push(Invalidation {
            target: target.clone(),
            at: Instant::now(),
        });
        if self.panicking.lock().await.contains(target) {
            panic!("cache backend crashed on {target}");
        }
        if self.failing.lock().await.contains(target) {
            return Err(PortError::Cache(format!("refetch of {target} rejected")));
        }
        Ok(())
    }
}
