//! Batches fine-grained staleness signals into coarse cache-refresh rounds.
//!
//! A background worker owns the pending batch. Every `mark_stale` pushes the
//! flush deadline out to `debounce` after that call (trailing edge), capped at
//! `max_delay` after the first mark of the batch so a steady drizzle cannot
//! starve invalidation. On flush each distinct target reaches the cache once.
//! A `touch` for targets already pending extends the trailing deadline the same
//! way without adding anything to the batch.

use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use super::{lock, panic_message};
use super::ports::CachePort;
use super::router::InvalidationTarget;
use super::stats::EngineStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoalescerSettings {
    pub debounce: Duration,
    pub max_delay: Option<Duration>,
}

enum Command {
    MarkStale(InvalidationTarget),
    Touch(Vec<InvalidationTarget>),
    FlushNow,
    Shutdown,
}

enum Wake {
    Command(Option<Command>),
    Deadline,
}

#[derive(Debug, Default)]
pub(crate) struct PendingBatch {
    targets: BTreeSet<InvalidationTarget>,
    opened_at: Option<Instant>,
    last_marked_at: Option<Instant>,
}

impl PendingBatch {
    fn add(&mut self, target: InvalidationTarget, now: Instant) {
        self.targets.insert(target);
        self.opened_at.get_or_insert(now);
        self.last_marked_at = Some(now);
    }

    /// Push the trailing edge out if any of `targets` is already pending.
    fn touch(&mut self, targets: &[InvalidationTarget], now: Instant) -> bool {
        if targets.iter().any(|target| self.targets.contains(target)) {
            self.last_marked_at = Some(now);
            return true;
        }
        false
    }

    fn deadline(&self, settings: &CoalescerSettings) -> Option<Instant> {
        let trailing = self.last_marked_at? + settings.debounce;
        match (settings.max_delay, self.opened_at) {
            (Some(max_delay), Some(opened_at)) => Some(trailing.min(opened_at + max_delay)),
            _ => Some(trailing),
        }
    }

    fn take(&mut self) -> BTreeSet<InvalidationTarget> {
        self.opened_at = None;
        self.last_marked_at = None;
        std::mem::take(&mut self.targets)
    }

    fn len(&self) -> usize {
        self.targets.len()
    }

    fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

pub struct InvalidationCoalescer {
    tx: mpsc::UnboundedSender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl InvalidationCoalescer {
    /// Spawn the debounce worker on the current runtime.
    pub fn spawn(
        cache: Arc<dyn CachePort>,
        settings: CoalescerSettings,
        stats: Arc<EngineStats>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(rx, cache, settings, stats));
        Self {
            tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn mark_stale(&self, target: InvalidationTarget) {
        if self.tx.send(Command::MarkStale(target)).is_err() {
            tracing::debug!("coalescer already shut down, dropping stale mark");
        }
    }

    /// Signal renewed activity for `targets`. Only targets already waiting in
    /// the current batch are affected; nothing new is scheduled.
    pub fn touch(&self, targets: Vec<InvalidationTarget>) {
        if targets.is_empty() {
            return;
        }
        let _ = self.tx.send(Command::Touch(targets));
    }

    /// Flush whatever is pending without waiting for the debounce.
    pub fn flush_now(&self) {
        let _ = self.tx.send(Command::FlushNow);
    }

    /// Stop the worker. Pending targets are discarded, not flushed, so no
    /// invalidation fires after this returns. Safe to call more than once.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                if !e.is_cancelled() {
                    tracing::warn!("coalescer worker ended abnormally: {e}");
                }
            }
        }
    }

    pub(crate) fn abort(&self) {
        if let Some(worker) = lock(&self.worker).take() {
            worker.abort();
        }
    }
}

impl Drop for InvalidationCoalescer {
    fn drop(&mut self) {
        self.abort();
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Command>,
    cache: Arc<dyn CachePort>,
    settings: CoalescerSettings,
    stats: Arc<EngineStats>,
) {
    let mut batch = PendingBatch::default();

    loop {
        let wake = match batch.deadline(&settings) {
            Some(deadline) => {
                tokio::select! {
                    command = rx.recv() => Wake::Command(command),
                    _ = time::sleep_until(deadline) => Wake::Deadline,
                }
            }
            None => Wake::Command(rx.recv().await),
        };

        match wake {
            Wake::Deadline => flush(cache.as_ref(), batch.take(), &stats).await,
            Wake::Command(Some(Command::MarkStale(target))) => batch.add(target, Instant::now()),
            Wake::Command(Some(Command::Touch(targets))) => {
                if batch.touch(&targets, Instant::now()) {
                    tracing::trace!("pending batch touched, flush pushed out");
                }
            }
            Wake::Command(Some(Command::FlushNow)) => {
                flush(cache.as_ref(), batch.take(), &stats).await
            }
            Wake::Command(Some(Command::Shutdown)) | Wake::Command(None) => {
                if !batch.is_empty() {
                    tracing::debug!(
                        "coalescer shutting down, discarding {} pending target(s)",
                        batch.len()
                    );
                }
                break;
            }
        }
    }
}

/// One invalidation round. Failures, panics included, are logged and never
/// retried.
async fn flush(cache: &dyn CachePort, targets: BTreeSet<InvalidationTarget>, stats: &EngineStats) {
    if targets.is_empty() {
        return;
    }
    EngineStats::bump(&stats.flush_rounds);
    tracing::debug!("flushing {} invalidation target(s)", targets.len());

    let results = join_all(
        targets
            .iter()
            .map(|target| AssertUnwindSafe(cache.invalidate(target)).catch_unwind()),
    )
    .await;
    for (target, result) in targets.iter().zip(results) {
        match result {
            Ok(Ok(())) => EngineStats::bump(&stats.invalidations_committed),
            Ok(Err(e)) => {
                EngineStats::bump(&stats.invalidation_failures);
                tracing::warn!("invalidation of {target} failed, leaving it stale: {e}");
            }
            Err(panic) => {
                EngineStats::bump(&stats.invalidation_failures);
                tracing::warn!(
                    "cache panicked invalidating {target}, leaving it stale: {}",
                    panic_message(panic.as_ref())
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::error::PortError;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct RecordingCache {
        calls: Mutex<Vec<(Instant, String)>>,
        failing: Vec<String>,
        panicking: Vec<String>,
    }

    impl RecordingCache {
        fn failing(keys: &[&str]) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                failing: keys.iter().map(|k| k.to_string()).collect(),
                panicking: Vec::new(),
            }
        }

        fn panicking(keys: &[&str]) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                failing: Vec::new(),
                panicking: keys.iter().map(|k| k.to_string()).collect(),
            }
        }

        fn keys(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(_, k)| k.clone()).collect()
        }

        fn times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().iter().map(|(t, _)| *t).collect()
        }
    }

    #[async_trait]
    impl CachePort for RecordingCache {
        async fn invalidate(&self, target: &InvalidationTarget) -> Result<(), PortError> {
            let key = target.to_string();
            self.calls.lock().unwrap().push((Instant::now(), key.clone()));
            if self.panicking.contains(&key) {
                panic!("cache backend blew up on {key}");
            }
            if self.failing.contains(&key) {
                return Err(PortError::Cache(format!("refetch of {key} rejected")));
            }
            Ok(())
        }
    }

    fn settings(debounce_ms: u64, max_delay_ms: Option<u64>) -> CoalescerSettings {
        CoalescerSettings {
            debounce: Duration::from_millis(debounce_ms),
            max_delay: max_delay_ms.map(Duration::from_millis),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_single_invalidation() {
        let cache = Arc::new(RecordingCache::default());
        let stats = Arc::new(EngineStats::default());
        let coalescer = InvalidationCoalescer::spawn(cache.clone(), settings(2000, None), stats.clone());

        for _ in 0..5 {
            coalescer.mark_stale(InvalidationTarget::key("list:records"));
            time::sleep(Duration::from_millis(200)).await;
        }
        let last_mark = Instant::now() - Duration::from_millis(200);
        time::sleep(Duration::from_secs(3)).await;

        assert_eq!(cache.keys(), vec!["list:records".to_string()]);
        let flushed_at = cache.times()[0];
        assert_eq!(flushed_at.duration_since(last_mark), Duration::from_secs(2));
        assert_eq!(stats.snapshot().flush_rounds, 1);
        assert_eq!(stats.snapshot().invalidations_committed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_targets_share_one_round() {
        let cache = Arc::new(RecordingCache::default());
        let stats = Arc::new(EngineStats::default());
        let coalescer = InvalidationCoalescer::spawn(cache.clone(), settings(1000, None), stats.clone());

        coalescer.mark_stale(InvalidationTarget::key("detail:42"));
        coalescer.mark_stale(InvalidationTarget::key("list:records"));
        coalescer.mark_stale(InvalidationTarget::key("detail:42"));
        time::sleep(Duration::from_secs(2)).await;

        let mut keys = cache.keys();
        keys.sort();
        assert_eq!(keys, vec!["detail:42".to_string(), "list:records".to_string()]);
        let times = cache.times();
        assert_eq!(times[0], times[1]);
        assert_eq!(stats.snapshot().flush_rounds, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_delay_forces_progress_under_drizzle() {
        let cache = Arc::new(RecordingCache::default());
        let stats = Arc::new(EngineStats::default());
        let start = Instant::now();
        let coalescer =
            InvalidationCoalescer::spawn(cache.clone(), settings(1000, Some(3000)), stats.clone());

        // A mark every 500ms would keep a pure trailing debounce waiting forever.
        for _ in 0..10 {
            coalescer.mark_stale(InvalidationTarget::key("list:records"));
            time::sleep(Duration::from_millis(500)).await;
        }

        let times = cache.times();
        assert!(!times.is_empty(), "ceiling should have forced a flush");
        assert_eq!(times[0].duration_since(start), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_target_does_not_block_the_rest() {
        let cache = Arc::new(RecordingCache::failing(&["detail:42"]));
        let stats = Arc::new(EngineStats::default());
        let coalescer = InvalidationCoalescer::spawn(cache.clone(), settings(500, None), stats.clone());

        coalescer.mark_stale(InvalidationTarget::key("detail:42"));
        coalescer.mark_stale(InvalidationTarget::key("list:records"));
        time::sleep(Duration::from_secs(1)).await;

        assert_eq!(cache.keys().len(), 2);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.invalidations_committed, 1);
        assert_eq!(snapshot.invalidation_failures, 1);

        // No retry loop: nothing further happens without new input.
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(cache.keys().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_cache_is_contained() {
        let cache = Arc::new(RecordingCache::panicking(&["detail:42"]));
        let stats = Arc::new(EngineStats::default());
        let coalescer = InvalidationCoalescer::spawn(cache.clone(), settings(500, None), stats.clone());

        coalescer.mark_stale(InvalidationTarget::key("detail:42"));
        coalescer.mark_stale(InvalidationTarget::key("list:records"));
        time::sleep(Duration::from_secs(1)).await;

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.invalidations_committed, 1);
        assert_eq!(snapshot.invalidation_failures, 1);

        // The worker survived and keeps flushing later rounds.
        coalescer.mark_stale(InvalidationTarget::key("notes:2"));
        time::sleep(Duration::from_secs(1)).await;
        assert!(cache.keys().contains(&"notes:2".to_string()));
        assert_eq!(stats.snapshot().flush_rounds, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_extends_pending_batch_only() {
        let cache = Arc::new(RecordingCache::default());
        let stats = Arc::new(EngineStats::default());
        let start = Instant::now();
        let coalescer = InvalidationCoalescer::spawn(cache.clone(), settings(2000, Some(5000)), stats);

        // Nothing pending: a touch schedules nothing.
        coalescer.touch(vec![InvalidationTarget::key("list:records")]);
        time::sleep(Duration::from_secs(3)).await;
        assert!(cache.keys().is_empty());

        let marked_at = Instant::now();
        coalescer.mark_stale(InvalidationTarget::key("list:records"));
        time::sleep(Duration::from_millis(800)).await;
        coalescer.touch(vec![InvalidationTarget::key("list:records")]);
        // Unrelated targets do not move the deadline.
        time::sleep(Duration::from_millis(1500)).await;
        coalescer.touch(vec![InvalidationTarget::key("detail:9")]);
        time::sleep(Duration::from_secs(3)).await;

        assert_eq!(cache.keys(), vec!["list:records".to_string()]);
        assert_eq!(
            cache.times()[0].duration_since(marked_at),
            Duration::from_millis(2800)
        );
        assert!(cache.times()[0] > start);
    }

    #[test]
    fn test_touch_respects_ceiling() {
        let settings = settings(1000, Some(2500));
        let mut batch = PendingBatch::default();
        let start = Instant::now();

        assert!(!batch.touch(&[InvalidationTarget::key("a")], start));
        batch.add(InvalidationTarget::key("a"), start);
        assert!(batch.touch(&[InvalidationTarget::key("a")], start + Duration::from_millis(2000)));
        assert_eq!(batch.deadline(&settings), Some(start + Duration::from_millis(2500)));
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_now_skips_the_debounce() {
        let cache = Arc::new(RecordingCache::default());
        let stats = Arc::new(EngineStats::default());
        let start = Instant::now();
        let coalescer = InvalidationCoalescer::spawn(cache.clone(), settings(5000, None), stats);

        coalescer.mark_stale(InvalidationTarget::prefix("detail:"));
        coalescer.flush_now();
        time::sleep(Duration::from_millis(10)).await;

        assert_eq!(cache.keys(), vec!["detail:*".to_string()]);
        assert_eq!(cache.times()[0], start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_discards_pending_batch() {
        let cache = Arc::new(RecordingCache::default());
        let stats = Arc::new(EngineStats::default());
        let coalescer = InvalidationCoalescer::spawn(cache.clone(), settings(1000, None), stats);

        coalescer.mark_stale(InvalidationTarget::key("list:records"));
        coalescer.shutdown().await;
        coalescer.shutdown().await;
        coalescer.mark_stale(InvalidationTarget::key("list:records"));
        time::sleep(Duration::from_secs(5)).await;

        assert!(cache.keys().is_empty());
    }

    #[test]
    fn test_batch_deadline_respects_ceiling() {
        let settings = settings(1000, Some(2500));
        let mut batch = PendingBatch::default();
        assert_eq!(batch.deadline(&settings), None);

        let start = Instant::now();
        batch.add(InvalidationTarget::key("a"), start);
        assert_eq!(batch.deadline(&settings), Some(start + Duration::from_millis(1000)));

        batch.add(InvalidationTarget::key("b"), start + Duration::from_millis(2000));
        assert_eq!(batch.deadline(&settings), Some(start + Duration::from_millis(2500)));

        assert_eq!(batch.take().len(), 2);
        assert!(batch.is_empty());
        assert_eq!(batch.deadline(&settings), None);
    }
}
