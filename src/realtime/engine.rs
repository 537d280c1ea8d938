//! The engine's only public surface: mount against live ports, tear down.
//!
//! Flow: transport handler (liveness check) -> inbound channel -> dispatcher
//! -> router -> ingress dedup -> { coalescer -> cache, gate -> notify }.
//! A duplicate stopped at ingress only touches its targets in the coalescer,
//! so a burst keeps the trailing flush moving without re-adding anything.
//! The invalidation and notification paths never wait on each other.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::coalescer::InvalidationCoalescer;
use super::config::EngineConfig;
use super::dedup::DedupWindow;
use super::error::EngineError;
use super::event::{DedupKey, Event};
use super::notify::{NotificationDescriptor, NotificationGate};
use super::ports::{CachePort, ConnectionSignal, NotifyPort, Transport};
use super::router::{EventRouter, InvalidationTarget};
use super::stats::{EngineStats, StatsSnapshot};
use super::supervisor::{ConnectionState, ConnectionSupervisor, InboundEvent, Transition};
use super::panic_message;

pub struct EnginePorts {
    pub transport: Arc<dyn Transport>,
    pub cache: Arc<dyn CachePort>,
    pub notify: Arc<dyn NotifyPort>,
}

pub struct RealtimeEngine {
    supervisor: Arc<ConnectionSupervisor>,
    coalescer: Arc<InvalidationCoalescer>,
    stats: Arc<EngineStats>,
    tasks: Vec<JoinHandle<()>>,
    torn_down: bool,
}

impl std::fmt::Debug for RealtimeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeEngine")
            .field("stats", &self.stats)
            .field("tasks", &self.tasks.len())
            .field("torn_down", &self.torn_down)
            .finish_non_exhaustive()
    }
}

impl RealtimeEngine {
    /// Wire the engine to a transport and the cache/notify ports. Must be
    /// called from within a Tokio runtime.
    pub fn mount(ports: EnginePorts, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        tokio::runtime::Handle::try_current()
            .map_err(|e| EngineError::Runtime(format!("mount requires a tokio runtime: {e}")))?;

        let stats = Arc::new(EngineStats::default());
        let router = EventRouter::new();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let supervisor = Arc::new(ConnectionSupervisor::new(
            ports.transport.clone(),
            router.event_names(),
            inbound_tx,
            stats.clone(),
        ));
        let coalescer = Arc::new(InvalidationCoalescer::spawn(
            ports.cache,
            config.coalescer_settings(),
            stats.clone(),
        ));

        let ingress = Arc::new(DedupWindow::new(
            "ingress",
            Duration::from_millis(config.high_frequency_window_ms),
        ));
        let gate = NotificationGate::new(config.notification_window());

        let mut tasks = Vec::with_capacity(4);
        tasks.push(ingress.spawn_sweeper(config.sweep_interval()));
        tasks.push(gate.window().spawn_sweeper(config.sweep_interval()));

        let resync_targets: Vec<InvalidationTarget> = if config.resync_on_reconnect {
            router.broad_targets().into_iter().collect()
        } else {
            Vec::new()
        };

        let pipeline = EventPipeline {
            router,
            ingress,
            gate,
            coalescer: coalescer.clone(),
            notify: ports.notify,
            config,
            stats: stats.clone(),
        };
        tasks.push(tokio::spawn(run_dispatcher(inbound_rx, pipeline)));

        // Subscribe to signals before sampling the current state so that a
        // transition in between is not lost.
        let signals = ports.transport.connection_signals();
        let listener = SignalListener {
            transport: ports.transport,
            supervisor: supervisor.clone(),
            coalescer: coalescer.clone(),
            resync_targets,
            stats: stats.clone(),
        };
        if listener.transport.is_connected() {
            listener.apply(ConnectionSignal::Connected);
        }
        tasks.push(tokio::spawn(listener.run(signals)));

        tracing::info!("realtime engine mounted");
        Ok(Self {
            supervisor,
            coalescer,
            stats,
            tasks,
            torn_down: false,
        })
    }

    /// Release every handler and timer. Pending invalidations are discarded
    /// so nothing fires against the cache after this returns. Idempotent.
    pub async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        self.supervisor.teardown();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.coalescer.shutdown().await;
        tracing::info!("realtime engine torn down");
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Manual refresh: flush pending invalidations without waiting.
    pub fn flush_pending(&self) {
        self.coalescer.flush_now();
    }
}

impl Drop for RealtimeEngine {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }
        self.supervisor.teardown();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.coalescer.abort();
    }
}

struct EventPipeline {
    router: EventRouter,
    ingress: Arc<DedupWindow>,
    gate: NotificationGate,
    coalescer: Arc<InvalidationCoalescer>,
    notify: Arc<dyn NotifyPort>,
    config: EngineConfig,
    stats: Arc<EngineStats>,
}

impl EventPipeline {
    fn process(&self, event: Event) {
        EngineStats::bump(&self.stats.events_received);

        // Handlers are only attached for routed names.
        let Some(route) = self.router.lookup(&event.name) else {
            return;
        };

        let outcome = self.router.route(&event);
        let key = DedupKey::for_event(&event);
        let window = self.config.window_for(&event.name, route.window);
        if self.ingress.should_suppress_within(&key, window) {
            EngineStats::bump(&self.stats.events_suppressed);
            tracing::debug!("suppressing duplicate '{key}' (event {})", event.id);
            self.coalescer.touch(outcome.targets);
            return;
        }

        for target in outcome.targets {
            self.coalescer.mark_stale(target);
        }
        if let Some(descriptor) = outcome.notification {
            self.raise_notification(&descriptor);
        }
    }

    fn raise_notification(&self, descriptor: &NotificationDescriptor) {
        if !self.config.notifications_enabled {
            return;
        }
        if !self.gate.should_notify(descriptor) {
            EngineStats::bump(&self.stats.notifications_suppressed);
            tracing::debug!("notification '{}' suppressed", descriptor.dedup_key);
            return;
        }
        match panic::catch_unwind(AssertUnwindSafe(|| self.notify.show(descriptor))) {
            Ok(Ok(())) => EngineStats::bump(&self.stats.notifications_shown),
            Ok(Err(e)) => {
                EngineStats::bump(&self.stats.notification_failures);
                tracing::warn!("failed to show notification '{}': {e}", descriptor.dedup_key);
            }
            Err(payload) => {
                EngineStats::bump(&self.stats.notification_failures);
                tracing::warn!(
                    "notify port panicked on '{}': {}",
                    descriptor.dedup_key,
                    panic_message(payload.as_ref())
                );
            }
        }
    }
}

/// Everything on the queue was accepted by a live handler and is processed
/// in arrival order, even if the connection has cycled since.
async fn run_dispatcher(mut rx: mpsc::UnboundedReceiver<InboundEvent>, pipeline: EventPipeline) {
    while let Some(inbound) = rx.recv().await {
        tracing::trace!("dispatching '{}' from epoch {}", inbound.name, inbound.epoch);
        pipeline.process(Event {
            id: Uuid::new_v4(),
            name: inbound.name,
            payload: inbound.payload,
            received_at: inbound.received_at,
        });
    }
}

struct SignalListener {
    transport: Arc<dyn Transport>,
    supervisor: Arc<ConnectionSupervisor>,
    coalescer: Arc<InvalidationCoalescer>,
    resync_targets: Vec<InvalidationTarget>,
    stats: Arc<EngineStats>,
}

impl SignalListener {
    fn apply(&self, signal: ConnectionSignal) {
        if let Transition::Connected {
            epoch,
            reconnect: true,
        } = self.supervisor.handle_signal(signal)
        {
            EngineStats::bump(&self.stats.reconnects);
            if !self.resync_targets.is_empty() {
                tracing::info!(
                    "reconnected at epoch {epoch}, resyncing {} broad target(s)",
                    self.resync_targets.len()
                );
                for target in &self.resync_targets {
                    self.coalescer.mark_stale(target.clone());
                }
            }
        }
    }

    async fn run(self, mut signals: broadcast::Receiver<ConnectionSignal>) {
        loop {
            match signals.recv().await {
                Ok(signal) => self.apply(signal),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("connection signal listener lagged, skipped {n} signal(s)");
                    let current = if self.transport.is_connected() {
                        ConnectionSignal::Connected
                    } else {
                        ConnectionSignal::Disconnected
                    };
                    self.apply(current);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!("transport signal channel closed");
                    break;
                }
            }
        }
    }
}
