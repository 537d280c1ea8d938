//! Lifecycle of the push-transport subscription.
//!
//! Every successful (re)connect opens a new epoch. Handlers are attached
//! tagged with the epoch they were created in and share a liveness flag with
//! the supervisor. Detaching clears the flag, so a callback that fires after
//! its handler was detached is dropped on the spot. Anything a live handler
//! accepted is queued for the dispatcher and processed in order, whatever
//! happens to the connection afterwards.
//! Before a handler is attached for an event name, any handler still attached
//! for that name is detached, so at most one is live per name no matter how
//! signals interleave.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use super::lock;
use super::ports::{ConnectionSignal, EventHandler, SubscriptionId, Transport};
use super::stats::EngineStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    pub connected: bool,
    pub subscription_epoch: u64,
}

/// Raw event as handed over by a transport handler.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub epoch: u64,
    pub name: String,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

/// Result of applying one connection signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Connecting,
    Connected { epoch: u64, reconnect: bool },
    Disconnected { epoch: u64 },
    Ignored,
}

#[derive(Debug, Clone)]
struct AttachedHandler {
    subscription: SubscriptionId,
    epoch: u64,
    live: Arc<AtomicBool>,
}

struct SupervisorState {
    link: LinkState,
    epoch: u64,
    attached: HashMap<&'static str, AttachedHandler>,
    torn_down: bool,
}

pub struct ConnectionSupervisor {
    transport: Arc<dyn Transport>,
    event_names: Vec<&'static str>,
    sink: mpsc::UnboundedSender<InboundEvent>,
    stats: Arc<EngineStats>,
    state: Mutex<SupervisorState>,
}

impl ConnectionSupervisor {
    pub fn new(
        transport: Arc<dyn Transport>,
        event_names: Vec<&'static str>,
        sink: mpsc::UnboundedSender<InboundEvent>,
        stats: Arc<EngineStats>,
    ) -> Self {
        Self {
            transport,
            event_names,
            sink,
            stats,
            state: Mutex::new(SupervisorState {
                link: LinkState::Disconnected,
                epoch: 0,
                attached: HashMap::new(),
                torn_down: false,
            }),
        }
    }

    pub fn handle_signal(&self, signal: ConnectionSignal) -> Transition {
        match signal {
            ConnectionSignal::Connecting => self.on_connecting(),
            ConnectionSignal::Connected => self.on_connected(),
            ConnectionSignal::Disconnected => self.on_disconnected(),
        }
    }

    fn on_connecting(&self) -> Transition {
        let mut state = lock(&self.state);
        if state.torn_down || state.link == LinkState::Connected {
            return Transition::Ignored;
        }
        state.link = LinkState::Connecting;
        Transition::Connecting
    }

    fn on_connected(&self) -> Transition {
        let mut state = lock(&self.state);
        if state.torn_down {
            return Transition::Ignored;
        }

        let previous = state.epoch;
        self.detach_where(&mut state, |handler| handler.epoch <= previous);

        state.epoch += 1;
        let epoch = state.epoch;
        for &name in &self.event_names {
            self.attach(&mut state, name, epoch);
        }
        state.link = LinkState::Connected;

        tracing::info!(
            "realtime transport connected, epoch {epoch}, {} handler(s) attached",
            state.attached.len()
        );
        Transition::Connected {
            epoch,
            reconnect: previous > 0,
        }
    }

    fn on_disconnected(&self) -> Transition {
        let mut state = lock(&self.state);
        if state.torn_down || (state.link == LinkState::Disconnected && state.attached.is_empty()) {
            return Transition::Ignored;
        }

        let stale = state.epoch;
        self.detach_where(&mut state, |handler| handler.epoch <= stale);
        state.link = LinkState::Disconnected;

        tracing::info!("realtime transport disconnected, epoch {stale} handlers detached");
        Transition::Disconnected { epoch: stale }
    }

    /// Detach everything and refuse further signals. Idempotent.
    pub fn teardown(&self) {
        let mut state = lock(&self.state);
        self.detach_where(&mut state, |_| true);
        state.link = LinkState::Disconnected;
        if !state.torn_down {
            state.torn_down = true;
            tracing::debug!("connection supervisor torn down at epoch {}", state.epoch);
        }
    }

    pub fn state(&self) -> ConnectionState {
        let state = lock(&self.state);
        ConnectionState {
            connected: state.link == LinkState::Connected,
            subscription_epoch: state.epoch,
        }
    }

    pub fn link_state(&self) -> LinkState {
        lock(&self.state).link
    }

    pub fn attached_count(&self) -> usize {
        lock(&self.state).attached.len()
    }

    fn attach(&self, state: &mut SupervisorState, name: &'static str, epoch: u64) {
        if let Some(existing) = state.attached.remove(name) {
            existing.live.store(false, Ordering::SeqCst);
            self.transport.unsubscribe(existing.subscription);
        }

        let live = Arc::new(AtomicBool::new(true));
        match self
            .transport
            .subscribe(name, self.handler_for(name, epoch, live.clone()))
        {
            Ok(subscription) => {
                state.attached.insert(
                    name,
                    AttachedHandler {
                        subscription,
                        epoch,
                        live,
                    },
                );
            }
            Err(e) => {
                tracing::warn!("failed to attach handler for '{name}' at epoch {epoch}: {e}");
            }
        }
    }

    fn detach_where(&self, state: &mut SupervisorState, predicate: impl Fn(&AttachedHandler) -> bool) {
        let names: Vec<&'static str> = state
            .attached
            .iter()
            .filter(|(_, handler)| predicate(handler))
            .map(|(name, _)| *name)
            .collect();

        for name in names {
            if let Some(handler) = state.attached.remove(name) {
                handler.live.store(false, Ordering::SeqCst);
                self.transport.unsubscribe(handler.subscription);
            }
        }
    }

    fn handler_for(&self, name: &'static str, epoch: u64, live: Arc<AtomicBool>) -> EventHandler {
        let sink = self.sink.clone();
        let stats = self.stats.clone();
        Arc::new(move |payload: Value| {
            if !live.load(Ordering::SeqCst) {
                EngineStats::bump(&stats.stale_epoch_dropped);
                tracing::debug!("dropping '{name}' from detached epoch {epoch} handler");
                return;
            }
            let inbound = InboundEvent {
                epoch,
                name: name.to_string(),
                payload,
                received_at: Utc::now(),
            };
            if sink.send(inbound).is_err() {
                tracing::trace!("dispatcher gone, dropping '{name}' from epoch {epoch}");
            }
        })
    }
}
