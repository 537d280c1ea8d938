use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;

use super::error::PortError;
use super::ports::{ConnectionSignal, EventHandler, SubscriptionId, Transport};

const SIGNAL_CAPACITY: usize = 64;

/// In-process transport. Delivery is synchronous and only happens while
/// connected, like a socket that drops frames when the link is down.
pub struct LoopbackTransport {
    handlers: DashMap<SubscriptionId, (String, EventHandler)>,
    next_id: AtomicU64,
    connected: AtomicBool,
    signals: broadcast::Sender<ConnectionSignal>,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    pub fn new() -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            handlers: DashMap::new(),
            next_id: AtomicU64::new(1),
            connected: AtomicBool::new(false),
            signals,
        }
    }

    /// Deliver a named event to every attached handler. Returns how many
    /// handlers saw it.
    pub fn emit(&self, event_name: &str, payload: Value) -> usize {
        if !self.is_connected() {
            tracing::debug!("loopback transport offline, dropping '{event_name}'");
            return 0;
        }

        // Collect first so handlers run without holding map shards.
        let targets: Vec<EventHandler> = self
            .handlers
            .iter()
            .filter(|entry| entry.value().0 == event_name)
            .map(|entry| entry.value().1.clone())
            .collect();

        for handler in &targets {
            handler(payload.clone());
        }
        targets.len()
    }

    pub fn begin_connecting(&self) {
        self.publish(ConnectionSignal::Connecting);
    }

    pub fn connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.publish(ConnectionSignal::Connected);
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.publish(ConnectionSignal::Disconnected);
    }

    pub fn handler_count(&self, event_name: &str) -> usize {
        self.handlers
            .iter()
            .filter(|entry| entry.value().0 == event_name)
            .count()
    }

    pub fn total_handlers(&self) -> usize {
        self.handlers.len()
    }

    fn publish(&self, signal: ConnectionSignal) {
        if let Err(e) = self.signals.send(signal) {
            tracing::trace!("no connection listeners for {signal:?}: {e}");
        }
    }
}

impl Transport for LoopbackTransport {
    fn subscribe(
        &self,
        event_name: &str,
        handler: EventHandler,
    ) -> Result<SubscriptionId, PortError> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.insert(id, (event_name.to_string(), handler));
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.handlers.remove(&id);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connection_signals(&self) -> broadcast::Receiver<ConnectionSignal> {
        self.signals.subscribe()
    }
}
