//! Real-time event deduplication and cache invalidation.
//!
//! The engine consumes named push events from a long-lived transport and
//! keeps one client's query cache eventually consistent without storms of
//! refetches or repeated toasts:
//! - `ConnectionSupervisor`: attaches one handler per event name per
//!   connection epoch and drops callbacks from stale epochs
//! - `DedupWindow`: sliding-window suppression of retransmissions and echoes
//! - `EventRouter`: static table from event name to cache targets and toast
//! - `InvalidationCoalescer`: debounced, per-target-deduplicated cache flushes
//! - `NotificationGate`: its own dedup window for human-visible alerts
//!
//! # Architecture
//!
//! Events flow transport -> supervisor handler -> dispatcher -> ingress dedup
//! -> router, then fan out to the coalescer (-> `CachePort`) and the gate
//! (-> `NotifyPort`) independently. `RealtimeEngine::mount` wires it all up;
//! `RealtimeEngine::teardown` releases every handler, task and timer.

mod coalescer;
mod config;
mod dedup;
mod engine;
mod error;
mod event;
pub mod event_types;
mod loopback;
mod notify;
mod ports;
mod router;
mod stats;
mod supervisor;

use std::any::Any;
use std::sync::{Mutex, MutexGuard};

pub use coalescer::{CoalescerSettings, InvalidationCoalescer};
pub use config::EngineConfig;
pub use dedup::DedupWindow;
pub use engine::{EnginePorts, RealtimeEngine};
pub use error::{EngineError, PortError};
pub use event::{DedupKey, Event, RecordId, Subject};
pub use event_types::{Tone, WindowClass};
pub use loopback::LoopbackTransport;
pub use notify::{NotificationDescriptor, NotificationGate};
pub use ports::{CachePort, ConnectionSignal, EventHandler, NotifyPort, SubscriptionId, Transport};
pub use router::{EventRouter, InvalidationTarget, RouteOutcome};
pub use stats::{EngineStats, StatsSnapshot};
pub use supervisor::{ConnectionState, ConnectionSupervisor, InboundEvent, LinkState, Transition};

/// Lock a mutex, recovering the data if a previous holder panicked. Every
/// guarded structure here is left consistent between statements.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "non-string panic payload".to_string()
}
