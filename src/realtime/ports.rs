//! Collaborators the engine consumes but does not own.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use super::error::PortError;
use super::notify::NotificationDescriptor;
use super::router::InvalidationTarget;

/// Callback attached to the transport for one event name.
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Opaque handle returned by [`Transport::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Connection lifecycle notifications published by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionSignal {
    Connecting,
    Connected,
    Disconnected,
}

/// Persistent push channel delivering named events.
///
/// Registration calls are synchronous. Reconnection is the transport's job;
/// the engine only observes it through [`Transport::connection_signals`].
pub trait Transport: Send + Sync {
    fn subscribe(&self, event_name: &str, handler: EventHandler)
        -> Result<SubscriptionId, PortError>;

    /// Must be idempotent: unknown or already-removed ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    fn is_connected(&self) -> bool;

    fn connection_signals(&self) -> broadcast::Receiver<ConnectionSignal>;
}

/// The reactive query cache. Invalidation marks entries stale and triggers a
/// background refetch; it is safe to call redundantly.
#[async_trait]
pub trait CachePort: Send + Sync {
    async fn invalidate(&self, target: &InvalidationTarget) -> Result<(), PortError>;
}

/// The UI's toast primitive. Fire-and-forget.
pub trait NotifyPort: Send + Sync {
    fn show(&self, descriptor: &NotificationDescriptor) -> Result<(), PortError>;
}
