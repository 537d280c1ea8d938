//! Human-visible alerts, gated by their own dedup window.
//!
//! The gate is independent of cache invalidation: its key granularity is
//! "event + record" (no revision), so two different records each raise a
//! toast while rapid repeats against one record raise only the first.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::dedup::DedupWindow;
use super::event::DedupKey;
use super::event_types::Tone;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationDescriptor {
    pub title: String,
    pub body: String,
    pub tone: Tone,
    pub dedup_key: String,
    pub action_ref: Option<String>,
}

pub struct NotificationGate {
    window: Arc<DedupWindow>,
}

impl NotificationGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window: Arc::new(DedupWindow::new("notifications", window)),
        }
    }

    /// Never blocks. A `true` answer means show it now.
    pub fn should_notify(&self, descriptor: &NotificationDescriptor) -> bool {
        let key = DedupKey::from(descriptor.dedup_key.as_str());
        !self.window.should_suppress(&key)
    }

    pub(crate) fn window(&self) -> &Arc<DedupWindow> {
        &self.window
    }
}
