// tests/common/mock_notify.rs
//! Notify port that records every descriptor it is asked to show.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use leadsync_lib::realtime::{NotificationDescriptor, NotifyPort, PortError};

#[derive(Clone, Default)]
pub struct RecordingNotify {
    shown: Arc<Mutex<Vec<NotificationDescriptor>>>,
    fail: Arc<AtomicBool>,
    panic: Arc<AtomicBool>,
}

impl RecordingNotify {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Make `show` panic instead of returning, like a broken toast layer.
    pub fn set_panicking(&self, panic: bool) {
        self.panic.store(panic, Ordering::SeqCst);
    }

    pub fn shown(&self) -> Vec<NotificationDescriptor> {
        self.shown.lock().unwrap().clone()
    }
}

impl NotifyPort for RecordingNotify {
    fn show(&self, descriptor: &NotificationDescriptor) -> Result<(), PortError> {
        if self.panic.load(Ordering::SeqCst) {
            panic!("toast layer crashed rendering '{}'", descriptor.title);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(PortError::Notify("toast layer unavailable".to_string()));
        }
        self.shown.lock().unwrap().push(descriptor.clone());
        Ok(())
    }
}
