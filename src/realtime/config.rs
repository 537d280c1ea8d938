use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::coalescer::CoalescerSettings;
use super::error::EngineError;
use super::event_types::WindowClass;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// `None` disables the ceiling.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: Option<u64>,
    #[serde(default = "default_high_frequency_window_ms")]
    pub high_frequency_window_ms: u64,
    #[serde(default = "default_low_frequency_window_ms")]
    pub low_frequency_window_ms: u64,
    /// Per event name ingress window, in ms.
    #[serde(default)]
    pub window_overrides: HashMap<String, u64>,
    #[serde(default = "default_notification_window_ms")]
    pub notification_window_ms: u64,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    #[serde(default = "default_true")]
    pub resync_on_reconnect: bool,
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
}

fn default_debounce_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> Option<u64> {
    Some(5000)
}

fn default_high_frequency_window_ms() -> u64 {
    3000
}

fn default_low_frequency_window_ms() -> u64 {
    7000
}

fn default_notification_window_ms() -> u64 {
    5000
}

fn default_sweep_interval_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_delay_ms: default_max_delay_ms(),
            high_frequency_window_ms: default_high_frequency_window_ms(),
            low_frequency_window_ms: default_low_frequency_window_ms(),
            window_overrides: HashMap::new(),
            notification_window_ms: default_notification_window_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            resync_on_reconnect: true,
            notifications_enabled: true,
        }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: EngineConfig = serde_json::from_str(&raw)?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(value) = env_u64("LEADSYNC_DEBOUNCE_MS") {
            self.debounce_ms = value;
        }
        if let Ok(raw) = std::env::var("LEADSYNC_MAX_DELAY_MS") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "" => {}
                "0" | "off" | "none" => self.max_delay_ms = None,
                other => match other.parse::<u64>() {
                    Ok(value) => self.max_delay_ms = Some(value),
                    Err(_) => tracing::warn!("ignoring invalid LEADSYNC_MAX_DELAY_MS={raw}"),
                },
            }
        }
        if let Some(value) = env_u64("LEADSYNC_NOTIFICATION_WINDOW_MS") {
            self.notification_window_ms = value;
        }
        if let Some(value) = env_u64("LEADSYNC_SWEEP_INTERVAL_MS") {
            self.sweep_interval_ms = value;
        }
        if let Some(value) = env_bool("LEADSYNC_RESYNC_ON_RECONNECT") {
            self.resync_on_reconnect = value;
        }
        if let Some(value) = env_bool("LEADSYNC_NOTIFICATIONS_ENABLED") {
            self.notifications_enabled = value;
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.debounce_ms == 0 {
            return Err(EngineError::Config("debounce_ms must be greater than zero".to_string()));
        }
        if let Some(max_delay_ms) = self.max_delay_ms {
            if max_delay_ms < self.debounce_ms {
                return Err(EngineError::Config(format!(
                    "max_delay_ms ({max_delay_ms}) must not be shorter than debounce_ms ({})",
                    self.debounce_ms
                )));
            }
        }
        for (name, value) in [
            ("high_frequency_window_ms", self.high_frequency_window_ms),
            ("low_frequency_window_ms", self.low_frequency_window_ms),
            ("notification_window_ms", self.notification_window_ms),
            ("sweep_interval_ms", self.sweep_interval_ms),
        ] {
            if value == 0 {
                return Err(EngineError::Config(format!("{name} must be greater than zero")));
            }
        }
        if let Some((event, _)) = self.window_overrides.iter().find(|(_, ms)| **ms == 0) {
            return Err(EngineError::Config(format!(
                "window override for '{event}' must be greater than zero"
            )));
        }
        Ok(())
    }

    /// Ingress dedup window for an event.
    pub fn window_for(&self, event_name: &str, class: WindowClass) -> Duration {
        let ms = self
            .window_overrides
            .get(event_name)
            .copied()
            .unwrap_or(match class {
                WindowClass::HighFrequency => self.high_frequency_window_ms,
                WindowClass::LowFrequency => self.low_frequency_window_ms,
            });
        Duration::from_millis(ms)
    }

    pub fn coalescer_settings(&self) -> CoalescerSettings {
        CoalescerSettings {
            debounce: Duration::from_millis(self.debounce_ms),
            max_delay: self.max_delay_ms.map(Duration::from_millis),
        }
    }

    pub fn notification_window(&self) -> Duration {
        Duration::from_millis(self.notification_window_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

fn env_u64(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<u64>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("ignoring invalid {key}={raw}");
            None
        }
    }
}

fn env_bool(key: &str) -> Option<bool> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        "" => None,
        _ => {
            tracing::warn!("ignoring invalid {key}={raw}");
            None
        }
    }
}
