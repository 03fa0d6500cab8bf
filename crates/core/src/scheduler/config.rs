//! Scheduler settings.

use serde::{Deserialize, Serialize};

/// Settings for scheduled and device-triggered refreshes.
///
/// Replaced at runtime through `reload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Run the cron sweep. Device-connect refreshes work either way.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cron expression in local time. Five-field expressions get a
    /// seconds field of `0`.
    #[serde(default = "default_cron")]
    pub cron: String,

    /// Include iPhone and iPad entries in sweeps.
    #[serde(default = "default_true")]
    pub device_class_enabled: bool,

    /// Refresh this many days before expiration.
    #[serde(default = "default_advance_days")]
    pub advance_days: i64,

    /// Wait after a device connects before probing it.
    #[serde(default = "default_device_settle_ms")]
    pub device_settle_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_cron() -> String {
    "0,30 3-6 * * *".to_string()
}

fn default_advance_days() -> i64 {
    1
}

fn default_device_settle_ms() -> u64 {
    30_000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cron: default_cron(),
            device_class_enabled: true,
            advance_days: default_advance_days(),
            device_settle_ms: default_device_settle_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn with_cron(mut self, cron: impl Into<String>) -> Self {
        self.cron = cron.into();
        self
    }

    pub fn with_device_settle_ms(mut self, device_settle_ms: u64) -> Self {
        self.device_settle_ms = device_settle_ms;
        self
    }

    pub fn with_device_class_enabled(mut self, enabled: bool) -> Self {
        self.device_class_enabled = enabled;
        self
    }
}
