//! Install queue configuration.

use serde::{Deserialize, Serialize};

/// Install queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Requests that may wait at once. Submissions beyond this are dropped.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Pause after each attempt.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Pause after start before the first attempt.
    #[serde(default = "default_warmup_ms")]
    pub warmup_ms: u64,
}

fn default_capacity() -> usize {
    64
}

fn default_cooldown_ms() -> u64 {
    10_000
}

fn default_warmup_ms() -> u64 {
    60_000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            cooldown_ms: default_cooldown_ms(),
            warmup_ms: default_warmup_ms(),
        }
    }
}

impl QueueConfig {
    /// No warm-up, no cooldown. For tests.
    pub fn immediate() -> Self {
        Self {
            cooldown_ms: 0,
            warmup_ms: 0,
            ..Default::default()
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_cooldown_ms(mut self, cooldown_ms: u64) -> Self {
        self.cooldown_ms = cooldown_ms;
        self
    }

    pub fn with_warmup_ms(mut self, warmup_ms: u64) -> Self {
        self.warmup_ms = warmup_ms;
        self
    }
}
