//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

use crate::queue::QueueConfig;
use crate::scheduler::SchedulerConfig;

/// Configuration for the refresh orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub queue: QueueConfig,

    /// Initial scheduler settings. Replaced by `reload`.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl OrchestratorConfig {
    pub fn new(queue: QueueConfig, scheduler: SchedulerConfig) -> Self {
        Self { queue, scheduler }
    }
}
