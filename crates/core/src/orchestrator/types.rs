//! Types for the refresh orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entry::{EntryId, StoreError};
use crate::queue::QueueStatus;
use crate::scheduler::{SchedulerConfig, SchedulerError};

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("entry not found: {0}")]
    EntryNotFound(EntryId),

    #[error("entry {0} is disabled")]
    EntryDisabled(EntryId),

    /// Queued or being installed already.
    #[error("entry {0} is already being refreshed")]
    EntryInFlight(EntryId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub running: bool,
    pub scheduler: SchedulerConfig,
    /// Whether a cron timer is installed.
    pub timer_active: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub queue: QueueStatus,
    /// Accounts rejected during the current run.
    pub invalid_accounts: usize,
    /// Devices with a connect-triggered batch open.
    pub connected_devices: Vec<String>,
}
