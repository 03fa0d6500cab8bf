//! Scheduler types.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::entry::{DeviceClass, EntryId, StoreError};
use crate::queue::SubmitReport;

/// Errors from the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// A device that just appeared on the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedDevice {
    pub udid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub device_class: DeviceClass,
}

/// Invoked by the device discovery collaborator on connect.
pub type DeviceConnectedCallback = Arc<dyn Fn(ConnectedDevice) + Send + Sync>;

/// Outcome of one sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepReport {
    /// Enabled entries looked at.
    pub considered: usize,
    /// Candidates whose device failed the liveness probe.
    pub unreachable: Vec<EntryId>,
    pub submitted: SubmitReport,
}
