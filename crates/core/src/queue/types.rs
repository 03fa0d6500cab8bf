//! Types shared by the install queue and its callers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::in_flight::InFlightGuard;
use crate::entry::{EntryId, InstallableEntry};

/// Identifies one trigger's worth of refresh requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why a request never reached the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueError {
    #[error("install queue is full")]
    Full,

    #[error("install queue is not running")]
    NotRunning,
}

impl QueueError {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueError::Full => "full",
            QueueError::NotRunning => "not_running",
        }
    }
}

/// What the in-flight-by-entry set records for each claimed entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallingEntry {
    pub entry_id: EntryId,
    pub app_name: String,
    pub device_name: String,
    pub udid: String,
    /// Masked.
    pub account: String,
    pub claimed_at: DateTime<Utc>,
}

impl InstallingEntry {
    pub fn from_entry(entry: &InstallableEntry) -> Self {
        Self {
            entry_id: entry.id,
            app_name: entry.app_name.clone(),
            device_name: entry.device_name.clone(),
            udid: entry.udid.clone(),
            account: entry.masked_account(),
            claimed_at: Utc::now(),
        }
    }
}

/// Claim on an entry id. Dropping it lets the entry be queued again.
pub type EntryClaim = InFlightGuard<EntryId, InstallingEntry>;

/// Claim on a device udid, valued by the device name.
pub type DeviceClaim = InFlightGuard<String, String>;

/// One queued refresh. The entry is a snapshot taken at submission.
#[derive(Debug)]
pub struct RefreshRequest {
    pub entry: InstallableEntry,
    pub notify: bool,
    pub batch_id: BatchId,
    pub(crate) claim: EntryClaim,
}

/// A request dropped at submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedRequest {
    pub entry_id: EntryId,
    pub reason: QueueError,
}

/// Outcome of one `submit` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitReport {
    pub batch_id: BatchId,
    /// Accepted into the queue, in submission order.
    pub queued: Vec<EntryId>,
    /// Already in flight.
    pub skipped: Vec<EntryId>,
    pub dropped: Vec<DroppedRequest>,
}

impl SubmitReport {
    pub fn new(batch_id: BatchId) -> Self {
        Self {
            batch_id,
            queued: Vec::new(),
            skipped: Vec::new(),
            dropped: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }
}

/// Progress events emitted by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RefreshEvent {
    Started {
        entry_id: EntryId,
        batch_id: BatchId,
    },
    Finished {
        entry_id: EntryId,
        batch_id: BatchId,
        succeeded: bool,
        error: Option<String>,
    },
}

/// Called by the worker for every [`RefreshEvent`].
pub type RefreshCallback = std::sync::Arc<dyn Fn(RefreshEvent) + Send + Sync>;

/// Snapshot of the queue for status endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub running: bool,
    pub depth: usize,
    pub capacity: usize,
    pub in_flight: usize,
    pub current_entry: Option<EntryId>,
    pub open_batches: usize,
}
