//! Per-batch aggregation of refresh outcomes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::notifier::{Notifier, NotifyError};
use crate::entry::InstallableEntry;
use crate::metrics;
use crate::queue::{BatchId, DeviceClaim};

/// How one request in a batch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    Succeeded,
    Failed { error: String },
}

/// A failed entry as listed in the notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedEntry {
    pub app_name: String,
    pub device_name: String,
    /// Masked.
    pub account: String,
    pub error: String,
}

struct Batch {
    total: usize,
    succeeded: usize,
    failed: Vec<FailedEntry>,
    notify: bool,
    opened_at: DateTime<Utc>,
    _device_claim: Option<DeviceClaim>,
}

impl Batch {
    fn is_complete(&self) -> bool {
        self.succeeded + self.failed.len() >= self.total
    }
}

/// Summary of a finalized batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub batch_id: BatchId,
    pub total: usize,
    pub succeeded: usize,
    pub failed: Vec<FailedEntry>,
    pub notified: bool,
}

/// Collects outcomes per batch and sends one message per batch with failures.
pub struct BatchNotifier {
    batches: Mutex<HashMap<BatchId, Batch>>,
    notifier: Arc<dyn Notifier>,
}

impl BatchNotifier {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            batches: Mutex::new(HashMap::new()),
            notifier,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<BatchId, Batch>> {
        self.batches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking a batch of `total` requests.
    ///
    /// A device claim handed over here is released when the batch finalizes
    /// or is discarded.
    pub fn open(
        &self,
        batch_id: BatchId,
        total: usize,
        notify: bool,
        device_claim: Option<DeviceClaim>,
    ) {
        debug!(batch_id = %batch_id, total, notify, "Opening batch");
        self.lock().insert(
            batch_id,
            Batch {
                total,
                succeeded: 0,
                failed: Vec::new(),
                notify,
                opened_at: Utc::now(),
                _device_claim: device_claim,
            },
        );
    }

    /// Lower the expected total, e.g. for requests that were never queued.
    pub async fn shrink(&self, batch_id: BatchId, by: usize) -> Option<BatchSummary> {
        if by == 0 {
            return None;
        }
        let finished = {
            let mut batches = self.lock();
            match batches.get_mut(&batch_id) {
                Some(batch) => {
                    batch.total = batch.total.saturating_sub(by);
                    if batch.is_complete() {
                        batches.remove(&batch_id)
                    } else {
                        None
                    }
                }
                None => None,
            }
        };
        match finished {
            Some(batch) => Some(self.finalize(batch_id, batch).await),
            None => None,
        }
    }

    /// Record one completed request. Returns the summary if this completed
    /// the batch. Unknown batch ids are ignored.
    pub async fn track(
        &self,
        batch_id: BatchId,
        entry: &InstallableEntry,
        outcome: &RequestOutcome,
    ) -> Option<BatchSummary> {
        let finished = {
            let mut batches = self.lock();
            let batch = batches.get_mut(&batch_id)?;
            match outcome {
                RequestOutcome::Succeeded => batch.succeeded += 1,
                RequestOutcome::Failed { error } => batch.failed.push(FailedEntry {
                    app_name: entry.app_name.clone(),
                    device_name: entry.device_name.clone(),
                    account: entry.masked_account(),
                    error: error.clone(),
                }),
            }
            if batch.is_complete() {
                batches.remove(&batch_id)
            } else {
                None
            }
        };

        match finished {
            Some(batch) => Some(self.finalize(batch_id, batch).await),
            None => None,
        }
    }

    /// Drop a batch without notifying.
    pub fn discard(&self, batch_id: BatchId) {
        if self.lock().remove(&batch_id).is_some() {
            debug!(batch_id = %batch_id, "Discarded batch");
        }
    }

    pub fn open_batches(&self) -> usize {
        self.lock().len()
    }

    async fn finalize(&self, batch_id: BatchId, batch: Batch) -> BatchSummary {
        let has_failures = !batch.failed.is_empty();
        metrics::BATCHES_FINALIZED
            .with_label_values(&[if has_failures {
                "with_failures"
            } else {
                "all_succeeded"
            }])
            .inc();

        info!(
            batch_id = %batch_id,
            total = batch.total,
            succeeded = batch.succeeded,
            failed = batch.failed.len(),
            elapsed_secs = (Utc::now() - batch.opened_at).num_seconds(),
            "Batch complete"
        );

        let mut notified = false;
        if has_failures && batch.notify {
            let (title, message) = render_failures(&batch.failed);
            notified = self.deliver(&title, &message).await.is_ok();
        }

        BatchSummary {
            batch_id,
            total: batch.total,
            succeeded: batch.succeeded,
            failed: batch.failed,
            notified,
        }
    }

    async fn deliver(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        let name = self.notifier.name().to_string();
        match self.notifier.send(title, message).await {
            Ok(()) => {
                metrics::NOTIFICATIONS_SENT
                    .with_label_values(&[&name, "success"])
                    .inc();
                Ok(())
            }
            Err(NotifyError::Disabled) => {
                debug!("Notifications disabled, skipping batch report");
                Err(NotifyError::Disabled)
            }
            Err(e) => {
                metrics::NOTIFICATIONS_SENT
                    .with_label_values(&[&name, "error"])
                    .inc();
                warn!(notifier = %name, error = %e, "Failed to send batch notification");
                Err(e)
            }
        }
    }
}

/// Title and body listing every failed entry.
pub fn render_failures(failed: &[FailedEntry]) -> (String, String) {
    let title = if failed.len() == 1 {
        format!("{} refresh failed", failed[0].app_name)
    } else {
        format!("{} apps failed to refresh", failed.len())
    };

    let message = failed
        .iter()
        .map(|f| {
            if f.device_name.is_empty() {
                format!("{} [{}]: {}", f.app_name, f.account, f.error)
            } else {
                format!(
                    "{} on {} [{}]: {}",
                    f.app_name, f.device_name, f.account, f.error
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    (title, message)
}
