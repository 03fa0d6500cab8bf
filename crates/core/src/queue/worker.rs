//! Bounded FIFO install queue with a single worker.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::accounts::InvalidAccountSet;
use super::config::QueueConfig;
use super::in_flight::InFlightSet;
use super::types::{
    BatchId, DeviceClaim, DroppedRequest, EntryClaim, InstallingEntry, QueueError, QueueStatus,
    RefreshCallback, RefreshEvent, RefreshRequest, SubmitReport,
};
use crate::entry::{EntryId, EntryStore, InstallableEntry};
use crate::metrics;
use crate::notify::{BatchNotifier, RequestOutcome};
use crate::session::{InstallMode, InstallReport, Installer, SessionError};

struct WorkerChannels {
    tx: mpsc::Sender<RefreshRequest>,
    shutdown_tx: broadcast::Sender<()>,
}

/// State shared between the queue handle and its worker task.
#[derive(Clone)]
struct WorkerContext {
    config: QueueConfig,
    store: Arc<dyn EntryStore>,
    installer: Arc<dyn Installer>,
    batches: Arc<BatchNotifier>,
    invalid_accounts: Arc<InvalidAccountSet>,
    install_lock: Arc<tokio::sync::Mutex<()>>,
    current: Arc<Mutex<Option<EntryId>>>,
    depth: Arc<AtomicUsize>,
    callback: Arc<RwLock<Option<RefreshCallback>>>,
}

/// The install queue.
///
/// Entries are claimed by id at submission; an entry that is already queued
/// or running is skipped. One worker drains the queue in order, running one
/// session at a time.
pub struct InstallQueue {
    ctx: WorkerContext,
    in_flight: InFlightSet<EntryId, InstallingEntry>,
    running: Arc<AtomicBool>,
    channels: Mutex<Option<WorkerChannels>>,
}

impl InstallQueue {
    pub fn new(
        config: QueueConfig,
        store: Arc<dyn EntryStore>,
        installer: Arc<dyn Installer>,
        batches: Arc<BatchNotifier>,
        invalid_accounts: Arc<InvalidAccountSet>,
    ) -> Self {
        Self {
            ctx: WorkerContext {
                config,
                store,
                installer,
                batches,
                invalid_accounts,
                install_lock: Arc::new(tokio::sync::Mutex::new(())),
                current: Arc::new(Mutex::new(None)),
                depth: Arc::new(AtomicUsize::new(0)),
                callback: Arc::new(RwLock::new(None)),
            },
            in_flight: InFlightSet::new(),
            running: Arc::new(AtomicBool::new(false)),
            channels: Mutex::new(None),
        }
    }

    /// Set the callback for worker progress events.
    pub fn with_callback(self, callback: RefreshCallback) -> Self {
        self.set_callback(callback);
        self
    }

    pub fn set_callback(&self, callback: RefreshCallback) {
        *self
            .ctx
            .callback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn lock_channels(&self) -> MutexGuard<'_, Option<WorkerChannels>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the worker. No-op if it is already running.
    pub fn start(&self) {
        let mut channels = self.lock_channels();
        if channels.is_some() {
            debug!("Install queue already running");
            return;
        }

        let (tx, rx) = mpsc::channel(self.ctx.config.capacity.max(1));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        self.running.store(true, Ordering::SeqCst);
        tokio::spawn(run_worker(self.ctx.clone(), rx, shutdown_rx));

        *channels = Some(WorkerChannels { tx, shutdown_tx });
        info!(
            capacity = self.ctx.config.capacity,
            "Install queue started"
        );
    }

    /// Signal the worker to stop. An attempt already running is allowed to
    /// finish; queued requests are discarded. Returns false if not running.
    pub fn stop(&self) -> bool {
        let taken = self.lock_channels().take();
        match taken {
            Some(channels) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = channels.shutdown_tx.send(());
                info!("Install queue stopping");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Queue entries as one batch.
    ///
    /// Never fails: entries already in flight are skipped, and entries that
    /// cannot be queued are reported as dropped. A device claim handed over
    /// here lives until the batch completes.
    pub async fn submit(
        &self,
        entries: Vec<InstallableEntry>,
        notify: bool,
        device_claim: Option<DeviceClaim>,
    ) -> SubmitReport {
        let batch_id = BatchId::new();
        let mut report = SubmitReport::new(batch_id);
        if entries.is_empty() {
            return report;
        }

        self.ctx
            .batches
            .open(batch_id, entries.len(), notify, device_claim);
        let sender = self.lock_channels().as_ref().map(|c| c.tx.clone());

        for entry in entries {
            let entry_id = entry.id;
            let claim = match self
                .in_flight
                .try_claim(entry_id, InstallingEntry::from_entry(&entry))
            {
                Some(claim) => claim,
                None => {
                    debug!(entry_id, "Entry already in flight, skipping");
                    report.skipped.push(entry_id);
                    continue;
                }
            };

            let request = RefreshRequest {
                entry,
                notify,
                batch_id,
                claim,
            };

            let dropped = match &sender {
                None => Some(QueueError::NotRunning),
                Some(tx) => match tx.try_send(request) {
                    Ok(()) => {
                        self.ctx.depth.fetch_add(1, Ordering::SeqCst);
                        metrics::QUEUE_DEPTH.inc();
                        report.queued.push(entry_id);
                        None
                    }
                    Err(TrySendError::Full(_)) => Some(QueueError::Full),
                    Err(TrySendError::Closed(_)) => Some(QueueError::NotRunning),
                },
            };

            if let Some(reason) = dropped {
                warn!(entry_id, reason = %reason, "Refresh request dropped");
                metrics::QUEUE_DROPPED
                    .with_label_values(&[reason.as_str()])
                    .inc();
                report.dropped.push(DroppedRequest { entry_id, reason });
            }
        }

        let not_queued = report.skipped.len() + report.dropped.len();
        self.ctx.batches.shrink(batch_id, not_queued).await;

        debug!(
            batch_id = %batch_id,
            queued = report.queued.len(),
            skipped = report.skipped.len(),
            dropped = report.dropped.len(),
            "Batch submitted"
        );
        report
    }

    /// Claim an entry outside the queue, e.g. for an interactive install.
    pub fn try_claim(&self, entry: &InstallableEntry) -> Option<EntryClaim> {
        self.in_flight
            .try_claim(entry.id, InstallingEntry::from_entry(entry))
    }

    /// Held for the duration of every tool invocation.
    pub fn install_lock(&self) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(&self.ctx.install_lock)
    }

    /// Entries currently claimed (queued or running), oldest first.
    pub fn installing(&self) -> Vec<InstallingEntry> {
        let mut entries: Vec<InstallingEntry> = self
            .in_flight
            .snapshot()
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        entries.sort_by_key(|e| e.claimed_at);
        entries
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            running: self.is_running(),
            depth: self.ctx.depth.load(Ordering::SeqCst),
            capacity: self.ctx.config.capacity,
            in_flight: self.in_flight.len(),
            current_entry: *self
                .ctx
                .current
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
            open_batches: self.ctx.batches.open_batches(),
        }
    }
}

impl Drop for InstallQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_worker(
    ctx: WorkerContext,
    mut rx: mpsc::Receiver<RefreshRequest>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    info!("Install queue worker started");

    if ctx.config.warmup_ms > 0 {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(ctx.config.warmup_ms)) => {}
            _ = shutdown_rx.recv() => {
                ctx.discard_remaining(&mut rx);
                info!("Install queue worker stopped during warm-up");
                return;
            }
        }
    }

    loop {
        let request = tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            request = rx.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        ctx.depth.fetch_sub(1, Ordering::SeqCst);
        metrics::QUEUE_DEPTH.dec();
        ctx.process(request).await;

        if ctx.config.cooldown_ms > 0 {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(ctx.config.cooldown_ms)) => {}
                _ = shutdown_rx.recv() => break,
            }
        }
    }

    ctx.discard_remaining(&mut rx);
    info!("Install queue worker stopped");
}

impl WorkerContext {
    fn emit(&self, event: RefreshEvent) {
        let callback = self
            .callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(event);
        }
    }

    fn set_current(&self, entry_id: Option<EntryId>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = entry_id;
    }

    /// Drop everything still queued. Claims are released with the requests.
    fn discard_remaining(&self, rx: &mut mpsc::Receiver<RefreshRequest>) {
        rx.close();
        let mut discarded = 0;
        while let Ok(request) = rx.try_recv() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            metrics::QUEUE_DEPTH.dec();
            self.batches.discard(request.batch_id);
            discarded += 1;
        }
        if discarded > 0 {
            info!("Discarded {} queued refresh requests", discarded);
        }
    }

    async fn process(&self, request: RefreshRequest) {
        let RefreshRequest {
            entry,
            batch_id,
            claim,
            ..
        } = request;

        self.set_current(Some(entry.id));
        self.emit(RefreshEvent::Started {
            entry_id: entry.id,
            batch_id,
        });
        info!(
            entry_id = entry.id,
            batch_id = %batch_id,
            account = %entry.masked_account(),
            "Refreshing {}",
            entry.app_name
        );

        let report = self.attempt(&entry).await;

        if let Err(SessionError::AccountInvalid { .. }) = &report.result {
            if self.invalid_accounts.insert(&entry.account) {
                warn!(
                    account = %entry.masked_account(),
                    "Account rejected, skipping its remaining entries this run"
                );
            }
        }

        if let Err(e) = self
            .store
            .record_refresh(entry.id, &report.to_record(Utc::now()))
        {
            warn!(entry_id = entry.id, error = %e, "Failed to record refresh outcome");
        }

        let outcome = match report.error_message() {
            None => {
                info!(entry_id = entry.id, "Refreshed {}", entry.app_name);
                RequestOutcome::Succeeded
            }
            Some(error) => {
                warn!(
                    entry_id = entry.id,
                    attempts = report.attempts,
                    error = %error,
                    "Refresh of {} failed",
                    entry.app_name
                );
                RequestOutcome::Failed { error }
            }
        };

        drop(claim);
        self.set_current(None);
        self.emit(RefreshEvent::Finished {
            entry_id: entry.id,
            batch_id,
            succeeded: report.succeeded(),
            error: report.error_message(),
        });

        self.batches.track(batch_id, &entry, &outcome).await;
    }

    async fn attempt(&self, entry: &InstallableEntry) -> InstallReport {
        if self.invalid_accounts.contains(&entry.account) {
            return InstallReport::rejected(SessionError::AccountInvalid {
                error_log: "account was rejected earlier in this run".to_string(),
            });
        }
        if let Some(field) = entry.missing_install_field() {
            return InstallReport::rejected(SessionError::invalid_arguments(field));
        }

        let _guard = self.install_lock.lock().await;
        self.installer.install(entry, InstallMode::Quiet).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::SqliteEntryStore;
    use crate::testing::{fixtures, MockInstaller, MockNotifier};

    struct Harness {
        queue: InstallQueue,
        store: Arc<SqliteEntryStore>,
        installer: Arc<MockInstaller>,
        notifier: Arc<MockNotifier>,
    }

    fn harness(config: QueueConfig) -> Harness {
        let store = Arc::new(SqliteEntryStore::in_memory().unwrap());
        let installer = Arc::new(MockInstaller::new());
        let notifier = Arc::new(MockNotifier::new());
        let batches = Arc::new(BatchNotifier::new(notifier.clone()));
        let queue = InstallQueue::new(
            config,
            store.clone(),
            installer.clone(),
            batches,
            Arc::new(InvalidAccountSet::new()),
        );
        Harness {
            queue,
            store,
            installer,
            notifier,
        }
    }

    fn create(store: &SqliteEntryStore, udid: &str) -> InstallableEntry {
        store.create(fixtures::new_entry(udid)).unwrap()
    }

    #[tokio::test]
    async fn test_submit_when_not_running_drops() {
        let h = harness(QueueConfig::immediate());
        let entry = create(&h.store, "udid-1");

        let report = h.queue.submit(vec![entry.clone()], true, None).await;
        assert!(report.queued.is_empty());
        assert_eq!(
            report.dropped,
            vec![DroppedRequest {
                entry_id: entry.id,
                reason: QueueError::NotRunning
            }]
        );
        // Claim was released
        assert!(h.queue.installing().is_empty());
        assert_eq!(h.queue.status().open_batches, 0);
    }

    #[tokio::test]
    async fn test_full_queue_drops_and_releases_claim() {
        // Long warm-up keeps everything in the channel
        let h = harness(QueueConfig::immediate().with_capacity(1).with_warmup_ms(60_000));
        h.queue.start();

        let a = create(&h.store, "udid-a");
        let b = create(&h.store, "udid-b");
        let report = h.queue.submit(vec![a.clone(), b.clone()], false, None).await;

        assert_eq!(report.queued, vec![a.id]);
        assert_eq!(
            report.dropped,
            vec![DroppedRequest {
                entry_id: b.id,
                reason: QueueError::Full
            }]
        );
        assert!(h.queue.try_claim(&b).is_some());
        assert!(h.queue.try_claim(&a).is_none());

        h.queue.stop();
    }

    #[tokio::test]
    async fn test_duplicate_submission_is_skipped() {
        let h = harness(QueueConfig::immediate().with_warmup_ms(60_000));
        h.queue.start();
        let entry = create(&h.store, "udid-1");

        let first = h.queue.submit(vec![entry.clone()], false, None).await;
        let second = h.queue.submit(vec![entry.clone()], false, None).await;

        assert_eq!(first.queued, vec![entry.id]);
        assert_eq!(second.skipped, vec![entry.id]);
        assert_eq!(h.queue.status().depth, 1);
        h.queue.stop();
    }

    #[tokio::test]
    async fn test_stop_discards_queued_requests() {
        let h = harness(QueueConfig::immediate().with_warmup_ms(60_000));
        h.queue.start();
        let entry = create(&h.store, "udid-1");
        h.queue.submit(vec![entry.clone()], true, None).await;

        assert!(h.queue.stop());
        assert!(!h.queue.stop());

        for _ in 0..100 {
            if h.queue.installing().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(h.queue.installing().is_empty());
        assert_eq!(h.installer.call_count().await, 0);
        assert!(h.notifier.sent_messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_processes_and_records_outcome() {
        let h = harness(QueueConfig::immediate());
        h.queue.start();
        let entry = create(&h.store, "udid-1");

        h.queue.submit(vec![entry.clone()], true, None).await;

        for _ in 0..200 {
            if h.installer.call_count().await == 1 && h.queue.installing().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let stored = h.store.get(entry.id).unwrap().unwrap();
        assert!(stored.refresh_succeeded);
        assert!(stored.refreshed_at.is_some());
        assert!(stored.expires_at.is_some());
        h.queue.stop();
    }
}
