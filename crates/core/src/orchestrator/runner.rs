//! Refresh orchestrator implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tracing::{info, warn};

use crate::entry::{EntryId, EntryStore, InstallableEntry};
use crate::notify::{BatchNotifier, Notifier};
use crate::queue::{
    EntryClaim, InstallQueue, InstallingEntry, InvalidAccountSet, RefreshCallback, SubmitReport,
};
use crate::scheduler::{
    next_fire, parse_cron, ConnectedDevice, DeviceConnectedCallback, Scheduler, SchedulerConfig,
    SweepReport,
};
use crate::session::{DeviceTransport, InstallReport, Installer, SessionError};

use super::config::OrchestratorConfig;
use super::types::{OrchestratorError, OrchestratorStatus};

/// Drives refreshes: owns the queue worker and the scheduler.
///
/// Constructed once and shared behind an `Arc`. Lifecycle calls are
/// idempotent and serialized.
pub struct RefreshOrchestrator {
    store: Arc<dyn EntryStore>,
    queue: Arc<InstallQueue>,
    scheduler: Arc<Scheduler>,
    invalid_accounts: Arc<InvalidAccountSet>,
    running: AtomicBool,
    lifecycle: Mutex<()>,
}

impl RefreshOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn EntryStore>,
        installer: Arc<dyn Installer>,
        transport: Arc<dyn DeviceTransport>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let invalid_accounts = Arc::new(InvalidAccountSet::new());
        let batches = Arc::new(BatchNotifier::new(notifier));
        let queue = Arc::new(InstallQueue::new(
            config.queue,
            Arc::clone(&store),
            installer,
            batches,
            Arc::clone(&invalid_accounts),
        ));
        let scheduler = Arc::new(Scheduler::new(
            config.scheduler,
            Arc::clone(&store),
            Arc::clone(&queue),
            transport,
            Arc::clone(&invalid_accounts),
        ));

        Self {
            store,
            queue,
            scheduler,
            invalid_accounts,
            running: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
        }
    }

    /// Set a callback for worker progress events.
    pub fn with_update_callback(self, callback: RefreshCallback) -> Self {
        self.queue.set_callback(callback);
        self
    }

    /// Start the queue worker and install the cron timer.
    ///
    /// The worker runs even when the timer cannot be installed, so device
    /// and manual refreshes keep working.
    pub fn start(&self) -> Result<(), OrchestratorError> {
        let _lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Orchestrator already running");
            return Ok(());
        }

        info!("Starting refresh orchestrator");
        self.queue.start();
        self.scheduler.run_schedule()?;
        info!("Refresh orchestrator started");
        Ok(())
    }

    /// Cancel the timer and stop the worker. An install already running is
    /// left to finish. Returns false if not running.
    pub fn stop(&self) -> bool {
        let _lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.running.swap(false, Ordering::SeqCst) {
            return false;
        }

        info!("Stopping refresh orchestrator");
        self.scheduler.stop_timer();
        self.queue.stop();
        info!("Refresh orchestrator stopped");
        true
    }

    /// Apply new scheduler settings and restart the worker and timer.
    ///
    /// An invalid cron expression is rejected before anything is touched.
    pub fn reload(&self, settings: SchedulerConfig) -> Result<(), OrchestratorError> {
        if settings.enabled {
            parse_cron(&settings.cron)?;
        }

        let _lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        info!(
            enabled = settings.enabled,
            cron = %settings.cron,
            "Reloading scheduler settings"
        );
        self.scheduler.update_settings(settings);
        self.scheduler.stop_timer();
        self.queue.stop();

        self.running.store(true, Ordering::SeqCst);
        self.queue.start();
        self.scheduler.run_schedule()?;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Sweep now, outside the cron schedule.
    pub async fn run_now(&self) -> Result<SweepReport, OrchestratorError> {
        info!("Manual refresh sweep requested");
        Ok(self.scheduler.run().await?)
    }

    /// Queue one entry as its own silent batch.
    pub async fn refresh_entry(&self, id: EntryId) -> Result<SubmitReport, OrchestratorError> {
        let entry = self.enabled_entry(id)?;
        let report = self.queue.submit(vec![entry], false, None).await;
        if !report.skipped.is_empty() {
            return Err(OrchestratorError::EntryInFlight(id));
        }
        Ok(report)
    }

    /// Claim an entry for an install run outside the queue.
    ///
    /// The queue skips the entry while the claim is held.
    pub fn claim_entry(
        &self,
        id: EntryId,
    ) -> Result<(InstallableEntry, EntryClaim), OrchestratorError> {
        let entry = self.enabled_entry(id)?;
        match self.queue.try_claim(&entry) {
            Some(claim) => Ok((entry, claim)),
            None => Err(OrchestratorError::EntryInFlight(id)),
        }
    }

    /// Held around every tool invocation, queued or interactive.
    pub fn install_lock(&self) -> Arc<tokio::sync::Mutex<()>> {
        self.queue.install_lock()
    }

    /// Persist the outcome of an install run outside the queue.
    pub fn record_outcome(
        &self,
        entry: &InstallableEntry,
        report: &InstallReport,
    ) -> Result<InstallableEntry, OrchestratorError> {
        if let Err(SessionError::AccountInvalid { .. }) = &report.result {
            self.invalid_accounts.insert(&entry.account);
        }
        Ok(self
            .store
            .record_refresh(entry.id, &report.to_record(Utc::now()))?)
    }

    /// Hand a device-connect event to the scheduler on its own task.
    pub fn device_connected(&self, device: ConnectedDevice) {
        (self.device_connected_callback())(device);
    }

    /// Callback for the device discovery collaborator.
    pub fn device_connected_callback(&self) -> DeviceConnectedCallback {
        self.scheduler.device_connected_callback()
    }

    pub fn installing(&self) -> Vec<InstallingEntry> {
        self.queue.installing()
    }

    pub fn store(&self) -> &Arc<dyn EntryStore> {
        &self.store
    }

    pub fn status(&self) -> OrchestratorStatus {
        let settings = self.scheduler.settings();
        let timer_active = self.scheduler.timer_active();
        let next_run = if timer_active {
            parse_cron(&settings.cron)
                .ok()
                .and_then(|schedule| next_fire(&schedule))
                .map(|at| at.with_timezone(&Utc))
        } else {
            None
        };

        OrchestratorStatus {
            running: self.is_running(),
            scheduler: settings,
            timer_active,
            next_run,
            queue: self.queue.status(),
            invalid_accounts: self.invalid_accounts.len(),
            connected_devices: self.scheduler.connected_devices(),
        }
    }

    fn enabled_entry(&self, id: EntryId) -> Result<InstallableEntry, OrchestratorError> {
        let entry = self
            .store
            .get(id)?
            .ok_or(OrchestratorError::EntryNotFound(id))?;
        if !entry.enabled {
            return Err(OrchestratorError::EntryDisabled(id));
        }
        Ok(entry)
    }
}

impl Drop for RefreshOrchestrator {
    fn drop(&mut self) {
        if self.stop() {
            warn!("Refresh orchestrator dropped while running");
        }
    }
}
