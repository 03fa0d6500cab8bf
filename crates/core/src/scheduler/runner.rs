//! Cron sweeps and device-connect refreshes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::config::SchedulerConfig;
use super::cron::{next_fire, parse_cron};
use super::types::{ConnectedDevice, DeviceConnectedCallback, SchedulerError, SweepReport};
use crate::entry::{EntryFilter, EntryStore, InstallableEntry};
use crate::queue::{InFlightSet, InstallQueue, InvalidAccountSet, SubmitReport};
use crate::session::DeviceTransport;

/// Whether a sweep should queue this entry.
pub fn is_sweep_candidate(
    entry: &InstallableEntry,
    settings: &SchedulerConfig,
    invalid_accounts: &InvalidAccountSet,
    now: DateTime<Utc>,
) -> bool {
    if !is_refresh_eligible(entry, invalid_accounts, settings.advance_days, now) {
        return false;
    }
    if entry.is_handheld() && !settings.device_class_enabled {
        return false;
    }
    true
}

fn is_refresh_eligible(
    entry: &InstallableEntry,
    invalid_accounts: &InvalidAccountSet,
    advance_days: i64,
    now: DateTime<Utc>,
) -> bool {
    entry.enabled
        && !entry.is_account_invalid()
        && !invalid_accounts.contains(&entry.account)
        && entry.needs_refresh(advance_days, now)
}

/// Decides what to refresh and when, and hands it to the install queue.
pub struct Scheduler {
    settings: RwLock<SchedulerConfig>,
    store: Arc<dyn EntryStore>,
    queue: Arc<InstallQueue>,
    transport: Arc<dyn DeviceTransport>,
    invalid_accounts: Arc<InvalidAccountSet>,
    devices: InFlightSet<String, String>,
    timer: Mutex<Option<broadcast::Sender<()>>>,
    sweep_lock: tokio::sync::Mutex<()>,
}

impl Scheduler {
    pub fn new(
        settings: SchedulerConfig,
        store: Arc<dyn EntryStore>,
        queue: Arc<InstallQueue>,
        transport: Arc<dyn DeviceTransport>,
        invalid_accounts: Arc<InvalidAccountSet>,
    ) -> Self {
        Self {
            settings: RwLock::new(settings),
            store,
            queue,
            transport,
            invalid_accounts,
            devices: InFlightSet::new(),
            timer: Mutex::new(None),
            sweep_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn settings(&self) -> SchedulerConfig {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the settings. The timer picks them up on the next `run_schedule`.
    pub fn update_settings(&self, settings: SchedulerConfig) {
        *self
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner) = settings;
    }

    pub fn timer_active(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Udids with a device-connect refresh pending or running.
    pub fn connected_devices(&self) -> Vec<String> {
        let mut udids: Vec<String> = self
            .devices
            .snapshot()
            .into_iter()
            .map(|(udid, _)| udid)
            .collect();
        udids.sort();
        udids
    }

    /// (Re)install the cron timer from the current settings.
    ///
    /// Any previous timer is cancelled first. With scheduling disabled no
    /// timer is installed.
    pub fn run_schedule(self: &Arc<Self>) -> Result<(), SchedulerError> {
        self.stop_timer();

        let settings = self.settings();
        if !settings.enabled {
            info!("Scheduled refresh disabled");
            return Ok(());
        }

        let schedule = parse_cron(&settings.cron)?;
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let scheduler: Weak<Self> = Arc::downgrade(self);
        let expression = settings.cron.clone();

        tokio::spawn(async move {
            loop {
                let Some(next) = next_fire(&schedule) else {
                    warn!(cron = %expression, "Cron expression has no upcoming fire time");
                    break;
                };
                debug!("Next scheduled refresh at {}", next);

                let wait = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = shutdown_rx.recv() => break,
                }

                let Some(scheduler) = scheduler.upgrade() else {
                    break;
                };
                match scheduler.run().await {
                    Ok(report) => info!(
                        considered = report.considered,
                        queued = report.submitted.queued.len(),
                        unreachable = report.unreachable.len(),
                        "Scheduled refresh sweep submitted"
                    ),
                    Err(e) => error!(error = %e, "Scheduled refresh sweep failed"),
                }
            }
            debug!("Refresh timer stopped");
        });

        *self.timer.lock().unwrap_or_else(PoisonError::into_inner) = Some(shutdown_tx);
        info!(cron = %settings.cron, "Scheduled refresh enabled");
        Ok(())
    }

    /// Cancel the cron timer. Returns false if none was installed.
    pub fn stop_timer(&self) -> bool {
        let taken = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match taken {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    /// One sweep over all enabled entries, submitted as a notifying batch.
    pub async fn run(&self) -> Result<SweepReport, SchedulerError> {
        let _sweep = self.sweep_lock.lock().await;
        let settings = self.settings();
        self.invalid_accounts.reset();

        let entries = self.store.list(&EntryFilter::enabled())?;
        let considered = entries.len();
        let now = Utc::now();

        let mut reachable: HashMap<String, bool> = HashMap::new();
        let mut unreachable = Vec::new();
        let mut candidates = Vec::new();

        for entry in entries {
            if !is_sweep_candidate(&entry, &settings, &self.invalid_accounts, now) {
                continue;
            }

            // AppleTVs sleep their lockdown service; the session's transport
            // recovery wakes them, so only handhelds are probed here.
            if !entry.is_handheld() {
                candidates.push(entry);
                continue;
            }

            let alive = match reachable.get(&entry.udid) {
                Some(alive) => *alive,
                None => {
                    let alive = self.probe(&entry.udid).await;
                    reachable.insert(entry.udid.clone(), alive);
                    alive
                }
            };

            if alive {
                candidates.push(entry);
            } else {
                unreachable.push(entry.id);
            }
        }

        info!(
            considered,
            candidates = candidates.len(),
            unreachable = unreachable.len(),
            "Refresh sweep"
        );

        let submitted = self.queue.submit(candidates, true, None).await;
        Ok(SweepReport {
            considered,
            unreachable,
            submitted,
        })
    }

    /// Refresh the due entries of a device that just connected.
    ///
    /// Returns `None` when the device is already being handled, has nothing
    /// due, or does not answer the liveness probe after settling.
    pub async fn handle_device_connected(
        &self,
        device: ConnectedDevice,
    ) -> Result<Option<SubmitReport>, SchedulerError> {
        let Some(claim) = self
            .devices
            .try_claim(device.udid.clone(), device.name.clone())
        else {
            debug!(udid = %device.udid, "Device refresh already in progress");
            return Ok(None);
        };

        let settings = self.settings();
        let now = Utc::now();
        let entries: Vec<InstallableEntry> = self
            .store
            .list(&EntryFilter::enabled().with_udid(device.udid.as_str()))?
            .into_iter()
            .filter(|entry| {
                is_refresh_eligible(entry, &self.invalid_accounts, settings.advance_days, now)
            })
            .collect();

        if entries.is_empty() {
            debug!(udid = %device.udid, "Nothing due on connected device");
            return Ok(None);
        }

        info!(
            udid = %device.udid,
            due = entries.len(),
            "Device {} connected, refreshing after {}ms",
            device.name,
            settings.device_settle_ms
        );
        if settings.device_settle_ms > 0 {
            tokio::time::sleep(Duration::from_millis(settings.device_settle_ms)).await;
        }

        if !self.probe(&device.udid).await {
            return Ok(None);
        }

        Ok(Some(self.queue.submit(entries, false, Some(claim)).await))
    }

    /// Callback for the device discovery collaborator. Each event is handled
    /// on its own task.
    pub fn device_connected_callback(self: &Arc<Self>) -> DeviceConnectedCallback {
        let scheduler = Arc::downgrade(self);
        Arc::new(move |device: ConnectedDevice| {
            let Some(scheduler) = scheduler.upgrade() else {
                return;
            };
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                warn!(udid = %device.udid, "Device event outside the runtime, ignored");
                return;
            };
            runtime.spawn(async move {
                let udid = device.udid.clone();
                if let Err(e) = scheduler.handle_device_connected(device).await {
                    error!(udid = %udid, error = %e, "Device refresh failed");
                }
            });
        })
    }

    async fn probe(&self, udid: &str) -> bool {
        match self.transport.check_liveness(udid).await {
            Ok(()) => true,
            Err(e) => {
                warn!(udid = %udid, error = %e, "Device not reachable, skipping");
                false
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop_timer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{
        DeviceClass, NewEntry, RefreshErrorClass, RefreshRecord, SqliteEntryStore,
    };
    use crate::notify::BatchNotifier;
    use crate::queue::QueueConfig;
    use crate::testing::{fixtures, MockInstaller, MockNotifier, MockTransport};
    use chrono::Duration as ChronoDuration;

    struct Harness {
        scheduler: Arc<Scheduler>,
        store: Arc<SqliteEntryStore>,
        queue: Arc<InstallQueue>,
        transport: Arc<MockTransport>,
    }

    fn harness(settings: SchedulerConfig) -> Harness {
        let store = Arc::new(SqliteEntryStore::in_memory().unwrap());
        let transport = Arc::new(MockTransport::new());
        let invalid = Arc::new(InvalidAccountSet::new());
        let queue = Arc::new(InstallQueue::new(
            // Nothing leaves the queue while a test inspects it
            QueueConfig::immediate().with_warmup_ms(60_000),
            store.clone(),
            Arc::new(MockInstaller::new()),
            Arc::new(BatchNotifier::new(Arc::new(MockNotifier::new()))),
            invalid.clone(),
        ));
        queue.start();
        let scheduler = Arc::new(Scheduler::new(
            settings,
            store.clone(),
            queue.clone(),
            transport.clone(),
            invalid,
        ));
        Harness {
            scheduler,
            store,
            queue,
            transport,
        }
    }

    fn settings() -> SchedulerConfig {
        SchedulerConfig::default().with_device_settle_ms(0)
    }

    fn refreshed(store: &SqliteEntryStore, id: i64, expires_in: ChronoDuration) {
        let now = Utc::now();
        store
            .record_refresh(
                id,
                &RefreshRecord::success(now - ChronoDuration::days(1), now + expires_in),
            )
            .unwrap();
    }

    #[test]
    fn test_sweep_candidate_rules() {
        let settings = SchedulerConfig::default();
        let invalid = InvalidAccountSet::new();
        let now = Utc::now();

        assert!(is_sweep_candidate(&fixtures::entry(1), &settings, &invalid, now));

        let disabled = InstallableEntry {
            enabled: false,
            ..fixtures::entry(2)
        };
        assert!(!is_sweep_candidate(&disabled, &settings, &invalid, now));

        let rejected = InstallableEntry {
            refresh_error: RefreshErrorClass::InvalidAccount,
            ..fixtures::entry(3)
        };
        assert!(!is_sweep_candidate(&rejected, &settings, &invalid, now));

        let not_due = fixtures::refreshed_entry(4, ChronoDuration::days(2));
        assert!(!is_sweep_candidate(&not_due, &settings, &invalid, now));
        let due = fixtures::refreshed_entry(5, ChronoDuration::hours(12));
        assert!(is_sweep_candidate(&due, &settings, &invalid, now));

        invalid.insert("jdoe@example.com");
        assert!(!is_sweep_candidate(&fixtures::entry(6), &settings, &invalid, now));
    }

    #[test]
    fn test_handheld_gate() {
        let invalid = InvalidAccountSet::new();
        let now = Utc::now();
        let phone = InstallableEntry {
            device_class: DeviceClass::IPhone,
            ..fixtures::entry(1)
        };

        let on = SchedulerConfig::default();
        let off = SchedulerConfig::default().with_device_class_enabled(false);
        assert!(is_sweep_candidate(&phone, &on, &invalid, now));
        assert!(!is_sweep_candidate(&phone, &off, &invalid, now));
        assert!(is_sweep_candidate(&fixtures::entry(2), &off, &invalid, now));
    }

    #[tokio::test]
    async fn test_run_submits_due_entries() {
        let h = harness(settings());
        let due = h.store.create(fixtures::new_entry("udid-a")).unwrap();
        let fresh = h.store.create(fixtures::new_entry("udid-b")).unwrap();
        refreshed(&h.store, fresh.id, ChronoDuration::days(5));
        let disabled = h.store.create(fixtures::new_entry("udid-c")).unwrap();
        h.store.set_enabled(disabled.id, false).unwrap();

        let report = h.scheduler.run().await.unwrap();

        assert_eq!(report.considered, 2);
        assert_eq!(report.submitted.queued, vec![due.id]);
        assert!(report.unreachable.is_empty());
        h.queue.stop();
    }

    #[tokio::test]
    async fn test_run_checks_each_handheld_once() {
        let h = harness(settings());
        let iphone = |entry: NewEntry| NewEntry {
            device_class: DeviceClass::IPhone,
            ..entry
        };
        let a = h.store.create(iphone(fixtures::new_entry("udid-off"))).unwrap();
        let b = h
            .store
            .create(iphone(fixtures::new_entry_for(
                "udid-off",
                "Other",
                "other@example.com",
            )))
            .unwrap();
        let c = h.store.create(iphone(fixtures::new_entry("udid-on"))).unwrap();
        h.transport.set_reachable("udid-off", false).await;

        let report = h.scheduler.run().await.unwrap();

        assert_eq!(report.unreachable, vec![a.id, b.id]);
        assert_eq!(report.submitted.queued, vec![c.id]);
        assert_eq!(h.transport.probe_count("udid-off").await, 1);
        assert_eq!(h.transport.probe_count("udid-on").await, 1);
        h.queue.stop();
    }

    #[tokio::test]
    async fn test_run_admits_sleeping_appletv() {
        let h = harness(settings());
        let tv = h.store.create(fixtures::new_entry("udid-tv")).unwrap();
        h.transport.set_reachable("udid-tv", false).await;

        let report = h.scheduler.run().await.unwrap();

        assert_eq!(report.submitted.queued, vec![tv.id]);
        assert!(report.unreachable.is_empty());
        assert_eq!(h.transport.probe_count("udid-tv").await, 0);
        h.queue.stop();
    }

    #[tokio::test]
    async fn test_run_resets_invalid_accounts() {
        let h = harness(settings());
        let entry = h.store.create(fixtures::new_entry("udid-a")).unwrap();
        h.scheduler.invalid_accounts.insert("jdoe@example.com");

        let report = h.scheduler.run().await.unwrap();
        assert_eq!(report.submitted.queued, vec![entry.id]);
        h.queue.stop();
    }

    #[tokio::test]
    async fn test_run_skips_handheld_when_disabled() {
        let h = harness(settings().with_device_class_enabled(false));
        let tv = h.store.create(fixtures::new_entry("udid-tv")).unwrap();
        h.store
            .create(NewEntry {
                device_class: DeviceClass::IPad,
                ..fixtures::new_entry("udid-pad")
            })
            .unwrap();

        let report = h.scheduler.run().await.unwrap();
        assert_eq!(report.submitted.queued, vec![tv.id]);
        assert_eq!(h.transport.probe_count("udid-pad").await, 0);
        h.queue.stop();
    }

    #[tokio::test]
    async fn test_device_connected_claims_device() {
        let h = harness(settings());
        let entry = h.store.create(fixtures::new_entry("udid-a")).unwrap();
        h.store.create(fixtures::new_entry("udid-b")).unwrap();
        let device = ConnectedDevice {
            udid: "udid-a".to_string(),
            name: "Living Room".to_string(),
            device_class: DeviceClass::AppleTv,
        };

        let report = h
            .scheduler
            .handle_device_connected(device.clone())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.queued, vec![entry.id]);
        assert_eq!(h.scheduler.connected_devices(), vec!["udid-a".to_string()]);

        // Batch still open, so the device stays claimed
        let again = h.scheduler.handle_device_connected(device).await.unwrap();
        assert!(again.is_none());

        // Discarding the batch on stop releases the claim
        h.queue.stop();
        for _ in 0..100 {
            if h.scheduler.connected_devices().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(h.scheduler.connected_devices().is_empty());
    }

    #[tokio::test]
    async fn test_device_connected_nothing_due_releases_claim() {
        let h = harness(settings());
        let entry = h.store.create(fixtures::new_entry("udid-a")).unwrap();
        refreshed(&h.store, entry.id, ChronoDuration::days(5));

        let device = ConnectedDevice {
            udid: "udid-a".to_string(),
            name: String::new(),
            device_class: DeviceClass::AppleTv,
        };
        assert!(h
            .scheduler
            .handle_device_connected(device)
            .await
            .unwrap()
            .is_none());
        assert!(h.scheduler.connected_devices().is_empty());
        assert_eq!(h.transport.probe_count("udid-a").await, 0);
        h.queue.stop();
    }

    #[tokio::test]
    async fn test_device_connected_unreachable() {
        let h = harness(settings());
        h.store.create(fixtures::new_entry("udid-a")).unwrap();
        h.transport.set_reachable("udid-a", false).await;

        let device = ConnectedDevice {
            udid: "udid-a".to_string(),
            name: String::new(),
            device_class: DeviceClass::AppleTv,
        };
        assert!(h
            .scheduler
            .handle_device_connected(device)
            .await
            .unwrap()
            .is_none());
        assert_eq!(h.queue.status().depth, 0);
        h.queue.stop();
    }

    #[tokio::test]
    async fn test_run_schedule_timer_lifecycle() {
        let h = harness(settings());
        h.scheduler.run_schedule().unwrap();
        assert!(h.scheduler.timer_active());

        // Reinstalling replaces the timer
        h.scheduler.run_schedule().unwrap();
        assert!(h.scheduler.timer_active());

        assert!(h.scheduler.stop_timer());
        assert!(!h.scheduler.stop_timer());

        h.scheduler.update_settings(SchedulerConfig::disabled());
        h.scheduler.run_schedule().unwrap();
        assert!(!h.scheduler.timer_active());

        h.scheduler
            .update_settings(settings().with_cron("not a cron line"));
        assert!(matches!(
            h.scheduler.run_schedule(),
            Err(SchedulerError::InvalidCron { .. })
        ));
        assert!(!h.scheduler.timer_active());
        h.queue.stop();
    }
}
