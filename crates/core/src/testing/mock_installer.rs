//! Mock installer for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::entry::{EntryId, InstallableEntry, DEFAULT_PROFILE_LIFETIME_DAYS};
use crate::session::{InstallMode, InstallReport, InstallSuccess, Installer, SessionError};

/// Scripted result of one mock install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    Succeeded,
    AccountInvalid,
    Transport,
    Timeout,
    Failed(String),
}

impl MockOutcome {
    fn into_result(self) -> Result<InstallSuccess, SessionError> {
        match self {
            MockOutcome::Succeeded => Ok(InstallSuccess {
                expires_at: Utc::now() + chrono::Duration::days(DEFAULT_PROFILE_LIFETIME_DAYS),
                profile: None,
            }),
            MockOutcome::AccountInvalid => Err(SessionError::AccountInvalid {
                error_log: "Error: Can't log-in".to_string(),
            }),
            MockOutcome::Transport => Err(SessionError::transport("AFC_E_MUX_ERROR")),
            MockOutcome::Timeout => Err(SessionError::Timeout { timeout_secs: 1800 }),
            MockOutcome::Failed(reason) => Err(SessionError::failed(reason, "")),
        }
    }
}

/// A recorded install for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedInstall {
    pub entry_id: EntryId,
    pub app_name: String,
    pub account: String,
    pub mode: InstallMode,
}

/// Mock implementation of the Installer trait.
///
/// - Records every install in call order
/// - Scripted outcomes per entry, falling back to a default
/// - Optional simulated duration
/// - Tracks the highest number of concurrent installs seen
#[derive(Debug)]
pub struct MockInstaller {
    installs: Arc<RwLock<Vec<RecordedInstall>>>,
    scripted: Arc<RwLock<HashMap<EntryId, VecDeque<MockOutcome>>>>,
    default_outcome: Arc<RwLock<MockOutcome>>,
    install_duration_ms: Arc<RwLock<u64>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl Default for MockInstaller {
    fn default() -> Self {
        Self::new()
    }
}

impl MockInstaller {
    pub fn new() -> Self {
        Self {
            installs: Arc::new(RwLock::new(Vec::new())),
            scripted: Arc::new(RwLock::new(HashMap::new())),
            default_outcome: Arc::new(RwLock::new(MockOutcome::Succeeded)),
            install_duration_ms: Arc::new(RwLock::new(0)),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    /// Queue an outcome for the next install of `entry_id`.
    pub async fn push_outcome(&self, entry_id: EntryId, outcome: MockOutcome) {
        self.scripted
            .write()
            .await
            .entry(entry_id)
            .or_default()
            .push_back(outcome);
    }

    pub async fn set_default_outcome(&self, outcome: MockOutcome) {
        *self.default_outcome.write().await = outcome;
    }

    pub async fn set_install_duration(&self, duration: Duration) {
        *self.install_duration_ms.write().await = duration.as_millis() as u64;
    }

    pub async fn recorded_installs(&self) -> Vec<RecordedInstall> {
        self.installs.read().await.clone()
    }

    /// Entry ids in the order installs started.
    pub async fn call_order(&self) -> Vec<EntryId> {
        self.installs
            .read()
            .await
            .iter()
            .map(|i| i.entry_id)
            .collect()
    }

    pub async fn call_count(&self) -> usize {
        self.installs.read().await.len()
    }

    pub async fn calls_for(&self, entry_id: EntryId) -> usize {
        self.installs
            .read()
            .await
            .iter()
            .filter(|i| i.entry_id == entry_id)
            .count()
    }

    /// Highest number of installs observed running at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    async fn next_outcome(&self, entry_id: EntryId) -> MockOutcome {
        let scripted = self
            .scripted
            .write()
            .await
            .get_mut(&entry_id)
            .and_then(|q| q.pop_front());
        match scripted {
            Some(outcome) => outcome,
            None => self.default_outcome.read().await.clone(),
        }
    }
}

#[async_trait]
impl Installer for MockInstaller {
    fn name(&self) -> &str {
        "mock"
    }

    async fn install(&self, entry: &InstallableEntry, mode: InstallMode) -> InstallReport {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        self.installs.write().await.push(RecordedInstall {
            entry_id: entry.id,
            app_name: entry.app_name.clone(),
            account: entry.account.clone(),
            mode,
        });

        let duration_ms = *self.install_duration_ms.read().await;
        if duration_ms > 0 {
            tokio::time::sleep(Duration::from_millis(duration_ms)).await;
        }

        let outcome = self.next_outcome(entry.id).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        InstallReport {
            result: outcome.into_result(),
            output: format!("mock install of {}\n", entry.app_name),
            attempts: 1,
            log_path: None,
            duration: Duration::from_millis(duration_ms),
        }
    }
}
