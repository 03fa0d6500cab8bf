//! The installer seam used by the queue worker.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::config::SessionConfig;
use super::runner::{InstallMode, InstallOptions, InstallReport, InstallSession};
use super::transport::{DeviceTransport, TransportRecovery};
use crate::entry::{EntryId, InstallableEntry};

/// Runs one install for an entry.
#[async_trait]
pub trait Installer: Send + Sync {
    fn name(&self) -> &str;

    /// Install (or re-install) the entry's application on its device.
    async fn install(&self, entry: &InstallableEntry, mode: InstallMode) -> InstallReport;
}

/// Per-entry session log: `<data_dir>/log/refresh_<id>.log`.
pub fn entry_log_path(data_dir: &Path, id: EntryId) -> PathBuf {
    data_dir.join("log").join(format!("refresh_{}.log", id))
}

/// Installer that drives the external signing tool.
pub struct ToolInstaller {
    config: Arc<SessionConfig>,
    data_dir: PathBuf,
    transport: Arc<dyn DeviceTransport>,
    recovery: Arc<TransportRecovery>,
}

impl ToolInstaller {
    pub fn new(
        config: SessionConfig,
        data_dir: impl Into<PathBuf>,
        transport: Arc<dyn DeviceTransport>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            data_dir: data_dir.into(),
            transport,
            recovery: Arc::new(TransportRecovery::new()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn log_path(&self, id: EntryId) -> PathBuf {
        entry_log_path(&self.data_dir, id)
    }

    /// A fresh session sharing this installer's transport recovery lock.
    pub fn session(&self) -> InstallSession {
        InstallSession::new(
            Arc::clone(&self.config),
            self.data_dir.clone(),
            Arc::clone(&self.transport),
            Arc::clone(&self.recovery),
        )
    }

    /// Options for an entry, logging to its per-entry file.
    pub fn options_for(&self, entry: &InstallableEntry, mode: InstallMode) -> InstallOptions {
        InstallOptions::for_entry(entry, mode).with_log_file(self.log_path(entry.id))
    }
}

#[async_trait]
impl Installer for ToolInstaller {
    fn name(&self) -> &str {
        "tool"
    }

    async fn install(&self, entry: &InstallableEntry, mode: InstallMode) -> InstallReport {
        let options = self.options_for(entry, mode);
        self.session().try_start(options).await
    }
}
