//! Entry storage trait and types.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::types::{DeviceClass, EntryId, InstallableEntry, RefreshRecord, Secret};

/// Errors returned by entry stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Entry not found.
    #[error("entry not found: {0}")]
    NotFound(EntryId),

    /// Rejected input.
    #[error("invalid entry: {0}")]
    Invalid(String),

    /// Backend failure.
    #[error("database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Request to create a new entry, typically after a first successful install.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub app_name: String,
    pub app_path: PathBuf,
    pub device_name: String,
    pub device_class: DeviceClass,
    pub udid: String,
    pub account: String,
    pub secret: Secret,
    pub bundle_identifier: String,
    pub version: String,
    pub remove_extensions: bool,
    pub installed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Filter for listing entries.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    /// Only enabled (or only disabled) entries.
    pub enabled: Option<bool>,
    /// Only entries bound to this device.
    pub udid: Option<String>,
}

impl EntryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries eligible for automatic refresh.
    pub fn enabled() -> Self {
        Self::new().with_enabled(true)
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn with_udid(mut self, udid: impl Into<String>) -> Self {
        self.udid = Some(udid.into());
        self
    }
}

/// Storage backend for installable entries.
///
/// Implementations provide their own internal synchronization; callers never
/// hold a lock of their own across these calls.
pub trait EntryStore: Send + Sync {
    /// Create a new, enabled entry.
    fn create(&self, entry: NewEntry) -> Result<InstallableEntry, StoreError>;

    /// Get an entry by ID.
    fn get(&self, id: EntryId) -> Result<Option<InstallableEntry>, StoreError>;

    /// List entries matching the filter, ordered by ID.
    fn list(&self, filter: &EntryFilter) -> Result<Vec<InstallableEntry>, StoreError>;

    /// Persist the outcome of a refresh attempt.
    ///
    /// `expires_at` is only overwritten when the record carries one.
    fn record_refresh(
        &self,
        id: EntryId,
        record: &RefreshRecord,
    ) -> Result<InstallableEntry, StoreError>;

    /// Enable or disable automatic refresh.
    fn set_enabled(&self, id: EntryId, enabled: bool) -> Result<InstallableEntry, StoreError>;

    /// Reset the recorded error class after manual remediation.
    fn clear_refresh_error(&self, id: EntryId) -> Result<InstallableEntry, StoreError>;

    /// Permanently delete an entry, returning it.
    fn delete(&self, id: EntryId) -> Result<InstallableEntry, StoreError>;
}
