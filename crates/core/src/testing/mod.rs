//! Testing utilities and mock implementations.
//!
//! This module provides mocks for the installer, notifier and device
//! transport seams, so the queue, scheduler and orchestrator can be exercised
//! without the signing tool or a device.
//!
//! # Example
//!
//! ```rust,ignore
//! use resigner_core::testing::{MockInstaller, MockNotifier, MockOutcome};
//!
//! let installer = MockInstaller::new();
//! installer.push_outcome(2, MockOutcome::AccountInvalid).await;
//!
//! // Build an orchestrator around it...
//! assert_eq!(installer.call_order().await, vec![1, 2, 3]);
//! ```

mod mock_installer;
mod mock_notifier;
mod mock_transport;

pub use mock_installer::{MockInstaller, MockOutcome, RecordedInstall};
pub use mock_notifier::MockNotifier;
pub use mock_transport::MockTransport;

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::{Duration, Utc};
    use std::path::PathBuf;

    use crate::entry::{
        DeviceClass, EntryId, InstallableEntry, NewEntry, RefreshErrorClass, Secret,
    };

    /// An enabled, never-refreshed AppleTV entry.
    pub fn entry(id: EntryId) -> InstallableEntry {
        InstallableEntry {
            id,
            app_name: format!("App {}", id),
            app_path: PathBuf::from(format!("/data/ipa/app{}.ipa", id)),
            device_name: "Living Room".to_string(),
            device_class: DeviceClass::AppleTv,
            udid: format!("udid-{}", id),
            account: "jdoe@example.com".to_string(),
            secret: Secret::new("hunter2"),
            bundle_identifier: format!("com.example.app{}", id),
            version: "1.0".to_string(),
            remove_extensions: false,
            enabled: true,
            installed_at: None,
            refreshed_at: None,
            expires_at: None,
            refresh_succeeded: false,
            refresh_error: RefreshErrorClass::None,
        }
    }

    /// An entry refreshed a day ago whose profile expires in `expires_in`.
    pub fn refreshed_entry(id: EntryId, expires_in: Duration) -> InstallableEntry {
        let now = Utc::now();
        InstallableEntry {
            installed_at: Some(now - Duration::days(30)),
            refreshed_at: Some(now - Duration::days(1)),
            expires_at: Some(now + expires_in),
            refresh_succeeded: true,
            ..entry(id)
        }
    }

    /// Creation request for an AppleTV entry on `udid`.
    pub fn new_entry(udid: &str) -> NewEntry {
        NewEntry {
            app_name: format!("App on {}", udid),
            app_path: PathBuf::from("/data/ipa/app.ipa"),
            device_name: "Living Room".to_string(),
            device_class: DeviceClass::AppleTv,
            udid: udid.to_string(),
            account: "jdoe@example.com".to_string(),
            secret: Secret::new("hunter2"),
            bundle_identifier: "com.example.app".to_string(),
            version: "1.0".to_string(),
            remove_extensions: false,
            installed_at: None,
            expires_at: None,
        }
    }

    /// Creation request with a distinct app name and account.
    pub fn new_entry_for(udid: &str, app_name: &str, account: &str) -> NewEntry {
        NewEntry {
            app_name: app_name.to_string(),
            account: account.to_string(),
            ..new_entry(udid)
        }
    }
}
