//! Installable entry types.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Store-assigned identifier of an installable entry.
pub type EntryId = i64;

/// Lifetime of a free-account provisioning profile.
pub const DEFAULT_PROFILE_LIFETIME_DAYS: i64 = 7;

/// Opaque credential passed to the signing tool.
///
/// `Debug` and `Display` never print the value, and serializing it emits an
/// empty string so API responses cannot leak it.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The cleartext value. Only the session's argv builder should need this.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Replace every exact occurrence of the secret in `text`.
    pub fn redact(&self, text: &str) -> String {
        if self.0.is_empty() {
            return text.to_string();
        }
        text.replace(&self.0, "******")
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(******)")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("")
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Secret)
    }
}

/// Class of the target device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceClass {
    #[default]
    #[serde(rename = "AppleTV")]
    AppleTv,
    #[serde(rename = "iPhone")]
    IPhone,
    #[serde(rename = "iPad")]
    IPad,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::AppleTv => "AppleTV",
            DeviceClass::IPhone => "iPhone",
            DeviceClass::IPad => "iPad",
        }
    }

    /// iPhone and iPad entries are gated by the per-device-class flag.
    pub fn is_handheld(&self) -> bool {
        matches!(self, DeviceClass::IPhone | DeviceClass::IPad)
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceClass {
    type Err = std::convert::Infallible;

    /// Unknown classes fall back to AppleTV, the device this tool was built for.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "iPhone" => DeviceClass::IPhone,
            "iPad" => DeviceClass::IPad,
            _ => DeviceClass::AppleTv,
        })
    }
}

/// Error class recorded by the last refresh attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshErrorClass {
    #[default]
    None,
    InvalidAccount,
    Other,
}

impl RefreshErrorClass {
    /// Numeric code persisted in the store.
    pub fn code(&self) -> i64 {
        match self {
            RefreshErrorClass::None => 0,
            RefreshErrorClass::InvalidAccount => 1,
            RefreshErrorClass::Other => 99,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            0 => RefreshErrorClass::None,
            1 => RefreshErrorClass::InvalidAccount,
            _ => RefreshErrorClass::Other,
        }
    }
}

/// One binding of application, target device and credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallableEntry {
    pub id: EntryId,
    pub app_name: String,
    pub app_path: PathBuf,
    #[serde(default)]
    pub device_name: String,
    #[serde(default)]
    pub device_class: DeviceClass,
    pub udid: String,
    pub account: String,
    #[serde(default)]
    pub secret: Secret,
    #[serde(default)]
    pub bundle_identifier: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub remove_extensions: bool,
    pub enabled: bool,
    pub installed_at: Option<DateTime<Utc>>,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub refresh_succeeded: bool,
    pub refresh_error: RefreshErrorClass,
}

impl InstallableEntry {
    /// Expiration used for scheduling: the recorded one, or the last refresh
    /// plus the default profile lifetime.
    pub fn effective_expiration(&self) -> Option<DateTime<Utc>> {
        self.expires_at.or_else(|| {
            self.refreshed_at
                .map(|at| at + Duration::days(DEFAULT_PROFILE_LIFETIME_DAYS))
        })
    }

    /// Whether the entry is due for a refresh at `now`.
    ///
    /// Never-refreshed entries are always due. Otherwise the entry is due once
    /// `now` is within `advance_days` of the effective expiration. Non-positive
    /// `advance_days` means one day.
    pub fn needs_refresh(&self, advance_days: i64, now: DateTime<Utc>) -> bool {
        if self.refreshed_at.is_none() {
            return true;
        }

        let advance_days = if advance_days <= 0 { 1 } else { advance_days };

        match self.effective_expiration() {
            Some(expiration) => expiration - Duration::days(advance_days) <= now,
            None => true,
        }
    }

    /// Strict expiry check. Unknown expiration counts as expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expiration) => expiration < now,
            None => true,
        }
    }

    pub fn is_account_invalid(&self) -> bool {
        self.refresh_error == RefreshErrorClass::InvalidAccount
    }

    pub fn is_handheld(&self) -> bool {
        self.device_class.is_handheld()
    }

    /// Names the first missing required field, if any.
    pub fn missing_install_field(&self) -> Option<&'static str> {
        if self.app_path.as_os_str().is_empty() {
            Some("app path")
        } else if self.udid.is_empty() {
            Some("device udid")
        } else if self.account.is_empty() {
            Some("account")
        } else if self.secret.is_empty() {
            Some("secret")
        } else {
            None
        }
    }

    /// Account with the local part masked, for logs and notifications.
    pub fn masked_account(&self) -> String {
        mask_account(&self.account)
    }
}

/// Masks an e-mail style account: `jdoe@example.com` -> `j***@example.com`.
pub fn mask_account(account: &str) -> String {
    match account.split_once('@') {
        Some((local, domain)) => {
            let mut chars = local.chars();
            match chars.next() {
                Some(first) => format!("{}{}@{}", first, "*".repeat(chars.count().max(3)), domain),
                None => format!("***@{}", domain),
            }
        }
        None if account.chars().count() <= 2 => "*".repeat(account.chars().count()),
        None => {
            let first: String = account.chars().take(1).collect();
            let last: String = account.chars().rev().take(1).collect();
            format!("{}***{}", first, last)
        }
    }
}

/// Outcome of one refresh attempt as persisted by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshRecord {
    pub refreshed_at: DateTime<Utc>,
    pub succeeded: bool,
    pub error: RefreshErrorClass,
    /// New expiration, only known after a successful attempt.
    pub expires_at: Option<DateTime<Utc>>,
}

impl RefreshRecord {
    pub fn success(refreshed_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            refreshed_at,
            succeeded: true,
            error: RefreshErrorClass::None,
            expires_at: Some(expires_at),
        }
    }

    pub fn failure(refreshed_at: DateTime<Utc>, error: RefreshErrorClass) -> Self {
        Self {
            refreshed_at,
            succeeded: false,
            error,
            expires_at: None,
        }
    }
}
