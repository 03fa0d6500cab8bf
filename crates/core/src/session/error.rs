//! Error types for install sessions.

use std::path::PathBuf;
use thiserror::Error;

use crate::entry::RefreshErrorClass;

/// Errors that can end an install session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A required option was empty. Never retried.
    #[error("Invalid arguments: missing {field}")]
    InvalidArguments { field: String },

    /// The tool rejected the account credentials.
    #[error("Account invalid: {error_log}")]
    AccountInvalid { error_log: String },

    /// The device transport (usbmux/AFC) failed.
    #[error("Device transport failed: {reason}")]
    Transport { reason: String },

    /// The attempt exceeded its deadline and the child was killed.
    #[error("Installation exceeded {timeout_secs} second timeout")]
    Timeout { timeout_secs: u64 },

    /// The session was cancelled through its handle.
    #[error("Installation cancelled")]
    Cancelled,

    /// The tool binary could not be spawned.
    #[error("Signing tool not found at path: {path}")]
    ToolNotFound { path: PathBuf },

    /// The tool finished without reporting success.
    #[error("Installation failed: {reason}")]
    Failed { reason: String, error_log: String },

    /// I/O error while driving the child process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    pub fn invalid_arguments(field: impl Into<String>) -> Self {
        Self::InvalidArguments {
            field: field.into(),
        }
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    pub fn failed(reason: impl Into<String>, error_log: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
            error_log: error_log.into(),
        }
    }

    /// Only transport failures earn a recovery and a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Error class persisted on the entry.
    pub fn error_class(&self) -> RefreshErrorClass {
        match self {
            Self::AccountInvalid { .. } => RefreshErrorClass::InvalidAccount,
            _ => RefreshErrorClass::Other,
        }
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::AccountInvalid { .. } => "account_invalid",
            Self::Transport { .. } => "transport",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
            Self::ToolNotFound { .. } => "tool_not_found",
            Self::Failed { .. } => "failed",
            Self::Io(_) => "io",
        }
    }
}
