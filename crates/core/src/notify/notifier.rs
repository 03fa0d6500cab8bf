//! Notifier trait and errors.

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur while delivering a notification.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notifications are disabled")]
    Disabled,

    #[error("Invalid notifier configuration: {0}")]
    Config(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Notification endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Delivers a title and message to the user.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Name for logs and metrics.
    fn name(&self) -> &str;

    async fn send(&self, title: &str, message: &str) -> Result<(), NotifyError>;
}

/// Notifier used when notifications are turned off.
#[derive(Debug, Default, Clone)]
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn send(&self, _title: &str, _message: &str) -> Result<(), NotifyError> {
        Err(NotifyError::Disabled)
    }
}
