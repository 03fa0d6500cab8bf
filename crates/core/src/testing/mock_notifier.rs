//! Mock notifier for testing.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::notify::{Notifier, NotifyError};

/// Mock implementation of the Notifier trait. Records every message.
#[derive(Debug, Default)]
pub struct MockNotifier {
    sent: Arc<RwLock<Vec<(String, String)>>>,
    next_error: Arc<RwLock<Option<NotifyError>>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivered `(title, message)` pairs.
    pub async fn sent_messages(&self) -> Vec<(String, String)> {
        self.sent.read().await.clone()
    }

    /// Fail the next send with this error.
    pub async fn set_next_error(&self, error: NotifyError) {
        *self.next_error.write().await = Some(error);
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        if let Some(err) = self.next_error.write().await.take() {
            return Err(err);
        }
        self.sent
            .write()
            .await
            .push((title.to_string(), message.to_string()));
        Ok(())
    }
}
