//! Batch aggregation and notification delivery.

mod batch;
mod notifier;
mod webhook;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use batch::{render_failures, BatchNotifier, BatchSummary, FailedEntry, RequestOutcome};
pub use notifier::{DisabledNotifier, Notifier, NotifyError};
pub use webhook::{WebhookConfig, WebhookNotifier};

/// Notification settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub webhook: WebhookConfig,
}

/// Build the notifier described by the config.
pub fn build_notifier(config: &NotificationConfig) -> Result<Arc<dyn Notifier>, NotifyError> {
    if !config.enabled {
        return Ok(Arc::new(DisabledNotifier));
    }
    Ok(Arc::new(WebhookNotifier::new(config.webhook.clone())?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_disabled() {
        let notifier = build_notifier(&NotificationConfig::default()).unwrap();
        assert_eq!(notifier.name(), "disabled");
    }

    #[test]
    fn test_build_webhook() {
        let config = NotificationConfig {
            enabled: true,
            webhook: WebhookConfig::default().with_url("http://localhost:9/hook"),
        };
        assert_eq!(build_notifier(&config).unwrap().name(), "webhook");
    }

    #[test]
    fn test_enabled_without_url_fails() {
        let config = NotificationConfig {
            enabled: true,
            webhook: WebhookConfig::default(),
        };
        assert!(build_notifier(&config).is_err());
    }
}
