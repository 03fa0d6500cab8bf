use super::{types::Config, ConfigError};
use crate::scheduler::parse_cron;

/// Validate configuration.
///
/// Checks what deserialization cannot: a usable port, a parseable cron
/// expression, a non-empty queue, a tool to run, and a webhook URL when
/// notifications are on.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.queue.capacity == 0 {
        return Err(ConfigError::ValidationError(
            "queue.capacity must be at least 1".to_string(),
        ));
    }

    if config.tool.tool_path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "tool.tool_path cannot be empty".to_string(),
        ));
    }

    if config.scheduler.enabled {
        parse_cron(&config.scheduler.cron)
            .map_err(|e| ConfigError::ValidationError(format!("scheduler.cron: {}", e)))?;
    }

    if config.notification.enabled && config.notification.webhook.url.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "notification.webhook.url is required when notifications are enabled".to_string(),
        ));
    }

    Ok(())
}
