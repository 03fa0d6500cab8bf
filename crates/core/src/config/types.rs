use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::notify::NotificationConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::queue::QueueConfig;
use crate::scheduler::SchedulerConfig;
use crate::session::{SessionConfig, TransportConfig};

/// Root configuration. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub data: DataConfig,
    /// The external signing tool.
    #[serde(default)]
    pub tool: SessionConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
}

impl Config {
    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig::new(self.queue.clone(), self.scheduler.clone())
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("resigner.db")
}

/// Working directory of the tool; session logs go under `log/`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub data: DataConfig,
    pub tool: SessionConfig,
    pub transport: TransportConfig,
    pub queue: QueueConfig,
    pub scheduler: SchedulerConfig,
    pub notification: SanitizedNotificationConfig,
}

/// Notification settings with the webhook URL and body hidden, since
/// either may carry a token.
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedNotificationConfig {
    pub enabled: bool,
    pub webhook_configured: bool,
    pub method: String,
    pub content_type: String,
    pub timeout_secs: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        let webhook = &config.notification.webhook;
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            data: config.data.clone(),
            tool: config.tool.clone(),
            transport: config.transport.clone(),
            queue: config.queue.clone(),
            scheduler: config.scheduler.clone(),
            notification: SanitizedNotificationConfig {
                enabled: config.notification.enabled,
                webhook_configured: !webhook.url.is_empty(),
                method: webhook.method.clone(),
                content_type: webhook.content_type.clone(),
                timeout_secs: webhook.timeout_secs,
            },
        }
    }
}
