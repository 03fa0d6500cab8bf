//! Device transport control: liveness probing and daemon restarts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::metrics;

/// Errors from transport commands.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport command is empty")]
    EmptyCommand,

    #[error("Transport command failed: {0}")]
    CommandFailed(String),

    #[error("Transport command timed out after {0} seconds")]
    Timeout(u64),

    #[error("Device {udid} is not reachable: {output}")]
    Unreachable { udid: String, output: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Access to the device transport daemon.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Probe whether the device's file service answers.
    async fn check_liveness(&self, udid: &str) -> Result<(), TransportError>;

    /// Restart the transport daemon.
    async fn restart(&self) -> Result<(), TransportError>;
}

/// Commands used by [`CommandTransport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Restart command, argv form.
    #[serde(default = "default_restart_command")]
    pub restart_command: Vec<String>,

    /// Liveness command, argv form. `{udid}` is substituted.
    #[serde(default = "default_liveness_command")]
    pub liveness_command: Vec<String>,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_restart_command() -> Vec<String> {
    vec!["/etc/init.d/usbmuxd".to_string(), "restart".to_string()]
}

fn default_liveness_command() -> Vec<String> {
    ["plumesign", "check", "afc", "--udid", "{udid}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_command_timeout() -> u64 {
    60
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            restart_command: default_restart_command(),
            liveness_command: default_liveness_command(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

/// Transport backed by external commands.
pub struct CommandTransport {
    config: TransportConfig,
}

impl CommandTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    async fn run(&self, argv: &[String]) -> Result<(bool, String), TransportError> {
        let (program, args) = argv.split_first().ok_or(TransportError::EmptyCommand)?;

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = timeout(
            Duration::from_secs(self.config.command_timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.config.command_timeout_secs))??;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok((output.status.success(), text))
    }
}

/// Liveness output must say SUCCESS and must not mention ERROR.
pub fn liveness_ok(output: &str) -> bool {
    output.contains("SUCCESS") && !output.contains("ERROR")
}

#[async_trait]
impl DeviceTransport for CommandTransport {
    async fn check_liveness(&self, udid: &str) -> Result<(), TransportError> {
        let argv: Vec<String> = self
            .config
            .liveness_command
            .iter()
            .map(|arg| arg.replace("{udid}", udid))
            .collect();

        let (success, output) = self.run(&argv).await?;
        if success && liveness_ok(&output) {
            Ok(())
        } else {
            Err(TransportError::Unreachable {
                udid: udid.to_string(),
                output: output.trim().to_string(),
            })
        }
    }

    async fn restart(&self) -> Result<(), TransportError> {
        let (success, output) = self.run(&self.config.restart_command).await?;
        if success {
            Ok(())
        } else {
            Err(TransportError::CommandFailed(output.trim().to_string()))
        }
    }
}

/// Serializes transport restarts across concurrent sessions.
#[derive(Default)]
pub struct TransportRecovery {
    lock: Mutex<()>,
}

impl TransportRecovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restart the transport while holding the recovery lock.
    pub async fn recover(&self, transport: &dyn DeviceTransport) -> Result<(), TransportError> {
        let _guard = self.lock.lock().await;
        info!("Restarting device transport");
        metrics::TRANSPORT_RECOVERIES.inc();

        match transport.restart().await {
            Ok(()) => {
                info!("Device transport restarted");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Device transport restart failed");
                Err(e)
            }
        }
    }
}
