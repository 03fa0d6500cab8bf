//! Configuration for the signing tool and install sessions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How the external signing tool is invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Path to the signing tool binary.
    #[serde(default = "default_tool_path")]
    pub tool_path: PathBuf,

    /// Environment variable pointing the tool at its config directory.
    /// It is set to `<data_dir>/<config_dir_name>`.
    #[serde(default = "default_config_dir_env")]
    pub config_dir_env: String,

    #[serde(default = "default_config_dir_name")]
    pub config_dir_name: String,

    /// Prefixes of variables copied from our own environment into the tool's.
    #[serde(default = "default_env_passthrough")]
    pub env_passthrough: Vec<String>,

    /// Pass `--nocolor` to the tool.
    #[serde(default = "default_true")]
    pub no_color: bool,

    /// Argument asking the tool to write the provisioning profile to a path.
    #[serde(default = "default_provisioning_output_arg")]
    pub provisioning_output_arg: Option<String>,

    /// Overall deadline for a single attempt.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Wait after a transport restart before retrying.
    #[serde(default = "default_retry_settle_ms")]
    pub retry_settle_ms: u64,
}

fn default_tool_path() -> PathBuf {
    PathBuf::from("plumesign")
}

fn default_config_dir_env() -> String {
    "PLUME_CONFIG_DIR".to_string()
}

fn default_config_dir_name() -> String {
    "plume".to_string()
}

fn default_env_passthrough() -> Vec<String> {
    [
        "HTTP_PROXY",
        "HTTPS_PROXY",
        "NO_PROXY",
        "ALL_PROXY",
        "http_proxy",
        "https_proxy",
        "no_proxy",
        "all_proxy",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_true() -> bool {
    true
}

fn default_provisioning_output_arg() -> Option<String> {
    Some("--output-provision".to_string())
}

fn default_timeout() -> u64 {
    1800 // 30 minutes
}

fn default_retry_settle_ms() -> u64 {
    30_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tool_path: default_tool_path(),
            config_dir_env: default_config_dir_env(),
            config_dir_name: default_config_dir_name(),
            env_passthrough: default_env_passthrough(),
            no_color: true,
            provisioning_output_arg: default_provisioning_output_arg(),
            timeout_secs: default_timeout(),
            retry_settle_ms: default_retry_settle_ms(),
        }
    }
}

impl SessionConfig {
    pub fn with_tool_path(mut self, tool_path: impl Into<PathBuf>) -> Self {
        self.tool_path = tool_path.into();
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_retry_settle_ms(mut self, retry_settle_ms: u64) -> Self {
        self.retry_settle_ms = retry_settle_ms;
        self
    }

    pub fn without_provisioning_output(mut self) -> Self {
        self.provisioning_output_arg = None;
        self
    }
}
