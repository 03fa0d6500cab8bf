//! Install sessions: driving the external signing tool.
//!
//! A session runs the tool once with an overall deadline, relays stdin for
//! interactive two-factor prompts, and classifies the combined output. A
//! transport failure triggers one serialized transport restart and a single
//! retry.

mod classify;
mod config;
mod error;
mod installer;
mod provisioning;
mod runner;
mod transport;

pub use classify::{classify, error_log, Classification, CONTINUE_PROMPT};
pub use config::SessionConfig;
pub use error::SessionError;
pub use installer::{entry_log_path, Installer, ToolInstaller};
pub use provisioning::{parse_profile, read_profile, ProvisioningProfile};
pub use runner::{
    InstallMode, InstallOptions, InstallReport, InstallSession, InstallSuccess, OutputObserver,
    SessionHandle, SessionState,
};
pub use transport::{
    liveness_ok, CommandTransport, DeviceTransport, TransportConfig, TransportError,
    TransportRecovery,
};
