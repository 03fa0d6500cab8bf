pub mod config;
pub mod entry;
pub mod metrics;
pub mod notify;
pub mod orchestrator;
pub mod queue;
pub mod scheduler;
pub mod session;
pub mod testing;

pub use config::{
    config_path, load_config, load_config_from_str, validate_config, Config, ConfigError,
    SanitizedConfig,
};
pub use entry::{
    DeviceClass, EntryFilter, EntryId, EntryStore, InstallableEntry, NewEntry, RefreshErrorClass,
    Secret, SqliteEntryStore, StoreError,
};
pub use notify::{build_notifier, Notifier, NotifyError};
pub use orchestrator::{
    OrchestratorConfig, OrchestratorError, OrchestratorStatus, RefreshOrchestrator,
};
pub use queue::{InstallingEntry, RefreshEvent, SubmitReport};
pub use scheduler::{ConnectedDevice, SchedulerConfig, SweepReport};
pub use session::{
    CommandTransport, DeviceTransport, InstallMode, InstallReport, Installer, SessionError,
    SessionHandle, SessionState, ToolInstaller,
};
