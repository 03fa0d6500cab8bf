use std::sync::Arc;

use resigner_core::{Config, EntryStore, RefreshOrchestrator, SanitizedConfig, ToolInstaller};

use crate::api::WsBroadcaster;

/// Shared application state
pub struct AppState {
    config: Config,
    orchestrator: Arc<RefreshOrchestrator>,
    installer: Arc<ToolInstaller>,
    ws_broadcaster: WsBroadcaster,
}

impl AppState {
    pub fn new(
        config: Config,
        orchestrator: Arc<RefreshOrchestrator>,
        installer: Arc<ToolInstaller>,
        ws_broadcaster: WsBroadcaster,
    ) -> Self {
        Self {
            config,
            orchestrator,
            installer,
            ws_broadcaster,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn orchestrator(&self) -> &Arc<RefreshOrchestrator> {
        &self.orchestrator
    }

    pub fn entry_store(&self) -> &Arc<dyn EntryStore> {
        self.orchestrator.store()
    }

    /// Installer used for interactive sessions.
    pub fn installer(&self) -> &Arc<ToolInstaller> {
        &self.installer
    }

    pub fn ws_broadcaster(&self) -> &WsBroadcaster {
        &self.ws_broadcaster
    }
}
