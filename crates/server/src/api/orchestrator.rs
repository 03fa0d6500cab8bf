//! Orchestrator API handlers.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use resigner_core::{OrchestratorStatus, SchedulerConfig, SweepReport};

use super::entries::orchestrator_status_code;
use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

/// New scheduler settings. Omitted fields keep their current value.
#[derive(Debug, Default, Deserialize)]
pub struct ReloadBody {
    pub enabled: Option<bool>,
    pub cron: Option<String>,
    pub device_class_enabled: Option<bool>,
    pub advance_days: Option<i64>,
    pub device_settle_ms: Option<u64>,
}

impl ReloadBody {
    fn apply(self, mut settings: SchedulerConfig) -> SchedulerConfig {
        if let Some(enabled) = self.enabled {
            settings.enabled = enabled;
        }
        if let Some(cron) = self.cron {
            settings.cron = cron;
        }
        if let Some(enabled) = self.device_class_enabled {
            settings.device_class_enabled = enabled;
        }
        if let Some(days) = self.advance_days {
            settings.advance_days = days;
        }
        if let Some(ms) = self.device_settle_ms {
            settings.device_settle_ms = ms;
        }
        settings
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct OrchestratorErrorResponse {
    pub error: String,
}

/// Simple message response
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get orchestrator status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<OrchestratorStatus> {
    Json(state.orchestrator().status())
}

/// Run a refresh sweep now, outside the cron schedule
pub async fn run_now(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SweepReport>, impl IntoResponse> {
    match state.orchestrator().run_now().await {
        Ok(report) => Ok(Json(report)),
        Err(e) => Err((
            orchestrator_status_code(&e),
            Json(OrchestratorErrorResponse {
                error: e.to_string(),
            }),
        )),
    }
}

/// Apply new scheduler settings and restart the worker and timer
pub async fn reload(
    State(state): State<Arc<AppState>>,
    body: Option<Json<ReloadBody>>,
) -> Result<Json<OrchestratorStatus>, impl IntoResponse> {
    let orchestrator = state.orchestrator();
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let settings = body.apply(orchestrator.status().scheduler);

    match orchestrator.reload(settings) {
        Ok(()) => {
            state
                .ws_broadcaster()
                .orchestrator_status(orchestrator.is_running());
            info!("Orchestrator reloaded");
            Ok(Json(orchestrator.status()))
        }
        Err(e) => Err((
            orchestrator_status_code(&e),
            Json(OrchestratorErrorResponse {
                error: e.to_string(),
            }),
        )),
    }
}

/// Stop the worker and the timer
pub async fn stop(State(state): State<Arc<AppState>>) -> Json<MessageResponse> {
    let stopped = state.orchestrator().stop();
    state.ws_broadcaster().orchestrator_status(false);

    Json(MessageResponse {
        message: if stopped {
            "Orchestrator stopped".to_string()
        } else {
            "Orchestrator was not running".to_string()
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reload_body_keeps_omitted_fields() {
        let body: ReloadBody = serde_json::from_str(r#"{"cron": "0 5 * * *"}"#).unwrap();
        let settings = body.apply(SchedulerConfig::default().with_device_class_enabled(false));

        assert_eq!(settings.cron, "0 5 * * *");
        assert!(settings.enabled);
        assert!(!settings.device_class_enabled);
        assert_eq!(settings.advance_days, 1);
    }
}
