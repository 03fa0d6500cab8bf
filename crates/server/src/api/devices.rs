//! Device manager webhook.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;
use tracing::info;

use resigner_core::ConnectedDevice;

use super::orchestrator::{MessageResponse, OrchestratorErrorResponse};
use crate::state::AppState;

/// A device came online. Its due entries are refreshed on a background task.
pub async fn device_connected(
    State(state): State<Arc<AppState>>,
    Json(device): Json<ConnectedDevice>,
) -> Result<(StatusCode, Json<MessageResponse>), impl IntoResponse> {
    if device.udid.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(OrchestratorErrorResponse {
                error: "udid is required".to_string(),
            }),
        ));
    }

    info!(udid = %device.udid, "Device connected: {}", device.name);
    let message = format!("Refresh check scheduled for {}", device.udid);
    state.orchestrator().device_connected(device);

    Ok((StatusCode::ACCEPTED, Json(MessageResponse { message })))
}
