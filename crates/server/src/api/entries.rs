//! Installable entry API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use resigner_core::{
    DeviceClass, EntryFilter, EntryId, InstallableEntry, InstallingEntry, NewEntry,
    OrchestratorError, RefreshErrorClass, Secret, StoreError, SubmitReport,
};

use crate::state::AppState;

// ============================================================================
// Request Types
// ============================================================================

/// Request body for creating an entry
#[derive(Debug, Deserialize)]
pub struct CreateEntryBody {
    pub app_name: String,
    pub app_path: PathBuf,
    #[serde(default)]
    pub device_name: String,
    #[serde(default)]
    pub device_class: DeviceClass,
    pub udid: String,
    pub account: String,
    pub secret: String,
    #[serde(default)]
    pub bundle_identifier: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub remove_extensions: bool,
    /// Set when the first install already happened outside this service.
    pub installed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Query parameters for listing entries
#[derive(Debug, Deserialize)]
pub struct ListEntriesParams {
    pub enabled: Option<bool>,
    pub udid: Option<String>,
}

/// Request body for the enabled toggle. Without a body the flag is flipped.
#[derive(Debug, Deserialize)]
pub struct SetEnabledBody {
    pub enabled: Option<bool>,
}

// ============================================================================
// Response Types
// ============================================================================

/// Entry as exposed over the API. The secret never leaves the store.
#[derive(Debug, Serialize)]
pub struct EntryResponse {
    pub id: EntryId,
    pub app_name: String,
    pub app_path: PathBuf,
    pub device_name: String,
    pub device_class: DeviceClass,
    pub udid: String,
    /// Masked.
    pub account: String,
    pub bundle_identifier: String,
    pub version: String,
    pub remove_extensions: bool,
    pub enabled: bool,
    pub installed_at: Option<String>,
    pub refreshed_at: Option<String>,
    pub expires_at: Option<String>,
    pub refresh_succeeded: bool,
    pub refresh_error: RefreshErrorClass,
    pub needs_refresh: bool,
}

impl EntryResponse {
    fn new(entry: InstallableEntry, advance_days: i64) -> Self {
        let needs_refresh = entry.needs_refresh(advance_days, Utc::now());
        Self {
            id: entry.id,
            account: entry.masked_account(),
            app_name: entry.app_name,
            app_path: entry.app_path,
            device_name: entry.device_name,
            device_class: entry.device_class,
            udid: entry.udid,
            bundle_identifier: entry.bundle_identifier,
            version: entry.version,
            remove_extensions: entry.remove_extensions,
            enabled: entry.enabled,
            installed_at: entry.installed_at.map(|at| at.to_rfc3339()),
            refreshed_at: entry.refreshed_at.map(|at| at.to_rfc3339()),
            expires_at: entry.expires_at.map(|at| at.to_rfc3339()),
            refresh_succeeded: entry.refresh_succeeded,
            refresh_error: entry.refresh_error,
            needs_refresh,
        }
    }
}

/// Response for listing entries
#[derive(Debug, Serialize)]
pub struct ListEntriesResponse {
    pub entries: Vec<EntryResponse>,
    pub total: usize,
}

/// Session log of the last install run for an entry
#[derive(Debug, Serialize)]
pub struct EntryLogResponse {
    pub entry_id: EntryId,
    pub path: PathBuf,
    pub content: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct EntryErrorResponse {
    pub error: String,
}

type ErrorReply = (StatusCode, Json<EntryErrorResponse>);

fn error_reply(status: StatusCode, error: impl ToString) -> ErrorReply {
    (
        status,
        Json(EntryErrorResponse {
            error: error.to_string(),
        }),
    )
}

fn store_error(err: StoreError) -> ErrorReply {
    let status = match err {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Invalid(_) => StatusCode::BAD_REQUEST,
        StoreError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_reply(status, err)
}

/// Status codes shared by every handler that goes through the orchestrator.
pub(crate) fn orchestrator_status_code(err: &OrchestratorError) -> StatusCode {
    match err {
        OrchestratorError::EntryNotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::EntryDisabled(_) | OrchestratorError::EntryInFlight(_) => {
            StatusCode::CONFLICT
        }
        OrchestratorError::Scheduler(_) => StatusCode::BAD_REQUEST,
        OrchestratorError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
        OrchestratorError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn advance_days(state: &AppState) -> i64 {
    state.orchestrator().status().scheduler.advance_days
}

// ============================================================================
// Handlers
// ============================================================================

/// Create an entry
pub async fn create_entry(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateEntryBody>,
) -> Result<(StatusCode, Json<EntryResponse>), impl IntoResponse> {
    if body.app_path.as_os_str().is_empty() {
        return Err(error_reply(StatusCode::BAD_REQUEST, "app_path is required"));
    }
    if body.secret.is_empty() {
        return Err(error_reply(StatusCode::BAD_REQUEST, "secret is required"));
    }

    let request = NewEntry {
        app_name: body.app_name,
        app_path: body.app_path,
        device_name: body.device_name,
        device_class: body.device_class,
        udid: body.udid,
        account: body.account,
        secret: Secret::new(body.secret),
        bundle_identifier: body.bundle_identifier,
        version: body.version,
        remove_extensions: body.remove_extensions,
        installed_at: body.installed_at,
        expires_at: body.expires_at,
    };

    match state.entry_store().create(request) {
        Ok(entry) => {
            info!(
                entry_id = entry.id,
                udid = %entry.udid,
                account = %entry.masked_account(),
                "Entry created: {}",
                entry.app_name
            );
            Ok((
                StatusCode::CREATED,
                Json(EntryResponse::new(entry, advance_days(&state))),
            ))
        }
        Err(e) => Err(store_error(e)),
    }
}

/// List entries with optional filters
pub async fn list_entries(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListEntriesParams>,
) -> Result<Json<ListEntriesResponse>, impl IntoResponse> {
    let mut filter = EntryFilter::new();
    if let Some(enabled) = params.enabled {
        filter = filter.with_enabled(enabled);
    }
    if let Some(udid) = params.udid {
        filter = filter.with_udid(udid);
    }

    let entries = match state.entry_store().list(&filter) {
        Ok(entries) => entries,
        Err(e) => return Err(store_error(e)),
    };
    let advance_days = advance_days(&state);

    Ok(Json(ListEntriesResponse {
        total: entries.len(),
        entries: entries
            .into_iter()
            .map(|entry| EntryResponse::new(entry, advance_days))
            .collect(),
    }))
}

/// Get an entry by ID
pub async fn get_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<EntryId>,
) -> Result<Json<EntryResponse>, impl IntoResponse> {
    match state.entry_store().get(id) {
        Ok(Some(entry)) => Ok(Json(EntryResponse::new(entry, advance_days(&state)))),
        Ok(None) => Err(error_reply(
            StatusCode::NOT_FOUND,
            format!("Entry not found: {}", id),
        )),
        Err(e) => Err(store_error(e)),
    }
}

/// Delete an entry
pub async fn delete_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<EntryId>,
) -> Result<Json<EntryResponse>, impl IntoResponse> {
    match state.entry_store().delete(id) {
        Ok(entry) => {
            info!(entry_id = id, "Entry deleted: {}", entry.app_name);
            state.ws_broadcaster().entry_deleted(id);
            Ok(Json(EntryResponse::new(entry, advance_days(&state))))
        }
        Err(e) => Err(store_error(e)),
    }
}

/// Enable or disable automatic refresh
pub async fn set_enabled(
    State(state): State<Arc<AppState>>,
    Path(id): Path<EntryId>,
    body: Option<Json<SetEnabledBody>>,
) -> Result<Json<EntryResponse>, impl IntoResponse> {
    let store = state.entry_store();
    let current = match store.get(id) {
        Ok(Some(entry)) => entry,
        Ok(None) => {
            return Err(error_reply(
                StatusCode::NOT_FOUND,
                format!("Entry not found: {}", id),
            ));
        }
        Err(e) => return Err(store_error(e)),
    };

    let enabled = body
        .and_then(|Json(b)| b.enabled)
        .unwrap_or(!current.enabled);

    match store.set_enabled(id, enabled) {
        Ok(entry) => {
            info!(entry_id = id, enabled, "Entry refresh toggled");
            state.ws_broadcaster().entry_updated(id);
            Ok(Json(EntryResponse::new(entry, advance_days(&state))))
        }
        Err(e) => Err(store_error(e)),
    }
}

/// Reset the recorded error class, e.g. after the account was fixed
pub async fn clear_error(
    State(state): State<Arc<AppState>>,
    Path(id): Path<EntryId>,
) -> Result<Json<EntryResponse>, impl IntoResponse> {
    match state.entry_store().clear_refresh_error(id) {
        Ok(entry) => {
            info!(entry_id = id, "Refresh error cleared");
            state.ws_broadcaster().entry_updated(id);
            Ok(Json(EntryResponse::new(entry, advance_days(&state))))
        }
        Err(e) => Err(store_error(e)),
    }
}

/// Queue a silent single-entry refresh
pub async fn refresh_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<EntryId>,
) -> Result<(StatusCode, Json<SubmitReport>), impl IntoResponse> {
    match state.orchestrator().refresh_entry(id).await {
        Ok(report) if report.is_empty() => Err(error_reply(
            StatusCode::SERVICE_UNAVAILABLE,
            "Refresh queue is not accepting requests",
        )),
        Ok(report) => Ok((StatusCode::ACCEPTED, Json(report))),
        Err(e) => Err(error_reply(orchestrator_status_code(&e), e)),
    }
}

/// Session log of the entry's last install run
pub async fn get_entry_log(
    State(state): State<Arc<AppState>>,
    Path(id): Path<EntryId>,
) -> Result<Json<EntryLogResponse>, impl IntoResponse> {
    let entry = match state.entry_store().get(id) {
        Ok(Some(entry)) => entry,
        Ok(None) => {
            return Err(error_reply(
                StatusCode::NOT_FOUND,
                format!("Entry not found: {}", id),
            ));
        }
        Err(e) => return Err(store_error(e)),
    };

    let path = state.installer().log_path(id);
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => Ok(Json(EntryLogResponse {
            entry_id: id,
            content: entry.secret.redact(&content),
            path,
        })),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(error_reply(
            StatusCode::NOT_FOUND,
            format!("No install log for entry {}", id),
        )),
        Err(e) => Err(error_reply(StatusCode::INTERNAL_SERVER_ERROR, e)),
    }
}

/// Entries queued or being installed right now
pub async fn list_installing(State(state): State<Arc<AppState>>) -> Json<Vec<InstallingEntry>> {
    Json(state.orchestrator().installing())
}
