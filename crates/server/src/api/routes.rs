use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{devices, entries, handlers, metrics_middleware, orchestrator, ws};
use crate::metrics::metrics_handler;
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Entries
        .route(
            "/entries",
            get(entries::list_entries).post(entries::create_entry),
        )
        .route(
            "/entries/{id}",
            get(entries::get_entry).delete(entries::delete_entry),
        )
        .route("/entries/{id}/enabled", post(entries::set_enabled))
        .route("/entries/{id}/clear-error", post(entries::clear_error))
        .route("/entries/{id}/refresh", post(entries::refresh_entry))
        .route("/entries/{id}/log", get(entries::get_entry_log))
        .route("/entries/{id}/install/ws", get(ws::install_ws_handler))
        .route("/installing", get(entries::list_installing))
        // Orchestrator
        .route("/orchestrator/status", get(orchestrator::get_status))
        .route("/orchestrator/run", post(orchestrator::run_now))
        .route("/orchestrator/reload", post(orchestrator::reload))
        .route("/orchestrator/stop", post(orchestrator::stop))
        // Device manager webhook
        .route("/devices/connected", post(devices::device_connected))
        // Progress events
        .route("/ws", get(ws::ws_handler));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
