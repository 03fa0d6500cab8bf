//! WebSocket endpoints: refresh progress broadcast and interactive installs.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use resigner_core::{
    EntryId, InstallMode, InstallReport, InstallableEntry, RefreshEvent, SessionState,
};

use super::entries::orchestrator_status_code;
use crate::metrics::{
    INTERACTIVE_SESSIONS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_LAG_EVENTS,
    WS_MESSAGES_SENT,
};
use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// WebSocket message sent to dashboard clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// The worker picked up an entry.
    RefreshStarted { entry_id: EntryId, batch_id: String },
    /// The worker finished an entry.
    RefreshFinished {
        entry_id: EntryId,
        batch_id: String,
        succeeded: bool,
        error: Option<String>,
    },
    /// An entry changed outside the worker.
    EntryUpdated { entry_id: EntryId },
    EntryDeleted { entry_id: EntryId },
    /// Orchestrator started or stopped.
    OrchestratorStatus { running: bool },
    Heartbeat { timestamp: i64 },
}

impl WsMessage {
    fn type_label(&self) -> &'static str {
        match self {
            WsMessage::RefreshStarted { .. } => "refresh_started",
            WsMessage::RefreshFinished { .. } => "refresh_finished",
            WsMessage::EntryUpdated { .. } => "entry_updated",
            WsMessage::EntryDeleted { .. } => "entry_deleted",
            WsMessage::OrchestratorStatus { .. } => "orchestrator_status",
            WsMessage::Heartbeat { .. } => "heartbeat",
        }
    }
}

impl From<RefreshEvent> for WsMessage {
    fn from(event: RefreshEvent) -> Self {
        match event {
            RefreshEvent::Started { entry_id, batch_id } => WsMessage::RefreshStarted {
                entry_id,
                batch_id: batch_id.to_string(),
            },
            RefreshEvent::Finished {
                entry_id,
                batch_id,
                succeeded,
                error,
            } => WsMessage::RefreshFinished {
                entry_id,
                batch_id: batch_id.to_string(),
                succeeded,
                error,
            },
        }
    }
}

/// Broadcaster for WebSocket messages using a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct WsBroadcaster {
    sender: broadcast::Sender<WsMessage>,
}

impl WsBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Broadcast a message to all connected clients.
    pub fn broadcast(&self, msg: WsMessage) {
        // No receivers is fine
        let _ = self.sender.send(msg);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WsMessage> {
        self.sender.subscribe()
    }

    pub fn refresh_event(&self, event: RefreshEvent) {
        self.broadcast(WsMessage::from(event));
    }

    pub fn entry_updated(&self, entry_id: EntryId) {
        self.broadcast(WsMessage::EntryUpdated { entry_id });
    }

    pub fn entry_deleted(&self, entry_id: EntryId) {
        self.broadcast(WsMessage::EntryDeleted { entry_id });
    }

    pub fn orchestrator_status(&self, running: bool) {
        self.broadcast(WsMessage::OrchestratorStatus { running });
    }
}

impl Default for WsBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

// ============================================================================
// Progress broadcast
// ============================================================================

/// WebSocket upgrade handler for progress events.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.ws_broadcaster().subscribe();

    WS_CONNECTIONS_TOTAL.inc();
    WS_CONNECTIONS_ACTIVE.inc();
    info!("WebSocket client connected");

    let send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;

        loop {
            let msg = tokio::select! {
                result = rx.recv() => match result {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("WebSocket client lagged, skipped {} messages", n);
                        WS_LAG_EVENTS.inc();
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Broadcast channel closed");
                        break;
                    }
                },
                _ = heartbeat.tick() => WsMessage::Heartbeat {
                    timestamp: chrono::Utc::now().timestamp(),
                },
            };

            WS_MESSAGES_SENT.with_label_values(&[msg.type_label()]).inc();
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        debug!("WebSocket send failed, client disconnected");
                        break;
                    }
                }
                Err(e) => error!("Failed to serialize WsMessage: {}", e),
            }
        }
    });

    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Close(_)) => {
                debug!("WebSocket client requested close");
                break;
            }
            Ok(Message::Text(text)) => debug!("Ignoring client message: {}", text),
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
        }
    }

    send_task.abort();
    WS_CONNECTIONS_ACTIVE.dec();
    info!("WebSocket client disconnected");
}

// ============================================================================
// Interactive install
// ============================================================================

/// Sent to the client driving an interactive install.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstallServerMessage {
    /// Tool output, secret already redacted.
    Output { data: String },
    State { state: SessionState },
    Finished {
        succeeded: bool,
        state: SessionState,
        error: Option<String>,
        expires_at: Option<String>,
    },
    Error { error: String },
}

impl InstallServerMessage {
    fn finished(report: &InstallReport) -> Self {
        InstallServerMessage::Finished {
            succeeded: report.succeeded(),
            state: report.state(),
            error: report.error_message(),
            expires_at: report
                .result
                .as_ref()
                .ok()
                .map(|success| success.expires_at.to_rfc3339()),
        }
    }
}

/// Sent by the client driving an interactive install.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstallClientMessage {
    /// Relayed to the tool's stdin followed by a newline.
    TwoFactorCode { code: String },
    Cancel,
}

#[derive(Debug, Serialize)]
struct InstallErrorResponse {
    error: String,
}

/// Claim the entry, then upgrade. Claim failures are plain HTTP errors.
pub async fn install_ws_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<EntryId>,
    ws: WebSocketUpgrade,
) -> Response {
    let (entry, claim) = match state.orchestrator().claim_entry(id) {
        Ok(claimed) => claimed,
        Err(e) => {
            return (
                orchestrator_status_code(&e),
                Json(InstallErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response();
        }
    };

    if let Some(field) = entry.missing_install_field() {
        return (
            StatusCode::BAD_REQUEST,
            Json(InstallErrorResponse {
                error: format!("Entry {} is missing its {}", id, field),
            }),
        )
            .into_response();
    }

    ws.on_upgrade(move |socket| async move {
        run_interactive_install(socket, state, entry).await;
        drop(claim);
    })
}

async fn run_interactive_install(socket: WebSocket, state: Arc<AppState>, entry: InstallableEntry) {
    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<InstallServerMessage>();

    INTERACTIVE_SESSIONS.inc();
    info!(
        entry_id = entry.id,
        udid = %entry.udid,
        account = %entry.masked_account(),
        "Interactive install started: {}",
        entry.app_name
    );

    let send_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize install message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                debug!("Install client went away");
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let observer_tx = out_tx.clone();
    let session = state
        .installer()
        .session()
        .with_observer(Arc::new(move |chunk: &str| {
            let _ = observer_tx.send(InstallServerMessage::Output {
                data: chunk.to_string(),
            });
        }));
    let handle = session.handle();

    let mut state_rx = handle.subscribe_state();
    let state_tx = out_tx.clone();
    let state_task = tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let current = *state_rx.borrow_and_update();
            let _ = state_tx.send(InstallServerMessage::State { state: current });
            if current.is_terminal() {
                break;
            }
        }
    });

    let options = state
        .installer()
        .options_for(&entry, InstallMode::Interactive);
    let install_lock = state.orchestrator().install_lock();
    let install = async move {
        let _guard = install_lock.lock().await;
        session.try_start(options).await
    };
    tokio::pin!(install);

    let mut client_gone = false;
    let report = loop {
        tokio::select! {
            report = &mut install => break report,
            incoming = receiver.next(), if !client_gone => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<InstallClientMessage>(&text) {
                        Ok(InstallClientMessage::TwoFactorCode { code }) => {
                            if !handle.write(format!("{}\n", code.trim())).await {
                                let _ = out_tx.send(InstallServerMessage::Error {
                                    error: "Session is no longer accepting input".to_string(),
                                });
                            }
                        }
                        Ok(InstallClientMessage::Cancel) => {
                            info!(entry_id = entry.id, "Interactive install cancelled by client");
                            handle.cancel();
                        }
                        Err(e) => {
                            let _ = out_tx.send(InstallServerMessage::Error {
                                error: format!("Invalid message: {}", e),
                            });
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    client_gone = true;
                    handle.cancel();
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Install WebSocket receive error: {}", e);
                    client_gone = true;
                    handle.cancel();
                }
            }
        }
    };

    state_task.abort();
    drop(handle);

    match state.orchestrator().record_outcome(&entry, &report) {
        Ok(_) => state.ws_broadcaster().entry_updated(entry.id),
        Err(e) => error!(entry_id = entry.id, "Failed to record install outcome: {}", e),
    }

    info!(
        entry_id = entry.id,
        succeeded = report.succeeded(),
        attempts = report.attempts,
        "Interactive install finished"
    );
    let _ = out_tx.send(InstallServerMessage::finished(&report));
    drop(out_tx);
    let _ = send_task.await;
}
