//! Common test utilities for API testing with mocks.
//!
//! Builds an in-process router around a real SQLite store in a temp
//! directory, with the installer, notifier and device transport mocked.

#![allow(dead_code)]

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use resigner_core::{
    queue::QueueConfig,
    session::SessionConfig,
    testing::{MockInstaller, MockNotifier, MockTransport},
    Config, DeviceTransport, EntryStore, Installer, Notifier, OrchestratorConfig, RefreshEvent,
    RefreshOrchestrator, SchedulerConfig, SqliteEntryStore, ToolInstaller,
};
use resigner_server::api::{create_router, WsBroadcaster};
use resigner_server::state::AppState;

/// Test fixture with mock collaborators.
pub struct TestFixture {
    pub router: Router,
    pub installer: Arc<MockInstaller>,
    pub notifier: Arc<MockNotifier>,
    pub transport: Arc<MockTransport>,
    pub store: Arc<dyn EntryStore>,
    pub orchestrator: Arc<RefreshOrchestrator>,
    pub ws_broadcaster: WsBroadcaster,
    /// Holds the database and the session logs.
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    pub async fn new() -> Self {
        Self::with_config(Config::default()).await
    }

    /// Build a fixture; the queue runs without warm-up or cooldown and the
    /// cron timer stays off.
    pub async fn with_config(mut config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        config.database.path = temp_dir.path().join("test.db");
        config.data.dir = temp_dir.path().join("data");

        let store: Arc<dyn EntryStore> = Arc::new(
            SqliteEntryStore::new(&config.database.path).expect("Failed to create entry store"),
        );
        let installer = Arc::new(MockInstaller::new());
        let notifier = Arc::new(MockNotifier::new());
        let transport = Arc::new(MockTransport::new());

        let tool_installer = Arc::new(ToolInstaller::new(
            SessionConfig::default(),
            config.data.dir.clone(),
            Arc::clone(&transport) as Arc<dyn DeviceTransport>,
        ));

        let ws_broadcaster = WsBroadcaster::default();
        let broadcaster_for_callback = ws_broadcaster.clone();

        let orchestrator = Arc::new(
            RefreshOrchestrator::new(
                OrchestratorConfig::new(
                    QueueConfig::immediate(),
                    SchedulerConfig::disabled().with_device_settle_ms(0),
                ),
                Arc::clone(&store),
                Arc::clone(&installer) as Arc<dyn Installer>,
                Arc::clone(&transport) as Arc<dyn DeviceTransport>,
                Arc::clone(&notifier) as Arc<dyn Notifier>,
            )
            .with_update_callback(Arc::new(move |event: RefreshEvent| {
                broadcaster_for_callback.refresh_event(event);
            })),
        );
        orchestrator.start().expect("Failed to start orchestrator");

        let state = Arc::new(AppState::new(
            config,
            Arc::clone(&orchestrator),
            tool_installer,
            ws_broadcaster.clone(),
        ));

        Self {
            router: create_router(state),
            installer,
            notifier,
            transport,
            store,
            orchestrator,
            ws_broadcaster,
            temp_dir,
        }
    }

    pub fn log_path(&self, id: i64) -> PathBuf {
        self.temp_dir
            .path()
            .join("data")
            .join("log")
            .join(format!("refresh_{}.log", id))
    }

    /// Create an entry through the API and return its id.
    pub async fn create_entry(&self, udid: &str, app_name: &str) -> i64 {
        let response = self
            .post(
                "/api/v1/entries",
                serde_json::json!({
                    "app_name": app_name,
                    "app_path": "/data/ipa/app.ipa",
                    "device_name": "Living Room",
                    "udid": udid,
                    "account": "jdoe@example.com",
                    "secret": "hunter2",
                }),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
        response.body["id"].as_i64().expect("entry id")
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// GET returning the raw body, for non-JSON endpoints.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let response = self
            .router
            .clone()
            .oneshot(request_builder.body(body).unwrap())
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// Poll `check` until it returns true or five seconds pass.
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
