//! API tests against the in-process router.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{wait_until, TestFixture};
use resigner_core::{testing::MockOutcome, Config, RefreshErrorClass};

// =============================================================================
// Health / config
// =============================================================================

#[tokio::test]
async fn test_health() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/health").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
}

#[tokio::test]
async fn test_config_hides_webhook() {
    let mut config = Config::default();
    config.notification.enabled = true;
    config.notification.webhook.url = "https://ntfy.example.com/resign?token=abc123".to_string();
    let fixture = TestFixture::with_config(config).await;

    let response = fixture.get("/api/v1/config").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["notification"]["webhook_configured"], true);
    assert!(!response.body.to_string().contains("abc123"));
}

// =============================================================================
// Entries
// =============================================================================

#[tokio::test]
async fn test_create_entry_never_returns_secret() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post(
            "/api/v1/entries",
            json!({
                "app_name": "Streamer",
                "app_path": "/data/ipa/streamer.ipa",
                "device_class": "iPad",
                "udid": "udid-1",
                "account": "jdoe@example.com",
                "secret": "hunter2",
            }),
        )
        .await;

    assert_status!(response, StatusCode::CREATED);
    assert_eq!(response.body["app_name"], "Streamer");
    assert_eq!(response.body["device_class"], "iPad");
    assert_eq!(response.body["account"], "j***@example.com");
    assert_eq!(response.body["enabled"], true);
    assert_eq!(response.body["needs_refresh"], true);
    assert!(response.body.get("secret").is_none());
    assert!(!response.body.to_string().contains("hunter2"));
}

#[tokio::test]
async fn test_create_entry_validation() {
    let fixture = TestFixture::new().await;

    let missing_secret = fixture
        .post(
            "/api/v1/entries",
            json!({
                "app_name": "Streamer",
                "app_path": "/data/ipa/streamer.ipa",
                "udid": "udid-1",
                "account": "jdoe@example.com",
                "secret": "",
            }),
        )
        .await;
    assert_status!(missing_secret, StatusCode::BAD_REQUEST);

    let missing_udid = fixture
        .post(
            "/api/v1/entries",
            json!({
                "app_name": "Streamer",
                "app_path": "/data/ipa/streamer.ipa",
                "udid": "",
                "account": "jdoe@example.com",
                "secret": "hunter2",
            }),
        )
        .await;
    assert_status!(missing_udid, StatusCode::BAD_REQUEST);
    assert!(missing_udid.body["error"].as_str().unwrap().contains("udid"));
}

#[tokio::test]
async fn test_list_and_filter_entries() {
    let fixture = TestFixture::new().await;
    let first = fixture.create_entry("udid-1", "First").await;
    fixture.create_entry("udid-2", "Second").await;
    fixture.create_entry("udid-1", "Third").await;

    fixture
        .post(&format!("/api/v1/entries/{}/enabled", first), json!({ "enabled": false }))
        .await;

    let all = fixture.get("/api/v1/entries").await;
    assert_status!(all, StatusCode::OK);
    assert_eq!(all.body["total"], 3);

    let on_device = fixture.get("/api/v1/entries?udid=udid-1").await;
    assert_eq!(on_device.body["total"], 2);

    let enabled = fixture.get("/api/v1/entries?enabled=true&udid=udid-1").await;
    assert_eq!(enabled.body["total"], 1);
    assert_eq!(enabled.body["entries"][0]["app_name"], "Third");
}

#[tokio::test]
async fn test_get_and_delete_entry() {
    let fixture = TestFixture::new().await;
    let id = fixture.create_entry("udid-1", "Streamer").await;

    let response = fixture.get(&format!("/api/v1/entries/{}", id)).await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["id"], id);

    let deleted = fixture.delete(&format!("/api/v1/entries/{}", id)).await;
    assert_status!(deleted, StatusCode::OK);

    let gone = fixture.get(&format!("/api/v1/entries/{}", id)).await;
    assert_status!(gone, StatusCode::NOT_FOUND);

    let again = fixture.delete(&format!("/api/v1/entries/{}", id)).await;
    assert_status!(again, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_enabled_toggle() {
    let fixture = TestFixture::new().await;
    let id = fixture.create_entry("udid-1", "Streamer").await;
    let path = format!("/api/v1/entries/{}/enabled", id);

    let flipped = fixture.post_empty(&path).await;
    assert_status!(flipped, StatusCode::OK);
    assert_eq!(flipped.body["enabled"], false);

    let flipped_back = fixture.post_empty(&path).await;
    assert_eq!(flipped_back.body["enabled"], true);

    let explicit = fixture.post(&path, json!({ "enabled": true })).await;
    assert_eq!(explicit.body["enabled"], true);

    let missing = fixture.post_empty("/api/v1/entries/999/enabled").await;
    assert_status!(missing, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_clear_error() {
    let fixture = TestFixture::new().await;
    let id = fixture.create_entry("udid-1", "Streamer").await;
    fixture
        .installer
        .push_outcome(id, MockOutcome::AccountInvalid)
        .await;

    fixture
        .post_empty(&format!("/api/v1/entries/{}/refresh", id))
        .await;
    let store = fixture.store.clone();
    assert!(
        wait_until(|| {
            let store = store.clone();
            async move {
                store.get(id).unwrap().unwrap().refresh_error
                    == RefreshErrorClass::InvalidAccount
            }
        })
        .await
    );

    let entry = fixture.get(&format!("/api/v1/entries/{}", id)).await;
    assert_eq!(entry.body["refresh_error"], "invalid_account");

    let cleared = fixture
        .post_empty(&format!("/api/v1/entries/{}/clear-error", id))
        .await;
    assert_status!(cleared, StatusCode::OK);
    assert_eq!(cleared.body["refresh_error"], "none");
}

// =============================================================================
// Refresh
// =============================================================================

#[tokio::test]
async fn test_manual_refresh_is_silent() {
    let fixture = TestFixture::new().await;
    let id = fixture.create_entry("udid-1", "Streamer").await;
    fixture
        .installer
        .push_outcome(id, MockOutcome::Failed("signing failed".to_string()))
        .await;

    let response = fixture
        .post_empty(&format!("/api/v1/entries/{}/refresh", id))
        .await;
    assert_status!(response, StatusCode::ACCEPTED);
    assert_eq!(response.body["queued"], json!([id]));

    let installer = fixture.installer.clone();
    assert!(
        wait_until(|| {
            let installer = installer.clone();
            async move { installer.call_count().await == 1 }
        })
        .await
    );

    let store = fixture.store.clone();
    assert!(
        wait_until(|| {
            let store = store.clone();
            async move { store.get(id).unwrap().unwrap().refreshed_at.is_some() }
        })
        .await
    );
    assert!(fixture.notifier.sent_messages().await.is_empty());
}

#[tokio::test]
async fn test_refresh_errors() {
    let fixture = TestFixture::new().await;

    let missing = fixture.post_empty("/api/v1/entries/999/refresh").await;
    assert_status!(missing, StatusCode::NOT_FOUND);

    let id = fixture.create_entry("udid-1", "Streamer").await;
    fixture
        .post(&format!("/api/v1/entries/{}/enabled", id), json!({ "enabled": false }))
        .await;
    let disabled = fixture
        .post_empty(&format!("/api/v1/entries/{}/refresh", id))
        .await;
    assert_status!(disabled, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_refresh_after_stop_is_unavailable() {
    let fixture = TestFixture::new().await;
    let id = fixture.create_entry("udid-1", "Streamer").await;

    let stopped = fixture.post_empty("/api/v1/orchestrator/stop").await;
    assert_status!(stopped, StatusCode::OK);
    assert_eq!(stopped.body["message"], "Orchestrator stopped");

    let response = fixture
        .post_empty(&format!("/api/v1/entries/{}/refresh", id))
        .await;
    assert_status!(response, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(fixture.installer.call_count().await, 0);
}

#[tokio::test]
async fn test_installing_lists_claimed_entries() {
    let fixture = TestFixture::new().await;
    fixture
        .installer
        .set_install_duration(std::time::Duration::from_millis(500))
        .await;
    let id = fixture.create_entry("udid-1", "Streamer").await;

    let idle = fixture.get("/api/v1/installing").await;
    assert_eq!(idle.body, json!([]));

    fixture
        .post_empty(&format!("/api/v1/entries/{}/refresh", id))
        .await;
    let busy = fixture.get("/api/v1/installing").await;
    assert_eq!(busy.body[0]["entry_id"], id);
    assert_eq!(busy.body[0]["account"], "j***@example.com");

    let duplicate = fixture
        .post_empty(&format!("/api/v1/entries/{}/refresh", id))
        .await;
    assert_status!(duplicate, StatusCode::CONFLICT);
}

// =============================================================================
// Logs
// =============================================================================

#[tokio::test]
async fn test_entry_log() {
    let fixture = TestFixture::new().await;
    let id = fixture.create_entry("udid-1", "Streamer").await;

    let none = fixture.get(&format!("/api/v1/entries/{}/log", id)).await;
    assert_status!(none, StatusCode::NOT_FOUND);

    let path = fixture.log_path(id);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "plumesign sign -p hunter2\nInstallation Succeeded\n").unwrap();

    let response = fixture.get(&format!("/api/v1/entries/{}/log", id)).await;
    assert_status!(response, StatusCode::OK);
    let content = response.body["content"].as_str().unwrap();
    assert!(content.contains("-p ******"));
    assert!(!content.contains("hunter2"));
}

// =============================================================================
// Orchestrator
// =============================================================================

#[tokio::test]
async fn test_orchestrator_status() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/orchestrator/status").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["running"], true);
    assert_eq!(response.body["timer_active"], false);
    assert_eq!(response.body["queue"]["running"], true);
}

#[tokio::test]
async fn test_reload() {
    let fixture = TestFixture::new().await;

    let invalid = fixture
        .post(
            "/api/v1/orchestrator/reload",
            json!({ "enabled": true, "cron": "whenever" }),
        )
        .await;
    assert_status!(invalid, StatusCode::BAD_REQUEST);

    let response = fixture
        .post(
            "/api/v1/orchestrator/reload",
            json!({ "enabled": true, "cron": "0 4 * * *" }),
        )
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["scheduler"]["cron"], "0 4 * * *");
    assert_eq!(response.body["timer_active"], true);
    assert!(response.body["next_run"].is_string());
}

#[tokio::test]
async fn test_run_now_sweeps_due_entries() {
    let fixture = TestFixture::new().await;
    let first = fixture.create_entry("udid-1", "First").await;
    let second = fixture.create_entry("udid-2", "Second").await;

    let response = fixture.post_empty("/api/v1/orchestrator/run").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["considered"], 2);
    assert_eq!(response.body["submitted"]["queued"], json!([first, second]));

    let installer = fixture.installer.clone();
    assert!(
        wait_until(|| {
            let installer = installer.clone();
            async move { installer.call_count().await == 2 }
        })
        .await
    );
}

// =============================================================================
// Devices
// =============================================================================

#[tokio::test]
async fn test_device_connected_refreshes_its_entries() {
    let fixture = TestFixture::new().await;
    let on_device = fixture.create_entry("udid-1", "Streamer").await;
    fixture.create_entry("udid-2", "Elsewhere").await;

    let response = fixture
        .post(
            "/api/v1/devices/connected",
            json!({ "udid": "udid-1", "name": "Living Room" }),
        )
        .await;
    assert_status!(response, StatusCode::ACCEPTED);

    let installer = fixture.installer.clone();
    assert!(
        wait_until(|| {
            let installer = installer.clone();
            async move { installer.call_count().await == 1 }
        })
        .await
    );
    assert_eq!(fixture.installer.call_order().await, vec![on_device]);
}

#[tokio::test]
async fn test_device_connected_requires_udid() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post("/api/v1/devices/connected", json!({ "udid": " " }))
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);
}

// =============================================================================
// Metrics
// =============================================================================

#[tokio::test]
async fn test_metrics_endpoint() {
    let fixture = TestFixture::new().await;
    fixture.get("/api/v1/health").await;

    let (status, body) = fixture.get_text("/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("resigner_http_requests_total"));
    assert!(body.contains("resigner_orchestrator_running 1"));
}
