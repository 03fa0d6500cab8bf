//! Install session tests against shell scripts standing in for the signing tool.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use resigner_core::{
    session::{
        InstallMode, InstallOptions, InstallSession, SessionConfig, SessionError, SessionState,
        TransportRecovery,
    },
    testing::{fixtures, MockTransport},
};

struct ToolHarness {
    dir: TempDir,
    transport: Arc<MockTransport>,
}

impl ToolHarness {
    fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
            transport: Arc::new(MockTransport::new()),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write an executable `sh` script and return its path.
    fn script(&self, body: &str) -> PathBuf {
        let path = self.path("plumesign");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn config(&self, tool: &Path) -> SessionConfig {
        SessionConfig::default()
            .with_tool_path(tool)
            .with_timeout(30)
            .with_retry_settle_ms(0)
    }

    fn session(&self, config: SessionConfig) -> InstallSession {
        InstallSession::new(
            Arc::new(config),
            self.dir.path(),
            Arc::clone(&self.transport) as Arc<dyn resigner_core::DeviceTransport>,
            Arc::new(TransportRecovery::new()),
        )
    }

    fn options(&self) -> InstallOptions {
        InstallOptions::for_entry(&fixtures::entry(1), InstallMode::Quiet)
            .with_log_file(self.path("log/refresh_1.log"))
    }

    fn log(&self) -> String {
        std::fs::read_to_string(self.path("log/refresh_1.log")).unwrap()
    }
}

#[tokio::test]
async fn test_success_redacts_secret_in_log() {
    let h = ToolHarness::new();
    let tool = h.script(
        r#"echo "plumesign $@"
echo "config dir: $PLUME_CONFIG_DIR"
echo "Installation Succeeded""#,
    );

    let report = h.session(h.config(&tool)).try_start(h.options()).await;

    assert!(report.succeeded(), "unexpected failure: {:?}", report.result);
    assert_eq!(report.attempts, 1);
    assert_eq!(report.state(), SessionState::Succeeded);
    assert_eq!(
        report.log_path.as_deref(),
        Some(h.path("log/refresh_1.log").as_path())
    );

    let log = h.log();
    assert!(log.contains("-p ******"));
    assert!(!log.contains("hunter2"));
    assert!(log.contains("--udid udid-1"));
    assert!(log.contains(&format!(
        "config dir: {}",
        h.dir.path().join("plume").display()
    )));
    assert!(!report.output.contains("hunter2"));
}

#[tokio::test]
async fn test_log_is_overwritten() {
    let h = ToolHarness::new();
    std::fs::create_dir_all(h.path("log")).unwrap();
    std::fs::write(h.path("log/refresh_1.log"), "stale output from last week\n").unwrap();
    let tool = h.script(r#"echo "Installation complete""#);

    h.session(h.config(&tool)).try_start(h.options()).await;

    let log = h.log();
    assert!(!log.contains("stale output"));
    assert!(log.contains("Installation complete"));
}

#[tokio::test]
async fn test_profile_expiration_is_used() {
    let h = ToolHarness::new();
    let tool = h.script(
        r#"while [ $# -gt 0 ]; do
  if [ "$1" = "--output-provision" ]; then out="$2"; fi
  shift
done
cat > "$out" <<'PLIST'
<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict>
	<key>ExpirationDate</key>
	<date>2031-05-06T07:08:09Z</date>
	<key>Name</key>
	<string>Streamer Development</string>
</dict>
</plist>
PLIST
echo "Installation Succeeded""#,
    );

    let report = h.session(h.config(&tool)).try_start(h.options()).await;
    let success = report.result.expect("install should succeed");
    assert_eq!(success.expires_at.to_rfc3339(), "2031-05-06T07:08:09+00:00");
    assert_eq!(
        success.profile.and_then(|p| p.name).as_deref(),
        Some("Streamer Development")
    );
}

#[tokio::test]
async fn test_account_invalid() {
    let h = ToolHarness::new();
    let tool = h.script(
        r#"echo "Logging in..."
echo "Error: Can't log-in, DeveloperSession creation failed"
exit 1"#,
    );

    let report = h.session(h.config(&tool)).try_start(h.options()).await;

    assert!(matches!(
        report.result,
        Err(SessionError::AccountInvalid { .. })
    ));
    assert_eq!(report.state(), SessionState::AccountInvalid);
    assert_eq!(report.attempts, 1);
    assert_eq!(h.transport.restart_count(), 0);
}

#[tokio::test]
async fn test_continue_prompt_is_answered() {
    let h = ToolHarness::new();
    let tool = h.script(
        r#"echo "Press any key to continue"
read answer
echo "Installation Succeeded""#,
    );

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        h.session(h.config(&tool)).try_start(h.options()),
    )
    .await
    .expect("prompt was not answered");
    assert!(report.succeeded());
}

#[tokio::test]
async fn test_transport_failure_retried_once() {
    let h = ToolHarness::new();
    let tool = h.script(
        r#"echo "ERROR: LOCKDOWN_E_MUX_ERROR"
exit 1"#,
    );

    let report = h.session(h.config(&tool)).try_start(h.options()).await;

    assert!(matches!(report.result, Err(SessionError::Transport { .. })));
    assert_eq!(report.attempts, 2);
    assert_eq!(h.transport.restart_count(), 1);
    assert!(h.log().contains("retrying"));
}

#[tokio::test]
async fn test_transport_recovery_then_success() {
    let h = ToolHarness::new();
    let marker = h.path("first-run");
    let tool = h.script(&format!(
        r#"if [ -f "{marker}" ]; then
  echo "Installation Succeeded"
else
  touch "{marker}"
  echo "AFC_E_MUX_ERROR"
  exit 1
fi"#,
        marker = marker.display()
    ));

    let report = h.session(h.config(&tool)).try_start(h.options()).await;

    assert!(report.succeeded());
    assert_eq!(report.attempts, 2);
    assert_eq!(h.transport.restart_count(), 1);
}

#[tokio::test]
async fn test_unreachable_device_never_runs_tool() {
    let h = ToolHarness::new();
    let ran = h.path("ran");
    let tool = h.script(&format!(r#"touch "{}""#, ran.display()));
    h.transport.set_reachable("udid-1", false).await;

    let report = h.session(h.config(&tool)).try_start(h.options()).await;

    assert!(matches!(report.result, Err(SessionError::Transport { .. })));
    assert_eq!(report.attempts, 2);
    assert_eq!(h.transport.restart_count(), 1);
    assert_eq!(h.transport.probe_count("udid-1").await, 2);
    assert!(!ran.exists());
}

#[tokio::test]
async fn test_deadline_kills_tool() {
    let h = ToolHarness::new();
    let tool = h.script("exec sleep 30");
    let config = h.config(&tool).with_timeout(1);

    let report = h.session(config).try_start(h.options()).await;

    assert!(matches!(
        report.result,
        Err(SessionError::Timeout { timeout_secs: 1 })
    ));
    assert!(report.duration < Duration::from_secs(10));
    assert!(h.log().contains("exceeded 1 second timeout"));
}

#[tokio::test]
async fn test_missing_tool() {
    let h = ToolHarness::new();
    let config = h.config(&h.path("not-installed"));

    let report = h.session(config).try_start(h.options()).await;
    assert!(matches!(
        report.result,
        Err(SessionError::ToolNotFound { .. })
    ));
    assert_eq!(report.attempts, 1);
}

#[tokio::test]
async fn test_interactive_code_relay() {
    let h = ToolHarness::new();
    let tool = h.script(
        r#"echo "Enter the 2FA code sent to your devices:"
read code
if [ "$code" = "123456" ]; then
  echo "Installation Succeeded"
else
  echo "Wrong code: $code"
  exit 1
fi"#,
    );

    let seen = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&seen);
    let session = h
        .session(h.config(&tool))
        .with_observer(Arc::new(move |chunk: &str| {
            sink.lock().unwrap().push_str(chunk);
        }));
    let handle = session.handle();

    let options = InstallOptions {
        mode: InstallMode::Interactive,
        ..h.options()
    };
    let run = tokio::spawn(session.try_start(options));

    assert!(handle.write(b"123456\n".to_vec()).await);
    let report = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("session did not finish")
        .unwrap();

    assert!(report.succeeded(), "unexpected failure: {:?}", report.result);
    assert_eq!(handle.state(), SessionState::Succeeded);
    assert!(seen.lock().unwrap().contains("Enter the 2FA code"));
    assert!(!handle.write(b"again\n".to_vec()).await);
}

#[tokio::test]
async fn test_cancel_stops_session() {
    let h = ToolHarness::new();
    let tool = h.script(
        r#"echo "Waiting for code"
exec sleep 30"#,
    );

    let session = h.session(h.config(&tool));
    let handle = session.handle();
    let mut state = handle.subscribe_state();
    let run = tokio::spawn(session.try_start(h.options()));

    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == SessionState::Running),
    )
    .await
    .expect("session never started")
    .unwrap();
    handle.cancel();

    let report = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("cancel did not stop the session")
        .unwrap();
    assert!(matches!(report.result, Err(SessionError::Cancelled)));
    assert_eq!(report.state(), SessionState::OtherFailure);
}

#[tokio::test]
async fn test_rejected_options_still_pass_through_running() {
    let h = ToolHarness::new();
    let ran = h.path("ran");
    let tool = h.script(&format!(r#"touch "{}""#, ran.display()));

    let session = h.session(h.config(&tool));
    let handle = session.handle();
    let mut state = handle.subscribe_state();
    let observed = tokio::spawn(async move {
        let mut seen = Vec::new();
        while state.changed().await.is_ok() {
            let current = *state.borrow_and_update();
            seen.push(current);
            if current.is_terminal() {
                break;
            }
        }
        seen
    });
    tokio::task::yield_now().await;

    let mut options = h.options();
    options.udid.clear();
    let report = session.try_start(options).await;

    let seen = tokio::time::timeout(Duration::from_secs(5), observed)
        .await
        .expect("state watcher never finished")
        .unwrap();
    assert!(matches!(
        report.result,
        Err(SessionError::InvalidArguments { .. })
    ));
    assert_eq!(report.attempts, 0);
    assert_eq!(
        seen,
        vec![SessionState::Running, SessionState::OtherFailure]
    );
    assert!(!ran.exists());
}
