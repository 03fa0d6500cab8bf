//! A single install session: one invocation of the signing tool, retried once
//! after a transport recovery.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::classify::{self, Classification};
use super::config::SessionConfig;
use super::error::SessionError;
use super::provisioning::{read_profile, ProvisioningProfile};
use super::transport::{DeviceTransport, TransportRecovery};
use crate::entry::{
    InstallableEntry, RefreshErrorClass, RefreshRecord, Secret, DEFAULT_PROFILE_LIFETIME_DAYS,
};
use crate::metrics;

/// Variables the tool always needs regardless of the passthrough list.
const BASE_ENV: &[&str] = &["PATH", "HOME"];

const STDIN_BUFFER: usize = 16;
const CHUNK_BUFFER: usize = 64;
const READ_CHUNK_SIZE: usize = 4096;

/// How the tool talks to us.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallMode {
    /// Unattended refresh.
    #[default]
    Quiet,
    /// A person is watching the output and may answer prompts.
    Interactive,
}

impl InstallMode {
    pub fn flag(&self) -> &'static str {
        match self {
            InstallMode::Quiet => "--quiet",
            InstallMode::Interactive => "--singlethread",
        }
    }
}

/// Everything a session needs to run the tool once.
#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub udid: String,
    pub account: String,
    pub secret: Secret,
    pub payload_path: PathBuf,
    pub remove_extensions: bool,
    pub refresh: bool,
    pub mode: InstallMode,
    /// Redacted output is written here after the session, overwriting.
    pub log_file: Option<PathBuf>,
}

impl InstallOptions {
    /// Options for re-installing an existing entry.
    pub fn for_entry(entry: &InstallableEntry, mode: InstallMode) -> Self {
        Self {
            udid: entry.udid.clone(),
            account: entry.account.clone(),
            secret: entry.secret.clone(),
            payload_path: entry.app_path.clone(),
            remove_extensions: entry.remove_extensions,
            refresh: true,
            mode,
            log_file: None,
        }
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    fn validate(&self) -> Result<(), SessionError> {
        if self.payload_path.as_os_str().is_empty() {
            return Err(SessionError::invalid_arguments("payload path"));
        }
        if self.udid.is_empty() {
            return Err(SessionError::invalid_arguments("device udid"));
        }
        if self.account.is_empty() {
            return Err(SessionError::invalid_arguments("account"));
        }
        if self.secret.is_empty() {
            return Err(SessionError::invalid_arguments("secret"));
        }
        Ok(())
    }
}

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running,
    Succeeded,
    AccountInvalid,
    OtherFailure,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionState::Idle | SessionState::Running)
    }
}

/// Receives each captured output chunk, secret already redacted.
pub type OutputObserver = Arc<dyn Fn(&str) + Send + Sync>;

/// Control surface of a running session.
#[derive(Clone)]
pub struct SessionHandle {
    stdin_tx: mpsc::Sender<Vec<u8>>,
    cancel_tx: Arc<watch::Sender<bool>>,
    state_tx: Arc<watch::Sender<SessionState>>,
}

impl SessionHandle {
    /// Forward bytes verbatim to the tool's stdin.
    ///
    /// Returns false once the session has finished.
    pub async fn write(&self, bytes: impl Into<Vec<u8>>) -> bool {
        if self.state().is_terminal() {
            return false;
        }
        self.stdin_tx.send(bytes.into()).await.is_ok()
    }

    /// Kill the tool and end the session as cancelled.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }
}

/// Result of a successful session.
#[derive(Debug, Clone)]
pub struct InstallSuccess {
    pub expires_at: DateTime<Utc>,
    pub profile: Option<ProvisioningProfile>,
}

/// Everything a finished session reports.
#[derive(Debug)]
pub struct InstallReport {
    pub result: Result<InstallSuccess, SessionError>,
    /// Combined output, secret redacted.
    pub output: String,
    /// Tool invocations attempted (0 when arguments were rejected).
    pub attempts: u32,
    pub log_path: Option<PathBuf>,
    pub duration: Duration,
}

impl InstallReport {
    /// Report for a request that never reached the tool.
    pub fn rejected(error: SessionError) -> Self {
        Self {
            result: Err(error),
            output: String::new(),
            attempts: 0,
            log_path: None,
            duration: Duration::ZERO,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error_class(&self) -> RefreshErrorClass {
        match &self.result {
            Ok(_) => RefreshErrorClass::None,
            Err(e) => e.error_class(),
        }
    }

    pub fn state(&self) -> SessionState {
        match &self.result {
            Ok(_) => SessionState::Succeeded,
            Err(SessionError::AccountInvalid { .. }) => SessionState::AccountInvalid,
            Err(_) => SessionState::OtherFailure,
        }
    }

    /// Error text for notifications, if the session failed.
    pub fn error_message(&self) -> Option<String> {
        self.result.as_ref().err().map(|e| e.to_string())
    }

    /// The store record for this outcome.
    pub fn to_record(&self, now: DateTime<Utc>) -> RefreshRecord {
        match &self.result {
            Ok(success) => RefreshRecord::success(now, success.expires_at),
            Err(e) => RefreshRecord::failure(now, e.error_class()),
        }
    }
}

/// One run of the signing tool. Consumed by [`InstallSession::try_start`].
pub struct InstallSession {
    config: Arc<SessionConfig>,
    working_dir: PathBuf,
    transport: Arc<dyn DeviceTransport>,
    recovery: Arc<TransportRecovery>,
    observer: Option<OutputObserver>,
    handle: SessionHandle,
    stdin_rx: mpsc::Receiver<Vec<u8>>,
    cancel_rx: watch::Receiver<bool>,
}

impl InstallSession {
    pub fn new(
        config: Arc<SessionConfig>,
        working_dir: impl Into<PathBuf>,
        transport: Arc<dyn DeviceTransport>,
        recovery: Arc<TransportRecovery>,
    ) -> Self {
        let (stdin_tx, stdin_rx) = mpsc::channel(STDIN_BUFFER);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (state_tx, _) = watch::channel(SessionState::Idle);

        Self {
            config,
            working_dir: working_dir.into(),
            transport,
            recovery,
            observer: None,
            handle: SessionHandle {
                stdin_tx,
                cancel_tx: Arc::new(cancel_tx),
                state_tx: Arc::new(state_tx),
            },
            stdin_rx,
            cancel_rx,
        }
    }

    pub fn with_observer(mut self, observer: OutputObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Run the tool, recovering the transport and retrying once on a
    /// transport failure.
    pub async fn try_start(mut self, options: InstallOptions) -> InstallReport {
        let started = Instant::now();
        let mut output: Vec<u8> = Vec::new();
        let mut attempts = 0u32;

        // Every session passes through Running, even one rejected up front.
        self.handle.state_tx.send_replace(SessionState::Running);

        let result = match options.validate() {
            Err(e) => Err(e),
            Ok(()) => {
                loop {
                    attempts += 1;
                    match self.run_attempt(&options, &mut output).await {
                        Err(e) if e.is_retryable() && attempts == 1 => {
                            warn!(udid = %options.udid, error = %e, "Transport failure, recovering");
                            if let Err(restart_err) =
                                self.recovery.recover(self.transport.as_ref()).await
                            {
                                break Err(SessionError::transport(format!(
                                    "{}; transport restart failed: {}",
                                    e, restart_err
                                )));
                            }
                            if let Err(cancelled) = self.settle().await {
                                break Err(cancelled);
                            }
                            append_line(&mut output, "Device transport restarted, retrying");
                        }
                        other => break other,
                    }
                }
            }
        };

        let result = result.map(|profile| InstallSuccess {
            expires_at: profile
                .as_ref()
                .map(|p| p.expiration_date)
                .unwrap_or_else(|| Utc::now() + chrono::Duration::days(DEFAULT_PROFILE_LIFETIME_DAYS)),
            profile,
        });

        if let Err(e) = &result {
            if !matches!(
                e,
                SessionError::AccountInvalid { .. }
                    | SessionError::Failed { .. }
                    | SessionError::Transport { .. }
            ) {
                append_line(&mut output, &format!("Error: {}", e));
            }
        }

        let output = options.secret.redact(&String::from_utf8_lossy(&output));
        let log_path = match &options.log_file {
            Some(path) => write_log(path, &output).await,
            None => None,
        };

        let report = InstallReport {
            result,
            output,
            attempts,
            log_path,
            duration: started.elapsed(),
        };

        let state = report.state();
        self.handle.state_tx.send_replace(state);

        let label = match state {
            SessionState::Succeeded => "succeeded",
            SessionState::AccountInvalid => "account_invalid",
            _ => "failed",
        };
        metrics::INSTALL_ATTEMPTS.with_label_values(&[label]).inc();
        metrics::INSTALL_DURATION
            .with_label_values(&[label])
            .observe(report.duration.as_secs_f64());

        report
    }

    async fn settle(&mut self) -> Result<(), SessionError> {
        let settle = Duration::from_millis(self.config.retry_settle_ms);
        tokio::select! {
            _ = sleep(settle) => Ok(()),
            _ = cancelled(&mut self.cancel_rx) => Err(SessionError::Cancelled),
        }
    }

    fn build_args(&self, options: &InstallOptions, provision_path: Option<&Path>) -> Vec<String> {
        let mut args = vec!["install".to_string(), options.mode.flag().to_string()];

        if self.config.no_color {
            args.push("--nocolor".to_string());
        }

        args.extend([
            "--udid".to_string(),
            options.udid.clone(),
            "-a".to_string(),
            options.account.clone(),
            "-p".to_string(),
            options.secret.expose().to_string(),
        ]);

        if options.remove_extensions {
            args.push("--remove-extensions".to_string());
        }
        if options.refresh {
            args.push("--refresh".to_string());
        }

        if let (Some(arg), Some(path)) = (&self.config.provisioning_output_arg, provision_path) {
            args.push(arg.clone());
            args.push(path.to_string_lossy().to_string());
        }

        args.push(options.payload_path.to_string_lossy().to_string());
        args
    }

    fn build_command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.config.tool_path);
        cmd.args(args)
            .current_dir(&self.working_dir)
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for name in BASE_ENV {
            if let Ok(value) = std::env::var(name) {
                cmd.env(name, value);
            }
        }
        cmd.envs(passthrough_env(std::env::vars(), &self.config.env_passthrough));

        if !self.config.config_dir_env.is_empty() {
            cmd.env(
                &self.config.config_dir_env,
                self.working_dir.join(&self.config.config_dir_name),
            );
        }

        cmd
    }

    /// One tool invocation. Output is appended to `output`.
    async fn run_attempt(
        &mut self,
        options: &InstallOptions,
        output: &mut Vec<u8>,
    ) -> Result<Option<ProvisioningProfile>, SessionError> {
        if *self.cancel_rx.borrow() {
            return Err(SessionError::Cancelled);
        }

        if let Err(e) = self.transport.check_liveness(&options.udid).await {
            append_line(output, &format!("Device not reachable: {}", e));
            return Err(SessionError::transport(e.to_string()));
        }

        let provision_path = self.config.provisioning_output_arg.as_ref().map(|_| {
            std::env::temp_dir().join(format!("embedded.mobileprovision.{}", Uuid::new_v4()))
        });

        let args = self.build_args(options, provision_path.as_deref());
        debug!(
            tool = %self.config.tool_path.display(),
            udid = %options.udid,
            mode = ?options.mode,
            "Starting signing tool"
        );

        let mut child = self.build_command(&args).spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SessionError::ToolNotFound {
                    path: self.config.tool_path.clone(),
                }
            } else {
                SessionError::Io(e)
            }
        })?;

        let (chunk_tx, mut chunk_rx) = mpsc::channel::<Vec<u8>>(CHUNK_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_chunks(stdout, chunk_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_chunks(stderr, chunk_tx.clone()));
        }
        drop(chunk_tx);

        let mut stdin = child.stdin.take();
        let attempt_start = output.len();
        let mut prompt_from = attempt_start;
        let mut exit_status: Option<ExitStatus> = None;
        let mut readers_done = false;

        let deadline = sleep(Duration::from_secs(self.config.timeout_secs));
        tokio::pin!(deadline);

        let outcome: Result<ExitStatus, SessionError> = loop {
            if readers_done {
                if let Some(status) = exit_status {
                    break Ok(status);
                }
            }

            tokio::select! {
                chunk = chunk_rx.recv(), if !readers_done => match chunk {
                    Some(chunk) => {
                        output.extend_from_slice(&chunk);
                        if let Some(observer) = &self.observer {
                            observer(&options.secret.redact(&String::from_utf8_lossy(&chunk)));
                        }
                        let (prompts, next) = classify::scan_prompts(output.as_slice(), prompt_from);
                        prompt_from = next;
                        for _ in 0..prompts {
                            debug!(udid = %options.udid, "Answering continue prompt");
                            write_stdin(&mut stdin, b"\n").await;
                        }
                    }
                    None => readers_done = true,
                },
                Some(input) = self.stdin_rx.recv() => {
                    write_stdin(&mut stdin, &input).await;
                }
                status = child.wait(), if exit_status.is_none() => match status {
                    Ok(status) => exit_status = Some(status),
                    Err(e) => break Err(SessionError::Io(e)),
                },
                _ = cancelled(&mut self.cancel_rx) => {
                    let _ = child.kill().await;
                    break Err(SessionError::Cancelled);
                }
                _ = &mut deadline => {
                    let _ = child.kill().await;
                    break Err(SessionError::Timeout {
                        timeout_secs: self.config.timeout_secs,
                    });
                }
            }
        };

        drop(stdin);

        let result = match outcome {
            Ok(status) => {
                let text = String::from_utf8_lossy(&output[attempt_start..]).into_owned();
                match classify::classify(&text) {
                    Classification::Succeeded => {
                        let profile = match &provision_path {
                            Some(path) => read_profile(path).await,
                            None => None,
                        };
                        info!(udid = %options.udid, "Installation succeeded");
                        Ok(profile)
                    }
                    Classification::AccountInvalid => Err(SessionError::AccountInvalid {
                        error_log: options.secret.redact(&classify::error_log(&text)),
                    }),
                    Classification::Transport => Err(SessionError::transport(
                        classify::transport_marker(&text).unwrap_or("transport error"),
                    )),
                    Classification::Failed => Err(SessionError::failed(
                        format!("tool exited with {}", status),
                        options.secret.redact(&classify::error_log(&text)),
                    )),
                }
            }
            Err(e) => Err(e),
        };

        if let Some(path) = &provision_path {
            let _ = tokio::fs::remove_file(path).await;
        }

        result
    }
}

/// Resolves once the cancel flag is set. Never resolves if the sender is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn forward_chunks<R>(mut reader: R, tx: mpsc::Sender<Vec<u8>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "Output reader stopped");
                break;
            }
        }
    }
}

async fn write_stdin(stdin: &mut Option<ChildStdin>, bytes: &[u8]) {
    if let Some(pipe) = stdin.as_mut() {
        let result = async {
            pipe.write_all(bytes).await?;
            pipe.flush().await
        }
        .await;
        if let Err(e) = result {
            debug!(error = %e, "Failed to write to tool stdin");
            *stdin = None;
        }
    }
}

fn append_line(output: &mut Vec<u8>, line: &str) {
    if !output.is_empty() && !output.ends_with(b"\n") {
        output.push(b'\n');
    }
    output.extend_from_slice(line.as_bytes());
    output.push(b'\n');
}

/// Variables whose name starts with one of the whitelisted prefixes.
fn passthrough_env(
    vars: impl IntoIterator<Item = (String, String)>,
    prefixes: &[String],
) -> Vec<(String, String)> {
    vars.into_iter()
        .filter(|(key, _)| {
            prefixes
                .iter()
                .any(|prefix| !prefix.is_empty() && key.starts_with(prefix.as_str()))
        })
        .collect()
}

async fn write_log(path: &Path, output: &str) -> Option<PathBuf> {
    if let Some(parent) = path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            warn!(path = %parent.display(), error = %e, "Failed to create log directory");
            return None;
        }
    }
    match tokio::fs::write(path, output).await {
        Ok(()) => Some(path.to_path_buf()),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to write session log");
            None
        }
    }
}
