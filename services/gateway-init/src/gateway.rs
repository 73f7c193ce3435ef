//! Gateway process interface.
//!
//! The gateway is an external binary. The coordinator only ever asks it to
//! onboard (first boot) and to run. Launching consumes the bootstrap lock so
//! that the implementation decides the exact release point:
//!
//! - **Exec**: the lock is released, then the coordinator replaces itself
//!   with the gateway so the supervisor sees the gateway's own exit code and
//!   signals.
//! - **Spawn**: the gateway is started in its own session, detached from the
//!   coordinator, and the lock is released once the child exists.
//!
//! A mock implementation is provided for testing.

use std::fs::OpenOptions;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use claw_config_patch::OnboardAuth;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::BootstrapError;
use crate::lock::LockGuard;

/// Arguments for the gateway's non-interactive onboarding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnboardPlan {
    pub auth: OnboardAuth,
    pub port: u16,
}

impl OnboardPlan {
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "onboard",
            "--non-interactive",
            "--accept-risk",
            "--mode",
            "local",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.extend(self.auth.args());
        args.extend([
            "--gateway-port".to_string(),
            self.port.to_string(),
            "--gateway-bind".to_string(),
            "lan".to_string(),
            "--skip-channels".to_string(),
            "--skip-skills".to_string(),
            "--skip-health".to_string(),
        ]);
        args
    }
}

/// Arguments for running the gateway.
#[derive(Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub port: u16,
    pub bind: String,
    pub token: Option<String>,
}

// The token never appears in logs.
impl std::fmt::Debug for LaunchPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchPlan")
            .field("port", &self.port)
            .field("bind", &self.bind)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl LaunchPlan {
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "gateway".to_string(),
            "--port".to_string(),
            self.port.to_string(),
            "--verbose".to_string(),
            "--allow-unconfigured".to_string(),
            "--bind".to_string(),
            self.bind.clone(),
        ];
        if let Some(token) = &self.token {
            args.push("--token".to_string());
            args.push(token.clone());
        }
        args
    }

    pub fn uses_token_auth(&self) -> bool {
        self.token.is_some()
    }
}

/// Gateway process interface.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Run first-boot onboarding.
    async fn onboard(&self, plan: &OnboardPlan) -> Result<()>;

    /// Release `lock` and start the gateway. Returns the gateway pid.
    ///
    /// In exec mode a successful call does not return.
    async fn launch(&self, plan: &LaunchPlan, lock: LockGuard) -> Result<u32, BootstrapError>;
}

/// How the real gateway is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Replace the current process.
    Exec,
    /// Start a detached child and return.
    Spawn,
}

/// The `openclaw` command-line gateway.
pub struct OpenClawCli {
    bin: String,
    mode: LaunchMode,
    onboard_timeout: Duration,
    log_path: PathBuf,
}

impl OpenClawCli {
    pub fn new(bin: impl Into<String>, mode: LaunchMode, onboard_timeout: Duration, log_path: &Path) -> Self {
        Self {
            bin: bin.into(),
            mode,
            onboard_timeout,
            log_path: log_path.to_path_buf(),
        }
    }

    fn exec(&self, plan: &LaunchPlan, lock: LockGuard) -> BootstrapError {
        lock.release();
        info!(
            bin = %self.bin,
            port = plan.port,
            bind = %plan.bind,
            token_auth = plan.uses_token_auth(),
            "exec gateway"
        );
        // Only returns on failure.
        let err = std::process::Command::new(&self.bin)
            .args(plan.args())
            .exec();
        BootstrapError::LaunchFailed(format!("exec {}: {}", self.bin, err))
    }

    fn spawn(&self, plan: &LaunchPlan, lock: LockGuard) -> Result<u32, BootstrapError> {
        if let Some(parent) = self.log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        let log_err = log.try_clone()?;

        let mut cmd = Command::new(&self.bin);
        cmd.args(plan.args())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(false);

        // New session: the gateway must outlive the coordinator and not
        // receive its terminal signals.
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| BootstrapError::LaunchFailed(format!("spawn {}: {}", self.bin, e)))?;
        let pid = child
            .id()
            .ok_or_else(|| BootstrapError::LaunchFailed("child exited before reporting a pid".to_string()))?;

        lock.release();
        info!(
            pid,
            port = plan.port,
            bind = %plan.bind,
            token_auth = plan.uses_token_auth(),
            log = %self.log_path.display(),
            "gateway started"
        );

        // Reap the child when it exits so it never lingers as a zombie.
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => warn!(pid, exit_code = ?status.code(), "gateway exited"),
                Err(e) => warn!(pid, error = %e, "failed to wait for gateway"),
            }
        });

        Ok(pid)
    }
}

#[async_trait]
impl Gateway for OpenClawCli {
    async fn onboard(&self, plan: &OnboardPlan) -> Result<()> {
        info!(auth = plan.auth.label(), "running gateway onboarding");

        let output = timeout(
            self.onboard_timeout,
            Command::new(&self.bin)
                .args(plan.args())
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| {
            BootstrapError::OnboardFailed(format!(
                "timed out after {}s",
                self.onboard_timeout.as_secs()
            ))
        })?
        .with_context(|| format!("failed to run {} onboard", self.bin))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!(output = %tail(&stdout, 2048), "onboard output");

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BootstrapError::OnboardFailed(format!(
                "exit status {:?}: {}",
                output.status.code(),
                tail(&stderr, 1024)
            ))
            .into());
        }
        Ok(())
    }

    async fn launch(&self, plan: &LaunchPlan, lock: LockGuard) -> Result<u32, BootstrapError> {
        match self.mode {
            LaunchMode::Exec => Err(self.exec(plan, lock)),
            LaunchMode::Spawn => self.spawn(plan, lock),
        }
    }
}

fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// Mock gateway for testing.
///
/// Launching binds the plan's port on loopback and keeps it bound, so the
/// liveness probe sees a running gateway. Onboarding optionally writes a
/// document, like the real onboarding does.
pub struct MockGateway {
    onboard_output: Option<(PathBuf, serde_json::Value)>,
    fail_onboard: bool,
    onboards: Mutex<Vec<OnboardPlan>>,
    launches: Mutex<Vec<LaunchPlan>>,
    listeners: Mutex<Vec<std::net::TcpListener>>,
    attempts: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            onboard_output: None,
            fail_onboard: false,
            onboards: Mutex::new(Vec::new()),
            launches: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Make onboarding write `doc` to `path`.
    pub fn with_onboard_output(mut self, path: PathBuf, doc: serde_json::Value) -> Self {
        self.onboard_output = Some((path, doc));
        self
    }

    /// Make onboarding fail.
    pub fn failing_onboard(mut self) -> Self {
        self.fail_onboard = true;
        self
    }

    pub fn onboards(&self) -> Vec<OnboardPlan> {
        self.onboards.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn launches(&self) -> Vec<LaunchPlan> {
        self.launches.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Launch attempts, including ones that failed to bind.
    pub fn launch_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Simulate the gateway dying: drop every bound listener.
    pub fn kill(&self) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.clear();
        }
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn onboard(&self, plan: &OnboardPlan) -> Result<()> {
        if let Ok(mut onboards) = self.onboards.lock() {
            onboards.push(plan.clone());
        }
        if self.fail_onboard {
            return Err(BootstrapError::OnboardFailed("mock onboarding failure".to_string()).into());
        }
        if let Some((path, doc)) = &self.onboard_output {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, serde_json::to_vec_pretty(doc)?)?;
        }
        Ok(())
    }

    async fn launch(&self, plan: &LaunchPlan, lock: LockGuard) -> Result<u32, BootstrapError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        // Bind before releasing the lock, like a gateway that is up at once.
        let listener = std::net::TcpListener::bind(("127.0.0.1", plan.port))
            .map_err(|e| BootstrapError::LaunchFailed(format!("bind {}: {}", plan.port, e)))?;
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(listener);
        }
        if let Ok(mut launches) = self.launches.lock() {
            launches.push(plan.clone());
        }
        lock.release();
        Ok(std::process::id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(token: Option<&str>) -> LaunchPlan {
        LaunchPlan {
            port: 18789,
            bind: "lan".to_string(),
            token: token.map(str::to_string),
        }
    }

    #[test]
    fn test_launch_args_with_token() {
        let args = plan(Some("s3cret")).args();
        assert_eq!(
            args,
            vec![
                "gateway",
                "--port",
                "18789",
                "--verbose",
                "--allow-unconfigured",
                "--bind",
                "lan",
                "--token",
                "s3cret"
            ]
        );
    }

    #[test]
    fn test_launch_args_without_token() {
        let args = plan(None).args();
        assert!(!args.contains(&"--token".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("lan"));
    }

    #[test]
    fn test_debug_redacts_token() {
        let rendered = format!("{:?}", plan(Some("s3cret")));
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_onboard_args() {
        let plan = OnboardPlan {
            auth: OnboardAuth::Anthropic {
                api_key: "sk-ant".to_string(),
            },
            port: 18789,
        };
        let args = plan.args();
        assert_eq!(&args[..5], &["onboard", "--non-interactive", "--accept-risk", "--mode", "local"]);
        let key_at = args.iter().position(|a| a == "--anthropic-api-key").unwrap();
        assert_eq!(args[key_at + 1], "sk-ant");
        assert!(args.ends_with(&[
            "--skip-channels".to_string(),
            "--skip-skills".to_string(),
            "--skip-health".to_string()
        ]));
    }

    #[test]
    fn test_tail_respects_char_boundaries() {
        assert_eq!(tail("short", 10), "short");
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ééé", 3), "é");
    }

    #[tokio::test]
    async fn test_onboard_failure_reported() {
        let dir = tempfile::tempdir().unwrap();
        let cli = OpenClawCli::new("false", LaunchMode::Spawn, Duration::from_secs(5), &dir.path().join("gw.log"));
        let plan = OnboardPlan {
            auth: OnboardAuth::None,
            port: 18789,
        };
        let err = cli.onboard(&plan).await.unwrap_err();
        assert!(err.to_string().contains("onboard_failed"));
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_keeps_nothing_running() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("gw.lock");
        let lock = crate::lock::acquire(&lock_path).unwrap();
        let cli = OpenClawCli::new(
            "/nonexistent/openclaw",
            LaunchMode::Spawn,
            Duration::from_secs(5),
            &dir.path().join("gw.log"),
        );

        let err = cli.launch(&plan(None), lock).await.unwrap_err();
        assert_eq!(err.reason_code(), "launch_failed");
        // The guard was dropped on the error path.
        assert_eq!(crate::lock::read_state(&lock_path), crate::lock::LockState::Free);
    }
}
