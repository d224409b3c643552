// ABOUTME: Hooks system for update lifecycle events.
// ABOUTME: Runs operator shell commands with a deadline, cancellation, and capped output capture.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::types::{ContainerId, ContainerName, OperationId};

pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Bytes of stdout and of stderr kept per run.
pub const OUTPUT_LIMIT: usize = 10 * 1024;

/// How long output readers may keep draining after the process is gone.
/// Background grandchildren can hold the pipes open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Hook execution points in the update lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    /// Before any runtime change. Failure aborts the update.
    PreUpdate,
    /// After the new container is promoted. Failure logs a warning.
    PostUpdate,
    /// After a rollback restored the original. Failure logs a warning.
    Rollback,
}

impl HookPoint {
    pub fn name(&self) -> &'static str {
        match self {
            HookPoint::PreUpdate => "pre-update",
            HookPoint::PostUpdate => "post-update",
            HookPoint::Rollback => "rollback",
        }
    }

    /// Container label that overrides this hook's command.
    pub fn label(&self) -> String {
        format!("drydock.hook.{}", self.name())
    }

    /// Whether failure at this hook point should abort the update.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HookPoint::PreUpdate)
    }
}

/// Context passed to hooks via environment variables.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub operation_id: OperationId,
    pub container_name: ContainerName,
    pub container_id: Option<ContainerId>,
    pub trigger: String,
    pub current_image: Option<String>,
    pub target_image: String,
    pub host: String,
    pub new_container_id: Option<ContainerId>,
    pub rollback_reason: Option<String>,
}

impl HookContext {
    /// Convert context to environment variables.
    pub fn to_env(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert(
            "DRYDOCK_OPERATION_ID".to_string(),
            self.operation_id.to_string(),
        );
        env.insert(
            "DRYDOCK_CONTAINER_NAME".to_string(),
            self.container_name.to_string(),
        );
        env.insert("DRYDOCK_TRIGGER".to_string(), self.trigger.clone());
        env.insert("DRYDOCK_TARGET_IMAGE".to_string(), self.target_image.clone());
        env.insert("DRYDOCK_HOST".to_string(), self.host.clone());
        if let Some(ref id) = self.container_id {
            env.insert("DRYDOCK_CONTAINER_ID".to_string(), id.to_string());
        }
        if let Some(ref image) = self.current_image {
            env.insert("DRYDOCK_CURRENT_IMAGE".to_string(), image.clone());
        }
        if let Some(ref id) = self.new_container_id {
            env.insert("DRYDOCK_NEW_CONTAINER_ID".to_string(), id.to_string());
        }
        if let Some(ref reason) = self.rollback_reason {
            env.insert("DRYDOCK_ROLLBACK_REASON".to_string(), reason.clone());
        }
        env
    }
}

/// Hostname reported to hooks as `DRYDOCK_HOST` and recorded as an operation's owner.
pub fn local_host() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

/// Per-run options.
#[derive(Debug, Clone)]
pub struct HookOptions {
    pub timeout: Duration,
    /// Merged over the ambient environment.
    pub env: HashMap<String, String>,
    /// Name used in log lines.
    pub label: String,
    pub cancel: CancellationToken,
}

impl HookOptions {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            timeout: DEFAULT_HOOK_TIMEOUT,
            env: HashMap::new(),
            label: label.into(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Result of running a hook.
#[derive(Debug, Clone)]
pub struct HookResult {
    /// `-1` when the process was killed, timed out, or never launched.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl HookResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// One-line description for an operation's failure reason.
    pub fn summary(&self, label: &str) -> String {
        if self.timed_out {
            return format!("{label} hook timed out after {:?}", self.elapsed);
        }
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("{label} hook exited with code {}", self.exit_code)
        } else {
            format!(
                "{label} hook exited with code {}: {}",
                self.exit_code,
                last_line(stderr)
            )
        }
    }

    fn launch_failure(error: std::io::Error, elapsed: Duration) -> Self {
        Self {
            exit_code: -1,
            stdout: String::new(),
            stderr: format!("failed to launch hook: {error}"),
            timed_out: false,
            elapsed,
        }
    }
}

fn last_line(s: &str) -> &str {
    s.lines().last().unwrap_or(s)
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Runs hook commands through a shell.
#[derive(Debug, Clone)]
pub struct HookRunner {
    shell: String,
}

impl Default for HookRunner {
    fn default() -> Self {
        Self::new(DEFAULT_SHELL)
    }
}

impl HookRunner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    /// Run `command` as `<shell> -c <command>`. Never fails: launch errors,
    /// timeouts, and cancellation are all reported through the result.
    pub async fn run(&self, command: &str, opts: HookOptions) -> HookResult {
        let started = Instant::now();
        tracing::info!(hook = %opts.label, "running hook");

        let spawned = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .envs(&opts.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(hook = %opts.label, error = %e, "failed to launch hook");
                return HookResult::launch_failure(e, started.elapsed());
            }
        };

        let stdout = Capture::default();
        let stderr = Capture::default();
        let readers = [
            child.stdout.take().map(|out| stdout.spawn_drain(out)),
            child.stderr.take().map(|err| stderr.spawn_drain(err)),
        ];

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = tokio::time::sleep(opts.timeout) => Outcome::TimedOut,
            _ = opts.cancel.cancelled() => Outcome::Cancelled,
        };

        if !matches!(outcome, Outcome::Exited(_)) {
            if let Err(e) = child.kill().await {
                tracing::debug!(hook = %opts.label, error = %e, "kill after deadline failed");
            }
        }

        for reader in readers.into_iter().flatten() {
            let abort = reader.abort_handle();
            if tokio::time::timeout(DRAIN_GRACE, reader).await.is_err() {
                abort.abort();
            }
        }

        let (exit_code, timed_out) = match outcome {
            Outcome::Exited(Ok(status)) => (status.code().unwrap_or(-1), false),
            Outcome::Exited(Err(e)) => {
                tracing::warn!(hook = %opts.label, error = %e, "failed to wait for hook");
                (-1, false)
            }
            Outcome::TimedOut | Outcome::Cancelled => (-1, true),
        };

        let result = HookResult {
            exit_code,
            stdout: stdout.into_string(),
            stderr: stderr.into_string(),
            timed_out,
            elapsed: started.elapsed(),
        };

        if result.timed_out {
            tracing::warn!(
                hook = %opts.label,
                timeout = ?opts.timeout,
                cancelled = opts.cancel.is_cancelled(),
                "hook did not finish in time and was killed"
            );
        } else if result.success() {
            tracing::info!(hook = %opts.label, elapsed = ?result.elapsed, "hook completed");
        } else {
            tracing::warn!(
                hook = %opts.label,
                exit_code = result.exit_code,
                stderr = %result.stderr.trim(),
                "hook failed"
            );
        }

        result
    }
}

/// Output buffer that keeps only the first [`OUTPUT_LIMIT`] bytes.
#[derive(Clone, Default)]
struct Capture {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl Capture {
    /// Read `source` to the end on its own task, so a chatty child never
    /// blocks on a full pipe.
    fn spawn_drain<R>(&self, mut source: R) -> tokio::task::JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::clone(&self.buf);
        tokio::spawn(async move {
            let mut chunk = [0u8; 4096];
            loop {
                match source.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let mut buf = buf.lock();
                        let room = OUTPUT_LIMIT.saturating_sub(buf.len());
                        buf.extend_from_slice(&chunk[..n.min(room)]);
                    }
                }
            }
        })
    }

    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.buf.lock()).into_owned()
    }
}
