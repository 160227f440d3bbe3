//! Timeout-bounded deploy command execution.
//!
//! Commands run through `sh -c` in the repository directory as the leader
//! of a new process group, so a timeout can terminate the whole descendant
//! tree: SIGTERM to the group, a 5 second grace period, then SIGKILL. The
//! OS-specific signal mechanics live behind [`ProcessGroup`].

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Grace period between SIGTERM and SIGKILL on timeout.
const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Case-insensitive substrings that reject a command outright. This is an
/// advisory guard against obvious foot-guns, not a security boundary: it
/// does not parse shell syntax.
const DESTRUCTIVE_PATTERNS: &[&str] = &["rm -rf /", "mkfs", "dd if=", "> /dev/sda"];

/// Outcome of one command execution.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub success: bool,
    pub output: String,
    pub exit_code: i32,
}

impl ExecOutcome {
    fn failure(output: String) -> Self {
        Self {
            success: false,
            output,
            exit_code: -1,
        }
    }
}

enum GroupSignal {
    Terminate,
    Kill,
}

/// A spawned child addressed as a process group.
pub struct ProcessGroup {
    child: Child,
    pgid: i32,
}

impl ProcessGroup {
    fn new(child: Child) -> Self {
        // The child was spawned with process_group(0), so its pgid is its
        // own pid.
        let pgid = child.id().map(|pid| pid as i32).unwrap_or(0);
        Self { child, pgid }
    }

    pub fn terminate_gracefully(&mut self) {
        self.signal_group(GroupSignal::Terminate);
    }

    pub fn kill_forcefully(&mut self) {
        self.signal_group(GroupSignal::Kill);
    }

    #[cfg(unix)]
    fn signal_group(&mut self, signal: GroupSignal) {
        let signal = match signal {
            GroupSignal::Terminate => libc::SIGTERM,
            GroupSignal::Kill => libc::SIGKILL,
        };
        if self.pgid > 0 {
            unsafe {
                libc::killpg(self.pgid, signal);
            }
        }
    }

    // Without process groups, fall back to killing the shell itself.
    #[cfg(not(unix))]
    fn signal_group(&mut self, _signal: GroupSignal) {
        let _ = self.child.start_kill();
    }

    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Wait up to `duration` for the leader to exit. `None` when it is
    /// still running afterwards.
    pub async fn wait_with_timeout(&mut self, duration: Duration) -> Option<ExitStatus> {
        timeout(duration, self.child.wait()).await.ok()?.ok()
    }
}

/// Runs shell commands in a fixed working directory under a hard timeout.
pub struct BoundedExecutor {
    working_dir: PathBuf,
}

impl BoundedExecutor {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }

    /// Reject empty commands and commands containing a destructive pattern.
    pub fn validate(command: &str) -> Result<(), String> {
        if command.trim().is_empty() {
            return Err("Command is empty".to_string());
        }
        let lowered = command.to_lowercase();
        for pattern in DESTRUCTIVE_PATTERNS {
            if lowered.contains(pattern) {
                return Err(format!(
                    "Command contains potentially destructive pattern: {pattern}"
                ));
            }
        }
        Ok(())
    }

    /// Spawn `command` through a shell and block until exit or timeout.
    ///
    /// Normal exit returns the captured combined output and exit code, with
    /// success iff the code is zero. A timeout terminates the process group
    /// and returns exit code -1 with a timeout message. A spawn failure
    /// returns -1 with the OS error text.
    pub async fn execute(&self, command: &str, timeout_secs: u64) -> ExecOutcome {
        info!(
            dir = %self.working_dir.display(),
            timeout_secs,
            "Executing command: {command}"
        );

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let message = format!("Failed to spawn command: {e}");
                error!("{message}");
                return ExecOutcome::failure(message);
            }
        };

        // Drain both pipes concurrently so a chatty command cannot dead-lock
        // against a full pipe buffer while we wait on it.
        let stdout_task = spawn_reader(child.stdout.take());
        let stderr_task = spawn_reader(child.stderr.take());
        let mut group = ProcessGroup::new(child);

        match timeout(Duration::from_secs(timeout_secs), group.wait()).await {
            Ok(Ok(status)) => {
                let exit_code = status.code().unwrap_or(-1);
                let output = collect_output(stdout_task, stderr_task).await;
                if status.success() {
                    info!(exit_code, "Command completed successfully");
                } else {
                    error!(exit_code, "Command failed");
                }
                ExecOutcome {
                    success: status.success(),
                    output,
                    exit_code,
                }
            }
            Ok(Err(e)) => {
                let message = format!("Failed to wait for command: {e}");
                error!("{message}");
                ExecOutcome::failure(message)
            }
            Err(_) => {
                error!(timeout_secs, "Command timed out, terminating process group");
                group.terminate_gracefully();
                if group.wait_with_timeout(GRACE_PERIOD).await.is_none() {
                    warn!("Process group survived SIGTERM, sending SIGKILL");
                    group.kill_forcefully();
                    let _ = group.wait().await;
                }
                stdout_task.abort();
                stderr_task.abort();
                ExecOutcome::failure(format!(
                    "Command timed out after {timeout_secs} seconds and was terminated"
                ))
            }
        }
    }

    /// [`validate`](Self::validate) then [`execute`](Self::execute). A
    /// validation failure returns immediately without spawning anything.
    pub async fn execute_safe(&self, command: &str, timeout_secs: u64) -> ExecOutcome {
        if let Err(reason) = Self::validate(command) {
            error!("Command validation failed: {reason}");
            return ExecOutcome::failure(format!("Command validation failed: {reason}"));
        }
        self.execute(command, timeout_secs).await
    }
}

fn spawn_reader<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncReadExt + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    })
}

async fn collect_output(stdout: JoinHandle<Vec<u8>>, stderr: JoinHandle<Vec<u8>>) -> String {
    let mut combined = stdout.await.unwrap_or_default();
    combined.extend(stderr.await.unwrap_or_default());
    String::from_utf8_lossy(&combined).into_owned()
}
