//! Command execution sandbox.
//!
//! Runs a command line through the configured shell interpreter with stdin
//! closed, captures stdout/stderr into capped buffers, and enforces a hard
//! timeout. On Unix the child leads its own process group so a timeout can
//! kill every descendant at once. `run` never fails: spawn errors, timeouts
//! and non-zero exits are all reported through [`CommandResult`].

use hearth_core::config::ShellConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Outcome of a sandboxed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    /// True iff the process exited on its own with status 0.
    pub ok: bool,
    /// Exit status, or -1 when killed, signalled, or never started.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl CommandResult {
    fn spawn_failure(error: &std::io::Error, started: Instant) -> Self {
        Self {
            ok: false,
            exit_code: -1,
            stdout: String::new(),
            stderr: format!("failed to start command: {error}"),
            timed_out: false,
            duration_ms: elapsed_ms(started),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandSandbox {
    program: String,
    default_timeout: Duration,
    max_output_bytes: usize,
    kill_grace: Duration,
}

impl Default for CommandSandbox {
    fn default() -> Self {
        Self::new(&ShellConfig::default())
    }
}

impl CommandSandbox {
    pub fn new(config: &ShellConfig) -> Self {
        Self {
            program: config.program.clone(),
            default_timeout: Duration::from_millis(config.default_timeout_ms),
            max_output_bytes: config.max_output_bytes,
            kill_grace: Duration::from_millis(config.kill_grace_ms),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run `command` in `cwd` (the current directory when `None`), killing
    /// it after `timeout` (the configured default when `None`).
    pub async fn run(
        &self,
        command: &str,
        cwd: Option<&Path>,
        timeout: Option<Duration>,
    ) -> CommandResult {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let started = Instant::now();

        let mut cmd = Command::new(&self.program);
        cmd.arg(shell_flag(&self.program))
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(command, error = %e, "Failed to spawn command");
                return CommandResult::spawn_failure(&e, started);
            }
        };
        debug!(command, pid = ?child.id(), timeout_ms = timeout.as_millis() as u64, "Command started");

        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));
        let readers = [
            spawn_capture(child.stdout.take(), stdout_buf.clone(), self.max_output_bytes),
            spawn_capture(child.stderr.take(), stderr_buf.clone(), self.max_output_bytes),
        ];

        let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => (status.code().unwrap_or(-1), false),
            Ok(Err(e)) => {
                warn!(command, error = %e, "Failed to wait for command");
                (-1, false)
            }
            Err(_) => {
                warn!(command, timeout_ms = timeout.as_millis() as u64, "Command timed out, killing");
                self.kill(&mut child).await;
                (-1, true)
            }
        };

        // Pipes may stay open if a descendant escaped the group; bound the drain.
        for reader in readers {
            let abort = reader.abort_handle();
            if tokio::time::timeout(self.kill_grace, reader).await.is_err() {
                abort.abort();
            }
        }

        CommandResult {
            ok: !timed_out && exit_code == 0,
            exit_code,
            stdout: take_lossy(&stdout_buf),
            stderr: take_lossy(&stderr_buf),
            timed_out,
            duration_ms: elapsed_ms(started),
        }
    }

    async fn kill(&self, child: &mut Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            // SAFETY: signalling a process group we created; no memory is touched.
            unsafe {
                libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
            }
        }
        if let Err(e) = child.start_kill() {
            debug!(error = %e, "Child already gone");
        }
        let _ = tokio::time::timeout(self.kill_grace, child.wait()).await;
    }
}

fn shell_flag(program: &str) -> &'static str {
    let base = program.rsplit(['/', '\\']).next().unwrap_or(program);
    let base = base.to_ascii_lowercase();
    if base == "cmd" || base == "cmd.exe" { "/C" } else { "-c" }
}

/// Read `pipe` to EOF, keeping at most `cap` bytes.
fn spawn_capture<R>(pipe: Option<R>, buf: Arc<Mutex<Vec<u8>>>, cap: usize) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut pipe) = pipe else { return };
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let mut out = buf.lock().unwrap_or_else(|e| e.into_inner());
                    let room = cap.saturating_sub(out.len());
                    out.extend_from_slice(&chunk[..n.min(room)]);
                }
            }
        }
    })
}

fn take_lossy(buf: &Mutex<Vec<u8>>) -> String {
    let bytes = std::mem::take(&mut *buf.lock().unwrap_or_else(|e| e.into_inner()));
    String::from_utf8_lossy(&bytes).into_owned()
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
