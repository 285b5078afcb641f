//! Subprocess manager.
//!
//! Spawns engine children in their own process group so the whole tree
//! can be signalled together, and guarantees the group is terminated on
//! every exit path: cooperative cancel (SIGTERM, grace, SIGKILL), guard
//! drop, and consumer crashes. Stderr is drained into a bounded tail
//! retained for diagnostics.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Grace period between SIGTERM and SIGKILL on cancel.
pub const KILL_GRACE: Duration = Duration::from_secs(2);

/// Maximum stderr bytes retained for diagnostics.
pub const STDERR_TAIL_BYTES: usize = 64 * 1024;

/// What to launch and how.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<std::path::PathBuf>,
    pub env: Vec<(String, String)>,
    /// When set, written to the child's stdin and then closed.
    pub stdin_payload: Option<String>,
}

impl SpawnSpec {
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: None,
            env: Vec::new(),
            stdin_payload: None,
        }
    }
}

/// Bounded ring over the child's stderr, shared with the drain task.
#[derive(Debug, Clone, Default)]
pub struct StderrTail {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl StderrTail {
    fn push(&self, chunk: &[u8]) {
        let mut buf = self.buf.lock();
        buf.extend_from_slice(chunk);
        let len = buf.len();
        if len > STDERR_TAIL_BYTES {
            buf.drain(..len - STDERR_TAIL_BYTES);
        }
    }

    /// Current tail contents, lossily decoded.
    #[must_use]
    pub fn snapshot(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock()).into_owned()
    }
}

/// A spawned child plus its process-group id.
///
/// The guard owns teardown: [`ChildGuard::cancel`] delivers graceful then
/// forced termination to the whole group, and `Drop` force-kills the group
/// if the child was never reaped.
#[derive(Debug)]
pub struct ChildGuard {
    child: Child,
    pgid: Option<i32>,
    tail: StderrTail,
    drain: Option<tokio::task::JoinHandle<()>>,
    reaped: bool,
}

/// Spawn `spec` in a new process group with stdout captured.
///
/// # Errors
///
/// Returns `AppError::Spawn` if the program cannot be started or its
/// stdio handles cannot be captured.
pub fn spawn(spec: SpawnSpec) -> Result<(ChildGuard, ChildStdout)> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(if spec.stdin_payload.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }
    if let Some(ref cwd) = spec.cwd {
        cmd.current_dir(cwd);
    }
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Spawn(format!("failed to spawn {}: {err}", spec.program)))?;

    // With process_group(0) the leader's pid is the group id.
    let pgid = child.id().and_then(|pid| i32::try_from(pid).ok());

    if let Some(payload) = spec.stdin_payload {
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture child stdin".into()))?;
        tokio::spawn(async move {
            if let Err(err) = stdin.write_all(payload.as_bytes()).await {
                debug!(%err, "failed to write prompt to child stdin");
            }
            let _ = stdin.shutdown().await;
        });
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture child stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture child stderr".into()))?;

    let tail = StderrTail::default();
    let drain_tail = tail.clone();
    let drain = tokio::spawn(async move {
        let mut stderr = stderr;
        let mut chunk = [0u8; 8192];
        loop {
            match stderr.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => drain_tail.push(&chunk[..n]),
            }
        }
    });

    debug!(program = %spec.program, pid = ?child.id(), "child spawned");

    Ok((
        ChildGuard {
            child,
            pgid,
            tail,
            drain: Some(drain),
            reaped: false,
        },
        stdout,
    ))
}

impl ChildGuard {
    /// Wait for the child to exit.
    ///
    /// Non-zero exits are ordinary results, not errors.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Child` only if the OS wait itself fails.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|err| AppError::Child(format!("wait failed: {err}")))?;
        self.reaped = true;
        self.join_drain().await;
        Ok(status)
    }

    /// Let the stderr drain task catch up so the tail is complete.
    ///
    /// Bounded: a grandchild holding stderr open must not stall the run.
    async fn join_drain(&mut self) {
        if let Some(task) = self.drain.take() {
            if tokio::time::timeout(Duration::from_millis(200), task)
                .await
                .is_err()
            {
                debug!("stderr drain still open after exit, abandoning it");
            }
        }
    }

    /// Terminate the whole process group: SIGTERM, [`KILL_GRACE`], SIGKILL.
    ///
    /// Idempotent; safe to call after the child has already exited.
    pub async fn cancel(&mut self) {
        if self.reaped {
            return;
        }
        signal_group(self.pgid, Sig::Term);
        match tokio::time::timeout(KILL_GRACE, self.child.wait()).await {
            Ok(Ok(_)) => {
                self.reaped = true;
            }
            Ok(Err(err)) => {
                warn!(%err, "wait failed during cancel");
                self.reaped = true;
            }
            Err(_elapsed) => {
                signal_group(self.pgid, Sig::Kill);
                let _ = self.child.start_kill();
                if let Ok(Ok(_)) = tokio::time::timeout(KILL_GRACE, self.child.wait()).await {
                    self.reaped = true;
                }
            }
        }
        // Stragglers in the group do not hold the pipe open past this point.
        signal_group(self.pgid, Sig::Kill);
    }

    /// Stderr tail captured so far.
    #[must_use]
    pub fn stderr_tail(&self) -> String {
        self.tail.snapshot()
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            // kill_on_drop covers the direct child; the group needs an
            // explicit signal so grandchildren cannot outlive the run.
            signal_group(self.pgid, Sig::Kill);
        }
    }
}

/// Summarize an exit status for logs and warning actions.
#[must_use]
pub fn describe_exit(status: ExitStatus) -> String {
    if status.success() {
        "exited normally (code 0)".to_owned()
    } else {
        status.code().map_or_else(
            || "terminated by signal".to_owned(),
            |code| format!("exited with code {code}"),
        )
    }
}

#[derive(Clone, Copy)]
enum Sig {
    Term,
    Kill,
}

#[cfg(unix)]
fn signal_group(pgid: Option<i32>, sig: Sig) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pgid) = pgid else { return };
    let signal = match sig {
        Sig::Term => Signal::SIGTERM,
        Sig::Kill => Signal::SIGKILL,
    };
    if let Err(err) = killpg(Pid::from_raw(pgid), signal) {
        debug!(pgid, ?signal, %err, "killpg failed (group likely gone)");
    }
}

#[cfg(not(unix))]
fn signal_group(_pgid: Option<i32>, _sig: Sig) {
    // Group signalling is unix-only; kill_on_drop covers the direct child.
}
