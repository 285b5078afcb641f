//! Single-instance lock keyed by the bot-token fingerprint.
//!
//! One takopi process per bot token: two bridges long-polling the same
//! token would steal each other's updates. The lock is a small JSON
//! record at a per-user path; a lock held by a dead PID is stolen.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Persisted lock record.
#[derive(Debug, Serialize, Deserialize)]
struct LockRecord {
    pid: u32,
    token_fingerprint: String,
}

/// Held file lock; removes the lockfile on drop.
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), %err, "failed to remove lockfile");
        }
    }
}

/// First 10 hex chars of the SHA-256 of the bot token.
#[must_use]
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..10].to_owned()
}

/// Acquire the single-instance lock for `bot_token` under `state_dir`.
///
/// # Errors
///
/// - `AppError::AlreadyRunning(pid)` if a live process holds a lock with
///   the same token fingerprint.
/// - `AppError::Lock` on lockfile I/O failures.
pub fn acquire(state_dir: &Path, bot_token: &str) -> Result<LockHandle> {
    let fingerprint = token_fingerprint(bot_token);
    fs::create_dir_all(state_dir)
        .map_err(|err| AppError::Lock(format!("cannot create state dir: {err}")))?;
    let path = state_dir.join(format!("takopi.{fingerprint}.lock"));

    if let Some(existing) = read_record(&path) {
        if existing.token_fingerprint == fingerprint && pid_alive(existing.pid) {
            return Err(AppError::AlreadyRunning(existing.pid));
        }
        warn!(
            path = %path.display(),
            stale_pid = existing.pid,
            "stealing lock from dead process"
        );
    }

    let record = LockRecord {
        pid: std::process::id(),
        token_fingerprint: fingerprint,
    };
    let body = serde_json::to_string(&record)
        .map_err(|err| AppError::Lock(format!("cannot encode lock record: {err}")))?;
    fs::write(&path, body).map_err(|err| AppError::Lock(format!("cannot write lockfile: {err}")))?;

    debug!(path = %path.display(), pid = record.pid, "lock acquired");
    Ok(LockHandle { path })
}

/// Read and decode an existing lock record; unreadable files are treated
/// as absent (they will be overwritten).
fn read_record(path: &Path) -> Option<LockRecord> {
    let raw = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(record) => Some(record),
        Err(err) => {
            warn!(path = %path.display(), %err, "unreadable lock record, overwriting");
            None
        }
    }
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        // Exists but owned by another user.
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    // No portable liveness probe; prefer refusing to steal.
    true
}
