//! Advisory session lockfile: holder pid and start timestamp, created on
//! start, removed on clean shutdown. A lock left by a dead process is
//! reclaimed with a warning.

use crate::error::{ContextError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    started_at: DateTime<Utc>,
}

pub(crate) struct SessionLock {
    path: PathBuf,
}

impl SessionLock {
    /// Acquire the lock for a session directory.
    pub fn acquire(session_dir: &Path) -> Result<Self> {
        fs::create_dir_all(session_dir).map_err(ContextError::store)?;
        let path = session_dir.join(".lock");

        if path.exists() {
            let holder = fs::read_to_string(&path)
                .ok()
                .and_then(|json| serde_json::from_str::<LockInfo>(&json).ok());
            match holder {
                Some(info) if info.pid != std::process::id() && process_alive(info.pid) => {
                    return Err(ContextError::LockHeld { pid: info.pid });
                }
                Some(info) => {
                    tracing::warn!(
                        pid = info.pid,
                        started_at = %info.started_at,
                        "reclaiming stale session lock"
                    );
                }
                None => {
                    tracing::warn!(path = %path.display(), "reclaiming unreadable session lock");
                }
            }
        }

        let info = LockInfo {
            pid: std::process::id(),
            started_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&info).map_err(ContextError::store)?;
        fs::write(&path, json).map_err(ContextError::store)?;
        Ok(Self { path })
    }

    /// Remove the lockfile. Called on clean shutdown.
    pub fn release(self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove lockfile");
        }
        std::mem::forget(self);
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    // Without a portable liveness check, assume the holder is alive.
    true
}
