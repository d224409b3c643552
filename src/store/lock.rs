// ABOUTME: Cross-process lock file guarding read-modify-write of one state file.
// ABOUTME: Atomic create-new with holder info, stale-lock breaking, and release on drop.

use super::error::{IoSnafu, LockedSnafu, StoreError};
use super::owner::process_alive;
use crate::hooks::local_host;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

/// How long to wait for another process to release a state file.
pub const LOCK_WAIT: Duration = Duration::from_secs(10);

/// Locks are held for one file rewrite; anything this old was abandoned.
const STALE_AFTER: Duration = Duration::from_secs(60);

const RETRY_EVERY: Duration = Duration::from_millis(10);

/// Who holds a lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    pub holder: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

impl LockInfo {
    fn current() -> Self {
        Self {
            holder: local_host(),
            pid: std::process::id(),
            started_at: Utc::now(),
        }
    }

    /// A lock is stale when its holder on this host has exited, or when it
    /// has been held far longer than any single write takes.
    fn is_stale(&self) -> bool {
        if self.holder == local_host() && !process_alive(self.pid) {
            return true;
        }
        (Utc::now() - self.started_at)
            .to_std()
            .is_ok_and(|age| age >= STALE_AFTER)
    }

    fn describe(&self) -> String {
        format!("{} (pid {}) since {}", self.holder, self.pid, self.started_at)
    }
}

/// A held lock file, removed on drop.
#[derive(Debug)]
pub(crate) struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Take the lock at `path`, waiting up to `wait` for the current holder.
    pub(crate) fn acquire(path: &Path, wait: Duration) -> Result<Self, StoreError> {
        let deadline = Instant::now() + wait;
        loop {
            match try_create(path) {
                Ok(()) => {
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e).context(IoSnafu { path }),
            }

            let existing = read_info(path);
            let stale = match &existing {
                Some(info) => info.is_stale(),
                // Unreadable: either mid-write by its holder or left half-written.
                None => modified_age(path).is_some_and(|age| age >= STALE_AFTER),
            };
            if stale {
                let holder = existing.as_ref().map(LockInfo::describe).unwrap_or_default();
                tracing::warn!(lock = %path.display(), %holder, "breaking stale lock");
                match fs::remove_file(path) {
                    Ok(()) => continue,
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => return Err(e).context(IoSnafu { path }),
                }
            }

            if Instant::now() >= deadline {
                let holder = existing
                    .map(|info| info.describe())
                    .unwrap_or_else(|| "an unknown holder".to_string());
                return LockedSnafu { path, holder }.fail();
            }
            std::thread::sleep(RETRY_EVERY);
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(lock = %self.path.display(), error = %e, "failed to release lock");
        }
    }
}

fn try_create(path: &Path) -> std::io::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let json = serde_json::to_vec(&LockInfo::current()).map_err(std::io::Error::other)?;
    file.write_all(&json)?;
    file.sync_all()
}

fn read_info(path: &Path) -> Option<LockInfo> {
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn modified_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    SystemTime::now().duration_since(modified).ok()
}
