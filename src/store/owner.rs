// ABOUTME: Identity of the process driving an operation, recorded on the operation itself.
// ABOUTME: Decides whether an in-progress operation was abandoned and may be adopted.

use crate::hooks::local_host;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether `pid` names a running process on this host.
pub fn process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // Signal 0 checks existence; EPERM still means the process exists.
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(_) => true,
    }
}

/// The store instance that created or adopted an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOwner {
    pub host: String,
    pub pid: u32,
    /// Distinguishes store instances within one process.
    pub session: String,
}

impl OperationOwner {
    /// A fresh identity for a store opened by this process.
    pub fn current() -> Self {
        Self {
            host: local_host(),
            pid: std::process::id(),
            session: Uuid::new_v4().to_string(),
        }
    }

    /// Whether an operation owned by `self` may be taken over by `other`.
    ///
    /// Owners on another host are never judged from here. Another store in
    /// the same process is assumed to be live.
    pub fn is_abandoned_for(&self, other: &OperationOwner) -> Abandonment {
        if self.session == other.session {
            return Abandonment::OwnSession;
        }
        if self.host != other.host {
            return Abandonment::Live;
        }
        if self.pid == other.pid || process_alive(self.pid) {
            Abandonment::Live
        } else {
            Abandonment::Exited
        }
    }
}

/// Outcome of [`OperationOwner::is_abandoned_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abandonment {
    /// Same store instance; abandoned unless it is still being driven.
    OwnSession,
    /// The owning process is gone.
    Exited,
    Live,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn this_process_is_alive() {
        assert!(process_alive(std::process::id()));
    }

    #[test]
    fn reaped_child_is_not_alive() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!process_alive(pid));
    }

    #[test]
    fn abandonment_rules() {
        let me = OperationOwner::current();
        let sibling = OperationOwner::current();
        assert_eq!(me.is_abandoned_for(&me), Abandonment::OwnSession);
        assert_eq!(sibling.is_abandoned_for(&me), Abandonment::Live);

        let remote = OperationOwner {
            host: "elsewhere".to_string(),
            pid: 1,
            session: "s".to_string(),
        };
        assert_eq!(remote.is_abandoned_for(&me), Abandonment::Live);

        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        let crashed = OperationOwner {
            pid,
            ..OperationOwner::current()
        };
        assert_eq!(crashed.is_abandoned_for(&me), Abandonment::Exited);
    }
}
