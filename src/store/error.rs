// ABOUTME: Store error types with SNAFU context selectors.
// ABOUTME: Covers persistence I/O, lock contention, JSON encoding, missing records, and conflicts.

use snafu::Snafu;
use std::path::PathBuf;

use super::UpdateOperation;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("state file {} I/O failed: {source}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to encode {what}: {source}"))]
    Serialize {
        what: &'static str,
        source: serde_json::Error,
    },

    #[snafu(display("state file {} is corrupt: {source}", path.display()))]
    Deserialize {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("state file {} is locked by {holder}", path.display()))]
    Locked { path: PathBuf, holder: String },

    #[snafu(display("no record with id {id}"))]
    NotFound { id: String },

    #[snafu(display(
        "update {} already in progress for {} (phase {})",
        existing.id,
        existing.container_name,
        existing.phase
    ))]
    Conflict { existing: Box<UpdateOperation> },
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}
