// ABOUTME: Error types for update orchestration.
// ABOUTME: UpdateError escapes to callers; StepFailure is only ever recorded on the operation.

use crate::store::StoreError;
use crate::types::OperationId;

/// Errors returned by the controller instead of being recorded.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// Another update for the container is still in progress.
    #[error("update {operation} already in progress for {container} (phase {phase})")]
    Conflict {
        container: String,
        operation: OperationId,
        phase: String,
    },

    /// The operation log itself failed, so the outcome could not be recorded.
    #[error("operation store failed: {0}")]
    Store(StoreError),
}

impl From<StoreError> for UpdateError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { existing } => UpdateError::Conflict {
                container: existing.container_name.to_string(),
                operation: existing.id,
                phase: existing.phase.to_string(),
            },
            other => UpdateError::Store(other),
        }
    }
}

/// Why a step of the replacement failed. Becomes the operation's `reason`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepFailure {
    #[error("{0}")]
    Prepare(String),

    #[error("{0}")]
    Hook(String),

    #[error("{0}")]
    Runtime(String),

    #[error("{0}")]
    Health(String),

    /// Container existence after the failure cannot be trusted.
    #[error("ambiguous state: {0}")]
    Ambiguous(String),
}

impl StepFailure {
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, StepFailure::Ambiguous(_))
    }

    /// Keep this failure's kind but mention the failure that led to it.
    pub fn following(self, cause: &StepFailure) -> StepFailure {
        let detail = |msg: String| format!("{msg} (while handling: {cause})");
        match self {
            StepFailure::Prepare(m) => StepFailure::Prepare(detail(m)),
            StepFailure::Hook(m) => StepFailure::Hook(detail(m)),
            StepFailure::Runtime(m) => StepFailure::Runtime(detail(m)),
            StepFailure::Health(m) => StepFailure::Health(detail(m)),
            StepFailure::Ambiguous(m) => StepFailure::Ambiguous(detail(m)),
        }
    }
}
