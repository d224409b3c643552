// ABOUTME: Crash recovery for operations whose owning process has exited.
// ABOUTME: Observes the runtime, plans from the persisted phase, then resumes or fails.

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

use crate::runtime::{ContainerError, ContainerOps, ImageOps};
use crate::store::{Phase, Status, UpdateOperation};
use crate::types::ContainerId;

use super::controller::UpdateController;
use super::error::{StepFailure, UpdateError};
use super::replacement::{OPERATION_LABEL, Replacement};
use super::state::{Renamed, RolledBack, Started};

/// What currently holds the container's original name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Occupant {
    Nothing,
    /// The container the operation set out to replace.
    Original,
    /// The container this operation created.
    New { id: ContainerId, running: bool },
    /// Something this operation knows nothing about.
    Other(ContainerId),
}

/// Runtime state relevant to an interrupted operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub temp_exists: bool,
    pub old_name: Occupant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Nothing to undo; record failure.
    Fail(String),
    /// The original is back under its name; make sure it runs and record rolled-back.
    MarkRolledBack,
    /// Both containers exist; run the health gate again and decide.
    ResumeHealthCheck { new_container: ContainerId, running: bool },
    /// Original was renamed but no replacement exists; rename it back and record failure.
    RestoreOriginal,
    /// The original is gone and the new container holds the name.
    FinishPromotion { new_container: ContainerId },
    /// A rollback was under way; complete it.
    FinishRollback { new_container: Option<ContainerId> },
    /// Container existence does not match any known step.
    Ambiguous(String),
}

/// Decide how to finish `op` given what the runtime looks like now.
///
/// The persisted phase is always consulted; the runtime state alone cannot
/// tell an unfinished promotion from an unfinished rollback.
pub fn plan_recovery(op: &UpdateOperation, seen: &Observation) -> RecoveryAction {
    if op.phase == Phase::Prepare {
        return RecoveryAction::Fail("interrupted before any runtime change".to_string());
    }

    match (seen.temp_exists, &seen.old_name, op.phase) {
        (true, Occupant::New { id, .. }, Phase::Rollback) => RecoveryAction::FinishRollback {
            new_container: Some(id.clone()),
        },
        (true, Occupant::New { id, running }, _) => RecoveryAction::ResumeHealthCheck {
            new_container: id.clone(),
            running: *running,
        },
        (true, Occupant::Nothing, Phase::Rollback) => {
            RecoveryAction::FinishRollback { new_container: None }
        }
        (true, Occupant::Nothing, _) => RecoveryAction::RestoreOriginal,
        (false, Occupant::Original, Phase::NewStarted) => {
            RecoveryAction::Fail("interrupted before the original was renamed".to_string())
        }
        (false, Occupant::Original, _) => RecoveryAction::MarkRolledBack,
        (false, Occupant::New { id, .. }, Phase::HealthCheck | Phase::Promoted) => {
            RecoveryAction::FinishPromotion {
                new_container: id.clone(),
            }
        }
        (temp_exists, occupant, phase) => {
            RecoveryAction::Ambiguous(describe(op, temp_exists, occupant, phase))
        }
    }
}

fn describe(op: &UpdateOperation, temp_exists: bool, occupant: &Occupant, phase: Phase) -> String {
    let temp = if temp_exists { "exists" } else { "is missing" };
    let holder = match occupant {
        Occupant::Nothing => "is free".to_string(),
        Occupant::Original => "is held by the original".to_string(),
        Occupant::New { id, .. } => format!("is held by new container {}", id.short()),
        Occupant::Other(id) => format!("is held by unknown container {}", id.short()),
    };
    format!(
        "interrupted in phase {phase}: {} {temp} and {} {holder}",
        op.temp_name, op.old_name
    )
}

impl<R: ContainerOps + ImageOps> UpdateController<R> {
    /// Bring every abandoned in-progress operation to a terminal state.
    ///
    /// Meant to run at startup, before new updates are accepted. Operations
    /// whose owner process is still running, here or on another host, are
    /// left alone; only those whose owner has exited are adopted.
    ///
    /// # Errors
    ///
    /// `Store` when an outcome cannot be recorded. Operations already
    /// recovered stay recovered.
    pub async fn recover(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<UpdateOperation>, UpdateError> {
        let pending = self.operations.in_progress();
        if pending.is_empty() {
            tracing::debug!("no interrupted operations");
            return Ok(Vec::new());
        }

        tracing::info!(count = pending.len(), "checking in-progress operations");
        let mut finished = Vec::with_capacity(pending.len());
        for seen in pending {
            let Some(op) = self.operations.claim(&seen.id)? else {
                let (host, pid) = seen
                    .owner
                    .as_ref()
                    .map(|o| (o.host.as_str(), o.pid))
                    .unwrap_or_default();
                tracing::info!(
                    operation = %seen.id,
                    container = %seen.container_name,
                    host,
                    pid,
                    "operation still owned by a running process, leaving it"
                );
                continue;
            };
            let done = self.recover_one(&op, cancel).await?;
            self.outcomes.publish(&done).await;
            finished.push(done);
        }
        Ok(finished)
    }

    /// Look at the runtime the way recovery needs to.
    pub async fn observe(&self, op: &UpdateOperation) -> Result<Observation, ContainerError> {
        let temp_exists = self.runtime.find_container(&op.temp_name).await?.is_some();
        let old_name = match self.runtime.find_container(&op.old_name).await? {
            None => Occupant::Nothing,
            Some(info) if op.container_id.as_ref() == Some(&info.id) => Occupant::Original,
            Some(info)
                if op.new_container_id.as_ref() == Some(&info.id)
                    || info.label(OPERATION_LABEL) == Some(op.id.as_str()) =>
            {
                Occupant::New {
                    running: info.is_running(),
                    id: info.id,
                }
            }
            Some(info) => Occupant::Other(info.id),
        };
        Ok(Observation {
            temp_exists,
            old_name,
        })
    }

    async fn recover_one(
        &self,
        op: &UpdateOperation,
        cancel: &CancellationToken,
    ) -> Result<UpdateOperation, UpdateError> {
        tracing::info!(
            operation = %op.id,
            container = %op.container_name,
            phase = %op.phase,
            "recovering operation"
        );

        if op.phase == Phase::Prepare {
            let failure = StepFailure::Prepare("interrupted before any runtime change".to_string());
            return self.finish(op, Status::Failed, Some(failure));
        }

        let seen = match self.observe(op).await {
            Ok(seen) => seen,
            Err(e) => {
                let failure = StepFailure::Ambiguous(format!("could not inspect runtime: {e}"));
                return self.finish(op, Status::Failed, Some(failure));
            }
        };
        let action = plan_recovery(op, &seen);
        tracing::info!(operation = %op.id, ?action, "recovery plan");

        let Some(original) = op.container_id.clone() else {
            let failure = match action {
                RecoveryAction::Fail(reason) => StepFailure::Runtime(reason),
                _ => StepFailure::Ambiguous(
                    "original container id was never recorded".to_string(),
                ),
            };
            return self.finish(op, Status::Failed, Some(failure));
        };

        let backup = op.backup_id.as_ref().and_then(|id| self.backups.get(id));
        let original_running = backup.as_ref().is_none_or(|b| b.was_running);
        let labels: BTreeMap<String, String> =
            backup.map(|b| b.spec.labels).unwrap_or_default();
        let stop_timeout = self.config.stop_timeout;
        let interrupted = StepFailure::Health(
            op.reason
                .clone()
                .unwrap_or_else(|| "interrupted during rollback".to_string()),
        );

        match action {
            RecoveryAction::Fail(reason) => {
                self.finish(op, Status::Failed, Some(StepFailure::Runtime(reason)))
            }
            RecoveryAction::Ambiguous(reason) => {
                self.finish(op, Status::Failed, Some(StepFailure::Ambiguous(reason)))
            }
            RecoveryAction::ResumeHealthCheck {
                new_container,
                running,
            } => {
                if !running
                    && let Err(e) = self.runtime.start_container(&new_container).await
                    && !matches!(e, ContainerError::AlreadyRunning(_))
                {
                    tracing::warn!(
                        container = %new_container.short(),
                        error = %e,
                        "failed to start new container; health gate will reject it"
                    );
                }
                let started = Replacement::resume(
                    op,
                    original,
                    original_running,
                    stop_timeout,
                    Started { new_container },
                );
                self.validate(op, started, &labels, cancel).await
            }
            RecoveryAction::FinishPromotion { new_container } => {
                let started = Replacement::resume(
                    op,
                    original,
                    original_running,
                    stop_timeout,
                    Started { new_container },
                );
                self.complete_promotion(op, started).await
            }
            RecoveryAction::FinishRollback {
                new_container: Some(new_container),
            } => {
                let started = Replacement::resume(
                    op,
                    original,
                    original_running,
                    stop_timeout,
                    Started { new_container },
                );
                self.roll_back(op, started, interrupted, &labels).await
            }
            RecoveryAction::FinishRollback {
                new_container: None,
            } => {
                let renamed =
                    Replacement::resume(op, original, original_running, stop_timeout, Renamed);
                match renamed.restore(&self.runtime).await {
                    Ok(_) => self.finish(op, Status::RolledBack, Some(interrupted)),
                    Err(failure) => {
                        self.finish(op, Status::Failed, Some(failure.following(&interrupted)))
                    }
                }
            }
            RecoveryAction::RestoreOriginal => {
                let renamed =
                    Replacement::resume(op, original, original_running, stop_timeout, Renamed);
                let failure = match renamed.restore(&self.runtime).await {
                    Ok(_) => StepFailure::Runtime(
                        "interrupted before the new container started; original restored"
                            .to_string(),
                    ),
                    Err(failure) => failure,
                };
                self.finish(op, Status::Failed, Some(failure))
            }
            RecoveryAction::MarkRolledBack => {
                let restored =
                    Replacement::resume(op, original, original_running, stop_timeout, RolledBack);
                match restored.ensure_original_running(&self.runtime).await {
                    Ok(()) => self.finish(op, Status::RolledBack, Some(interrupted)),
                    Err(failure) => self.finish(op, Status::Failed, Some(failure)),
                }
            }
        }
    }
}
