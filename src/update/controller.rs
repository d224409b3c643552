// ABOUTME: Update controller driving one container swap from prepare to a terminal state.
// ABOUTME: Records every outcome on the operation before returning or publishing it.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::health::HealthGate;
use crate::hooks::{HookContext, HookOptions, HookPoint, HookResult, HookRunner, local_host};
use crate::runtime::{ContainerInfo, ContainerOps, ImageOps};
use crate::store::{
    BackupStore, NewBackup, NewOperation, OperationPatch, OperationStore, Phase, Status,
    UpdateOperation,
};
use crate::types::{ContainerId, ContainerName, ImageRef};

use super::error::{StepFailure, UpdateError};
use super::outcome::OutcomeRegistry;
use super::replacement::Replacement;
use super::state::Started;
use super::strategy::UpdateStrategy;

/// A request to move `container_name` onto `target_image`.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub container_name: ContainerName,
    pub target_image: ImageRef,
    /// What asked for the update, e.g. a registry watcher or `manual`.
    pub trigger_name: String,
}

impl UpdateRequest {
    pub fn new(
        container_name: ContainerName,
        target_image: ImageRef,
        trigger_name: impl Into<String>,
    ) -> Self {
        Self {
            container_name,
            target_image,
            trigger_name: trigger_name.into(),
        }
    }
}

/// Drives container updates and crash recovery against one runtime.
pub struct UpdateController<R> {
    pub(super) runtime: R,
    pub(super) operations: Arc<OperationStore>,
    pub(super) backups: Arc<BackupStore>,
    pub(super) hooks: HookRunner,
    pub(super) hooks_enabled: bool,
    pub(super) health: HealthGate,
    pub(super) outcomes: OutcomeRegistry,
    pub(super) config: Config,
    pub(super) host: String,
}

/// State captured during prepare that later phases need.
struct Captured {
    op: UpdateOperation,
    original: ContainerInfo,
}

impl<R: ContainerOps + ImageOps> UpdateController<R> {
    pub fn new(
        runtime: R,
        operations: Arc<OperationStore>,
        backups: Arc<BackupStore>,
        config: Config,
    ) -> Self {
        Self {
            runtime,
            operations,
            backups,
            hooks: HookRunner::new(config.hooks.shell.clone()),
            hooks_enabled: true,
            health: HealthGate::from_settings(&config.health),
            outcomes: OutcomeRegistry::new(),
            config,
            host: local_host(),
        }
    }

    pub fn with_outcomes(mut self, outcomes: OutcomeRegistry) -> Self {
        self.outcomes = outcomes;
        self
    }

    /// Skip every hook, including ones set through container labels.
    pub fn without_hooks(mut self) -> Self {
        self.hooks_enabled = false;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn operations(&self) -> &Arc<OperationStore> {
        &self.operations
    }

    pub fn backups(&self) -> &Arc<BackupStore> {
        &self.backups
    }

    pub fn outcomes(&self) -> &OutcomeRegistry {
        &self.outcomes
    }

    /// Replace the container named in `request` with one running the target image.
    ///
    /// Returns the operation in its terminal state. Failures of the update
    /// itself are recorded on the operation, not returned.
    ///
    /// # Errors
    ///
    /// `Conflict` when another update for the container is in progress, and
    /// `Store` when the operation log cannot be written.
    pub async fn update(
        &self,
        request: UpdateRequest,
        cancel: &CancellationToken,
    ) -> Result<UpdateOperation, UpdateError> {
        let op = self.operations.insert_exclusive(NewOperation::new(
            request.container_name.clone(),
            request.target_image.to_string(),
            request.trigger_name.clone(),
        ))?;
        tracing::info!(
            operation = %op.id,
            container = %op.container_name,
            image = %op.target_image,
            trigger = %op.trigger_name,
            "update started"
        );

        let done = self.drive(op, &request.target_image, cancel).await?;
        self.outcomes.publish(&done).await;
        Ok(done)
    }

    async fn drive(
        &self,
        op: UpdateOperation,
        target: &ImageRef,
        cancel: &CancellationToken,
    ) -> Result<UpdateOperation, UpdateError> {
        let Captured { op, original } = match self.prepare(&op, target, cancel).await {
            Ok(prepared) => prepared,
            Err(failure) => return self.finish(&op, Status::Failed, Some(failure)),
        };

        let op = self
            .operations
            .patch(&op.id, OperationPatch::phase(Phase::NewStarted))?;

        let (strategy, auto_reason) =
            UpdateStrategy::for_spec(self.config.strategy, &original.spec);
        if let Some(reason) = auto_reason {
            tracing::info!(container = %op.container_name, reason, "using recreate strategy");
        }
        let spec = original.spec.with_image(target.to_string());

        let renamed = match Replacement::new(&op, &original, self.config.stop_timeout)
            .rename_original(&self.runtime)
            .await
        {
            Ok(renamed) => renamed,
            Err((_, failure)) => return self.finish(&op, Status::Failed, Some(failure)),
        };

        let started = match renamed.launch(&self.runtime, &spec, strategy).await {
            Ok(started) => started,
            Err((renamed, failure)) => {
                let failure = match renamed.restore(&self.runtime).await {
                    Ok(_) => failure,
                    Err(restore_failure) => restore_failure.following(&failure),
                };
                return self.finish(&op, Status::Failed, Some(failure));
            }
        };

        self.validate(&op, started, &original.spec.labels, cancel)
            .await
    }

    /// Everything before the first runtime mutation.
    async fn prepare(
        &self,
        op: &UpdateOperation,
        target: &ImageRef,
        cancel: &CancellationToken,
    ) -> Result<Captured, StepFailure> {
        let original = match self.runtime.find_container(&op.old_name).await {
            Ok(Some(info)) => info,
            Ok(None) => {
                return Err(StepFailure::Prepare(format!(
                    "container {} not found",
                    op.old_name
                )));
            }
            Err(e) => {
                return Err(StepFailure::Prepare(format!(
                    "failed to inspect {}: {e}",
                    op.old_name
                )));
            }
        };

        let backup = self
            .backups
            .insert_backup(NewBackup {
                id: None,
                container_name: op.container_name.clone(),
                container_id: original.id.clone(),
                timestamp: None,
                image: original.spec.image.clone(),
                image_id: original.image_id.clone(),
                was_running: original.is_running(),
                spec: original.spec.clone(),
            })
            .map_err(|e| StepFailure::Prepare(format!("failed to record backup: {e}")))?;

        let op = self
            .operations
            .patch(
                &op.id,
                OperationPatch {
                    container_id: Some(original.id.clone()),
                    previous_image: Some(original.spec.image.clone()),
                    backup_id: Some(backup.id),
                    ..Default::default()
                },
            )
            .map_err(|e| StepFailure::Prepare(format!("failed to record original: {e}")))?;

        let auth = self
            .config
            .credentials_for(target)
            .map_err(|e| StepFailure::Prepare(format!("credentials for {target}: {e}")))?;
        self.runtime
            .pull_image(target, auth.as_ref())
            .await
            .map_err(|e| StepFailure::Prepare(format!("failed to pull {target}: {e}")))?;
        tracing::debug!(image = %target, "pulled target image");

        let ctx = self.hook_context(&op, None, None);
        if let Some(result) = self
            .run_hook(HookPoint::PreUpdate, &original.spec.labels, ctx, cancel)
            .await
            && !result.success()
        {
            return Err(StepFailure::Hook(
                result.summary(HookPoint::PreUpdate.name()),
            ));
        }

        if cancel.is_cancelled() {
            return Err(StepFailure::Prepare(
                "cancelled before any runtime change".to_string(),
            ));
        }

        Ok(Captured { op, original })
    }

    /// Health-check the new container and promote or roll back.
    pub(super) async fn validate(
        &self,
        op: &UpdateOperation,
        started: Replacement<Started>,
        labels: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<UpdateOperation, UpdateError> {
        let op = self.operations.patch(
            &op.id,
            OperationPatch::phase(Phase::HealthCheck)
                .with_new_container(started.new_container().clone()),
        )?;
        tracing::info!(
            operation = %op.id,
            container = %op.old_name,
            timeout = ?self.config.health.timeout,
            "waiting for new container to become healthy"
        );

        let verdict = self
            .health
            .wait(
                &self.runtime,
                started.new_container(),
                self.config.health.timeout,
                cancel,
            )
            .await;

        if verdict.healthy {
            let ctx = self.hook_context(&op, Some(started.new_container().clone()), None);
            self.best_effort_hook(&op, HookPoint::PostUpdate, labels, ctx)
                .await?;
            self.complete_promotion(&op, started).await
        } else {
            let cause = StepFailure::Health(verdict.reason_or_default().to_string());
            self.roll_back(&op, started, cause, labels).await
        }
    }

    /// Remove the original and mark the operation successful.
    pub(super) async fn complete_promotion(
        &self,
        op: &UpdateOperation,
        started: Replacement<Started>,
    ) -> Result<UpdateOperation, UpdateError> {
        if let Err(failure) = started.promote(&self.runtime).await {
            return self.finish(op, Status::Failed, Some(failure));
        }

        let done = self.operations.patch(
            &op.id,
            OperationPatch::finish(Status::Success, None).with_phase(Phase::Promoted),
        )?;
        tracing::info!(
            operation = %done.id,
            container = %done.container_name,
            image = %done.target_image,
            "promoted new container"
        );

        let retention = self.config.backup.retention;
        match self
            .backups
            .prune_old_backups(&done.container_name, retention)
        {
            Ok(0) => {}
            Ok(removed) => {
                tracing::debug!(container = %done.container_name, removed, "pruned old backups")
            }
            Err(e) => {
                tracing::warn!(
                    container = %done.container_name,
                    error = %e,
                    "failed to prune backups"
                )
            }
        }
        Ok(done)
    }

    /// Throw away the new container, restore the original, and record `cause`.
    pub(super) async fn roll_back(
        &self,
        op: &UpdateOperation,
        started: Replacement<Started>,
        cause: StepFailure,
        labels: &BTreeMap<String, String>,
    ) -> Result<UpdateOperation, UpdateError> {
        tracing::warn!(
            operation = %op.id,
            container = %op.old_name,
            reason = %cause,
            "rolling back"
        );
        let op = self
            .operations
            .patch(&op.id, OperationPatch::phase(Phase::Rollback))?;
        let new_container = started.new_container().clone();

        match started.roll_back(&self.runtime).await {
            Ok(_) => {
                let ctx = self.hook_context(&op, Some(new_container), Some(cause.to_string()));
                self.best_effort_hook(&op, HookPoint::Rollback, labels, ctx)
                    .await?;
                self.finish(&op, Status::RolledBack, Some(cause))
            }
            Err(failure) => self.finish(&op, Status::Failed, Some(failure.following(&cause))),
        }
    }

    /// Write the terminal status and reason.
    pub(super) fn finish(
        &self,
        op: &UpdateOperation,
        status: Status,
        failure: Option<StepFailure>,
    ) -> Result<UpdateOperation, UpdateError> {
        let reason = failure.map(|f| f.to_string());
        match (&status, reason.as_deref()) {
            (Status::Failed, Some(reason)) => tracing::error!(
                operation = %op.id,
                container = %op.container_name,
                reason,
                "update failed"
            ),
            (_, Some(reason)) => tracing::warn!(
                operation = %op.id,
                container = %op.container_name,
                %status,
                reason,
                "update finished"
            ),
            (_, None) => tracing::info!(
                operation = %op.id,
                container = %op.container_name,
                %status,
                "update finished"
            ),
        }
        Ok(self
            .operations
            .patch(&op.id, OperationPatch::finish(status, reason))?)
    }

    pub(super) fn hook_context(
        &self,
        op: &UpdateOperation,
        new_container: Option<ContainerId>,
        rollback_reason: Option<String>,
    ) -> HookContext {
        HookContext {
            operation_id: op.id.clone(),
            container_name: op.container_name.clone(),
            container_id: op.container_id.clone(),
            trigger: op.trigger_name.clone(),
            current_image: op.previous_image.clone(),
            target_image: op.target_image.clone(),
            host: self.host.clone(),
            new_container_id: new_container,
            rollback_reason,
        }
    }

    /// Run the hook configured for `point`, if there is one.
    async fn run_hook(
        &self,
        point: HookPoint,
        labels: &BTreeMap<String, String>,
        ctx: HookContext,
        cancel: &CancellationToken,
    ) -> Option<HookResult> {
        if !self.hooks_enabled {
            return None;
        }
        let command = self.config.hooks.command_for(point, labels)?;
        let opts = HookOptions::new(format!("{} {}", point.name(), ctx.container_name))
            .timeout(self.config.hooks.timeout_for(labels))
            .env(ctx.to_env())
            .cancel(cancel.clone());
        Some(self.hooks.run(&command, opts).await)
    }

    /// Run a hook whose failure only adds a warning to the operation.
    ///
    /// These run after the runtime change is settled, so they get their own
    /// token and are bounded by the hook timeout even when the update itself
    /// was cancelled.
    pub(super) async fn best_effort_hook(
        &self,
        op: &UpdateOperation,
        point: HookPoint,
        labels: &BTreeMap<String, String>,
        ctx: HookContext,
    ) -> Result<(), UpdateError> {
        let detached = CancellationToken::new();
        if let Some(result) = self.run_hook(point, labels, ctx, &detached).await
            && !result.success()
        {
            let warning = result.summary(point.name());
            tracing::warn!(
                operation = %op.id,
                hook = point.name(),
                %warning,
                "hook failed, continuing"
            );
            self.operations
                .patch(&op.id, OperationPatch::hook_warning(warning))?;
        }
        Ok(())
    }
}

impl<R> std::fmt::Debug for UpdateController<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateController")
            .field("host", &self.host)
            .field("hooks_enabled", &self.hooks_enabled)
            .field("outcomes", &self.outcomes)
            .finish_non_exhaustive()
    }
}
