// ABOUTME: State transition methods for container replacement.
// ABOUTME: Each method consumes self and returns the next state on success.

use crate::runtime::{ContainerError, ContainerOps, ContainerSpec};

use super::error::StepFailure;
use super::replacement::{OPERATION_LABEL, Replacement};
use super::state::{Prepared, Promoted, Renamed, RolledBack, Started};
use super::strategy::UpdateStrategy;

/// Result type for transitions that may need unwinding on failure.
pub type TransitionResult<T, S> = Result<Replacement<T>, (Replacement<S>, StepFailure)>;

// =============================================================================
// Internal Helpers
// =============================================================================

impl<S> Replacement<S> {
    /// Start the original again if it was running before the update.
    pub(crate) async fn ensure_original_running<R: ContainerOps + ?Sized>(
        &self,
        runtime: &R,
    ) -> Result<(), StepFailure> {
        if !self.original_running {
            return Ok(());
        }
        match runtime.start_container(&self.original).await {
            Ok(()) | Err(ContainerError::AlreadyRunning(_)) => Ok(()),
            Err(e) => Err(StepFailure::Runtime(format!(
                "original restored as {} but failed to start: {e}",
                self.old_name
            ))),
        }
    }

    /// Describe what currently holds `old_name`, for ambiguous-state reasons.
    async fn occupant_of_old_name<R: ContainerOps + ?Sized>(&self, runtime: &R) -> String {
        match runtime.find_container(&self.old_name).await {
            Ok(Some(info)) if info.id == self.original => {
                format!("{} is held by the original", self.old_name)
            }
            Ok(Some(info)) => format!("{} is held by container {}", self.old_name, info.id.short()),
            Ok(None) => format!("no container is named {}", self.old_name),
            Err(e) => format!("{} could not be inspected ({e})", self.old_name),
        }
    }

    /// Remove a container this operation created under `old_name` whose id
    /// we never learned, e.g. after a create call timed out.
    async fn remove_stray_new<R: ContainerOps + ?Sized>(&self, runtime: &R) {
        let Ok(Some(info)) = runtime.find_container(&self.old_name).await else {
            return;
        };
        if info.label(OPERATION_LABEL) != Some(self.operation.as_str()) {
            return;
        }
        tracing::warn!(container = %info.id.short(), "removing half-created container");
        if let Err(e) = runtime.remove_container(&info.id, true).await {
            tracing::warn!(
                container = %info.id.short(),
                error = %e,
                "failed to remove half-created container"
            );
        }
    }
}

// =============================================================================
// Prepared -> Renamed
// =============================================================================

impl Replacement<Prepared> {
    /// Move the original out of the way under the temp name.
    ///
    /// # Errors
    ///
    /// Returns `(self, failure)` when the rename fails. The failure is
    /// ambiguous if the original is no longer found under its own name.
    #[must_use = "replacement state must be used"]
    pub async fn rename_original<R: ContainerOps + ?Sized>(
        self,
        runtime: &R,
    ) -> TransitionResult<Renamed, Prepared> {
        let err = match runtime.rename_container(&self.original, &self.temp_name).await {
            Ok(()) => {
                tracing::info!(from = %self.old_name, to = %self.temp_name, "renamed original");
                return Ok(self.transition(Renamed));
            }
            Err(e) => e,
        };

        // A timed-out rename may still have gone through.
        let failure = match runtime.find_container(&self.old_name).await {
            Ok(Some(info)) if info.id == self.original => StepFailure::Runtime(format!(
                "failed to rename {} to {}: {err}",
                self.old_name, self.temp_name
            )),
            _ => StepFailure::Ambiguous(format!(
                "rename of {} to {} failed ({err}) and the original is no longer under its name",
                self.old_name, self.temp_name
            )),
        };
        Err((self, failure))
    }
}

// =============================================================================
// Renamed -> Started
// =============================================================================

impl Replacement<Renamed> {
    /// Create the new container under the original name from `spec` and start it.
    /// Under the recreate strategy the original is stopped first.
    ///
    /// A container that was created but failed to start is removed before
    /// returning.
    ///
    /// # Errors
    ///
    /// Returns `(self, failure)` so the caller can [`restore`](Self::restore).
    #[must_use = "replacement state must be used"]
    pub async fn launch<R: ContainerOps + ?Sized>(
        self,
        runtime: &R,
        spec: &ContainerSpec,
        strategy: UpdateStrategy,
    ) -> TransitionResult<Started, Renamed> {
        if strategy.stops_original() && self.original_running {
            tracing::info!(container = %self.temp_name, "stopping original to free its ports");
            if let Err(e) = runtime
                .stop_container(&self.original, self.stop_timeout)
                .await
            {
                let failure = StepFailure::Runtime(format!(
                    "failed to stop original {}: {e}",
                    self.temp_name
                ));
                return Err((self, failure));
            }
        }

        let spec = spec
            .clone()
            .with_label(OPERATION_LABEL, self.operation.as_str());
        let new_container = match runtime.create_container(&self.old_name, &spec).await {
            Ok(id) => id,
            Err(e) => {
                self.remove_stray_new(runtime).await;
                let failure =
                    StepFailure::Runtime(format!("failed to create {}: {e}", self.old_name));
                return Err((self, failure));
            }
        };

        match runtime.start_container(&new_container).await {
            Ok(()) | Err(ContainerError::AlreadyRunning(_)) => {}
            Err(e) => {
                // Best effort; a leftover container surfaces when restore renames back.
                if let Err(re) = runtime.remove_container(&new_container, true).await
                    && !re.is_not_found()
                {
                    tracing::warn!(
                        container = %new_container.short(),
                        error = %re,
                        "failed to remove container that did not start"
                    );
                }
                let failure = StepFailure::Runtime(format!(
                    "failed to start new container for {}: {e}",
                    self.old_name
                ));
                return Err((self, failure));
            }
        }

        tracing::info!(
            container = %self.old_name,
            id = %new_container.short(),
            image = %spec.image,
            "started new container"
        );
        Ok(self.transition(Started { new_container }))
    }

    /// Put the original back under its name and restart it if it was running.
    ///
    /// # Errors
    ///
    /// Ambiguous when the rename back fails; a runtime failure when only the
    /// restart fails.
    pub async fn restore<R: ContainerOps + ?Sized>(
        self,
        runtime: &R,
    ) -> Result<Replacement<RolledBack>, StepFailure> {
        match runtime.rename_container(&self.original, &self.old_name).await {
            Ok(()) => {
                tracing::info!(
                    from = %self.temp_name,
                    to = %self.old_name,
                    "restored original name"
                );
            }
            Err(e) if e.is_not_found() => {
                let occupant = self.occupant_of_old_name(runtime).await;
                return Err(StepFailure::Ambiguous(format!(
                    "original {} ({}) is gone; {occupant}",
                    self.temp_name,
                    self.original.short()
                )));
            }
            Err(e) => {
                let occupant = self.occupant_of_old_name(runtime).await;
                return Err(StepFailure::Ambiguous(format!(
                    "original left as {}: could not rename it back ({e}); {occupant}",
                    self.temp_name
                )));
            }
        }

        self.ensure_original_running(runtime).await?;
        Ok(self.transition(RolledBack))
    }
}

// =============================================================================
// Started -> Promoted | RolledBack
// =============================================================================

impl Replacement<Started> {
    /// Make the new container permanent by removing the original.
    ///
    /// # Errors
    ///
    /// Ambiguous when the original cannot be removed: both containers exist.
    #[must_use = "replacement state must be used"]
    pub async fn promote<R: ContainerOps + ?Sized>(
        self,
        runtime: &R,
    ) -> Result<Replacement<Promoted>, StepFailure> {
        match runtime.remove_container(&self.original, true).await {
            Ok(()) => {
                tracing::info!(container = %self.temp_name, "removed original");
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!(container = %self.temp_name, "original already removed");
            }
            Err(e) => {
                return Err(StepFailure::Ambiguous(format!(
                    "new container {} is serving as {} but original {} could not be removed: {e}",
                    self.state.new_container.short(),
                    self.old_name,
                    self.temp_name
                )));
            }
        }

        let new_container = self.state.new_container.clone();
        Ok(self.transition(Promoted { new_container }))
    }

    /// Throw away the new container and bring the original back.
    ///
    /// # Errors
    ///
    /// Ambiguous when the new container cannot be removed or the original
    /// cannot be renamed back.
    #[must_use = "replacement state must be used"]
    pub async fn roll_back<R: ContainerOps + ?Sized>(
        self,
        runtime: &R,
    ) -> Result<Replacement<RolledBack>, StepFailure> {
        let new_container = self.state.new_container.clone();

        if let Err(e) = runtime
            .stop_container(&new_container, self.stop_timeout)
            .await
            && !e.is_not_found()
        {
            tracing::warn!(
                container = %new_container.short(),
                error = %e,
                "failed to stop new container, forcing removal"
            );
        }

        match runtime.remove_container(&new_container, true).await {
            Ok(()) => {
                tracing::info!(container = %new_container.short(), "removed new container");
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                return Err(StepFailure::Ambiguous(format!(
                    "new container {} could not be removed from {} ({e}); original kept as {}",
                    new_container.short(),
                    self.old_name,
                    self.temp_name
                )));
            }
        }

        self.transition(Renamed).restore(runtime).await
    }
}
