// ABOUTME: Health gate that decides whether a freshly started container may be promoted.
// ABOUTME: Polls inspect until healthy, unhealthy, gone, past the deadline, or cancelled.

use crate::config::HealthSettings;
use crate::runtime::{ContainerOps, ContainerState, HealthState};
use crate::types::ContainerId;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const REASON_UNHEALTHY: &str = "container reported unhealthy";
pub const REASON_EXITED: &str = "container exited";
pub const REASON_DISAPPEARED: &str = "container disappeared";
pub const REASON_TIMEOUT: &str = "timeout";
pub const REASON_CANCELLED: &str = "cancelled";

/// Outcome of waiting on a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthVerdict {
    pub healthy: bool,
    /// Why the container was judged unhealthy; `None` when healthy.
    pub reason: Option<String>,
}

impl HealthVerdict {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            reason: None,
        }
    }

    pub fn unhealthy(reason: impl Into<String>) -> Self {
        Self {
            healthy: false,
            reason: Some(reason.into()),
        }
    }

    pub fn reason_or_default(&self) -> &str {
        self.reason.as_deref().unwrap_or("unhealthy")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HealthGate {
    interval: Duration,
    stable_period: Duration,
}

impl HealthGate {
    pub fn new(interval: Duration, stable_period: Duration) -> Self {
        Self {
            interval,
            stable_period,
        }
    }

    pub fn from_settings(settings: &HealthSettings) -> Self {
        Self::new(settings.interval, settings.stable_period)
    }

    /// Poll `id` every interval until a verdict is reached or `timeout` elapses.
    ///
    /// A container with a healthcheck must report `healthy`. One without must
    /// stay running for the stable period. Transient inspect errors are logged
    /// and polling continues.
    pub async fn wait<R: ContainerOps + ?Sized>(
        &self,
        runtime: &R,
        id: &ContainerId,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> HealthVerdict {
        let deadline = Instant::now() + timeout;
        let mut running_since: Option<Instant> = None;

        loop {
            if cancel.is_cancelled() {
                return HealthVerdict::unhealthy(REASON_CANCELLED);
            }

            match runtime.inspect_container(id).await {
                Ok(info) => match (info.state, info.health) {
                    (_, Some(HealthState::Unhealthy)) => {
                        return HealthVerdict::unhealthy(REASON_UNHEALTHY);
                    }
                    (ContainerState::Exited | ContainerState::Dead, _) => {
                        return HealthVerdict::unhealthy(REASON_EXITED);
                    }
                    (ContainerState::Running, Some(HealthState::Healthy)) => {
                        tracing::debug!(container = %id.short(), "healthcheck passed");
                        return HealthVerdict::healthy();
                    }
                    (ContainerState::Running, None) => {
                        let since = *running_since.get_or_insert_with(Instant::now);
                        if since.elapsed() >= self.stable_period {
                            tracing::debug!(
                                container = %id.short(),
                                stable_for = ?since.elapsed(),
                                "container stayed up without a healthcheck"
                            );
                            return HealthVerdict::healthy();
                        }
                    }
                    (state, health) => {
                        tracing::debug!(
                            container = %id.short(),
                            ?state,
                            ?health,
                            "not healthy yet"
                        );
                        if state != ContainerState::Running {
                            running_since = None;
                        }
                    }
                },
                Err(e) if e.is_not_found() => {
                    return HealthVerdict::unhealthy(REASON_DISAPPEARED);
                }
                Err(e) => {
                    tracing::warn!(
                        container = %id.short(),
                        error = %e,
                        "inspect failed during health check, retrying"
                    );
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return HealthVerdict::unhealthy(REASON_TIMEOUT);
            }
            let pause = self.interval.min(deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = cancel.cancelled() => return HealthVerdict::unhealthy(REASON_CANCELLED),
            }
        }
    }
}
