// ABOUTME: Container operations trait for container runtimes.
// ABOUTME: Inspect, find by name, create, start, stop, remove, and rename containers.

use super::sealed::Sealed;
use super::shared_types::{ContainerInfo, ContainerSpec};
use crate::types::ContainerId;
use async_trait::async_trait;
use std::time::Duration;

/// Container lifecycle operations used by the update engine.
///
/// Every method addresses the container by id; `find_container` is the only
/// name-based lookup. A missing container is always reported as
/// [`ContainerError::NotFound`] so callers can tell "gone" from "broken".
#[async_trait]
pub trait ContainerOps: Sealed + Send + Sync {
    /// Inspect a container, capturing its recreatable spec.
    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerInfo, ContainerError>;

    /// Look a container up by its exact name. `Ok(None)` when nothing has that name.
    async fn find_container(&self, name: &str) -> Result<Option<ContainerInfo>, ContainerError>;

    /// Create (but do not start) a container named `name` from `spec`.
    async fn create_container(
        &self,
        name: &str,
        spec: &ContainerSpec,
    ) -> Result<ContainerId, ContainerError>;

    async fn start_container(&self, id: &ContainerId) -> Result<(), ContainerError>;

    /// Stop a container, waiting up to `timeout` before the runtime kills it.
    async fn stop_container(
        &self,
        id: &ContainerId,
        timeout: Duration,
    ) -> Result<(), ContainerError>;

    async fn remove_container(&self, id: &ContainerId, force: bool) -> Result<(), ContainerError>;

    async fn rename_container(
        &self,
        id: &ContainerId,
        new_name: &str,
    ) -> Result<(), ContainerError>;
}

/// Errors from container operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContainerError {
    #[error("container not found: {0}")]
    NotFound(String),

    #[error("container name already in use: {0}")]
    AlreadyExists(String),

    #[error("container not running: {0}")]
    NotRunning(String),

    #[error("container already running: {0}")]
    AlreadyRunning(String),

    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("runtime call timed out: {0}")]
    Timeout(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}

impl ContainerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ContainerError::NotFound(_))
    }
}
