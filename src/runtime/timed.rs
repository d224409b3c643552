// ABOUTME: Runtime wrapper that bounds every call with a timeout.
// ABOUTME: An elapsed deadline surfaces as the operation's Timeout error.

use crate::runtime::traits::sealed::Sealed;
use crate::runtime::traits::{
    ContainerError, ContainerInfo, ContainerOps, ContainerSpec, ImageError, ImageOps,
    RegistryAuth,
};
use crate::types::{ContainerId, ImageRef};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(600);

/// Applies `call_timeout` to container calls and `pull_timeout` to pulls.
///
/// Stops get their own grace period added on top, since the runtime itself
/// waits that long before killing the container.
#[derive(Debug, Clone)]
pub struct Timed<R> {
    inner: R,
    call_timeout: Duration,
    pull_timeout: Duration,
}

impl<R> Timed<R> {
    pub fn new(inner: R, call_timeout: Duration) -> Self {
        Self {
            inner,
            call_timeout,
            pull_timeout: DEFAULT_PULL_TIMEOUT,
        }
    }

    pub fn with_pull_timeout(mut self, pull_timeout: Duration) -> Self {
        self.pull_timeout = pull_timeout;
        self
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

async fn bounded<T, E>(
    limit: Duration,
    what: String,
    call: impl Future<Output = Result<T, E>>,
    on_timeout: impl FnOnce(String) -> E,
) -> Result<T, E> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(call = %what, timeout = ?limit, "runtime call timed out");
            Err(on_timeout(format!("{what} after {limit:?}")))
        }
    }
}

impl<R: Send + Sync> Sealed for Timed<R> {}

#[async_trait]
impl<R: ImageOps> ImageOps for Timed<R> {
    async fn pull_image(
        &self,
        reference: &ImageRef,
        auth: Option<&RegistryAuth>,
    ) -> Result<(), ImageError> {
        bounded(
            self.pull_timeout,
            format!("pull {reference}"),
            self.inner.pull_image(reference, auth),
            ImageError::Timeout,
        )
        .await
    }
}

#[async_trait]
impl<R: ContainerOps> ContainerOps for Timed<R> {
    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerInfo, ContainerError> {
        bounded(
            self.call_timeout,
            format!("inspect {}", id.short()),
            self.inner.inspect_container(id),
            ContainerError::Timeout,
        )
        .await
    }

    async fn find_container(&self, name: &str) -> Result<Option<ContainerInfo>, ContainerError> {
        bounded(
            self.call_timeout,
            format!("find {name}"),
            self.inner.find_container(name),
            ContainerError::Timeout,
        )
        .await
    }

    async fn create_container(
        &self,
        name: &str,
        spec: &ContainerSpec,
    ) -> Result<ContainerId, ContainerError> {
        bounded(
            self.call_timeout,
            format!("create {name}"),
            self.inner.create_container(name, spec),
            ContainerError::Timeout,
        )
        .await
    }

    async fn start_container(&self, id: &ContainerId) -> Result<(), ContainerError> {
        bounded(
            self.call_timeout,
            format!("start {}", id.short()),
            self.inner.start_container(id),
            ContainerError::Timeout,
        )
        .await
    }

    async fn stop_container(
        &self,
        id: &ContainerId,
        timeout: Duration,
    ) -> Result<(), ContainerError> {
        bounded(
            self.call_timeout + timeout,
            format!("stop {}", id.short()),
            self.inner.stop_container(id, timeout),
            ContainerError::Timeout,
        )
        .await
    }

    async fn remove_container(&self, id: &ContainerId, force: bool) -> Result<(), ContainerError> {
        bounded(
            self.call_timeout,
            format!("remove {}", id.short()),
            self.inner.remove_container(id, force),
            ContainerError::Timeout,
        )
        .await
    }

    async fn rename_container(
        &self,
        id: &ContainerId,
        new_name: &str,
    ) -> Result<(), ContainerError> {
        bounded(
            self.call_timeout,
            format!("rename {} to {new_name}", id.short()),
            self.inner.rename_container(id, new_name),
            ContainerError::Timeout,
        )
        .await
    }
}
