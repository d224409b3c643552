// ABOUTME: Image operations trait for container runtimes.
// ABOUTME: Pulls the update target before any container is touched.

use super::sealed::Sealed;
use super::shared_types::RegistryAuth;
use crate::types::ImageRef;
use async_trait::async_trait;

/// Image operations.
#[async_trait]
pub trait ImageOps: Sealed + Send + Sync {
    /// Pull an image from a registry, optionally authenticating.
    async fn pull_image(
        &self,
        reference: &ImageRef,
        auth: Option<&RegistryAuth>,
    ) -> Result<(), ImageError>;
}

/// Errors from image operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageError {
    #[error("image not found: {0}")]
    NotFound(String),

    #[error("authentication failed for registry: {0}")]
    AuthenticationFailed(String),

    #[error("pull failed: {0}")]
    PullFailed(String),

    #[error("runtime call timed out: {0}")]
    Timeout(String),
}
