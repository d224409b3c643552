// ABOUTME: Application-wide error types for drydock.
// ABOUTME: Uses thiserror to wrap config, store, runtime, and update failures for the CLI.

use crate::runtime::{ContainerError, DetectionError, RuntimeError};
use crate::store::StoreError;
use crate::types::{ContainerNameError, ParseImageRefError};
use crate::update::UpdateError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration file not found in {0}")]
    ConfigNotFound(PathBuf),

    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid container name: {0}")]
    ContainerName(#[from] ContainerNameError),

    #[error("invalid image reference: {0}")]
    ImageRef(#[from] ParseImageRefError),

    #[error("runtime detection failed: {0}")]
    Detection(#[from] DetectionError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("runtime call failed: {0}")]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Update(#[from] UpdateError),

    #[error("update of {container} ended {status}: {reason}")]
    UpdateUnsuccessful {
        container: String,
        status: String,
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
