// ABOUTME: Container runtime abstraction for Docker and Podman.
// ABOUTME: Socket detection, the bollard client, an in-memory runtime, and call timeouts.

mod bollard;
mod detection;
mod error;
mod memory;
mod timed;
pub mod traits;
mod types;

pub use self::bollard::BollardRuntime;
pub use detection::{DetectionError, detect_runtime};
pub use error::{RuntimeError, RuntimeErrorKind};
pub use memory::{CallRecord, InMemoryRuntime, RuntimeCall};
pub use timed::{DEFAULT_CALL_TIMEOUT, DEFAULT_PULL_TIMEOUT, Timed};
pub use traits::{
    ContainerError, ContainerInfo, ContainerOps, ContainerSpec, ContainerState, HealthState,
    ImageError, ImageOps, RegistryAuth,
};
pub use types::{RuntimeConfig, RuntimeInfo, RuntimeType};
