// ABOUTME: Type-safe identifiers and validated domain types.
// ABOUTME: Container names, image references, and phantom-typed record ids.

mod container_name;
mod id;
mod image_ref;

pub use container_name::{ContainerName, ContainerNameError};
pub use id::{BackupId, ContainerId, Id, OperationId};
pub use image_ref::{DEFAULT_REGISTRY, ImageRef, ParseImageRefError};
