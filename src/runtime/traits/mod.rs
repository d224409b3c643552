// ABOUTME: Composable capability traits for container runtimes.
// ABOUTME: Defines ContainerOps and ImageOps plus the types they exchange.

mod container;
mod image;
pub(crate) mod sealed;
mod shared_types;

pub use container::{ContainerError, ContainerOps};
pub use image::{ImageError, ImageOps};
pub use shared_types::*;
