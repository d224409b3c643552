// ABOUTME: Runtime type definitions for Docker and Podman.
// ABOUTME: RuntimeType, the detected socket, and the config override section.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The container runtime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    Docker,
    Podman,
}

impl fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RuntimeType::Docker => "docker",
            RuntimeType::Podman => "podman",
        })
    }
}

/// Where the runtime API lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeInfo {
    pub runtime_type: RuntimeType,
    pub socket_path: String,
}

/// `runtime:` section of the config file; both fields override detection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeConfig {
    pub runtime: Option<RuntimeType>,
    pub socket: Option<String>,
}
