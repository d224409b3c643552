// ABOUTME: Runtime socket detection on the local host.
// ABOUTME: Honors explicit config, then checks Podman sockets before Docker.

use super::types::{RuntimeConfig, RuntimeInfo, RuntimeType};
use std::path::Path;

const ROOTFUL_PODMAN: &str = "/run/podman/podman.sock";
const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Error during runtime detection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DetectionError {
    #[error("no container runtime found (checked Podman and Docker sockets)")]
    NoRuntimeFound,

    #[error("configured socket does not exist: {0}")]
    SocketMissing(String),
}

/// Work out which runtime socket to talk to.
///
/// An explicit `runtime` or `socket` in config wins. Otherwise the order is
/// rootless Podman, rootful Podman, then Docker.
pub fn detect_runtime(config: &RuntimeConfig) -> Result<RuntimeInfo, DetectionError> {
    if let Some(socket) = &config.socket {
        if !Path::new(socket).exists() {
            return Err(DetectionError::SocketMissing(socket.clone()));
        }
        let runtime_type = config.runtime.unwrap_or_else(|| guess_type(socket));
        return Ok(RuntimeInfo {
            runtime_type,
            socket_path: socket.clone(),
        });
    }

    if let Some(runtime_type) = config.runtime {
        let socket_path = match runtime_type {
            RuntimeType::Docker => DOCKER_SOCKET.to_string(),
            RuntimeType::Podman => rootless_podman_socket()
                .filter(|s| Path::new(s).exists())
                .unwrap_or_else(|| ROOTFUL_PODMAN.to_string()),
        };
        return Ok(RuntimeInfo {
            runtime_type,
            socket_path,
        });
    }

    let candidates = rootless_podman_socket()
        .map(|s| (RuntimeType::Podman, s))
        .into_iter()
        .chain([
            (RuntimeType::Podman, ROOTFUL_PODMAN.to_string()),
            (RuntimeType::Docker, DOCKER_SOCKET.to_string()),
        ]);

    for (runtime_type, socket_path) in candidates {
        if Path::new(&socket_path).exists() {
            tracing::debug!(%runtime_type, socket = %socket_path, "detected container runtime");
            return Ok(RuntimeInfo {
                runtime_type,
                socket_path,
            });
        }
    }

    Err(DetectionError::NoRuntimeFound)
}

fn guess_type(socket: &str) -> RuntimeType {
    if socket.contains("podman") {
        RuntimeType::Podman
    } else {
        RuntimeType::Docker
    }
}

fn rootless_podman_socket() -> Option<String> {
    let uid = std::env::var("UID").ok().or_else(|| {
        std::fs::read_to_string("/proc/self/status")
            .ok()?
            .lines()
            .find(|l| l.starts_with("Uid:"))?
            .split_whitespace()
            .nth(1)
            .map(str::to_string)
    })?;
    Some(format!("/run/user/{uid}/podman/podman.sock"))
}
