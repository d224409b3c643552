// ABOUTME: Shared types used across runtime trait definitions.
// ABOUTME: ContainerSpec (the recreatable config), ContainerInfo, health and registry auth.

use crate::types::ContainerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Everything needed to recreate a container with a different image.
///
/// Captured from an inspect of the running container and stored verbatim in
/// the backup snapshot, so field names are part of the persisted format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    /// Image reference the container was created from.
    pub image: String,
    /// Environment as `KEY=VALUE` entries, in runtime order.
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    /// `-v` style binds (`source:target[:mode]`), named volumes included.
    #[serde(default)]
    pub binds: Vec<String>,
    #[serde(default)]
    pub mounts: Vec<VolumeMount>,
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub restart_policy: RestartPolicyConfig,
    #[serde(default)]
    pub network_mode: Option<String>,
    #[serde(default)]
    pub networks: Vec<NetworkAttachment>,
    #[serde(default)]
    pub healthcheck: Option<HealthcheckConfig>,
    #[serde(default, with = "humantime_serde")]
    pub stop_timeout: Option<Duration>,
}

impl ContainerSpec {
    /// Copy of this spec with the image swapped out.
    pub fn with_image(&self, image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..self.clone()
        }
    }

    /// Whether any port is published on a fixed host port. Two containers
    /// cannot hold the same binding, so the original must stop first.
    pub fn has_host_port_bindings(&self) -> bool {
        self.ports.iter().any(|p| p.host_port.is_some())
    }

    /// Copy of this spec with one extra label set.
    pub fn with_label(mut self, key: &str, value: impl Into<String>) -> Self {
        self.labels.insert(key.to_string(), value.into());
        self
    }
}

/// Port publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub container_port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub host_port: Option<u16>,
    #[serde(default)]
    pub host_ip: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Sctp => "sctp",
        }
    }

    /// Parse the suffix of a runtime port key like `8080/udp`.
    pub fn from_suffix(s: &str) -> Self {
        match s {
            "udp" => Protocol::Udp,
            "sctp" => Protocol::Sctp,
            _ => Protocol::Tcp,
        }
    }
}

/// Explicit mount (the `--mount` form).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub kind: MountKind,
    #[serde(default)]
    pub source: Option<String>,
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    Bind,
    Volume,
    Tmpfs,
}

/// Network the container is attached to, with its aliases there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAttachment {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "name")]
pub enum RestartPolicyConfig {
    #[default]
    No,
    Always,
    UnlessStopped,
    OnFailure {
        #[serde(default)]
        max_retries: Option<u32>,
    },
}

/// Healthcheck as configured on the container itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthcheckConfig {
    pub test: Vec<String>,
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default, with = "humantime_serde")]
    pub start_period: Option<Duration>,
}

/// Inspect result for one container.
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: ContainerId,
    /// Name without the leading slash.
    pub name: String,
    /// Runtime id of the image the container runs.
    pub image_id: String,
    pub state: ContainerState,
    /// `None` when no healthcheck is configured.
    pub health: Option<HealthState>,
    pub spec: ContainerSpec,
}

impl ContainerInfo {
    pub fn is_running(&self) -> bool {
        self.state == ContainerState::Running
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.spec.labels.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Starting,
    Healthy,
    Unhealthy,
}

/// Registry credentials for a pull.
#[derive(Clone)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
    pub server: String,
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}
