// ABOUTME: Bollard-based container runtime implementation.
// ABOUTME: Talks to Docker or Podman over the Docker-compatible API socket.

use crate::runtime::error::RuntimeError;
use crate::runtime::traits::sealed::Sealed;
use crate::runtime::traits::{
    ContainerError, ContainerInfo, ContainerOps, ContainerSpec, ContainerState, HealthState,
    HealthcheckConfig, ImageError, ImageOps, MountKind, NetworkAttachment, PortMapping, Protocol,
    RegistryAuth, RestartPolicyConfig, VolumeMount,
};
use crate::runtime::types::{RuntimeInfo, RuntimeType};
use crate::types::{ContainerId, ImageRef};
use async_trait::async_trait;
use bollard::Docker;
use bollard::models::{
    ContainerCreateBody, ContainerInspectResponse, ContainerStateStatusEnum, EndpointSettings,
    HealthConfig, HealthStatusEnum, HostConfig, Mount, MountTypeEnum, NetworkConnectRequest,
    NetworkingConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum,
};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, InspectContainerOptions, RemoveContainerOptions,
    RenameContainerOptions, StartContainerOptions, StopContainerOptions,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;

/// Seconds bollard waits on the socket before giving up on a request.
const CLIENT_TIMEOUT_SECS: u64 = 120;

// =============================================================================
// Error Mapping Helpers
// =============================================================================

fn status_of(e: &bollard::errors::Error) -> Option<(u16, &str)> {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } => Some((*status_code, message.as_str())),
        _ => None,
    }
}

fn map_container_error(e: bollard::errors::Error) -> ContainerError {
    match status_of(&e) {
        Some((404, message)) => ContainerError::NotFound(message.to_string()),
        Some((409, message)) => ContainerError::AlreadyExists(message.to_string()),
        _ => ContainerError::Runtime(e.to_string()),
    }
}

fn map_container_create_error(e: bollard::errors::Error) -> ContainerError {
    match status_of(&e) {
        Some((404, message)) => ContainerError::ImageNotFound(message.to_string()),
        Some((409, message)) => ContainerError::AlreadyExists(message.to_string()),
        _ => ContainerError::Runtime(e.to_string()),
    }
}

fn map_container_start_error(e: bollard::errors::Error) -> ContainerError {
    match status_of(&e) {
        Some((404, message)) => ContainerError::NotFound(message.to_string()),
        Some((304, message)) => ContainerError::AlreadyRunning(message.to_string()),
        _ => ContainerError::Runtime(e.to_string()),
    }
}

fn map_container_stop_error(e: bollard::errors::Error) -> ContainerError {
    match status_of(&e) {
        Some((404, message)) => ContainerError::NotFound(message.to_string()),
        Some((304, message)) => ContainerError::NotRunning(message.to_string()),
        _ => ContainerError::Runtime(e.to_string()),
    }
}

fn map_image_pull_error(e: bollard::errors::Error, image: &str) -> ImageError {
    match status_of(&e) {
        Some((404, _)) => ImageError::NotFound(image.to_string()),
        Some((401, _)) | Some((403, _)) => ImageError::AuthenticationFailed(image.to_string()),
        _ => ImageError::PullFailed(format!("{image}: {e}")),
    }
}

// =============================================================================
// BollardRuntime
// =============================================================================

/// Container runtime implementation using bollard.
pub struct BollardRuntime {
    client: Docker,
    runtime_type: RuntimeType,
}

impl BollardRuntime {
    pub fn new(client: Docker, runtime_type: RuntimeType) -> Self {
        Self {
            client,
            runtime_type,
        }
    }

    /// Connect to the socket found by `detect_runtime` and check it answers.
    pub async fn connect(info: &RuntimeInfo) -> Result<Self, RuntimeError> {
        let connection_failed = |message: String| RuntimeError::Connection {
            socket: info.socket_path.clone(),
            message,
        };

        let client = Docker::connect_with_unix(
            &info.socket_path,
            CLIENT_TIMEOUT_SECS,
            bollard::API_DEFAULT_VERSION,
        )
        .map_err(|e| connection_failed(e.to_string()))?;

        client
            .ping()
            .await
            .map_err(|e| connection_failed(e.to_string()))?;

        tracing::debug!(runtime = %info.runtime_type, socket = %info.socket_path, "connected");
        Ok(Self::new(client, info.runtime_type))
    }

    pub fn runtime_type(&self) -> RuntimeType {
        self.runtime_type
    }

    async fn inspect_raw(&self, target: &str) -> Result<ContainerInspectResponse, ContainerError> {
        self.client
            .inspect_container(target, None::<InspectContainerOptions>)
            .await
            .map_err(map_container_error)
    }

    /// Attach a freshly created container to the networks beyond its primary one.
    async fn connect_extra_networks(
        &self,
        id: &ContainerId,
        networks: &[&NetworkAttachment],
    ) -> Result<(), ContainerError> {
        for network in networks {
            let request = NetworkConnectRequest {
                container: id.to_string(),
                endpoint_config: Some(endpoint_for(network)),
            };
            self.client
                .connect_network(&network.name, request)
                .await
                .map_err(|e| {
                    ContainerError::Runtime(format!("connect to network {}: {e}", network.name))
                })?;
        }
        Ok(())
    }
}

impl Sealed for BollardRuntime {}

#[async_trait]
impl ImageOps for BollardRuntime {
    async fn pull_image(
        &self,
        reference: &ImageRef,
        auth: Option<&RegistryAuth>,
    ) -> Result<(), ImageError> {
        let image_name = reference.pull_reference();

        let opts = CreateImageOptions {
            from_image: Some(image_name.clone()),
            ..Default::default()
        };

        let credentials = auth.map(|a| bollard::auth::DockerCredentials {
            username: Some(a.username.clone()),
            password: Some(a.password.clone()),
            serveraddress: Some(a.server.clone()),
            ..Default::default()
        });

        // The pull reports progress as a stream; errors surface mid-stream.
        let mut stream = self.client.create_image(Some(opts), None, credentials);
        while let Some(result) = stream.next().await {
            result.map_err(|e| map_image_pull_error(e, &image_name))?;
        }

        Ok(())
    }
}

#[async_trait]
impl ContainerOps for BollardRuntime {
    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerInfo, ContainerError> {
        let details = self.inspect_raw(id.as_str()).await?;
        Ok(container_info_from(details))
    }

    async fn find_container(&self, name: &str) -> Result<Option<ContainerInfo>, ContainerError> {
        match self.inspect_raw(name).await {
            // Inspect also resolves id prefixes, so confirm the name really matches.
            Ok(details) => {
                let info = container_info_from(details);
                Ok((info.name == name).then_some(info))
            }
            Err(ContainerError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_container(
        &self,
        name: &str,
        spec: &ContainerSpec,
    ) -> Result<ContainerId, ContainerError> {
        let primary_network = primary_network(spec);
        let extra_networks: Vec<&NetworkAttachment> = spec
            .networks
            .iter()
            .filter(|n| Some(n.name.as_str()) != primary_network.map(|p| p.name.as_str()))
            .filter(|_| attaches_networks(spec))
            .collect();

        let networking_config = primary_network
            .filter(|_| attaches_networks(spec))
            .map(|network| NetworkingConfig {
                endpoints_config: Some(HashMap::from([(
                    network.name.clone(),
                    endpoint_for(network),
                )])),
            });

        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            env: non_empty(spec.env.clone()),
            labels: non_empty_map(
                spec.labels
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            cmd: spec.command.clone(),
            entrypoint: spec.entrypoint.clone(),
            working_dir: spec.working_dir.clone(),
            user: spec.user.clone(),
            exposed_ports: non_empty(
                spec.ports
                    .iter()
                    .map(|p| format!("{}/{}", p.container_port, p.protocol.as_str()))
                    .collect(),
            ),
            healthcheck: spec.healthcheck.as_ref().map(health_config_for),
            stop_timeout: spec.stop_timeout.map(|d| d.as_secs() as i64),
            host_config: Some(host_config_for(spec)),
            networking_config,
            ..Default::default()
        };

        let opts = CreateContainerOptions {
            name: Some(name.to_string()),
            ..Default::default()
        };

        let response = self
            .client
            .create_container(Some(opts), body)
            .await
            .map_err(map_container_create_error)?;
        let id = ContainerId::new(response.id);

        for warning in response.warnings {
            tracing::warn!(container = %name, "runtime warning on create: {}", warning);
        }

        if let Err(e) = self.connect_extra_networks(&id, &extra_networks).await {
            // Half-attached containers would come up with the wrong identity.
            if let Err(cleanup) = self.remove_container(&id, true).await {
                tracing::warn!(
                    container = %id.short(),
                    error = %cleanup,
                    "failed to remove partially created container"
                );
            }
            return Err(e);
        }

        Ok(id)
    }

    async fn start_container(&self, id: &ContainerId) -> Result<(), ContainerError> {
        self.client
            .start_container(id.as_str(), None::<StartContainerOptions>)
            .await
            .map_err(map_container_start_error)
    }

    async fn stop_container(
        &self,
        id: &ContainerId,
        timeout: Duration,
    ) -> Result<(), ContainerError> {
        let opts = StopContainerOptions {
            t: Some(timeout.as_secs() as i32),
            signal: None,
        };

        match self.client.stop_container(id.as_str(), Some(opts)).await {
            Ok(()) => Ok(()),
            Err(e) => match map_container_stop_error(e) {
                // Already stopped is the outcome we wanted.
                ContainerError::NotRunning(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn remove_container(&self, id: &ContainerId, force: bool) -> Result<(), ContainerError> {
        let opts = RemoveContainerOptions {
            force,
            ..Default::default()
        };

        self.client
            .remove_container(id.as_str(), Some(opts))
            .await
            .map_err(map_container_error)
    }

    async fn rename_container(
        &self,
        id: &ContainerId,
        new_name: &str,
    ) -> Result<(), ContainerError> {
        self.client
            .rename_container(
                id.as_str(),
                RenameContainerOptions {
                    name: new_name.to_string(),
                },
            )
            .await
            .map_err(map_container_error)
    }
}

// =============================================================================
// Inspect -> ContainerInfo
// =============================================================================

fn container_info_from(details: ContainerInspectResponse) -> ContainerInfo {
    let id = details.id.clone().unwrap_or_default();

    let state = details
        .state
        .as_ref()
        .and_then(|s| s.status)
        .map(|s| match s {
            ContainerStateStatusEnum::CREATED => ContainerState::Created,
            ContainerStateStatusEnum::RUNNING => ContainerState::Running,
            ContainerStateStatusEnum::PAUSED => ContainerState::Paused,
            ContainerStateStatusEnum::RESTARTING => ContainerState::Restarting,
            ContainerStateStatusEnum::REMOVING => ContainerState::Removing,
            ContainerStateStatusEnum::DEAD => ContainerState::Dead,
            _ => ContainerState::Exited,
        })
        .unwrap_or(ContainerState::Exited);

    let health = details
        .state
        .as_ref()
        .and_then(|s| s.health.as_ref())
        .and_then(|h| h.status)
        .and_then(|s| match s {
            HealthStatusEnum::STARTING => Some(HealthState::Starting),
            HealthStatusEnum::HEALTHY => Some(HealthState::Healthy),
            HealthStatusEnum::UNHEALTHY => Some(HealthState::Unhealthy),
            _ => None,
        });

    let spec = spec_from(&id, &details);

    ContainerInfo {
        id: ContainerId::new(id),
        name: details
            .name
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string(),
        image_id: details.image.unwrap_or_default(),
        state,
        health,
        spec,
    }
}

fn spec_from(id: &str, details: &ContainerInspectResponse) -> ContainerSpec {
    let config = details.config.clone().unwrap_or_default();
    let host = details.host_config.clone().unwrap_or_default();

    let ports = host
        .port_bindings
        .unwrap_or_default()
        .into_iter()
        .flat_map(|(key, bindings)| {
            let (port, proto) = key.split_once('/').unwrap_or((key.as_str(), "tcp"));
            let container_port = port.parse::<u16>().ok();
            let protocol = Protocol::from_suffix(proto);
            let bindings = bindings.unwrap_or_default();
            let mappings: Vec<PortMapping> = if bindings.is_empty() {
                container_port
                    .map(|container_port| PortMapping {
                        container_port,
                        protocol,
                        host_port: None,
                        host_ip: None,
                    })
                    .into_iter()
                    .collect()
            } else {
                bindings
                    .into_iter()
                    .filter_map(|b| {
                        Some(PortMapping {
                            container_port: container_port?,
                            protocol,
                            host_port: b.host_port.and_then(|p| p.parse().ok()),
                            host_ip: b.host_ip.filter(|ip| !ip.is_empty()),
                        })
                    })
                    .collect()
            };
            mappings
        })
        .collect();

    let mounts = host
        .mounts
        .unwrap_or_default()
        .into_iter()
        .filter_map(|m| {
            let kind = match m.typ? {
                MountTypeEnum::BIND => MountKind::Bind,
                MountTypeEnum::VOLUME => MountKind::Volume,
                MountTypeEnum::TMPFS => MountKind::Tmpfs,
                _ => return None,
            };
            Some(VolumeMount {
                kind,
                source: m.source,
                target: m.target?,
                read_only: m.read_only.unwrap_or(false),
            })
        })
        .collect();

    let restart_policy = host
        .restart_policy
        .map(|p| match p.name {
            Some(RestartPolicyNameEnum::ALWAYS) => RestartPolicyConfig::Always,
            Some(RestartPolicyNameEnum::UNLESS_STOPPED) => RestartPolicyConfig::UnlessStopped,
            Some(RestartPolicyNameEnum::ON_FAILURE) => RestartPolicyConfig::OnFailure {
                max_retries: p
                    .maximum_retry_count
                    .and_then(|n| u32::try_from(n).ok())
                    .filter(|n| *n > 0),
            },
            _ => RestartPolicyConfig::No,
        })
        .unwrap_or_default();

    // The runtime adds the short container id as an alias; it must not
    // follow the container into its replacement.
    let networks = details
        .network_settings
        .as_ref()
        .and_then(|s| s.networks.clone())
        .unwrap_or_default()
        .into_iter()
        .map(|(name, endpoint)| NetworkAttachment {
            name,
            aliases: endpoint
                .aliases
                .unwrap_or_default()
                .into_iter()
                .filter(|alias| !id.starts_with(alias.as_str()))
                .collect(),
        })
        .collect();

    let healthcheck = config.healthcheck.and_then(|hc| {
        let test = hc.test.filter(|t| !t.is_empty())?;
        let nanos = |n: Option<i64>| {
            n.filter(|n| *n > 0)
                .map(|n| Duration::from_nanos(n as u64))
        };
        Some(HealthcheckConfig {
            test,
            interval: nanos(hc.interval),
            timeout: nanos(hc.timeout),
            retries: hc.retries.and_then(|r| u32::try_from(r).ok()),
            start_period: nanos(hc.start_period),
        })
    });

    ContainerSpec {
        image: config.image.unwrap_or_default(),
        env: config.env.unwrap_or_default(),
        labels: config.labels.unwrap_or_default().into_iter().collect(),
        ports,
        binds: host.binds.unwrap_or_default(),
        mounts,
        command: config.cmd,
        entrypoint: config.entrypoint,
        working_dir: config.working_dir.filter(|d| !d.is_empty()),
        user: config.user.filter(|u| !u.is_empty()),
        restart_policy,
        network_mode: host.network_mode,
        networks,
        healthcheck,
        stop_timeout: config
            .stop_timeout
            .and_then(|s| u64::try_from(s).ok())
            .map(Duration::from_secs),
    }
}

// =============================================================================
// ContainerSpec -> create body
// =============================================================================

fn host_config_for(spec: &ContainerSpec) -> HostConfig {
    let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
    for port in &spec.ports {
        let key = format!("{}/{}", port.container_port, port.protocol.as_str());
        if let Some(host_port) = port.host_port {
            port_bindings
                .entry(key)
                .or_insert_with(|| Some(Vec::new()))
                .get_or_insert_with(Vec::new)
                .push(PortBinding {
                    host_ip: port.host_ip.clone(),
                    host_port: Some(host_port.to_string()),
                });
        }
    }

    let mounts: Vec<Mount> = spec
        .mounts
        .iter()
        .map(|m| Mount {
            source: m.source.clone(),
            target: Some(m.target.clone()),
            typ: Some(match m.kind {
                MountKind::Bind => MountTypeEnum::BIND,
                MountKind::Volume => MountTypeEnum::VOLUME,
                MountKind::Tmpfs => MountTypeEnum::TMPFS,
            }),
            read_only: Some(m.read_only),
            ..Default::default()
        })
        .collect();

    let (name, maximum_retry_count) = match &spec.restart_policy {
        RestartPolicyConfig::No => (RestartPolicyNameEnum::NO, None),
        RestartPolicyConfig::Always => (RestartPolicyNameEnum::ALWAYS, None),
        RestartPolicyConfig::UnlessStopped => (RestartPolicyNameEnum::UNLESS_STOPPED, None),
        RestartPolicyConfig::OnFailure { max_retries } => (
            RestartPolicyNameEnum::ON_FAILURE,
            max_retries.map(i64::from),
        ),
    };

    HostConfig {
        binds: non_empty(spec.binds.clone()),
        mounts: non_empty(mounts),
        port_bindings: non_empty_map(port_bindings),
        restart_policy: Some(RestartPolicy {
            name: Some(name),
            maximum_retry_count,
        }),
        network_mode: spec.network_mode.clone(),
        ..Default::default()
    }
}

fn health_config_for(hc: &HealthcheckConfig) -> HealthConfig {
    let nanos = |d: Option<Duration>| d.map(|d| d.as_nanos() as i64);
    HealthConfig {
        test: Some(hc.test.clone()),
        interval: nanos(hc.interval),
        timeout: nanos(hc.timeout),
        retries: hc.retries.map(i64::from),
        start_period: nanos(hc.start_period),
        start_interval: None,
    }
}

fn endpoint_for(network: &NetworkAttachment) -> EndpointSettings {
    EndpointSettings {
        aliases: non_empty(network.aliases.clone()),
        ..Default::default()
    }
}

/// Modes like `host`, `none`, or `container:<id>` share or skip a network stack.
fn attaches_networks(spec: &ContainerSpec) -> bool {
    match spec.network_mode.as_deref() {
        None => true,
        Some(mode) => mode != "host" && mode != "none" && !mode.starts_with("container:"),
    }
}

/// The network named by `network_mode` (or the first one when the mode is `default`).
fn primary_network(spec: &ContainerSpec) -> Option<&NetworkAttachment> {
    let mode = spec.network_mode.as_deref().unwrap_or("default");
    spec.networks
        .iter()
        .find(|n| n.name == mode)
        .or_else(|| spec.networks.first())
}

fn non_empty<T>(v: Vec<T>) -> Option<Vec<T>> {
    (!v.is_empty()).then_some(v)
}

fn non_empty_map<K, V>(m: HashMap<K, V>) -> Option<HashMap<K, V>> {
    (!m.is_empty()).then_some(m)
}
