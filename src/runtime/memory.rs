// ABOUTME: In-memory container runtime for tests and dry runs.
// ABOUTME: Models names, ids, run state, and health, with one-shot fault injection.

use crate::runtime::traits::sealed::Sealed;
use crate::runtime::traits::{
    ContainerError, ContainerInfo, ContainerOps, ContainerSpec, ContainerState, HealthState,
    ImageError, ImageOps, RegistryAuth,
};
use crate::types::{ContainerId, ImageRef};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Kinds of runtime call, used for fault injection and the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeCall {
    Inspect,
    Find,
    Create,
    Start,
    Stop,
    Remove,
    Rename,
    Pull,
}

impl RuntimeCall {
    /// Calls that change runtime state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            RuntimeCall::Create
                | RuntimeCall::Start
                | RuntimeCall::Stop
                | RuntimeCall::Remove
                | RuntimeCall::Rename
        )
    }
}

/// One recorded call: what was asked and of which container/image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub call: RuntimeCall,
    pub target: String,
}

#[derive(Debug, Clone)]
struct MemoryContainer {
    name: String,
    state: ContainerState,
    health: Option<HealthState>,
    spec: ContainerSpec,
}

#[derive(Debug, Default)]
struct MemoryState {
    containers: BTreeMap<String, MemoryContainer>,
    next_id: u64,
    missing_images: HashSet<String>,
    pulled: Vec<String>,
    failures: HashMap<RuntimeCall, ContainerError>,
    delays: HashMap<RuntimeCall, Duration>,
    health_on_start: Option<HealthState>,
    calls: Vec<CallRecord>,
}

/// A runtime that keeps its containers in a map.
///
/// Clones share state, so a test can hand one clone to the controller and
/// inspect the other afterwards.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRuntime {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a container as if it had been created and (optionally) started earlier.
    pub fn add_container(&self, name: &str, spec: ContainerSpec, running: bool) -> ContainerId {
        let mut state = self.state.lock();
        let id = next_id(&mut state);
        state.containers.insert(
            id.clone(),
            MemoryContainer {
                name: name.to_string(),
                state: if running {
                    ContainerState::Running
                } else {
                    ContainerState::Exited
                },
                health: None,
                spec,
            },
        );
        ContainerId::new(id)
    }

    /// Health reported by containers from their next start onwards.
    /// `None` models an image without a healthcheck.
    pub fn set_health_on_start(&self, health: Option<HealthState>) {
        self.state.lock().health_on_start = health;
    }

    pub fn set_health(&self, id: &ContainerId, health: Option<HealthState>) {
        if let Some(c) = self.state.lock().containers.get_mut(id.as_str()) {
            c.health = health;
        }
    }

    pub fn set_state(&self, id: &ContainerId, container_state: ContainerState) {
        if let Some(c) = self.state.lock().containers.get_mut(id.as_str()) {
            c.state = container_state;
        }
    }

    /// Make pulls and creates of this image fail as unknown.
    pub fn mark_image_missing(&self, image: &str) {
        self.state.lock().missing_images.insert(image.to_string());
    }

    /// Fail the next call of this kind with `error`.
    pub fn fail_next(&self, call: RuntimeCall, error: ContainerError) {
        self.state.lock().failures.insert(call, error);
    }

    /// Sleep this long inside every call of this kind.
    pub fn delay(&self, call: RuntimeCall, duration: Duration) {
        self.state.lock().delays.insert(call, duration);
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.state.lock().calls.clone()
    }

    pub fn mutation_calls(&self) -> Vec<CallRecord> {
        self.calls()
            .into_iter()
            .filter(|c| c.call.is_mutation())
            .collect()
    }

    pub fn pulled_images(&self) -> Vec<String> {
        self.state.lock().pulled.clone()
    }

    /// Snapshot of a container by name, without touching the call log.
    pub fn container_named(&self, name: &str) -> Option<ContainerInfo> {
        let state = self.state.lock();
        state
            .containers
            .iter()
            .find(|(_, c)| c.name == name)
            .map(|(id, c)| info_for(id, c))
    }

    pub fn container_count(&self) -> usize {
        self.state.lock().containers.len()
    }

    /// Record the call, apply any injected delay, and pop any injected failure.
    async fn enter(&self, call: RuntimeCall, target: &str) -> Result<(), ContainerError> {
        let delay = {
            let mut state = self.state.lock();
            state.calls.push(CallRecord {
                call,
                target: target.to_string(),
            });
            state.delays.get(&call).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.state.lock().failures.remove(&call) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn next_id(state: &mut MemoryState) -> String {
    state.next_id += 1;
    format!("{:012x}{:052x}", state.next_id, state.next_id)
}

fn info_for(id: &str, c: &MemoryContainer) -> ContainerInfo {
    ContainerInfo {
        id: ContainerId::new(id),
        name: c.name.clone(),
        image_id: format!("sha256:{}", c.spec.image),
        state: c.state,
        health: c.health,
        spec: c.spec.clone(),
    }
}

impl Sealed for InMemoryRuntime {}

#[async_trait]
impl ImageOps for InMemoryRuntime {
    async fn pull_image(
        &self,
        reference: &ImageRef,
        _auth: Option<&RegistryAuth>,
    ) -> Result<(), ImageError> {
        let image = reference.to_string();
        self.enter(RuntimeCall::Pull, &image)
            .await
            .map_err(|e| ImageError::PullFailed(e.to_string()))?;

        let mut state = self.state.lock();
        if state.missing_images.contains(&image) {
            return Err(ImageError::NotFound(image));
        }
        state.pulled.push(image);
        Ok(())
    }
}

#[async_trait]
impl ContainerOps for InMemoryRuntime {
    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerInfo, ContainerError> {
        self.enter(RuntimeCall::Inspect, id.as_str()).await?;
        let state = self.state.lock();
        state
            .containers
            .get(id.as_str())
            .map(|c| info_for(id.as_str(), c))
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))
    }

    async fn find_container(&self, name: &str) -> Result<Option<ContainerInfo>, ContainerError> {
        self.enter(RuntimeCall::Find, name).await?;
        Ok(self.container_named(name))
    }

    async fn create_container(
        &self,
        name: &str,
        spec: &ContainerSpec,
    ) -> Result<ContainerId, ContainerError> {
        self.enter(RuntimeCall::Create, name).await?;
        let mut state = self.state.lock();
        if state.missing_images.contains(&spec.image) {
            return Err(ContainerError::ImageNotFound(spec.image.clone()));
        }
        if state.containers.values().any(|c| c.name == name) {
            return Err(ContainerError::AlreadyExists(name.to_string()));
        }
        let id = next_id(&mut state);
        state.containers.insert(
            id.clone(),
            MemoryContainer {
                name: name.to_string(),
                state: ContainerState::Created,
                health: None,
                spec: spec.clone(),
            },
        );
        Ok(ContainerId::new(id))
    }

    async fn start_container(&self, id: &ContainerId) -> Result<(), ContainerError> {
        self.enter(RuntimeCall::Start, id.as_str()).await?;
        let mut state = self.state.lock();
        let health = state.health_on_start;
        let container = state
            .containers
            .get_mut(id.as_str())
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        if container.state != ContainerState::Running {
            container.state = ContainerState::Running;
            container.health = health;
        }
        Ok(())
    }

    async fn stop_container(
        &self,
        id: &ContainerId,
        _timeout: Duration,
    ) -> Result<(), ContainerError> {
        self.enter(RuntimeCall::Stop, id.as_str()).await?;
        let mut state = self.state.lock();
        let container = state
            .containers
            .get_mut(id.as_str())
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        container.state = ContainerState::Exited;
        Ok(())
    }

    async fn remove_container(&self, id: &ContainerId, force: bool) -> Result<(), ContainerError> {
        self.enter(RuntimeCall::Remove, id.as_str()).await?;
        let mut state = self.state.lock();
        let running = match state.containers.get(id.as_str()) {
            None => return Err(ContainerError::NotFound(id.to_string())),
            Some(c) => c.state == ContainerState::Running,
        };
        if running && !force {
            return Err(ContainerError::Runtime(format!(
                "cannot remove running container {id}"
            )));
        }
        state.containers.remove(id.as_str());
        Ok(())
    }

    async fn rename_container(
        &self,
        id: &ContainerId,
        new_name: &str,
    ) -> Result<(), ContainerError> {
        self.enter(RuntimeCall::Rename, &format!("{id} -> {new_name}"))
            .await?;
        let mut state = self.state.lock();
        if state
            .containers
            .iter()
            .any(|(other, c)| other != id.as_str() && c.name == new_name)
        {
            return Err(ContainerError::AlreadyExists(new_name.to_string()));
        }
        let container = state
            .containers
            .get_mut(id.as_str())
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        container.name = new_name.to_string();
        Ok(())
    }
}
