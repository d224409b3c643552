// ABOUTME: Update operation records and the store that keeps them.
// ABOUTME: Single-flight insert, monotonic patches, and newest-first history per container.

use super::error::StoreError;
use super::owner::{Abandonment, OperationOwner};
use super::persist::Collection;
use crate::types::{BackupId, ContainerId, ContainerName, OperationId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

pub const OPERATIONS_FILE: &str = "operations.json";

/// Where an update is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Prepare,
    NewStarted,
    HealthCheck,
    Promoted,
    Rollback,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Prepare => "prepare",
            Phase::NewStarted => "new-started",
            Phase::HealthCheck => "health-check",
            Phase::Promoted => "promoted",
            Phase::Rollback => "rollback",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    InProgress,
    Success,
    Failed,
    RolledBack,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::InProgress => "in-progress",
            Status::Success => "success",
            Status::Failed => "failed",
            Status::RolledBack => "rolled-back",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::InProgress)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of one attempt to replace a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOperation {
    pub id: OperationId,
    pub container_name: ContainerName,
    /// Runtime id of the container being replaced, known once it is inspected.
    #[serde(default)]
    pub container_id: Option<ContainerId>,
    pub trigger_name: String,
    pub old_name: String,
    pub temp_name: String,
    #[serde(default)]
    pub new_container_id: Option<ContainerId>,
    pub target_image: String,
    #[serde(default)]
    pub previous_image: Option<String>,
    #[serde(default)]
    pub backup_id: Option<BackupId>,
    pub phase: Phase,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Best-effort hook failures that did not change the outcome.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hook_warnings: Vec<String>,
    /// Process that created or last adopted the operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<OperationOwner>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UpdateOperation {
    pub fn is_in_progress(&self) -> bool {
        self.status == Status::InProgress
    }
}

/// Name the original container carries while its replacement is validated.
pub fn temp_name_for(old_name: &str, id: &OperationId) -> String {
    format!("{old_name}-drydock-old-{}", id.short())
}

/// Fields for a new operation; unset ones are filled in by the store.
#[derive(Debug, Clone)]
pub struct NewOperation {
    pub id: Option<OperationId>,
    pub container_name: ContainerName,
    pub trigger_name: String,
    pub target_image: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl NewOperation {
    pub fn new(
        container_name: ContainerName,
        target_image: impl Into<String>,
        trigger_name: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            container_name,
            trigger_name: trigger_name.into(),
            target_image: target_image.into(),
            created_at: None,
        }
    }

    fn into_operation(self, now: DateTime<Utc>, owner: &OperationOwner) -> UpdateOperation {
        let id = self.id.unwrap_or_else(OperationId::generate);
        let created_at = self.created_at.unwrap_or(now);
        let old_name = self.container_name.to_string();
        UpdateOperation {
            temp_name: temp_name_for(&old_name, &id),
            id,
            container_name: self.container_name,
            container_id: None,
            trigger_name: self.trigger_name,
            old_name,
            new_container_id: None,
            target_image: self.target_image,
            previous_image: None,
            backup_id: None,
            phase: Phase::Prepare,
            status: Status::InProgress,
            reason: None,
            hook_warnings: Vec::new(),
            owner: Some(owner.clone()),
            created_at,
            updated_at: created_at,
        }
    }
}

/// Partial update of an operation. Only set fields are merged.
#[derive(Debug, Clone, Default)]
pub struct OperationPatch {
    pub container_id: Option<ContainerId>,
    pub new_container_id: Option<ContainerId>,
    pub previous_image: Option<String>,
    pub backup_id: Option<BackupId>,
    pub phase: Option<Phase>,
    pub status: Option<Status>,
    pub reason: Option<String>,
    /// Appended to `hook_warnings`.
    pub hook_warning: Option<String>,
}

impl OperationPatch {
    pub fn phase(phase: Phase) -> Self {
        Self {
            phase: Some(phase),
            ..Default::default()
        }
    }

    /// Terminal patch. `reason` is dropped for `Success`.
    pub fn finish(status: Status, reason: Option<String>) -> Self {
        Self {
            status: Some(status),
            reason: if status == Status::Success {
                None
            } else {
                reason
            },
            ..Default::default()
        }
    }

    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn with_new_container(mut self, id: ContainerId) -> Self {
        self.new_container_id = Some(id);
        self
    }

    pub fn hook_warning(warning: impl Into<String>) -> Self {
        Self {
            hook_warning: Some(warning.into()),
            ..Default::default()
        }
    }

    fn apply(self, op: &mut UpdateOperation) {
        if let Some(id) = self.container_id {
            op.container_id = Some(id);
        }
        if let Some(id) = self.new_container_id {
            op.new_container_id = Some(id);
        }
        if let Some(image) = self.previous_image {
            op.previous_image = Some(image);
        }
        if let Some(id) = self.backup_id {
            op.backup_id = Some(id);
        }
        if let Some(phase) = self.phase {
            op.phase = phase;
        }
        if let Some(status) = self.status {
            op.status = status;
            if status == Status::Success {
                op.reason = None;
            }
        }
        if let Some(reason) = self.reason {
            op.reason = Some(reason);
        }
        if let Some(warning) = self.hook_warning {
            op.hook_warnings.push(warning);
        }
    }
}

/// Append-only log of update operations.
///
/// Every record carries the identity of the store instance driving it, so
/// stores in other processes sharing the state dir leave live operations
/// alone and only adopt ones whose owner has exited.
#[derive(Debug)]
pub struct OperationStore {
    records: Collection<UpdateOperation>,
    owner: OperationOwner,
    /// In-progress operations this instance is driving right now.
    driving: Mutex<HashSet<OperationId>>,
}

impl OperationStore {
    pub fn in_memory() -> Self {
        Self::with_records(Collection::in_memory("operations"))
    }

    /// Open `<state_dir>/operations.json`, loading whatever it already holds.
    pub fn open(state_dir: &Path) -> Result<Self, StoreError> {
        let records = Collection::open(state_dir.join(OPERATIONS_FILE), "operations")?;
        Ok(Self::with_records(records))
    }

    fn with_records(records: Collection<UpdateOperation>) -> Self {
        Self {
            records,
            owner: OperationOwner::current(),
            driving: Mutex::new(HashSet::new()),
        }
    }

    /// Identity stamped on operations this instance creates or adopts.
    pub fn owner(&self) -> &OperationOwner {
        &self.owner
    }

    pub fn insert(&self, new: NewOperation) -> Result<UpdateOperation, StoreError> {
        self.records.write(|records| {
            let op = new.into_operation(Utc::now(), &self.owner);
            records.push(op.clone());
            Ok(op)
        })
    }

    /// Insert unless `container_name` already has an in-progress operation,
    /// and mark the new operation as driven by this instance until it
    /// reaches a terminal status. The check and the insert happen under the
    /// state file's lock, so this holds across processes.
    pub fn insert_exclusive(&self, new: NewOperation) -> Result<UpdateOperation, StoreError> {
        let op = self.records.write(|records| {
            if let Some(existing) = latest_in_progress_of(records, &new.container_name) {
                return Err(StoreError::Conflict {
                    existing: Box::new(existing.clone()),
                });
            }
            let op = new.into_operation(Utc::now(), &self.owner);
            records.push(op.clone());
            Ok(op)
        })?;
        self.driving.lock().insert(op.id.clone());
        Ok(op)
    }

    /// Merge `patch` into the record. `updated_at` never moves backwards.
    pub fn patch(
        &self,
        id: &OperationId,
        patch: OperationPatch,
    ) -> Result<UpdateOperation, StoreError> {
        let updated = self.records.write(|records| {
            let op = records
                .iter_mut()
                .find(|op| &op.id == id)
                .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
            patch.apply(op);
            op.updated_at = Utc::now().max(op.updated_at);
            Ok(op.clone())
        })?;
        if updated.status.is_terminal() {
            self.driving.lock().remove(id);
        }
        Ok(updated)
    }

    /// Adopt an in-progress operation whose owner is gone.
    ///
    /// Returns `None` when the operation already finished, when this
    /// instance is driving it, or when its owner is still running.
    pub fn claim(&self, id: &OperationId) -> Result<Option<UpdateOperation>, StoreError> {
        if self.driving.lock().contains(id) {
            return Ok(None);
        }
        let claimed = self.records.write(|records| {
            let op = records
                .iter_mut()
                .find(|op| &op.id == id)
                .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
            if !op.is_in_progress() {
                return Ok(None);
            }
            if let Some(owner) = &op.owner
                && owner.is_abandoned_for(&self.owner) == Abandonment::Live
            {
                tracing::debug!(
                    operation = %op.id,
                    host = %owner.host,
                    pid = owner.pid,
                    "operation owned by a live process"
                );
                return Ok(None);
            }
            op.owner = Some(self.owner.clone());
            op.updated_at = Utc::now().max(op.updated_at);
            Ok(Some(op.clone()))
        })?;
        if let Some(op) = &claimed {
            self.driving.lock().insert(op.id.clone());
        }
        Ok(claimed)
    }

    pub fn get(&self, id: &OperationId) -> Option<UpdateOperation> {
        self.records
            .read(|records| records.iter().find(|op| &op.id == id).cloned())
    }

    pub fn latest_in_progress(&self, name: &ContainerName) -> Option<UpdateOperation> {
        self.records
            .read(|records| latest_in_progress_of(records, name).cloned())
    }

    /// Every operation for `name`, most recently updated first.
    pub fn history(&self, name: &ContainerName) -> Vec<UpdateOperation> {
        self.records.read(|records| {
            let mut ops: Vec<(usize, &UpdateOperation)> = records
                .iter()
                .enumerate()
                .filter(|(_, op)| &op.container_name == name)
                .collect();
            ops.sort_by(|(ia, a), (ib, b)| b.updated_at.cmp(&a.updated_at).then(ib.cmp(ia)));
            ops.into_iter().map(|(_, op)| op.clone()).collect()
        })
    }

    /// Every in-progress operation across all containers, oldest first.
    pub fn in_progress(&self) -> Vec<UpdateOperation> {
        self.records.read(|records| {
            let mut ops: Vec<UpdateOperation> = records
                .iter()
                .filter(|op| op.is_in_progress())
                .cloned()
                .collect();
            ops.sort_by_key(|op| op.created_at);
            ops
        })
    }
}

fn latest_in_progress_of<'a>(
    records: &'a [UpdateOperation],
    name: &ContainerName,
) -> Option<&'a UpdateOperation> {
    records
        .iter()
        .enumerate()
        .filter(|(_, op)| &op.container_name == name && op.is_in_progress())
        .max_by(|(ia, a), (ib, b)| a.updated_at.cmp(&b.updated_at).then(ia.cmp(ib)))
        .map(|(_, op)| op)
}
