// ABOUTME: Pre-update container snapshots and the store that keeps them.
// ABOUTME: Newest-first listing per container and retention pruning.

use super::error::StoreError;
use super::persist::Collection;
use crate::runtime::ContainerSpec;
use crate::types::{BackupId, ContainerId, ContainerName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const BACKUPS_FILE: &str = "backups.json";

/// What a container looked like right before an update touched it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageBackup {
    pub id: BackupId,
    pub container_name: ContainerName,
    pub container_id: ContainerId,
    pub timestamp: DateTime<Utc>,
    /// Image reference the container was created from.
    pub image: String,
    /// Runtime image id, pinning the exact content.
    pub image_id: String,
    pub was_running: bool,
    pub spec: ContainerSpec,
}

#[derive(Debug, Clone)]
pub struct NewBackup {
    pub id: Option<BackupId>,
    pub container_name: ContainerName,
    pub container_id: ContainerId,
    pub timestamp: Option<DateTime<Utc>>,
    pub image: String,
    pub image_id: String,
    pub was_running: bool,
    pub spec: ContainerSpec,
}

impl NewBackup {
    fn into_backup(self) -> ImageBackup {
        ImageBackup {
            id: self.id.unwrap_or_else(BackupId::generate),
            container_name: self.container_name,
            container_id: self.container_id,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            image: self.image,
            image_id: self.image_id,
            was_running: self.was_running,
            spec: self.spec,
        }
    }
}

#[derive(Debug)]
pub struct BackupStore {
    records: Collection<ImageBackup>,
}

impl BackupStore {
    pub fn in_memory() -> Self {
        Self {
            records: Collection::in_memory("backups"),
        }
    }

    /// Open `<state_dir>/backups.json`.
    pub fn open(state_dir: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            records: Collection::open(state_dir.join(BACKUPS_FILE), "backups")?,
        })
    }

    pub fn insert_backup(&self, new: NewBackup) -> Result<ImageBackup, StoreError> {
        let backup = new.into_backup();
        self.records.write(|records| {
            records.push(backup.clone());
            Ok(())
        })?;
        Ok(backup)
    }

    /// Backups for `name`, newest first.
    pub fn by_container_name(&self, name: &ContainerName) -> Vec<ImageBackup> {
        self.records.read(|records| {
            newest_first(records, name)
                .into_iter()
                .cloned()
                .collect()
        })
    }

    pub fn get(&self, id: &BackupId) -> Option<ImageBackup> {
        self.records
            .read(|records| records.iter().find(|b| &b.id == id).cloned())
    }

    /// Remove one backup; `false` when it did not exist.
    pub fn delete(&self, id: &BackupId) -> Result<bool, StoreError> {
        self.records.write(|records| {
            let before = records.len();
            records.retain(|b| &b.id != id);
            Ok(records.len() != before)
        })
    }

    /// Keep the `max_count` newest backups for `name`; returns how many were removed.
    pub fn prune_old_backups(
        &self,
        name: &ContainerName,
        max_count: usize,
    ) -> Result<usize, StoreError> {
        let removed = self.records.write(|records| {
            let doomed: Vec<BackupId> = newest_first(records, name)
                .into_iter()
                .skip(max_count)
                .map(|b| b.id.clone())
                .collect();
            records.retain(|b| !doomed.contains(&b.id));
            Ok(doomed.len())
        })?;
        if removed > 0 {
            tracing::debug!(container = %name, removed, "pruned backups");
        }
        Ok(removed)
    }
}

fn newest_first<'a>(records: &'a [ImageBackup], name: &ContainerName) -> Vec<&'a ImageBackup> {
    let mut matching: Vec<(usize, &ImageBackup)> = records
        .iter()
        .enumerate()
        .filter(|(_, b)| &b.container_name == name)
        .collect();
    matching.sort_by(|(ia, a), (ib, b)| b.timestamp.cmp(&a.timestamp).then(ib.cmp(ia)));
    matching.into_iter().map(|(_, b)| b).collect()
}
