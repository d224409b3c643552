// ABOUTME: Generic replacement struct parameterized by state marker.
// ABOUTME: Holds the names and ids every step of a container swap needs.

use std::time::Duration;

use crate::runtime::ContainerInfo;
use crate::store::UpdateOperation;
use crate::types::{ContainerId, OperationId};

use super::state::{Prepared, Promoted, Started};

/// Label put on every container drydock creates, naming the operation.
/// Lets recovery find a new container whose id was never persisted.
pub const OPERATION_LABEL: &str = "drydock.operation";

/// A container swap in progress, parameterized by its current state.
///
/// Transitions consume the value, so a rolled-back swap cannot be promoted
/// and a swap whose new container never started cannot be rolled back.
#[derive(Debug)]
pub struct Replacement<S> {
    pub(crate) operation: OperationId,
    pub(crate) old_name: String,
    pub(crate) temp_name: String,
    pub(crate) original: ContainerId,
    pub(crate) original_running: bool,
    pub(crate) stop_timeout: Duration,
    pub(crate) state: S,
}

impl Replacement<Prepared> {
    /// Start a swap of `original` for the operation `op`.
    pub fn new(op: &UpdateOperation, original: &ContainerInfo, stop_timeout: Duration) -> Self {
        Replacement {
            operation: op.id.clone(),
            old_name: op.old_name.clone(),
            temp_name: op.temp_name.clone(),
            original: original.id.clone(),
            original_running: original.is_running(),
            stop_timeout,
            state: Prepared,
        }
    }
}

impl<S> Replacement<S> {
    /// Rebuild a swap from its persisted operation, in whatever state the
    /// runtime was observed to be in.
    pub(crate) fn resume(
        op: &UpdateOperation,
        original: ContainerId,
        original_running: bool,
        stop_timeout: Duration,
        state: S,
    ) -> Self {
        Replacement {
            operation: op.id.clone(),
            old_name: op.old_name.clone(),
            temp_name: op.temp_name.clone(),
            original,
            original_running,
            stop_timeout,
            state,
        }
    }

    pub(crate) fn transition<T>(self, state: T) -> Replacement<T> {
        Replacement {
            operation: self.operation,
            old_name: self.old_name,
            temp_name: self.temp_name,
            original: self.original,
            original_running: self.original_running,
            stop_timeout: self.stop_timeout,
            state,
        }
    }

    pub fn operation(&self) -> &OperationId {
        &self.operation
    }

    pub fn old_name(&self) -> &str {
        &self.old_name
    }

    pub fn temp_name(&self) -> &str {
        &self.temp_name
    }

    pub fn original(&self) -> &ContainerId {
        &self.original
    }
}

impl Replacement<Started> {
    pub fn new_container(&self) -> &ContainerId {
        &self.state.new_container
    }
}

impl Replacement<Promoted> {
    pub fn new_container(&self) -> &ContainerId {
        &self.state.new_container
    }
}
