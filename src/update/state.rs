// ABOUTME: Replacement state marker types for the type state pattern.
// ABOUTME: State types carry the ids that only exist from that point on.

use crate::types::ContainerId;

/// Original still under its own name, nothing mutated yet.
/// Available actions: `rename_original()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Prepared;

/// Original renamed to the temp name (and stopped under recreate).
/// Available actions: `launch()`, `restore()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Renamed;

/// New container created under the original name and started.
/// Available actions: `promote()`, `roll_back()`
#[derive(Debug, Clone)]
pub struct Started {
    pub(crate) new_container: ContainerId,
}

/// Original removed; the new container is permanent.
#[derive(Debug, Clone)]
pub struct Promoted {
    pub(crate) new_container: ContainerId,
}

/// New container removed and the original back under its name.
#[derive(Debug, Clone, Copy, Default)]
pub struct RolledBack;
