// ABOUTME: Replacement strategy selection from config and the captured container spec.
// ABOUTME: Decides whether the original keeps running while its replacement is validated.

use crate::config::StrategyConfig;
use crate::runtime::ContainerSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStrategy {
    /// Original is renamed and left running next to the new container.
    /// Gives the fastest rollback.
    SideBySide,

    /// Original is renamed and stopped before the new container starts.
    /// Required when host port bindings prevent two containers running at once.
    Recreate,
}

impl UpdateStrategy {
    /// Pick a strategy for replacing a container with `spec`.
    /// Returns the strategy and a reason if it was auto-detected as recreate.
    ///
    /// Priority:
    /// 1. Explicit `strategy` in config
    /// 2. Auto-detect based on host port bindings
    /// 3. Default to side-by-side
    pub fn for_spec(
        explicit: Option<StrategyConfig>,
        spec: &ContainerSpec,
    ) -> (Self, Option<&'static str>) {
        if let Some(strategy) = explicit {
            return match strategy {
                StrategyConfig::SideBySide => (UpdateStrategy::SideBySide, None),
                StrategyConfig::Recreate => (UpdateStrategy::Recreate, None),
            };
        }

        if spec.has_host_port_bindings() {
            (
                UpdateStrategy::Recreate,
                Some("host port bindings prevent running both containers"),
            )
        } else {
            (UpdateStrategy::SideBySide, None)
        }
    }

    pub fn stops_original(&self) -> bool {
        matches!(self, UpdateStrategy::Recreate)
    }
}
