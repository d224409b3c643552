// ABOUTME: Hook command configuration with per-container label overrides.
// ABOUTME: Resolves which shell command runs at each hook point and for how long.

use crate::hooks::{DEFAULT_HOOK_TIMEOUT, DEFAULT_SHELL, HookPoint};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Label that overrides the hook timeout for one container.
pub const HOOK_TIMEOUT_LABEL: &str = "drydock.hook.timeout";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    pub pre_update: Option<String>,
    pub post_update: Option<String>,
    pub rollback: Option<String>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Interpreter invoked as `<shell> -c <command>`.
    pub shell: String,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            pre_update: None,
            post_update: None,
            rollback: None,
            timeout: DEFAULT_HOOK_TIMEOUT,
            shell: DEFAULT_SHELL.to_string(),
        }
    }
}

impl HooksConfig {
    /// Command for `point`, preferring the container's label over the config.
    /// An empty label disables the hook for that container.
    pub fn command_for(
        &self,
        point: HookPoint,
        labels: &BTreeMap<String, String>,
    ) -> Option<String> {
        if let Some(cmd) = labels.get(&point.label()) {
            let cmd = cmd.trim();
            return (!cmd.is_empty()).then(|| cmd.to_string());
        }
        let configured = match point {
            HookPoint::PreUpdate => &self.pre_update,
            HookPoint::PostUpdate => &self.post_update,
            HookPoint::Rollback => &self.rollback,
        };
        configured
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
    }

    /// Timeout for hooks of this container; unparseable labels fall back to config.
    pub fn timeout_for(&self, labels: &BTreeMap<String, String>) -> Duration {
        match labels.get(HOOK_TIMEOUT_LABEL) {
            Some(raw) => match humantime_serde::re::humantime::parse_duration(raw.trim()) {
                Ok(timeout) => timeout,
                Err(e) => {
                    tracing::warn!(label = %raw, error = %e, "ignoring invalid hook timeout label");
                    self.timeout
                }
            },
            None => self.timeout,
        }
    }
}
