// ABOUTME: Configuration types and parsing for drydock.yml.
// ABOUTME: Handles YAML parsing, humantime durations, env overrides, and file discovery.

mod env_value;
mod hooks;
mod registry;

pub use env_value::interpolate;
pub use hooks::{HOOK_TIMEOUT_LABEL, HooksConfig};
pub use registry::RegistryConfig;

use crate::error::{Error, Result};
use crate::runtime::{DEFAULT_CALL_TIMEOUT, DEFAULT_PULL_TIMEOUT, RegistryAuth, RuntimeConfig};
use crate::types::ImageRef;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "drydock.yml";
pub const CONFIG_FILENAME_ALT: &str = "drydock.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".drydock/config.yml";

/// Overrides `state_dir` when set.
pub const STATE_DIR_ENV: &str = "DRYDOCK_STATE_DIR";

pub const DEFAULT_STATE_DIR: &str = "/var/lib/drydock";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory holding `operations.json` and `backups.json`.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Explicit replacement strategy; auto-detected from host ports when absent.
    #[serde(default)]
    pub strategy: Option<StrategyConfig>,

    #[serde(default = "default_call_timeout", with = "humantime_serde")]
    pub call_timeout: Duration,

    #[serde(default = "default_pull_timeout", with = "humantime_serde")]
    pub pull_timeout: Duration,

    /// Grace period given to a container when it is stopped.
    #[serde(default = "default_stop_timeout", with = "humantime_serde")]
    pub stop_timeout: Duration,

    #[serde(default)]
    pub health: HealthSettings,

    #[serde(default)]
    pub hooks: HooksConfig,

    #[serde(default)]
    pub backup: BackupConfig,

    /// Pull credentials; the first entry whose host matches the image wins.
    #[serde(default)]
    pub registries: Vec<RegistryConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyConfig {
    /// New container runs next to the renamed original during validation.
    SideBySide,
    /// Original is stopped before the new container starts.
    Recreate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// How long a container without a healthcheck must stay up to count as healthy.
    #[serde(with = "humantime_serde")]
    pub stable_period: Duration,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            interval: Duration::from_secs(2),
            stable_period: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Backups kept per container after a successful update.
    pub retention: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self { retention: 3 }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_DIR)
}

fn default_call_timeout() -> Duration {
    DEFAULT_CALL_TIMEOUT
}

fn default_pull_timeout() -> Duration {
    DEFAULT_PULL_TIMEOUT
}

fn default_stop_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for Config {
    fn default() -> Self {
        Config {
            state_dir: default_state_dir(),
            runtime: RuntimeConfig::default(),
            strategy: None,
            call_timeout: default_call_timeout(),
            pull_timeout: default_pull_timeout(),
            stop_timeout: default_stop_timeout(),
            health: HealthSettings::default(),
            hooks: HooksConfig::default(),
            backup: BackupConfig::default(),
            registries: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Find a config file in `dir`, trying each known filename in turn.
    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Like [`Config::discover`], but falls back to defaults when no file exists.
    pub fn discover_or_default(dir: &Path) -> Result<Self> {
        match Self::discover(dir) {
            Err(Error::ConfigNotFound(_)) => {
                tracing::debug!(dir = %dir.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Apply environment overrides on top of the file values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(dir) = std::env::var_os(STATE_DIR_ENV).filter(|v| !v.is_empty()) {
            self.state_dir = PathBuf::from(dir);
        }
        self
    }

    /// Credentials for pulling `image`, resolving `${VAR}` references.
    pub fn credentials_for(&self, image: &ImageRef) -> Result<Option<RegistryAuth>> {
        self.registries
            .iter()
            .find(|r| r.matches(image))
            .map(RegistryConfig::resolve)
            .transpose()
    }

    fn validate(&self) -> Result<()> {
        if self.health.interval.is_zero() {
            return Err(Error::InvalidConfig(
                "health.interval must be greater than zero".to_string(),
            ));
        }
        if self.call_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "call_timeout must be greater than zero".to_string(),
            ));
        }
        if let Some(r) = self.registries.iter().find(|r| r.host.trim().is_empty()) {
            return Err(Error::InvalidConfig(format!(
                "registry entry for user {} has an empty host",
                r.username
            )));
        }
        Ok(())
    }
}
