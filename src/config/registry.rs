// ABOUTME: Registry credential entries from the config file.
// ABOUTME: Matches an image to the first entry whose host (or host/path prefix) covers it.

use super::env_value::interpolate;
use crate::error::Result;
use crate::runtime::RegistryAuth;
use crate::types::{DEFAULT_REGISTRY, ImageRef};
use serde::Deserialize;

#[derive(Clone, Deserialize)]
pub struct RegistryConfig {
    /// `ghcr.io`, or a narrower `ghcr.io/org` prefix.
    pub host: String,
    pub username: String,
    /// Literal value or `${VAR}` reference.
    pub password: String,
}

impl std::fmt::Debug for RegistryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryConfig")
            .field("host", &self.host)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl RegistryConfig {
    pub fn matches(&self, image: &ImageRef) -> bool {
        let rule = self.host.trim_end_matches('/');
        let (rule_host, rule_path) = match rule.split_once('/') {
            Some((host, path)) => (host, Some(path)),
            None => (rule, None),
        };
        if normalize_host(rule_host) != normalize_host(image.registry_host()) {
            return false;
        }
        match rule_path {
            None => true,
            Some(prefix) => {
                let repo = image.repository();
                repo == prefix
                    || repo
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with('/'))
            }
        }
    }

    pub fn resolve(&self) -> Result<RegistryAuth> {
        Ok(RegistryAuth {
            username: interpolate(&self.username)?,
            password: interpolate(&self.password)?,
            server: normalize_host(self.host.split('/').next().unwrap_or_default()).to_string(),
        })
    }
}

fn normalize_host(host: &str) -> &str {
    match host {
        "index.docker.io" | "registry-1.docker.io" | "registry.hub.docker.com" => DEFAULT_REGISTRY,
        other => other,
    }
}
