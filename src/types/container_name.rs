// ABOUTME: Validated container name, the stable key an update is tracked under.
// ABOUTME: Follows the runtime naming rule [a-zA-Z0-9][a-zA-Z0-9_.-]*.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Longest name we accept. Docker itself allows more, but temp names are
/// derived by appending a suffix and must stay readable in `docker ps`.
const MAX_LEN: usize = 200;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContainerNameError {
    #[error("container name cannot be empty")]
    Empty,

    #[error("container name exceeds maximum length of {MAX_LEN} characters")]
    TooLong,

    #[error("container name must start with a letter or digit")]
    InvalidStart,

    #[error("invalid character in container name: '{0}'")]
    InvalidChar(char),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerName(String);

impl ContainerName {
    pub fn new(value: &str) -> Result<Self, ContainerNameError> {
        // Runtimes report names with a leading slash.
        let value = value.strip_prefix('/').unwrap_or(value);

        let first = value.chars().next().ok_or(ContainerNameError::Empty)?;
        if value.len() > MAX_LEN {
            return Err(ContainerNameError::TooLong);
        }
        if !first.is_ascii_alphanumeric() {
            return Err(ContainerNameError::InvalidStart);
        }
        if let Some(c) = value
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '_' | '.' | '-'))
        {
            return Err(ContainerNameError::InvalidChar(c));
        }

        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContainerName {
    type Error = ContainerNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<ContainerName> for String {
    fn from(name: ContainerName) -> Self {
        name.0
    }
}
