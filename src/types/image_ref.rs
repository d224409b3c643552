// ABOUTME: Image reference parsing for update targets and registry matching.
// ABOUTME: Splits registry/repository:tag@digest and normalizes Docker Hub references.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Registry host assumed when a reference names none.
pub const DEFAULT_REGISTRY: &str = "docker.io";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseImageRefError {
    #[error("image reference cannot be empty")]
    Empty,

    #[error("invalid character in image reference: {0}")]
    InvalidChar(char),

    #[error("image reference has an empty {0} component")]
    EmptyComponent(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageRef {
    registry: Option<String>,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageRef {
    pub fn parse(input: &str) -> Result<Self, ParseImageRefError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ParseImageRefError::Empty);
        }
        if let Some(c) = input
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && !"/:.-_@".contains(*c))
        {
            return Err(ParseImageRefError::InvalidChar(c));
        }

        let (rest, digest) = match input.split_once('@') {
            Some((_, "")) => return Err(ParseImageRefError::EmptyComponent("digest")),
            Some((rest, digest)) => (rest, Some(digest.to_string())),
            None => (input, None),
        };

        // A colon after the last slash separates the tag; earlier colons
        // belong to a registry port.
        let last_slash = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (path, tag) = match rest[last_slash..].split_once(':') {
            Some((_, "")) => return Err(ParseImageRefError::EmptyComponent("tag")),
            Some((name, tag)) => (&rest[..last_slash + name.len()], Some(tag.to_string())),
            None => (rest, None),
        };

        let (registry, repository) = match path.split_once('/') {
            Some((host, repo))
                if host.contains('.') || host.contains(':') || host == "localhost" =>
            {
                (Some(host.to_string()), repo.to_string())
            }
            _ => (None, path.to_string()),
        };
        if repository.is_empty() {
            return Err(ParseImageRefError::EmptyComponent("repository"));
        }

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Registry host as written, if any.
    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    /// Registry host with Docker Hub filled in when omitted.
    pub fn registry_host(&self) -> &str {
        self.registry.as_deref().unwrap_or(DEFAULT_REGISTRY)
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Tag as written; `None` for digest-only or bare references.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Reference with an implicit `latest` tag made explicit, the form pulls use.
    pub fn pull_reference(&self) -> String {
        if self.tag.is_none() && self.digest.is_none() {
            format!("{self}:latest")
        } else {
            self.to_string()
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{registry}/")?;
        }
        f.write_str(&self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for ImageRef {
    type Err = ParseImageRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ImageRef {
    type Error = ParseImageRefError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ImageRef> for String {
    fn from(image: ImageRef) -> Self {
        image.to_string()
    }
}
