// ABOUTME: Phantom-typed identifiers for containers, operations, and backups.
// ABOUTME: Keeps runtime ids and store record ids from being mixed up at compile time.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use uuid::Uuid;

/// Marker types for phantom type parameters.
pub enum ContainerMarker {}
pub enum OperationMarker {}
pub enum BackupMarker {}

/// An identifier tagged with the kind of thing it names.
///
/// A `ContainerId` is whatever the runtime hands back; `OperationId` and
/// `BackupId` are generated by the stores.
#[must_use = "IDs reference resources and should not be ignored"]
pub struct Id<T> {
    value: String,
    _marker: PhantomData<T>,
}

impl<T> Id<T> {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            _marker: PhantomData,
        }
    }

    /// Generate a fresh random (UUID v4) identifier.
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// First eight characters, for log lines and derived names.
    pub fn short(&self) -> &str {
        let end = self
            .value
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.value.len());
        &self.value[..end]
    }

    pub fn into_inner(self) -> String {
        self.value
    }
}

// T is only a marker, so these impls must not require T: Trait.

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Id").field(&self.value).finish()
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        Self::new(self.value.clone())
    }
}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T> Eq for Id<T> {}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl<T> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.value)
    }
}

impl<'de, T> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

pub type ContainerId = Id<ContainerMarker>;
pub type OperationId = Id<OperationMarker>;
pub type BackupId = Id<BackupMarker>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = OperationId::generate();
        let b = OperationId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn short_truncates_to_eight_chars() {
        let id = OperationId::new("0123456789abcdef");
        assert_eq!(id.short(), "01234567");

        let tiny = ContainerId::new("abc");
        assert_eq!(tiny.short(), "abc");
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = BackupId::new("backup-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"backup-1\"");

        let back: BackupId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
