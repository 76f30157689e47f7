//! Opaque identifiers used across the core and the wire.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of an entity.
///
/// Entity ids are opaque strings: spawned entities get
/// `<archetype>-<ts>-<rand>`, players `player-<n>-<rand>`, generated terrain
/// a key-derived name. Equality and hashing are on the raw string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Creates an entity id from a raw string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Opaque handle of a connected session.
///
/// Sessions are numbered by the server in accept order; the handle is what
/// chunk subscriber sets hold, so closing a session only requires pruning a
/// small copyable value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_is_transparent_json() {
        let id = EntityId::new("tree-17-abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"tree-17-abc\"");
        let back: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
