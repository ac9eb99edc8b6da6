//! Common types for the GeoTrack environment abstraction.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Identifier of a simulated tracker entity (e.g. a zip code).
///
/// Cheap to clone: ids are copied into every dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Arc<str>);

impl EntityId {
    /// Creates an id from any string.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::borrow::Borrow<str> for EntityId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_entity_id_lookup_by_str() {
        let mut map = HashMap::new();
        map.insert(EntityId::new("98072"), 7usize);

        assert_eq!(map.get("98072"), Some(&7));
        assert_eq!(EntityId::from("98072").to_string(), "98072");
    }
}
