//! Unique identifiers for backlog entities.
//!
//! Ids are opaque strings. Freshly minted ids are ULIDs, but any string
//! supplied by a caller (for example an id imported from another tracker)
//! is accepted as-is.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for an Epic
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpicId(String);

impl EpicId {
    /// Generate a new EpicId
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EpicId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EpicId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EpicId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EpicId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::str::FromStr for EpicId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

/// Unique identifier for a Story
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoryId(String);

impl StoryId {
    /// Generate a new StoryId
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StoryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for StoryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::str::FromStr for StoryId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

/// Mint an id for a task, criterion or comment when the caller did not
/// supply one.
pub fn new_item_id() -> String {
    Ulid::new().to_string().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(StoryId::new(), StoryId::new());
        assert_ne!(EpicId::new(), EpicId::new());
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let id = StoryId::from("story-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"story-42\"");
        let back: StoryId = serde_json::from_str("\"story-42\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_ids_order_lexicographically() {
        let a = StoryId::from("a");
        let b = StoryId::from("b");
        assert!(a < b);
    }
}
