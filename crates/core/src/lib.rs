//! Backlog core data models.
//!
//! This crate defines the entities the backlog engine works on: epics,
//! stories, the dependency edges between stories, and the structured
//! collections (tasks, acceptance criteria, comments) a story carries.
//! It performs no I/O.

#![warn(missing_docs)]

// Core identities
mod id;

// Backlog entities
mod epic;
mod story;
mod fields;

// Invariants
mod lifecycle;
mod validation;

// Re-exports
pub use id::*;

pub use epic::{Epic, EpicProgress, NewEpic};
pub use story::{NewStory, Story, StoryDependency, StoryFilter, StoryScope};
pub use fields::{
    AuthorRole, Comment, Criterion, NewComment, StructuredFieldsUpdate, Task,
};
pub use lifecycle::{EpicStatus, StatusError, StatusKind, StoryStatus};
pub use validation::{StructuredFieldValidator, ValidationError};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;

/// Lowercases a user-supplied name and strips separators so that
/// `"In Progress"`, `"in_progress"` and `"InProgress"` compare equal.
pub(crate) fn normalize_name(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
