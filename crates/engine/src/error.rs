//! Engine error taxonomy.

use backlog_core::{EpicId, StatusError, StoryId, ValidationError};
use backlog_storage::StorageError;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Coarse classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A referenced entity is absent
    NotFound,
    /// Malformed or constraint-violating input, including cycles
    Validation,
    /// A status value that is not legal
    InvalidTransition,
    /// Lost a concurrent claim race too many times
    Conflict,
    /// The entity store failed
    Storage,
}

/// Errors returned by engine operations. Every failure is scoped to the
/// single request that produced it.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Story does not exist
    #[error("story not found: {0}")]
    StoryNotFound(StoryId),

    /// Epic does not exist
    #[error("epic not found: {0}")]
    EpicNotFound(EpicId),

    /// A task or criterion id is not present on the story
    #[error("story {story_id} has no {field} item '{item}'")]
    ItemNotFound {
        /// Story that was searched
        story_id: StoryId,
        /// Collection name
        field: &'static str,
        /// Missing item id
        item: String,
    },

    /// An entity with this id already exists
    #[error("id already in use: {0}")]
    DuplicateId(String),

    /// A story was asked to depend on itself
    #[error("story {0} cannot depend on itself")]
    SelfDependency(StoryId),

    /// The new edge would close a cycle
    #[error("{story_id} -> {depends_on_id} would create a dependency cycle: {}", format_path(.path))]
    CircularDependency {
        /// Dependent story of the rejected edge
        story_id: StoryId,
        /// Prerequisite of the rejected edge
        depends_on_id: StoryId,
        /// The cycle the edge would close, starting and ending at `story_id`
        path: Vec<StoryId>,
    },

    /// Structured field validation failed
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Status name or transition rejected
    #[error(transparent)]
    Status(#[from] StatusError),

    /// The claim step kept losing to concurrent callers
    #[error("could not claim a ready story after {attempts} attempts")]
    Conflict {
        /// Attempts made before giving up
        attempts: usize,
    },

    /// Entity store failure
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl EngineError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::StoryNotFound(_) | Self::EpicNotFound(_) | Self::ItemNotFound { .. } => {
                ErrorKind::NotFound
            }
            Self::DuplicateId(_)
            | Self::SelfDependency(_)
            | Self::CircularDependency { .. }
            | Self::Validation(_) => ErrorKind::Validation,
            Self::Status(_) => ErrorKind::InvalidTransition,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }
}

fn format_path(path: &[StoryId]) -> String {
    path.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}
