//! Storage trait abstraction.
//!
//! The engine never holds state between calls. Every operation opens a
//! [`Transaction`] through [`Storage::begin`], reads and writes through it,
//! and commits. A transaction that is dropped without `commit` discards
//! its writes, so an early `?` return never leaves partial state behind.

use async_trait::async_trait;
use backlog_core::{Epic, EpicId, Story, StoryDependency, StoryFilter, StoryId, StoryStatus};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite error
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Entity store for backlog data.
///
/// This trait allows different storage backends to be plugged in.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Open a transaction. Reads inside it observe a consistent view of
    /// statuses and dependency edges.
    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}

/// A unit of work against a [`Storage`].
#[async_trait]
pub trait Transaction: Send {
    // === Epic operations ===

    /// Load an epic by ID.
    async fn load_epic(&mut self, id: &EpicId) -> Result<Option<Epic>>;

    /// List all epics.
    async fn list_epics(&mut self) -> Result<Vec<Epic>>;

    /// Save an epic (create or update).
    async fn save_epic(&mut self, epic: &Epic) -> Result<()>;

    // === Story operations ===

    /// Load a story by ID.
    async fn load_story(&mut self, id: &StoryId) -> Result<Option<Story>>;

    /// List stories matching the filter.
    async fn list_stories(&mut self, filter: &StoryFilter) -> Result<Vec<Story>>;

    /// Save a story (create or update).
    async fn save_story(&mut self, story: &Story) -> Result<()>;

    /// Conditionally move a story from `expected` to `next`.
    ///
    /// Succeeds (returns `true`) only if the stored status still equals
    /// `expected`; otherwise nothing is written and `false` is returned.
    async fn claim_story(
        &mut self,
        id: &StoryId,
        expected: StoryStatus,
        next: StoryStatus,
    ) -> Result<bool>;

    // === Dependency operations ===

    /// Prerequisites of a story (targets of its outgoing edges).
    async fn dependencies_of(&mut self, id: &StoryId) -> Result<Vec<StoryId>>;

    /// Every dependency edge.
    async fn list_dependencies(&mut self) -> Result<Vec<StoryDependency>>;

    /// Persist an edge. Returns `false` if it was already present.
    async fn insert_dependency(&mut self, edge: &StoryDependency) -> Result<bool>;

    // === Transaction support ===

    /// Make all writes of this transaction durable.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard all writes of this transaction.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
