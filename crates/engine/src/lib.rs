//! Backlog engine - dependency graph, readiness selection and the
//! operations built on them.

#![warn(missing_docs)]

pub mod error;
pub mod dependency;
pub mod selector;
pub mod service;

pub use error::{EngineError, ErrorKind, Result};
pub use dependency::{
    BlockedStory, DependencyGraph, DependencyGraphManager, DependencyOutcome, Resolution,
};
pub use selector::{PrioritySelector, ReadinessSelector, StorySelector};
pub use service::{BacklogService, EngineConfig};
