//! Structured collections carried by a story.

use serde::{Deserialize, Serialize};

use crate::normalize_name;
use crate::Time;

/// An implementation task within a story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique within the story
    pub id: String,

    /// What needs doing
    pub description: String,

    /// Whether the task is finished
    #[serde(default)]
    pub completed: bool,

    /// Sort key, unique within the story
    pub order: i32,
}

impl Task {
    /// Create an open task.
    pub fn new(id: impl Into<String>, description: impl Into<String>, order: i32) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            completed: false,
            order,
        }
    }
}

/// A structured acceptance criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    /// Unique within the story
    pub id: String,

    /// The condition to satisfy
    pub description: String,

    /// Whether the criterion is met
    #[serde(default)]
    pub met: bool,

    /// Sort key, unique within the story
    pub order: i32,
}

impl Criterion {
    /// Create an unmet criterion.
    pub fn new(id: impl Into<String>, description: impl Into<String>, order: i32) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            met: false,
            order,
        }
    }
}

/// Who wrote a comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthorRole {
    /// Developer agent
    #[serde(rename = "Developer Agent")]
    DeveloperAgent,
    /// QA agent
    #[serde(rename = "QA Agent")]
    QaAgent,
    /// Scrum master
    #[serde(rename = "Scrum Master")]
    ScrumMaster,
    /// Product owner
    #[serde(rename = "Product Owner")]
    ProductOwner,
    /// Human reviewer
    #[serde(rename = "Human Reviewer")]
    HumanReviewer,
    /// Analyst
    Analyst,
    /// Architect
    Architect,
    /// Orchestrator
    Orchestrator,
}

impl AuthorRole {
    /// All roles.
    pub const ALL: [AuthorRole; 8] = [
        AuthorRole::DeveloperAgent,
        AuthorRole::QaAgent,
        AuthorRole::ScrumMaster,
        AuthorRole::ProductOwner,
        AuthorRole::HumanReviewer,
        AuthorRole::Analyst,
        AuthorRole::Architect,
        AuthorRole::Orchestrator,
    ];

    /// Display name, as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeveloperAgent => "Developer Agent",
            Self::QaAgent => "QA Agent",
            Self::ScrumMaster => "Scrum Master",
            Self::ProductOwner => "Product Owner",
            Self::HumanReviewer => "Human Reviewer",
            Self::Analyst => "Analyst",
            Self::Architect => "Architect",
            Self::Orchestrator => "Orchestrator",
        }
    }
}

impl std::fmt::Display for AuthorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuthorRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize_name(s);
        Self::ALL
            .into_iter()
            .find(|role| normalize_name(role.as_str()) == wanted)
            .ok_or_else(|| s.to_string())
    }
}

/// A comment on a story. Comments are append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Unique within the story
    pub id: String,

    /// Who wrote it
    pub author_role: AuthorRole,

    /// Comment body
    pub content: String,

    /// When it was written
    pub timestamp: Time,

    /// Comment this one answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
}

/// Caller input for a new comment. The role arrives as free text and is
/// checked against [`AuthorRole`] when the comment is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewComment {
    /// Optional caller-chosen id; generated when absent
    #[serde(default)]
    pub id: Option<String>,

    /// Role name, e.g. "QA Agent"
    pub author_role: String,

    /// Comment body
    pub content: String,

    /// Comment this one answers
    #[serde(default)]
    pub reply_to_id: Option<String>,
}

impl NewComment {
    /// Create comment input.
    pub fn new(author_role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: None,
            author_role: author_role.into(),
            content: content.into(),
            reply_to_id: None,
        }
    }

    /// Set an explicit id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Mark as a reply.
    pub fn replying_to(mut self, reply_to_id: impl Into<String>) -> Self {
        self.reply_to_id = Some(reply_to_id.into());
        self
    }
}

/// Payload for creating or updating a story's structured fields.
///
/// `tasks` and `acceptance_criteria` replace the whole collection when
/// present. `comments` are appended.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredFieldsUpdate {
    /// Replacement task list
    #[serde(default)]
    pub tasks: Option<Vec<Task>>,

    /// Replacement acceptance criteria
    #[serde(default)]
    pub acceptance_criteria: Option<Vec<Criterion>>,

    /// Comments to append
    #[serde(default)]
    pub comments: Vec<NewComment>,
}

impl StructuredFieldsUpdate {
    /// Whether the payload changes nothing.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_none() && self.acceptance_criteria.is_none() && self.comments.is_empty()
    }
}
