//! Story model - the unit of work handed to developer agents.

use serde::{Deserialize, Serialize};

use crate::fields::{Comment, Criterion, Task};
use crate::id::{EpicId, StoryId};
use crate::lifecycle::StoryStatus;
use crate::Time;

/// A story is an atomic unit of work owned by an epic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    /// Unique identifier
    pub id: StoryId,

    /// Owning epic
    pub epic_id: EpicId,

    /// Story title
    pub title: String,

    /// Detailed description
    pub description: String,

    /// Current status
    pub status: StoryStatus,

    /// Higher is more urgent
    pub priority: i32,

    /// Implementation tasks
    #[serde(default)]
    pub tasks: Vec<Task>,

    /// Acceptance criteria
    #[serde(default)]
    pub acceptance_criteria: Vec<Criterion>,

    /// Append-only discussion
    #[serde(default)]
    pub comments: Vec<Comment>,

    /// Creation timestamp, used as the selection tie-break
    pub created_at: Time,

    /// Last update timestamp
    pub updated_at: Time,
}

impl Story {
    /// Create a ToDo story with empty structured fields.
    pub fn new(
        epic_id: EpicId,
        title: impl Into<String>,
        description: impl Into<String>,
        priority: i32,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: StoryId::new(),
            epic_id,
            title: title.into(),
            description: description.into(),
            status: StoryStatus::ToDo,
            priority,
            tasks: Vec::new(),
            acceptance_criteria: Vec::new(),
            comments: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the status and bump `updated_at`.
    pub fn set_status(&mut self, status: StoryStatus) {
        self.status = status;
        self.updated_at = chrono::Utc::now();
    }

    /// Tasks sorted by their `order` value.
    pub fn tasks_in_order(&self) -> Vec<&Task> {
        let mut tasks: Vec<_> = self.tasks.iter().collect();
        tasks.sort_by_key(|t| t.order);
        tasks
    }

    /// Acceptance criteria sorted by their `order` value.
    pub fn criteria_in_order(&self) -> Vec<&Criterion> {
        let mut criteria: Vec<_> = self.acceptance_criteria.iter().collect();
        criteria.sort_by_key(|c| c.order);
        criteria
    }
}

/// Input for creating a story.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStory {
    /// Optional caller-chosen id
    #[serde(default)]
    pub id: Option<StoryId>,

    /// Owning epic; must exist
    pub epic_id: EpicId,

    /// Story title
    pub title: String,

    /// Description
    #[serde(default)]
    pub description: String,

    /// Priority, higher is more urgent
    #[serde(default)]
    pub priority: i32,

    /// Initial tasks
    #[serde(default)]
    pub tasks: Vec<Task>,

    /// Initial acceptance criteria
    #[serde(default)]
    pub acceptance_criteria: Vec<Criterion>,
}

impl NewStory {
    /// Build the story this input describes. Structured fields are not
    /// validated here.
    pub fn into_story(self) -> Story {
        let mut story = Story::new(self.epic_id, self.title, self.description, self.priority);
        if let Some(id) = self.id {
            story.id = id;
        }
        story.tasks = self.tasks;
        story.acceptance_criteria = self.acceptance_criteria;
        story
    }
}

/// Directed "depends on" edge: `story_id` cannot start until
/// `depends_on_id` is Done.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoryDependency {
    /// Dependent story
    pub story_id: StoryId,

    /// Prerequisite story
    pub depends_on_id: StoryId,
}

impl StoryDependency {
    /// Create an edge.
    pub fn new(story_id: StoryId, depends_on_id: StoryId) -> Self {
        Self { story_id, depends_on_id }
    }
}

/// Which stories an engine operation looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryScope {
    /// Restrict to one epic; `None` means every story.
    pub epic_id: Option<EpicId>,
}

impl StoryScope {
    /// Every story.
    pub fn all() -> Self {
        Self::default()
    }

    /// Stories of one epic.
    pub fn epic(epic_id: EpicId) -> Self {
        Self { epic_id: Some(epic_id) }
    }

    /// Filter for stories of this scope in the given states.
    pub fn with_status(&self, status: &[StoryStatus]) -> StoryFilter {
        StoryFilter {
            epic_id: self.epic_id.clone(),
            status: Some(status.to_vec()),
        }
    }
}

/// Filter for querying stories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryFilter {
    /// Filter by owning epic
    pub epic_id: Option<EpicId>,

    /// Filter by status
    pub status: Option<Vec<StoryStatus>>,
}

impl StoryFilter {
    /// Whether a story passes the filter.
    pub fn matches(&self, story: &Story) -> bool {
        if let Some(epic_id) = &self.epic_id {
            if &story.epic_id != epic_id {
                return false;
            }
        }
        if let Some(statuses) = &self.status {
            if !statuses.contains(&story.status) {
                return false;
            }
        }
        true
    }
}

impl From<StoryScope> for StoryFilter {
    fn from(scope: StoryScope) -> Self {
        Self {
            epic_id: scope.epic_id,
            status: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_story_is_todo() {
        let story = Story::new(EpicId::new(), "Login", "", 3);
        assert_eq!(story.status, StoryStatus::ToDo);
        assert_eq!(story.priority, 3);
        assert!(story.tasks.is_empty());
    }

    #[test]
    fn test_filter_by_epic_and_status() {
        let epic = EpicId::from("e1");
        let mut story = Story::new(epic.clone(), "Login", "", 0);

        let filter = StoryScope::epic(epic.clone()).with_status(&[StoryStatus::ToDo]);
        assert!(filter.matches(&story));

        story.set_status(StoryStatus::Done);
        assert!(!filter.matches(&story));

        let other = StoryScope::epic(EpicId::from("e2")).with_status(&StoryStatus::ALL);
        assert!(!other.matches(&story));
        assert!(StoryFilter::default().matches(&story));
    }

    #[test]
    fn test_tasks_in_order_sorts_by_order_field() {
        let mut story = Story::new(EpicId::new(), "Login", "", 0);
        story.tasks = vec![
            Task::new("b", "second", 20),
            Task::new("a", "first", 10),
        ];
        let ids: Vec<_> = story.tasks_in_order().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_story_deserializes_without_structured_fields() {
        let story = Story::new(EpicId::from("e1"), "Login", "", 0);
        let mut json = serde_json::to_value(&story).unwrap();
        let obj = json.as_object_mut().unwrap();
        obj.remove("tasks");
        obj.remove("comments");
        let back: Story = serde_json::from_value(json).unwrap();
        assert!(back.tasks.is_empty());
        assert!(back.comments.is_empty());
    }
}
