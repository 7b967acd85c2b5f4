//! Epic model - top-level grouping of stories.

use serde::{Deserialize, Serialize};

use crate::id::EpicId;
use crate::lifecycle::{EpicStatus, StoryStatus};
use crate::story::Story;
use crate::Time;

/// An epic groups related stories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epic {
    /// Unique identifier
    pub id: EpicId,

    /// Epic title
    pub title: String,

    /// Detailed description
    pub description: String,

    /// Current status
    pub status: EpicStatus,

    /// State the epic was in before being put on hold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_from: Option<EpicStatus>,

    /// Creation timestamp
    pub created_at: Time,

    /// Last update timestamp
    pub updated_at: Time,
}

impl Epic {
    /// Create a draft epic.
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: EpicId::new(),
            title: title.into(),
            description: description.into(),
            status: EpicStatus::Draft,
            paused_from: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Drive the epic state machine to `target`.
    ///
    /// Returns `true` if the status changed.
    pub fn transition_to(&mut self, target: EpicStatus) -> bool {
        let (status, paused_from) = self.status.transition(self.paused_from, target);
        let changed = status != self.status;
        self.status = status;
        self.paused_from = paused_from;
        if changed {
            self.updated_at = chrono::Utc::now();
        }
        changed
    }
}

/// Input for creating an epic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewEpic {
    /// Optional caller-chosen id
    #[serde(default)]
    pub id: Option<EpicId>,

    /// Epic title
    pub title: String,

    /// Description
    #[serde(default)]
    pub description: String,
}

impl NewEpic {
    /// Build the epic this input describes.
    pub fn into_epic(self) -> Epic {
        let mut epic = Epic::new(self.title, self.description);
        if let Some(id) = self.id {
            epic.id = id;
        }
        epic
    }
}

/// Read-only summary of an epic's stories.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpicProgress {
    /// Stories in ToDo
    pub todo: usize,
    /// Stories in progress
    pub in_progress: usize,
    /// Stories under review
    pub review: usize,
    /// Stories done
    pub done: usize,
    /// Percentage of stories done (0-100)
    pub percentage: f32,
}

impl EpicProgress {
    /// Tally the given stories.
    pub fn from_stories<'a>(stories: impl IntoIterator<Item = &'a Story>) -> Self {
        let mut progress = Self::default();
        for story in stories {
            match story.status {
                StoryStatus::ToDo => progress.todo += 1,
                StoryStatus::InProgress => progress.in_progress += 1,
                StoryStatus::Review => progress.review += 1,
                StoryStatus::Done => progress.done += 1,
            }
        }

        let total = progress.total();
        if total > 0 {
            progress.percentage = progress.done as f32 * 100.0 / total as f32;
        }
        progress
    }

    /// Total number of stories counted.
    pub fn total(&self) -> usize {
        self.todo + self.in_progress + self.review + self.done
    }
}
