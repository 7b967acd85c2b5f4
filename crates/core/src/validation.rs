//! Structured field validation.
//!
//! Every write to a story's tasks, acceptance criteria or comments goes
//! through [`StructuredFieldValidator`]. Checks always run over the whole
//! resulting collection, so a change to one item cannot leave the
//! aggregate in a bad state (for example two tasks sharing an order).

use std::collections::HashSet;

use crate::fields::{AuthorRole, Comment, Criterion, NewComment, StructuredFieldsUpdate, Task};
use crate::id::new_item_id;
use crate::story::Story;
use crate::Time;

/// Errors raised when structured fields are malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// An item in a collection breaks a shape rule.
    #[error("invalid {field} item '{item}': {reason}")]
    StructuredField {
        /// Collection name (`tasks`, `acceptance_criteria`, `comments`)
        field: &'static str,
        /// Offending item id (or position when the id is missing)
        item: String,
        /// What is wrong
        reason: String,
    },

    /// A comment names an unknown author role.
    #[error("invalid author role '{0}'")]
    InvalidAuthorRole(String),

    /// A comment replies to a comment that does not exist in the story.
    #[error("comment '{comment_id}' replies to unknown comment '{reply_to_id}'")]
    DanglingReplyReference {
        /// The replying comment
        comment_id: String,
        /// The missing target
        reply_to_id: String,
    },
}

impl ValidationError {
    fn field(field: &'static str, item: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StructuredField {
            field,
            item: item.into(),
            reason: reason.into(),
        }
    }
}

/// Items of an ordered story collection.
trait OrderedItem {
    fn item_id(&self) -> &str;
    fn item_description(&self) -> &str;
    fn item_order(&self) -> i32;
}

impl OrderedItem for Task {
    fn item_id(&self) -> &str {
        &self.id
    }
    fn item_description(&self) -> &str {
        &self.description
    }
    fn item_order(&self) -> i32 {
        self.order
    }
}

impl OrderedItem for Criterion {
    fn item_id(&self) -> &str {
        &self.id
    }
    fn item_description(&self) -> &str {
        &self.description
    }
    fn item_order(&self) -> i32 {
        self.order
    }
}

fn validate_ordered<T: OrderedItem>(field: &'static str, items: &[T]) -> Result<(), ValidationError> {
    let mut ids = HashSet::new();
    let mut orders = HashSet::new();

    for (index, item) in items.iter().enumerate() {
        let id = item.item_id().trim();
        if id.is_empty() {
            return Err(ValidationError::field(field, format!("#{}", index), "id is required"));
        }
        if item.item_description().trim().is_empty() {
            return Err(ValidationError::field(field, id, "description is required"));
        }
        if !ids.insert(id) {
            return Err(ValidationError::field(field, id, "duplicate id"));
        }
        if !orders.insert(item.item_order()) {
            return Err(ValidationError::field(
                field,
                id,
                format!("duplicate order {}", item.item_order()),
            ));
        }
    }

    Ok(())
}

/// Validates the structured collections of a story.
pub struct StructuredFieldValidator;

impl StructuredFieldValidator {
    /// Check a task list.
    pub fn validate_tasks(tasks: &[Task]) -> Result<(), ValidationError> {
        validate_ordered("tasks", tasks)
    }

    /// Check an acceptance criteria list.
    pub fn validate_criteria(criteria: &[Criterion]) -> Result<(), ValidationError> {
        validate_ordered("acceptance_criteria", criteria)
    }

    /// Check a comment thread. A reply must point at a comment that
    /// appears earlier in the thread.
    pub fn validate_comments(comments: &[Comment]) -> Result<(), ValidationError> {
        let mut seen = HashSet::new();

        for (index, comment) in comments.iter().enumerate() {
            let id = comment.id.trim();
            if id.is_empty() {
                return Err(ValidationError::field("comments", format!("#{}", index), "id is required"));
            }
            if comment.content.trim().is_empty() {
                return Err(ValidationError::field("comments", id, "content is required"));
            }
            if let Some(reply_to) = &comment.reply_to_id {
                if !seen.contains(reply_to.trim()) {
                    return Err(ValidationError::DanglingReplyReference {
                        comment_id: id.to_string(),
                        reply_to_id: reply_to.clone(),
                    });
                }
            }
            if !seen.insert(id) {
                return Err(ValidationError::field("comments", id, "duplicate id"));
            }
        }

        Ok(())
    }

    /// Check every structured collection of a story.
    pub fn validate_story(story: &Story) -> Result<(), ValidationError> {
        Self::validate_tasks(&story.tasks)?;
        Self::validate_criteria(&story.acceptance_criteria)?;
        Self::validate_comments(&story.comments)
    }

    /// Turn comment input into a comment appended after `existing`.
    ///
    /// Does not modify `existing`; the caller appends the result once the
    /// whole thread has been re-validated.
    pub fn build_comment(
        existing: &[Comment],
        input: NewComment,
        now: Time,
    ) -> Result<Comment, ValidationError> {
        let author_role: AuthorRole = input
            .author_role
            .parse()
            .map_err(ValidationError::InvalidAuthorRole)?;

        let id = input
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(new_item_id);
        let reply_to_id = input.reply_to_id.map(|r| r.trim().to_string());

        if let Some(reply_to) = &reply_to_id {
            if !existing.iter().any(|c| c.id.trim() == reply_to) {
                return Err(ValidationError::DanglingReplyReference {
                    comment_id: id,
                    reply_to_id: reply_to.clone(),
                });
            }
        }

        Ok(Comment {
            id,
            author_role,
            content: input.content,
            timestamp: now,
            reply_to_id,
        })
    }

    /// Apply a structured update to a story.
    ///
    /// The resulting collections are assembled and validated in full
    /// before anything is written back, so on error the story is left
    /// untouched.
    pub fn apply(
        story: &mut Story,
        update: StructuredFieldsUpdate,
        now: Time,
    ) -> Result<(), ValidationError> {
        let tasks = update.tasks.unwrap_or_else(|| story.tasks.clone());
        let criteria = update
            .acceptance_criteria
            .unwrap_or_else(|| story.acceptance_criteria.clone());

        let mut comments = story.comments.clone();
        for input in update.comments {
            let comment = Self::build_comment(&comments, input, now)?;
            comments.push(comment);
        }

        Self::validate_tasks(&tasks)?;
        Self::validate_criteria(&criteria)?;
        Self::validate_comments(&comments)?;

        story.tasks = tasks;
        story.acceptance_criteria = criteria;
        story.comments = comments;
        story.updated_at = now;
        Ok(())
    }
}
