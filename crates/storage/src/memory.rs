//! In-memory storage backend.
//!
//! Suitable for tests and short-lived sessions. A transaction holds the
//! store's lock for its whole lifetime and works on a staged copy of the
//! data, so transactions are serializable and an abandoned transaction
//! leaves no trace.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use backlog_core::{Epic, EpicId, Story, StoryDependency, StoryFilter, StoryId, StoryStatus};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{Result, Storage, Transaction};

#[derive(Debug, Clone, Default)]
struct State {
    epics: BTreeMap<EpicId, Epic>,
    stories: BTreeMap<StoryId, Story>,
    dependencies: BTreeSet<StoryDependency>,
}

/// Thread-safe in-memory storage.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<State>>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, staged }))
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<State>,
    staged: State,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn load_epic(&mut self, id: &EpicId) -> Result<Option<Epic>> {
        Ok(self.staged.epics.get(id).cloned())
    }

    async fn list_epics(&mut self) -> Result<Vec<Epic>> {
        Ok(self.staged.epics.values().cloned().collect())
    }

    async fn save_epic(&mut self, epic: &Epic) -> Result<()> {
        self.staged.epics.insert(epic.id.clone(), epic.clone());
        Ok(())
    }

    async fn load_story(&mut self, id: &StoryId) -> Result<Option<Story>> {
        Ok(self.staged.stories.get(id).cloned())
    }

    async fn list_stories(&mut self, filter: &StoryFilter) -> Result<Vec<Story>> {
        Ok(self
            .staged
            .stories
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect())
    }

    async fn save_story(&mut self, story: &Story) -> Result<()> {
        self.staged.stories.insert(story.id.clone(), story.clone());
        Ok(())
    }

    async fn claim_story(
        &mut self,
        id: &StoryId,
        expected: StoryStatus,
        next: StoryStatus,
    ) -> Result<bool> {
        match self.staged.stories.get_mut(id) {
            Some(story) if story.status == expected => {
                story.set_status(next);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn dependencies_of(&mut self, id: &StoryId) -> Result<Vec<StoryId>> {
        Ok(self
            .staged
            .dependencies
            .iter()
            .filter(|d| &d.story_id == id)
            .map(|d| d.depends_on_id.clone())
            .collect())
    }

    async fn list_dependencies(&mut self) -> Result<Vec<StoryDependency>> {
        Ok(self.staged.dependencies.iter().cloned().collect())
    }

    async fn insert_dependency(&mut self, edge: &StoryDependency) -> Result<bool> {
        Ok(self.staged.dependencies.insert(edge.clone()))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> (MemoryStorage, Epic, Story) {
        let storage = MemoryStorage::new();
        let epic = Epic::new("Epic", "");
        let story = Story::new(epic.id.clone(), "Story", "", 1);

        let mut tx = storage.begin().await.unwrap();
        tx.save_epic(&epic).await.unwrap();
        tx.save_story(&story).await.unwrap();
        tx.commit().await.unwrap();

        (storage, epic, story)
    }

    #[tokio::test]
    async fn test_committed_writes_are_visible() {
        let (storage, epic, story) = seeded().await;

        let mut tx = storage.begin().await.unwrap();
        assert_eq!(tx.load_epic(&epic.id).await.unwrap().unwrap().title, "Epic");
        assert_eq!(tx.load_story(&story.id).await.unwrap().unwrap().title, "Story");
        assert_eq!(tx.list_stories(&StoryFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let (storage, epic, _) = seeded().await;

        let mut tx = storage.begin().await.unwrap();
        tx.save_story(&Story::new(epic.id.clone(), "Other", "", 1)).await.unwrap();
        tx.rollback().await.unwrap();

        let mut tx = storage.begin().await.unwrap();
        assert_eq!(tx.list_stories(&StoryFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes() {
        let (storage, epic, _) = seeded().await;

        {
            let mut tx = storage.begin().await.unwrap();
            tx.save_story(&Story::new(epic.id.clone(), "Other", "", 1)).await.unwrap();
        }

        let mut tx = storage.begin().await.unwrap();
        assert_eq!(tx.list_stories(&StoryFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_claim_is_conditional_on_expected_status() {
        let (storage, _, story) = seeded().await;

        let mut tx = storage.begin().await.unwrap();
        assert!(tx.claim_story(&story.id, StoryStatus::ToDo, StoryStatus::InProgress).await.unwrap());
        assert!(!tx.claim_story(&story.id, StoryStatus::ToDo, StoryStatus::InProgress).await.unwrap());
        assert!(!tx.claim_story(&StoryId::from("missing"), StoryStatus::ToDo, StoryStatus::InProgress).await.unwrap());
        tx.commit().await.unwrap();

        let mut tx = storage.begin().await.unwrap();
        assert_eq!(tx.load_story(&story.id).await.unwrap().unwrap().status, StoryStatus::InProgress);
    }

    #[tokio::test]
    async fn test_duplicate_edge_is_not_inserted_twice() {
        let (storage, epic, story) = seeded().await;
        let other = Story::new(epic.id.clone(), "Other", "", 1);
        let edge = StoryDependency::new(story.id.clone(), other.id.clone());

        let mut tx = storage.begin().await.unwrap();
        assert!(tx.insert_dependency(&edge).await.unwrap());
        assert!(!tx.insert_dependency(&edge).await.unwrap());
        assert_eq!(tx.list_dependencies().await.unwrap().len(), 1);
        assert_eq!(tx.dependencies_of(&story.id).await.unwrap(), vec![other.id.clone()]);
        assert!(tx.dependencies_of(&other.id).await.unwrap().is_empty());
    }
}
