//! Ready-story selection and the atomic claim.

use std::cmp::Ordering;

use backlog_core::{Story, StoryScope, StoryStatus};
use backlog_storage::{Storage, Transaction};
use tracing::{debug, info, warn};

use crate::dependency::DependencyGraphManager;
use crate::error::{EngineError, Result};

/// Strategy for ordering ready stories. The first story in the order wins.
pub trait StorySelector: Send + Sync {
    /// Compare two candidates; `Less` means `a` should be picked first.
    fn compare(&self, a: &Story, b: &Story) -> Ordering;
}

/// Default selector: highest priority, then oldest, then lowest id.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrioritySelector;

impl StorySelector for PrioritySelector {
    fn compare(&self, a: &Story, b: &Story) -> Ordering {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    }
}

/// Picks the next ready story and moves it to InProgress.
pub struct ReadinessSelector {
    dependencies: DependencyGraphManager,
    selector: Box<dyn StorySelector>,
    claim_attempts: usize,
}

impl ReadinessSelector {
    /// Create a selector with the default ordering and three claim attempts.
    pub fn new() -> Self {
        Self {
            dependencies: DependencyGraphManager::new(),
            selector: Box::new(PrioritySelector),
            claim_attempts: 3,
        }
    }

    /// Use a custom ordering.
    pub fn with_selector(mut self, selector: Box<dyn StorySelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Set how many times a lost claim is retried before giving up.
    pub fn with_claim_attempts(mut self, attempts: usize) -> Self {
        self.claim_attempts = attempts.max(1);
        self
    }

    /// Ordering used to rank candidates.
    pub fn selector(&self) -> &dyn StorySelector {
        self.selector.as_ref()
    }

    /// ToDo stories in scope with every prerequisite Done, best first.
    pub async fn ready_stories(
        &self,
        tx: &mut dyn Transaction,
        scope: &StoryScope,
    ) -> Result<Vec<Story>> {
        let candidates = tx.list_stories(&scope.with_status(&[StoryStatus::ToDo])).await?;

        let mut ready = Vec::with_capacity(candidates.len());
        for story in candidates {
            if self.dependencies.is_blocked(tx, &story.id).await? {
                debug!(story_id = %story.id, "Skipping blocked story");
                continue;
            }
            ready.push(story);
        }

        ready.sort_by(|a, b| self.selector.compare(a, b));
        Ok(ready)
    }

    /// Select the best ready story and claim it.
    ///
    /// Returns `Ok(None)` when nothing is ready. The claim is a conditional
    /// ToDo -> InProgress update; if another caller wins the race the
    /// attempt is rolled back and selection starts over, up to the
    /// configured number of attempts.
    pub async fn claim_next(&self, storage: &dyn Storage, scope: &StoryScope) -> Result<Option<Story>> {
        for attempt in 1..=self.claim_attempts {
            let mut tx = storage.begin().await?;

            let winner = match self.ready_stories(tx.as_mut(), scope).await?.into_iter().next() {
                Some(story) => story,
                None => {
                    tx.rollback().await?;
                    debug!("No ready story");
                    return Ok(None);
                }
            };

            if tx
                .claim_story(&winner.id, StoryStatus::ToDo, StoryStatus::InProgress)
                .await?
            {
                let claimed = tx
                    .load_story(&winner.id)
                    .await?
                    .ok_or_else(|| EngineError::StoryNotFound(winner.id.clone()))?;
                tx.commit().await?;
                info!(story_id = %claimed.id, priority = claimed.priority, "Claimed story");
                return Ok(Some(claimed));
            }

            tx.rollback().await?;
            warn!(story_id = %winner.id, attempt, "Lost claim race, retrying");
        }

        Err(EngineError::Conflict {
            attempts: self.claim_attempts,
        })
    }
}

impl Default for ReadinessSelector {
    fn default() -> Self {
        Self::new()
    }
}
