//! The backlog service: every operation the engine exposes.
//!
//! Each call opens its own transaction on the injected store, does its
//! reads and writes through it, and commits only on success.

use backlog_core::{
    Criterion, Epic, EpicId, EpicProgress, EpicStatus, NewComment, NewEpic, NewStory, Story,
    StoryFilter, StoryId, StoryScope, StoryStatus, StructuredFieldValidator,
    StructuredFieldsUpdate, Task,
};
use backlog_storage::Storage;
use tracing::{debug, info};

use crate::dependency::{BlockedStory, DependencyGraphManager, DependencyOutcome, Resolution};
use crate::error::{EngineError, Result};
use crate::selector::{ReadinessSelector, StorySelector};

/// Configuration for the backlog service.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How many times a lost claim is retried before reporting a conflict
    pub claim_attempts: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { claim_attempts: 3 }
    }
}

/// Backlog operations over a transactional store.
pub struct BacklogService<S: Storage> {
    storage: S,
    dependencies: DependencyGraphManager,
    selector: ReadinessSelector,
    config: EngineConfig,
}

impl<S: Storage> BacklogService<S> {
    /// Create a service with the default configuration.
    pub fn new(storage: S) -> Self {
        let config = EngineConfig::default();
        Self {
            storage,
            dependencies: DependencyGraphManager::new(),
            selector: ReadinessSelector::new().with_claim_attempts(config.claim_attempts),
            config,
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, mut config: EngineConfig) -> Self {
        config.claim_attempts = config.claim_attempts.max(1);
        self.selector = self.selector.with_claim_attempts(config.claim_attempts);
        self.config = config;
        self
    }

    /// Set the story ordering used by selection.
    pub fn with_selector(mut self, selector: Box<dyn StorySelector>) -> Self {
        self.selector = self.selector.with_selector(selector);
        self
    }

    /// The underlying store.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Current configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // === Epics ===

    /// Create an epic in Draft.
    pub async fn create_epic(&self, input: NewEpic) -> Result<Epic> {
        let epic = input.into_epic();
        let mut tx = self.storage.begin().await?;

        if tx.load_epic(&epic.id).await?.is_some() {
            return Err(EngineError::DuplicateId(epic.id.to_string()));
        }

        tx.save_epic(&epic).await?;
        tx.commit().await?;
        info!(epic_id = %epic.id, title = %epic.title, "Created epic");
        Ok(epic)
    }

    /// Fetch an epic.
    pub async fn get_epic(&self, id: &EpicId) -> Result<Epic> {
        let mut tx = self.storage.begin().await?;
        tx.load_epic(id)
            .await?
            .ok_or_else(|| EngineError::EpicNotFound(id.clone()))
    }

    /// All epics.
    pub async fn list_epics(&self) -> Result<Vec<Epic>> {
        let mut tx = self.storage.begin().await?;
        Ok(tx.list_epics().await?)
    }

    /// Move an epic to the named status.
    pub async fn update_epic_status(&self, id: &EpicId, status: &str) -> Result<Epic> {
        let target: EpicStatus = status.parse()?;
        let mut tx = self.storage.begin().await?;

        let mut epic = tx
            .load_epic(id)
            .await?
            .ok_or_else(|| EngineError::EpicNotFound(id.clone()))?;
        let from = epic.status;

        if epic.transition_to(target) {
            tx.save_epic(&epic).await?;
            tx.commit().await?;
            info!(epic_id = %id, %from, to = %epic.status, "Epic status changed");
        } else {
            debug!(epic_id = %id, status = %epic.status, "Epic status unchanged");
        }
        Ok(epic)
    }

    /// Story counts by status for one epic.
    pub async fn epic_progress(&self, id: &EpicId) -> Result<EpicProgress> {
        let mut tx = self.storage.begin().await?;
        if tx.load_epic(id).await?.is_none() {
            return Err(EngineError::EpicNotFound(id.clone()));
        }

        let stories = tx.list_stories(&StoryScope::epic(id.clone()).into()).await?;
        Ok(EpicProgress::from_stories(&stories))
    }

    // === Stories ===

    /// Create a story in ToDo under an existing epic.
    pub async fn create_story(&self, input: NewStory) -> Result<Story> {
        let story = input.into_story();
        StructuredFieldValidator::validate_story(&story)?;

        let mut tx = self.storage.begin().await?;
        if tx.load_epic(&story.epic_id).await?.is_none() {
            return Err(EngineError::EpicNotFound(story.epic_id.clone()));
        }
        if tx.load_story(&story.id).await?.is_some() {
            return Err(EngineError::DuplicateId(story.id.to_string()));
        }

        tx.save_story(&story).await?;
        tx.commit().await?;
        info!(story_id = %story.id, epic_id = %story.epic_id, priority = story.priority, "Created story");
        Ok(story)
    }

    /// Fetch a story.
    pub async fn get_story(&self, id: &StoryId) -> Result<Story> {
        let mut tx = self.storage.begin().await?;
        tx.load_story(id)
            .await?
            .ok_or_else(|| EngineError::StoryNotFound(id.clone()))
    }

    /// Stories matching a filter.
    pub async fn list_stories(&self, filter: &StoryFilter) -> Result<Vec<Story>> {
        let mut tx = self.storage.begin().await?;
        Ok(tx.list_stories(filter).await?)
    }

    /// Set a story's status. Any of the four states may be named.
    pub async fn update_story_status(&self, id: &StoryId, status: &str) -> Result<Story> {
        let target: StoryStatus = status.parse()?;
        let mut tx = self.storage.begin().await?;

        let mut story = tx
            .load_story(id)
            .await?
            .ok_or_else(|| EngineError::StoryNotFound(id.clone()))?;
        let from = story.status;

        if from != target {
            story.set_status(target);
            tx.save_story(&story).await?;
            tx.commit().await?;
            info!(story_id = %id, %from, to = %target, "Story status changed");
        }
        Ok(story)
    }

    // === Dependencies ===

    /// Record that `story_id` cannot start until `depends_on_id` is Done.
    pub async fn add_dependency(
        &self,
        story_id: &StoryId,
        depends_on_id: &StoryId,
    ) -> Result<DependencyOutcome> {
        let mut tx = self.storage.begin().await?;
        let outcome = self
            .dependencies
            .add_dependency(tx.as_mut(), story_id, depends_on_id)
            .await?;

        match outcome {
            DependencyOutcome::Added => tx.commit().await?,
            DependencyOutcome::AlreadyPresent => tx.rollback().await?,
        }
        Ok(outcome)
    }

    /// Direct prerequisites of a story.
    pub async fn dependencies_of(&self, id: &StoryId) -> Result<Vec<StoryId>> {
        let mut tx = self.storage.begin().await?;
        if tx.load_story(id).await?.is_none() {
            return Err(EngineError::StoryNotFound(id.clone()));
        }
        Ok(tx.dependencies_of(id).await?)
    }

    /// Whether a story's prerequisites are all Done.
    pub async fn check_dependencies(&self, id: &StoryId) -> Result<Resolution> {
        let mut tx = self.storage.begin().await?;
        if tx.load_story(id).await?.is_none() {
            return Err(EngineError::StoryNotFound(id.clone()));
        }
        self.dependencies.check(tx.as_mut(), id).await
    }

    /// ToDo stories in scope that are waiting on prerequisites.
    pub async fn blocked_stories(&self, scope: &StoryScope) -> Result<Vec<BlockedStory>> {
        let mut tx = self.storage.begin().await?;
        let mut candidates = tx.list_stories(&scope.with_status(&[StoryStatus::ToDo])).await?;
        candidates.sort_by(|a, b| self.selector.selector().compare(a, b));

        let mut blocked = Vec::new();
        for story in candidates {
            if let Resolution::Blocked(waiting_on) = self.dependencies.check(tx.as_mut(), &story.id).await? {
                blocked.push(BlockedStory { story, waiting_on });
            }
        }
        Ok(blocked)
    }

    /// Stories in scope ordered so prerequisites come first.
    pub async fn dependency_plan(&self, scope: &StoryScope) -> Result<Vec<Story>> {
        let mut tx = self.storage.begin().await?;
        let stories = tx.list_stories(&scope.clone().into()).await?;
        let graph = self.dependencies.load_graph(tx.as_mut()).await?;

        let selector = self.selector.selector();
        Ok(graph.topological_sort(stories, |a, b| selector.compare(a, b)))
    }

    // === Readiness ===

    /// Claim the best ready story in scope, moving it to InProgress.
    ///
    /// `Ok(None)` means nothing is ready.
    pub async fn next_ready_story(&self, scope: &StoryScope) -> Result<Option<Story>> {
        self.selector.claim_next(&self.storage, scope).await
    }

    /// The ready stories in scope, in selection order, without claiming.
    pub async fn list_ready_stories(&self, scope: &StoryScope) -> Result<Vec<Story>> {
        let mut tx = self.storage.begin().await?;
        self.selector.ready_stories(tx.as_mut(), scope).await
    }

    // === Structured fields ===

    /// Replace tasks and/or criteria and append comments, validating the
    /// resulting collections as a whole.
    pub async fn update_structured_fields(
        &self,
        id: &StoryId,
        update: StructuredFieldsUpdate,
    ) -> Result<Story> {
        self.mutate_story(id, |story| update_with(story, update)).await
    }

    /// Mark one task done or not done.
    pub async fn set_task_completed(&self, id: &StoryId, task_id: &str, completed: bool) -> Result<Story> {
        self.mutate_story(id, |story| {
            let mut tasks = story.tasks.clone();
            let task = tasks
                .iter_mut()
                .find(|t| t.id == task_id)
                .ok_or_else(|| item_not_found(story, "tasks", task_id))?;
            task.completed = completed;

            update_with(story, StructuredFieldsUpdate {
                tasks: Some(tasks),
                ..Default::default()
            })
        })
        .await
    }

    /// Mark one acceptance criterion met or unmet.
    pub async fn set_criterion_met(&self, id: &StoryId, criterion_id: &str, met: bool) -> Result<Story> {
        self.mutate_story(id, |story| {
            let mut criteria = story.acceptance_criteria.clone();
            let criterion = criteria
                .iter_mut()
                .find(|c| c.id == criterion_id)
                .ok_or_else(|| item_not_found(story, "acceptance_criteria", criterion_id))?;
            criterion.met = met;

            update_with(story, StructuredFieldsUpdate {
                acceptance_criteria: Some(criteria),
                ..Default::default()
            })
        })
        .await
    }

    /// Insert a task, or replace the task with the same id.
    pub async fn upsert_task(&self, id: &StoryId, task: Task) -> Result<Story> {
        self.mutate_story(id, |story| {
            let mut tasks = story.tasks.clone();
            match tasks.iter_mut().find(|t| t.id == task.id) {
                Some(existing) => *existing = task,
                None => tasks.push(task),
            }

            update_with(story, StructuredFieldsUpdate {
                tasks: Some(tasks),
                ..Default::default()
            })
        })
        .await
    }

    /// Insert a criterion, or replace the criterion with the same id.
    pub async fn upsert_criterion(&self, id: &StoryId, criterion: Criterion) -> Result<Story> {
        self.mutate_story(id, |story| {
            let mut criteria = story.acceptance_criteria.clone();
            match criteria.iter_mut().find(|c| c.id == criterion.id) {
                Some(existing) => *existing = criterion,
                None => criteria.push(criterion),
            }

            update_with(story, StructuredFieldsUpdate {
                acceptance_criteria: Some(criteria),
                ..Default::default()
            })
        })
        .await
    }

    /// Append a comment to a story's thread.
    pub async fn add_comment(&self, id: &StoryId, comment: NewComment) -> Result<Story> {
        self.mutate_story(id, |story| {
            update_with(story, StructuredFieldsUpdate {
                comments: vec![comment],
                ..Default::default()
            })
        })
        .await
    }

    /// Load a story, change it, and save it in one transaction. Nothing is
    /// written if `change` fails.
    async fn mutate_story<F>(&self, id: &StoryId, change: F) -> Result<Story>
    where
        F: FnOnce(&mut Story) -> Result<()> + Send,
    {
        let mut tx = self.storage.begin().await?;
        let mut story = tx
            .load_story(id)
            .await?
            .ok_or_else(|| EngineError::StoryNotFound(id.clone()))?;

        change(&mut story)?;

        tx.save_story(&story).await?;
        tx.commit().await?;
        debug!(story_id = %id, "Updated structured fields");
        Ok(story)
    }
}

fn update_with(story: &mut Story, update: StructuredFieldsUpdate) -> Result<()> {
    StructuredFieldValidator::apply(story, update, chrono::Utc::now())?;
    Ok(())
}

fn item_not_found(story: &Story, field: &'static str, item: &str) -> EngineError {
    EngineError::ItemNotFound {
        story_id: story.id.clone(),
        field,
        item: item.to_string(),
    }
}
