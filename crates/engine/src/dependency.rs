//! Dependency graph management for stories.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use backlog_core::{Story, StoryDependency, StoryId};
use backlog_storage::Transaction;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{EngineError, Result};

/// Result of dependency resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Resolution {
    /// All dependencies satisfied, ready to start
    Ready,
    /// Blocked by these prerequisites
    Blocked(Vec<StoryId>),
}

impl Resolution {
    /// Whether at least one prerequisite is incomplete.
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked(_))
    }
}

/// Outcome of adding an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DependencyOutcome {
    /// The edge was persisted
    Added,
    /// The edge already existed; nothing changed
    AlreadyPresent,
}

/// A ToDo story together with the prerequisites it is waiting on.
#[derive(Debug, Clone, Serialize)]
pub struct BlockedStory {
    /// The blocked story
    pub story: Story,
    /// Prerequisites that are not Done (or no longer exist)
    pub waiting_on: Vec<StoryId>,
}

/// Owns the "depends on" relation between stories.
///
/// Holds no state; every call reads the edge set through the supplied
/// transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyGraphManager;

impl DependencyGraphManager {
    /// Create a new manager.
    pub fn new() -> Self {
        Self
    }

    /// Add the edge `story_id -> depends_on_id`.
    ///
    /// Both stories must exist and be distinct, and the edge must not close
    /// a cycle. Adding an edge that already exists is a no-op. Nothing is
    /// written unless every check passes.
    pub async fn add_dependency(
        &self,
        tx: &mut dyn Transaction,
        story_id: &StoryId,
        depends_on_id: &StoryId,
    ) -> Result<DependencyOutcome> {
        for id in [story_id, depends_on_id] {
            if tx.load_story(id).await?.is_none() {
                return Err(EngineError::StoryNotFound(id.clone()));
            }
        }

        if story_id == depends_on_id {
            return Err(EngineError::SelfDependency(story_id.clone()));
        }

        let graph = self.load_graph(tx).await?;
        if graph.has_edge(story_id, depends_on_id) {
            debug!(%story_id, %depends_on_id, "Dependency already present");
            return Ok(DependencyOutcome::AlreadyPresent);
        }

        // The new edge closes a cycle iff the prerequisite already reaches
        // the dependent.
        if let Some(back) = graph.path(depends_on_id, story_id) {
            let mut path = Vec::with_capacity(back.len() + 1);
            path.push(story_id.clone());
            path.extend(back);
            debug!(%story_id, %depends_on_id, ?path, "Rejected cyclic dependency");
            return Err(EngineError::CircularDependency {
                story_id: story_id.clone(),
                depends_on_id: depends_on_id.clone(),
                path,
            });
        }

        let edge = StoryDependency::new(story_id.clone(), depends_on_id.clone());
        if !tx.insert_dependency(&edge).await? {
            return Ok(DependencyOutcome::AlreadyPresent);
        }

        info!(%story_id, %depends_on_id, "Added dependency");
        Ok(DependencyOutcome::Added)
    }

    /// Check whether a story's prerequisites are all Done.
    ///
    /// A prerequisite that no longer exists counts as blocking.
    pub async fn check(&self, tx: &mut dyn Transaction, story_id: &StoryId) -> Result<Resolution> {
        let mut blocked = Vec::new();

        for dep_id in tx.dependencies_of(story_id).await? {
            let done = match tx.load_story(&dep_id).await? {
                Some(dep) => dep.status.is_done(),
                None => false,
            };
            if !done {
                blocked.push(dep_id);
            }
        }

        if blocked.is_empty() {
            Ok(Resolution::Ready)
        } else {
            Ok(Resolution::Blocked(blocked))
        }
    }

    /// True if any prerequisite of the story is not Done.
    pub async fn is_blocked(&self, tx: &mut dyn Transaction, story_id: &StoryId) -> Result<bool> {
        Ok(self.check(tx, story_id).await?.is_blocked())
    }

    /// Snapshot the edge set as an adjacency structure.
    pub async fn load_graph(&self, tx: &mut dyn Transaction) -> Result<DependencyGraph> {
        Ok(DependencyGraph::from_edges(tx.list_dependencies().await?))
    }
}

/// An in-memory view of the dependency edges, valid for one transaction.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// story -> [prerequisites]
    graph: HashMap<StoryId, Vec<StoryId>>,
    /// story -> [dependents]
    reverse: HashMap<StoryId, Vec<StoryId>>,
}

impl DependencyGraph {
    /// Build from an edge list.
    pub fn from_edges(edges: impl IntoIterator<Item = StoryDependency>) -> Self {
        let mut graph: HashMap<StoryId, Vec<StoryId>> = HashMap::new();
        let mut reverse: HashMap<StoryId, Vec<StoryId>> = HashMap::new();

        for edge in edges {
            reverse
                .entry(edge.depends_on_id.clone())
                .or_default()
                .push(edge.story_id.clone());
            graph.entry(edge.story_id).or_default().push(edge.depends_on_id);
        }

        Self { graph, reverse }
    }

    /// Prerequisites of a story.
    pub fn dependencies_of(&self, id: &StoryId) -> &[StoryId] {
        self.graph.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Stories that depend on `id`.
    pub fn dependents_of(&self, id: &StoryId) -> &[StoryId] {
        self.reverse.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Whether the edge `from -> to` exists.
    pub fn has_edge(&self, from: &StoryId, to: &StoryId) -> bool {
        self.dependencies_of(from).contains(to)
    }

    /// Find a path `from -> ... -> to` following depends-on edges.
    ///
    /// Depth-first with a visited set, so each node and edge is looked at
    /// once.
    pub fn path(&self, from: &StoryId, to: &StoryId) -> Option<Vec<StoryId>> {
        let mut visited: HashSet<&StoryId> = HashSet::new();
        let mut parent: HashMap<&StoryId, &StoryId> = HashMap::new();
        let mut stack = vec![from];

        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            if node == to {
                let mut path = vec![node.clone()];
                let mut cursor = node;
                while let Some(&prev) = parent.get(cursor) {
                    path.push(prev.clone());
                    cursor = prev;
                }
                path.reverse();
                return Some(path);
            }
            for next in self.dependencies_of(node) {
                if !visited.contains(next) {
                    parent.entry(next).or_insert(node);
                    stack.push(next);
                }
            }
        }

        None
    }

    /// Order `stories` so every prerequisite comes before its dependents.
    ///
    /// Edges to stories outside the given set are ignored. Among stories
    /// whose prerequisites are already placed, `tie` picks the next one.
    pub fn topological_sort(
        &self,
        stories: Vec<Story>,
        tie: impl Fn(&Story, &Story) -> Ordering,
    ) -> Vec<Story> {
        let ids: HashSet<StoryId> = stories.iter().map(|s| s.id.clone()).collect();
        let mut pending: HashMap<StoryId, usize> = stories
            .iter()
            .map(|s| {
                let count = self
                    .dependencies_of(&s.id)
                    .iter()
                    .filter(|d| ids.contains(*d))
                    .count();
                (s.id.clone(), count)
            })
            .collect();

        let mut by_id: HashMap<StoryId, Story> =
            stories.into_iter().map(|s| (s.id.clone(), s)).collect();
        let mut ready: Vec<Story> = Vec::new();
        let start: Vec<StoryId> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| id.clone())
            .collect();
        for id in start {
            if let Some(story) = by_id.remove(&id) {
                ready.push(story);
            }
        }

        let mut sorted = Vec::with_capacity(ids.len());
        while !ready.is_empty() {
            ready.sort_by(|a, b| tie(a, b));
            let story = ready.remove(0);

            for dependent in self.dependents_of(&story.id) {
                if let Some(count) = pending.get_mut(dependent) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        if let Some(next) = by_id.remove(dependent) {
                            ready.push(next);
                        }
                    }
                }
            }
            sorted.push(story);
        }

        // Anything left sits on a cycle; the edge checks keep this from
        // happening, but do not drop stories if the store was edited by hand.
        let mut rest: Vec<Story> = by_id.into_values().collect();
        rest.sort_by(|a, b| tie(a, b));
        sorted.extend(rest);
        sorted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backlog_core::{EpicId, StoryStatus};
    use backlog_storage::{MemoryStorage, Storage};

    fn edge(a: &str, b: &str) -> StoryDependency {
        StoryDependency::new(StoryId::from(a), StoryId::from(b))
    }

    fn story(id: &str, status: StoryStatus) -> Story {
        let mut s = Story::new(EpicId::from("e"), id, "", 0);
        s.id = StoryId::from(id);
        s.status = status;
        s
    }

    async fn storage_with(stories: &[Story]) -> MemoryStorage {
        let storage = MemoryStorage::new();
        let mut tx = storage.begin().await.unwrap();
        for s in stories {
            tx.save_story(s).await.unwrap();
        }
        tx.commit().await.unwrap();
        storage
    }

    #[test]
    fn test_path_follows_edges() {
        let graph = DependencyGraph::from_edges(vec![edge("a", "b"), edge("b", "c"), edge("x", "c")]);
        let path = graph.path(&StoryId::from("a"), &StoryId::from("c")).unwrap();
        assert_eq!(path, vec![StoryId::from("a"), StoryId::from("b"), StoryId::from("c")]);
        assert!(graph.path(&StoryId::from("c"), &StoryId::from("a")).is_none());
        assert!(graph.path(&StoryId::from("a"), &StoryId::from("x")).is_none());
    }

    #[test]
    fn test_path_handles_diamonds() {
        let graph = DependencyGraph::from_edges(vec![
            edge("a", "b"),
            edge("a", "c"),
            edge("b", "d"),
            edge("c", "d"),
        ]);
        let path = graph.path(&StoryId::from("a"), &StoryId::from("d")).unwrap();
        assert_eq!(path.first(), Some(&StoryId::from("a")));
        assert_eq!(path.last(), Some(&StoryId::from("d")));
        assert_eq!(path.len(), 3);
    }

    #[test]
    fn test_topological_sort_puts_prerequisites_first() {
        let graph = DependencyGraph::from_edges(vec![edge("a", "b"), edge("b", "c")]);
        let stories = vec![
            story("a", StoryStatus::ToDo),
            story("b", StoryStatus::ToDo),
            story("c", StoryStatus::ToDo),
            story("z", StoryStatus::ToDo),
        ];

        let sorted = graph.topological_sort(stories, |a, b| a.id.cmp(&b.id));
        let ids: Vec<_> = sorted.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a", "z"]);
    }

    #[tokio::test]
    async fn test_add_dependency_then_reverse_is_cycle() {
        let storage = storage_with(&[story("A", StoryStatus::ToDo), story("B", StoryStatus::ToDo)]).await;
        let manager = DependencyGraphManager::new();
        let (a, b) = (StoryId::from("A"), StoryId::from("B"));

        let mut tx = storage.begin().await.unwrap();
        assert_eq!(manager.add_dependency(tx.as_mut(), &a, &b).await.unwrap(), DependencyOutcome::Added);
        tx.commit().await.unwrap();

        let mut tx = storage.begin().await.unwrap();
        let err = manager.add_dependency(tx.as_mut(), &b, &a).await.unwrap_err();
        match err {
            EngineError::CircularDependency { path, .. } => {
                assert_eq!(path, vec![b.clone(), a.clone(), b.clone()]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
        drop(tx);

        let mut tx = storage.begin().await.unwrap();
        assert_eq!(tx.list_dependencies().await.unwrap(), vec![StoryDependency::new(a, b)]);
    }

    #[tokio::test]
    async fn test_long_cycle_is_rejected() {
        let stories: Vec<_> = ["a", "b", "c", "d"].iter().map(|id| story(id, StoryStatus::ToDo)).collect();
        let storage = storage_with(&stories).await;
        let manager = DependencyGraphManager::new();

        let mut tx = storage.begin().await.unwrap();
        for (from, to) in [("a", "b"), ("b", "c"), ("c", "d")] {
            manager
                .add_dependency(tx.as_mut(), &StoryId::from(from), &StoryId::from(to))
                .await
                .unwrap();
        }
        let err = manager
            .add_dependency(tx.as_mut(), &StoryId::from("d"), &StoryId::from("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CircularDependency { .. }));
        assert_eq!(tx.list_dependencies().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_self_and_missing_stories_are_rejected() {
        let storage = storage_with(&[story("A", StoryStatus::ToDo)]).await;
        let manager = DependencyGraphManager::new();
        let a = StoryId::from("A");

        let mut tx = storage.begin().await.unwrap();
        assert!(matches!(
            manager.add_dependency(tx.as_mut(), &a, &a).await,
            Err(EngineError::SelfDependency(_))
        ));
        assert!(matches!(
            manager.add_dependency(tx.as_mut(), &a, &StoryId::from("ghost")).await,
            Err(EngineError::StoryNotFound(id)) if id.as_str() == "ghost"
        ));
        assert!(tx.list_dependencies().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_edge_is_idempotent() {
        let storage = storage_with(&[story("A", StoryStatus::ToDo), story("B", StoryStatus::ToDo)]).await;
        let manager = DependencyGraphManager::new();
        let (a, b) = (StoryId::from("A"), StoryId::from("B"));

        let mut tx = storage.begin().await.unwrap();
        manager.add_dependency(tx.as_mut(), &a, &b).await.unwrap();
        assert_eq!(
            manager.add_dependency(tx.as_mut(), &a, &b).await.unwrap(),
            DependencyOutcome::AlreadyPresent
        );
        assert_eq!(tx.list_dependencies().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_blocked_until_prerequisite_done() {
        let storage = storage_with(&[story("A", StoryStatus::ToDo), story("B", StoryStatus::ToDo)]).await;
        let manager = DependencyGraphManager::new();
        let (a, b) = (StoryId::from("A"), StoryId::from("B"));

        let mut tx = storage.begin().await.unwrap();
        manager.add_dependency(tx.as_mut(), &a, &b).await.unwrap();
        assert_eq!(manager.check(tx.as_mut(), &a).await.unwrap(), Resolution::Blocked(vec![b.clone()]));
        assert!(!manager.is_blocked(tx.as_mut(), &b).await.unwrap());

        let mut prerequisite = tx.load_story(&b).await.unwrap().unwrap();
        prerequisite.status = StoryStatus::Review;
        tx.save_story(&prerequisite).await.unwrap();
        assert!(manager.is_blocked(tx.as_mut(), &a).await.unwrap());

        prerequisite.status = StoryStatus::Done;
        tx.save_story(&prerequisite).await.unwrap();
        assert_eq!(manager.check(tx.as_mut(), &a).await.unwrap(), Resolution::Ready);
    }

    #[tokio::test]
    async fn test_missing_prerequisite_blocks() {
        let storage = storage_with(&[story("A", StoryStatus::ToDo)]).await;
        let mut tx = storage.begin().await.unwrap();
        tx.insert_dependency(&edge("A", "gone")).await.unwrap();

        let manager = DependencyGraphManager::new();
        assert!(manager.is_blocked(tx.as_mut(), &StoryId::from("A")).await.unwrap());
    }
}
