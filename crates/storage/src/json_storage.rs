//! JSON file storage implementation.
//!
//! Stores one JSON file per epic and story in a `.backlog`-style directory,
//! the dependency edge list in `dependencies.json`, and small per-object
//! meta markers (version + updated_at). Writes are staged in the
//! transaction and flushed on commit.
//!
//! A transaction holds an exclusive advisory lock on `<root>/.lock` from
//! `begin` until commit or rollback, so separate `JsonStorage` instances
//! and separate processes over one directory take turns. Within one
//! instance an async mutex queues transactions before they reach the
//! file lock.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use backlog_core::{Epic, EpicId, Story, StoryDependency, StoryFilter, StoryId, StoryStatus};
use fs2::FileExt;
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use super::{Result, Storage, StorageError, Transaction};

const DEPENDENCIES_FILE: &str = "dependencies.json";
const LOCK_FILE: &str = ".lock";

/// File-based JSON storage backend.
#[derive(Clone)]
pub struct JsonStorage {
    root: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl JsonStorage {
    /// Create storage rooted at `root`, creating the directory layout.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("epics")).await?;
        fs::create_dir_all(root.join("stories")).await?;
        fs::create_dir_all(root.join("meta").join("epics")).await?;
        fs::create_dir_all(root.join("meta").join("stories")).await?;

        Ok(Self {
            root,
            lock: Arc::new(Mutex::new(())),
        })
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Storage for JsonStorage {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let guard = self.lock.clone().lock_owned().await;
        let dir_lock = DirLock::acquire(&self.root).await?;
        Ok(Box::new(JsonTransaction {
            root: self.root.clone(),
            _guard: guard,
            _dir_lock: dir_lock,
            epics: BTreeMap::new(),
            stories: BTreeMap::new(),
            dependencies: None,
            dependencies_dirty: false,
        }))
    }
}

/// Exclusive lock on the store directory, released on drop.
struct DirLock {
    file: File,
}

impl DirLock {
    async fn acquire(root: &Path) -> Result<Self> {
        let path = root.join(LOCK_FILE);
        tokio::task::spawn_blocking(move || -> Result<Self> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?;
            FileExt::lock_exclusive(&file)?;
            Ok(Self { file })
        })
        .await
        .map_err(|e| StorageError::Other(format!("lock task failed: {}", e)))?
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(error = %e, "Failed to release store lock");
        }
    }
}

struct JsonTransaction {
    root: PathBuf,
    // Field order matters: the file lock is released before the mutex.
    _dir_lock: DirLock,
    _guard: OwnedMutexGuard<()>,
    epics: BTreeMap<EpicId, Epic>,
    stories: BTreeMap<StoryId, Story>,
    dependencies: Option<BTreeSet<StoryDependency>>,
    dependencies_dirty: bool,
}

impl JsonTransaction {
    fn epic_path(&self, id: &EpicId) -> Result<PathBuf> {
        Ok(self.root.join("epics").join(file_name(id.as_str())?))
    }

    fn story_path(&self, id: &StoryId) -> Result<PathBuf> {
        Ok(self.root.join("stories").join(file_name(id.as_str())?))
    }

    fn meta_path(&self, kind: &str, id: &str) -> Result<PathBuf> {
        file_name(id)?;
        Ok(self.root.join("meta").join(kind).join(format!("{}.meta.json", id)))
    }

    async fn edges(&mut self) -> Result<&mut BTreeSet<StoryDependency>> {
        if self.dependencies.is_none() {
            let path = self.root.join(DEPENDENCIES_FILE);
            let edges: Vec<StoryDependency> = read_json(&path).await?.unwrap_or_default();
            self.dependencies = Some(edges.into_iter().collect());
        }
        Ok(self.dependencies.get_or_insert_with(BTreeSet::new))
    }

    /// Read and increment per-object version, return new version.
    async fn bump_version(&self, kind: &str, id: &str) -> Result<u64> {
        let path = self.meta_path(kind, id)?;
        let mut version = 0u64;
        if let Ok(s) = fs::read_to_string(&path).await {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(&s) {
                if let Some(v) = json.get("version").and_then(|v| v.as_u64()) {
                    version = v;
                }
            }
        }
        version += 1;
        let meta = serde_json::json!({"version": version, "updated_at": chrono::Utc::now()});
        write_json(&path, &meta).await?;
        Ok(version)
    }
}

#[async_trait]
impl Transaction for JsonTransaction {
    async fn load_epic(&mut self, id: &EpicId) -> Result<Option<Epic>> {
        if let Some(epic) = self.epics.get(id) {
            return Ok(Some(epic.clone()));
        }
        read_json(&self.epic_path(id)?).await
    }

    async fn list_epics(&mut self) -> Result<Vec<Epic>> {
        let mut all: BTreeMap<EpicId, Epic> = list_dir(&self.root.join("epics"))
            .await?
            .into_iter()
            .map(|e: Epic| (e.id.clone(), e))
            .collect();
        all.extend(self.epics.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(all.into_values().collect())
    }

    async fn save_epic(&mut self, epic: &Epic) -> Result<()> {
        self.epic_path(&epic.id)?;
        self.epics.insert(epic.id.clone(), epic.clone());
        Ok(())
    }

    async fn load_story(&mut self, id: &StoryId) -> Result<Option<Story>> {
        if let Some(story) = self.stories.get(id) {
            return Ok(Some(story.clone()));
        }
        read_json(&self.story_path(id)?).await
    }

    async fn list_stories(&mut self, filter: &StoryFilter) -> Result<Vec<Story>> {
        let mut all: BTreeMap<StoryId, Story> = list_dir(&self.root.join("stories"))
            .await?
            .into_iter()
            .map(|s: Story| (s.id.clone(), s))
            .collect();
        all.extend(self.stories.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(all.into_values().filter(|s| filter.matches(s)).collect())
    }

    async fn save_story(&mut self, story: &Story) -> Result<()> {
        self.story_path(&story.id)?;
        self.stories.insert(story.id.clone(), story.clone());
        Ok(())
    }

    async fn claim_story(
        &mut self,
        id: &StoryId,
        expected: StoryStatus,
        next: StoryStatus,
    ) -> Result<bool> {
        let Some(mut story) = self.load_story(id).await? else {
            return Ok(false);
        };
        if story.status != expected {
            return Ok(false);
        }
        story.set_status(next);
        self.stories.insert(story.id.clone(), story);
        Ok(true)
    }

    async fn dependencies_of(&mut self, id: &StoryId) -> Result<Vec<StoryId>> {
        Ok(self
            .edges()
            .await?
            .iter()
            .filter(|d| &d.story_id == id)
            .map(|d| d.depends_on_id.clone())
            .collect())
    }

    async fn list_dependencies(&mut self) -> Result<Vec<StoryDependency>> {
        Ok(self.edges().await?.iter().cloned().collect())
    }

    async fn insert_dependency(&mut self, edge: &StoryDependency) -> Result<bool> {
        let inserted = self.edges().await?.insert(edge.clone());
        self.dependencies_dirty |= inserted;
        Ok(inserted)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        for epic in self.epics.values() {
            write_json(&self.epic_path(&epic.id)?, epic).await?;
            self.bump_version("epics", epic.id.as_str()).await?;
        }
        for story in self.stories.values() {
            write_json(&self.story_path(&story.id)?, story).await?;
            self.bump_version("stories", story.id.as_str()).await?;
        }
        if self.dependencies_dirty {
            if let Some(edges) = &self.dependencies {
                let edges: Vec<_> = edges.iter().collect();
                write_json(&self.root.join(DEPENDENCIES_FILE), &edges).await?;
            }
        }

        debug!(
            epics = self.epics.len(),
            stories = self.stories.len(),
            dependencies = self.dependencies_dirty,
            "Committed JSON transaction"
        );
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Ids become file names, so they must not escape their directory.
fn file_name(id: &str) -> Result<String> {
    if id.is_empty() || id == "." || id == ".." || id.contains(&['/', '\\'][..]) {
        return Err(StorageError::Other(format!("id '{}' cannot be stored as a file", id)));
    }
    Ok(format!("{}.json", id))
}

/// Write via a uniquely named temporary file in the same directory, then
/// rename over `path`, so readers never see a half-written file.
async fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| StorageError::Other(format!("{} has no parent directory", path.display())))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| StorageError::Other(format!("write task failed: {}", e)))?
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        if let Some(item) = read_json(&entry.path()).await? {
            items.push(item);
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();

        let epic = Epic::new("Epic", "desc");
        let story = Story::new(epic.id.clone(), "Story", "", 2);

        let mut tx = storage.begin().await.unwrap();
        tx.save_epic(&epic).await.unwrap();
        tx.save_story(&story).await.unwrap();
        tx.commit().await.unwrap();

        // A fresh instance reads what the first one wrote.
        let reopened = JsonStorage::new(dir.path()).await.unwrap();
        let mut tx = reopened.begin().await.unwrap();
        assert_eq!(tx.load_epic(&epic.id).await.unwrap(), Some(epic.clone()));
        assert_eq!(tx.load_story(&story.id).await.unwrap(), Some(story.clone()));
        assert_eq!(tx.list_epics().await.unwrap().len(), 1);
        assert!(dir.path().join("meta").join("stories").join(format!("{}.meta.json", story.id)).exists());
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_not_flushed() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        let epic = Epic::new("Epic", "");

        let mut tx = storage.begin().await.unwrap();
        tx.save_epic(&epic).await.unwrap();
        assert!(tx.load_epic(&epic.id).await.unwrap().is_some());
        tx.rollback().await.unwrap();

        let mut tx = storage.begin().await.unwrap();
        assert!(tx.load_epic(&epic.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dependencies_persist() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        let edge = StoryDependency::new(StoryId::from("a"), StoryId::from("b"));

        let mut tx = storage.begin().await.unwrap();
        assert!(tx.insert_dependency(&edge).await.unwrap());
        tx.commit().await.unwrap();

        let mut tx = storage.begin().await.unwrap();
        assert!(!tx.insert_dependency(&edge).await.unwrap());
        assert_eq!(tx.dependencies_of(&StoryId::from("a")).await.unwrap(), vec![StoryId::from("b")]);
    }

    #[tokio::test]
    async fn test_claim_reads_through_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        let story = Story::new(EpicId::from("e"), "Story", "", 1);

        let mut tx = storage.begin().await.unwrap();
        tx.save_story(&story).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = storage.begin().await.unwrap();
        assert!(tx.claim_story(&story.id, StoryStatus::ToDo, StoryStatus::InProgress).await.unwrap());
        assert!(!tx.claim_story(&story.id, StoryStatus::ToDo, StoryStatus::InProgress).await.unwrap());
        tx.commit().await.unwrap();

        let mut tx = storage.begin().await.unwrap();
        let stored = tx.load_story(&story.id).await.unwrap().unwrap();
        assert_eq!(stored.status, StoryStatus::InProgress);
    }

    #[tokio::test]
    async fn test_path_like_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        let mut story = Story::new(EpicId::from("e"), "Story", "", 1);
        story.id = StoryId::from("../escape");

        let mut tx = storage.begin().await.unwrap();
        assert!(matches!(tx.save_story(&story).await, Err(StorageError::Other(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_separate_instances_take_turns() {
        let dir = tempfile::tempdir().unwrap();
        let first = JsonStorage::new(dir.path()).await.unwrap();
        let second = JsonStorage::new(dir.path()).await.unwrap();
        let story = Story::new(EpicId::from("e"), "Story", "", 1);

        let mut tx = first.begin().await.unwrap();
        tx.save_story(&story).await.unwrap();
        tx.commit().await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let storage = if i % 2 == 0 { first.clone() } else { second.clone() };
            let id = story.id.clone();
            handles.push(tokio::spawn(async move {
                let mut tx = storage.begin().await?;
                let Some(mut current) = tx.load_story(&id).await? else {
                    tx.rollback().await?;
                    return Ok::<bool, StorageError>(false);
                };
                if current.status != StoryStatus::ToDo {
                    tx.rollback().await?;
                    return Ok(false);
                }
                tokio::task::yield_now().await;
                current.set_status(StoryStatus::InProgress);
                tx.save_story(&current).await?;
                tx.commit().await?;
                Ok(true)
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(dir.path().join(LOCK_FILE).exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_to_one_file_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("story.json");

        let mut handles = Vec::new();
        for i in 0..16u32 {
            let path = path.clone();
            handles.push(tokio::spawn(async move {
                write_json(&path, &serde_json::json!({ "writer": i })).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let value: serde_json::Value = read_json(&path).await.unwrap().unwrap();
        assert!(value["writer"].as_u64().unwrap() < 16);
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("story.json")]);
    }
}
