//! SQLite storage backend.
//!
//! Entities are stored as JSON documents alongside the columns the engine
//! filters on. The claim step is a single conditional `UPDATE ... WHERE
//! status = ?`, so two connections racing for the same story cannot both
//! win regardless of isolation level. A claim that finds the database
//! busy or locked by another writer is reported as lost, the same as a
//! status mismatch, and the caller retries.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use backlog_core::{Epic, EpicId, Story, StoryDependency, StoryFilter, StoryId, StoryStatus};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::debug;

use super::{Result, Storage, Transaction};

/// How long a connection waits on another writer's lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
    /// Database connection pool
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (creating if needed) a database at `db_path`.
    pub async fn new(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_path)?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePool::connect_with(options).await?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite storage for testing.
    pub async fn in_memory() -> Result<Self> {
        // A single connection, otherwise each connection sees its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Initialize the database schema.
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS epics (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS stories (
                id TEXT PRIMARY KEY,
                epic_id TEXT NOT NULL,
                status TEXT NOT NULL,
                priority INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                data TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS dependencies (
                story_id TEXT NOT NULL,
                depends_on_id TEXT NOT NULL,
                PRIMARY KEY (story_id, depends_on_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_stories_epic_status ON stories(epic_id, status)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Check if the database is healthy.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTransaction { tx }))
    }
}

struct SqliteTransaction {
    tx: sqlx::Transaction<'static, Sqlite>,
}

/// SQLITE_BUSY or SQLITE_LOCKED, including their extended codes.
fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(|code| matches!(code & 0xff, 5 | 6))
            .unwrap_or(false),
        _ => false,
    }
}

fn decode<T: serde::de::DeserializeOwned>(row: &sqlx::sqlite::SqliteRow) -> Result<T> {
    let data: String = row.try_get("data")?;
    Ok(serde_json::from_str(&data)?)
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn load_epic(&mut self, id: &EpicId) -> Result<Option<Epic>> {
        let row = sqlx::query("SELECT data FROM epics WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn list_epics(&mut self) -> Result<Vec<Epic>> {
        let rows = sqlx::query("SELECT data FROM epics ORDER BY id")
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(decode).collect()
    }

    async fn save_epic(&mut self, epic: &Epic) -> Result<()> {
        let data = serde_json::to_string(epic)?;
        sqlx::query(
            "INSERT INTO epics (id, data, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
        )
        .bind(epic.id.as_str())
        .bind(data)
        .bind(epic.updated_at.to_rfc3339())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn load_story(&mut self, id: &StoryId) -> Result<Option<Story>> {
        let row = sqlx::query("SELECT data FROM stories WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn list_stories(&mut self, filter: &StoryFilter) -> Result<Vec<Story>> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT data FROM stories WHERE 1 = 1");

        if let Some(epic_id) = &filter.epic_id {
            query.push(" AND epic_id = ").push_bind(epic_id.as_str().to_string());
        }
        if let Some(statuses) = &filter.status {
            if statuses.is_empty() {
                return Ok(Vec::new());
            }
            query.push(" AND status IN (");
            let mut separated = query.separated(", ");
            for status in statuses {
                separated.push_bind(status.as_str());
            }
            separated.push_unseparated(")");
        }
        query.push(" ORDER BY created_at, id");

        let rows = query.build().fetch_all(&mut *self.tx).await?;
        rows.iter().map(decode).collect()
    }

    async fn save_story(&mut self, story: &Story) -> Result<()> {
        let data = serde_json::to_string(story)?;
        sqlx::query(
            "INSERT INTO stories (id, epic_id, status, priority, created_at, data)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                epic_id = excluded.epic_id,
                status = excluded.status,
                priority = excluded.priority,
                data = excluded.data",
        )
        .bind(story.id.as_str())
        .bind(story.epic_id.as_str())
        .bind(story.status.as_str())
        .bind(story.priority)
        .bind(story.created_at.to_rfc3339())
        .bind(data)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn claim_story(
        &mut self,
        id: &StoryId,
        expected: StoryStatus,
        next: StoryStatus,
    ) -> Result<bool> {
        let result = match sqlx::query("UPDATE stories SET status = ? WHERE id = ? AND status = ?")
            .bind(next.as_str())
            .bind(id.as_str())
            .bind(expected.as_str())
            .execute(&mut *self.tx)
            .await
        {
            Ok(result) => result,
            Err(e) if is_busy(&e) => {
                debug!(story_id = %id, error = %e, "Claim lost to a concurrent writer");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        if result.rows_affected() != 1 {
            return Ok(false);
        }

        // Keep the stored document in step with the status column.
        if let Some(mut story) = self.load_story(id).await? {
            story.set_status(next);
            self.save_story(&story).await?;
        }
        Ok(true)
    }

    async fn dependencies_of(&mut self, id: &StoryId) -> Result<Vec<StoryId>> {
        let rows = sqlx::query(
            "SELECT depends_on_id FROM dependencies WHERE story_id = ? ORDER BY depends_on_id",
        )
        .bind(id.as_str())
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter()
            .map(|row| Ok(StoryId::from(row.try_get::<String, _>("depends_on_id")?)))
            .collect()
    }

    async fn list_dependencies(&mut self) -> Result<Vec<StoryDependency>> {
        let rows = sqlx::query(
            "SELECT story_id, depends_on_id FROM dependencies ORDER BY story_id, depends_on_id",
        )
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(StoryDependency::new(
                    StoryId::from(row.try_get::<String, _>("story_id")?),
                    StoryId::from(row.try_get::<String, _>("depends_on_id")?),
                ))
            })
            .collect()
    }

    async fn insert_dependency(&mut self, edge: &StoryDependency) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO dependencies (story_id, depends_on_id) VALUES (?, ?)",
        )
        .bind(edge.story_id.as_str())
        .bind(edge.depends_on_id.as_str())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
