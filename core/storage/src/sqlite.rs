//! SQLite-backed persistence adapter with soft delete.
//!
//! Environments live in a single `environments` table keyed by uuid; the
//! environment document is stored as JSON text. Deleting only stamps
//! `deleted_at`, so a removed environment can be restored until it is
//! permanently deleted.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use envsync_common::{now_millis, EnvironmentRecord, Error, Result};

use crate::adapter::{PersistenceAdapter, SoftDeleteAdapter};

const LAST_SYNC_KEY: &str = "last_sync";

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS environments (
        uuid TEXT PRIMARY KEY,
        id TEXT NOT NULL,
        environment TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        deleted_at INTEGER
    );

    CREATE TABLE IF NOT EXISTS sync_metadata (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_environments_deleted ON environments(deleted_at);
"#;

const SELECT_COLUMNS: &str =
    "SELECT uuid, id, environment, timestamp, deleted_at FROM environments";

/// Row as stored, before the document is parsed.
struct StoredRow {
    uuid: String,
    id: String,
    environment: String,
    timestamp: i64,
    deleted_at: Option<i64>,
}

impl StoredRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            uuid: row.get(0)?,
            id: row.get(1)?,
            environment: row.get(2)?,
            timestamp: row.get(3)?,
            deleted_at: row.get(4)?,
        })
    }

    fn into_record(self) -> Result<EnvironmentRecord> {
        Ok(EnvironmentRecord {
            id: self.id,
            environment_uuid: self.uuid,
            environment: serde_json::from_str(&self.environment)?,
            timestamp: self.timestamp,
            deleted_at: self.deleted_at,
        })
    }
}

fn storage_err(err: rusqlite::Error) -> Error {
    Error::Storage(err.to_string())
}

/// Connection slot, `None` until opened and after close.
type SharedConn = Arc<Mutex<Option<Connection>>>;

fn lock_slot(conn: &Mutex<Option<Connection>>) -> Result<MutexGuard<'_, Option<Connection>>> {
    conn.lock().map_err(|_| Error::Storage("SQLite connection lock poisoned".to_string()))
}

fn with_open<T>(
    slot: &Option<Connection>,
    path: &Path,
    f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
) -> Result<T> {
    let conn = slot.as_ref().ok_or_else(|| {
        Error::NotInitialized(format!("Database {} is not open", path.display()))
    })?;
    f(conn).map_err(storage_err)
}

/// Soft-deleting adapter over a SQLite database file.
///
/// Queries run on the blocking thread pool, never on the async workers.
pub struct SqliteAdapter {
    path: PathBuf,
    conn: SharedConn,
}

impl SqliteAdapter {
    /// Create an adapter for a database file. Nothing is opened until
    /// [`PersistenceAdapter::initialize`] is called.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            conn: Arc::new(Mutex::new(None)),
        }
    }

    /// Create an adapter over a private in-memory database (for testing).
    pub fn in_memory() -> Self {
        Self::new(":memory:")
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Time (epoch millis) of the last successful flush, if any.
    pub fn last_sync(&self) -> Result<Option<i64>> {
        let slot = lock_slot(&self.conn)?;
        let value: Option<String> = with_open(&slot, &self.path, |conn| {
            conn.query_row(
                "SELECT value FROM sync_metadata WHERE key = ?1",
                [LAST_SYNC_KEY],
                |row| row.get(0),
            )
            .optional()
        })?;

        value
            .map(|v| {
                v.parse::<i64>()
                    .map_err(|e| Error::Serialization(format!("Invalid last sync value: {}", e)))
            })
            .transpose()
    }

    /// Run `f` against the connection slot on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Option<Connection>, &Path) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || {
            let mut slot = lock_slot(&conn)?;
            f(&mut slot, &path)
        })
        .await
        .map_err(|e| Error::Storage(format!("SQLite task failed: {}", e)))?
    }

    /// Run a query against the open connection on the blocking pool.
    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        self.blocking(move |slot, path| with_open(slot, path, f)).await
    }

    async fn query_records(&self, sql: String) -> Result<Vec<EnvironmentRecord>> {
        let rows = self
            .run(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], StoredRow::from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;

        rows.into_iter().map(StoredRow::into_record).collect()
    }
}

#[async_trait]
impl PersistenceAdapter for SqliteAdapter {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn initialize(&self) -> Result<()> {
        let opened = self
            .blocking(|slot, path| {
                if slot.is_some() {
                    return Ok(false);
                }
                let conn = Connection::open(path).map_err(storage_err)?;
                conn.execute_batch(SCHEMA).map_err(storage_err)?;
                *slot = Some(conn);
                Ok(true)
            })
            .await?;

        if opened {
            info!("SQLite database opened at {}", self.path.display());
        }
        Ok(())
    }

    async fn load_environments(&self) -> Result<Vec<EnvironmentRecord>> {
        self.query_records(format!(
            "{} WHERE deleted_at IS NULL ORDER BY rowid",
            SELECT_COLUMNS
        ))
        .await
    }

    async fn save_environment(&self, record: &EnvironmentRecord) -> Result<()> {
        debug!("Saving environment: {}", record.environment_uuid);
        let environment = serde_json::to_string(&record.environment)?;
        let uuid = record.environment_uuid.clone();
        let id = record.id.clone();
        let timestamp = record.timestamp;

        self.run(move |conn| {
            conn.execute(
                r#"
                INSERT INTO environments (uuid, id, environment, timestamp, deleted_at)
                VALUES (?1, ?2, ?3, ?4, NULL)
                ON CONFLICT(uuid) DO UPDATE SET
                    id = excluded.id,
                    environment = excluded.environment,
                    timestamp = excluded.timestamp,
                    deleted_at = NULL
                "#,
                params![uuid, id, environment, timestamp],
            )
        })
        .await?;
        Ok(())
    }

    async fn delete_environment(&self, uuid: &str) -> Result<()> {
        debug!("Soft-deleting environment: {}", uuid);
        let uuid = uuid.to_string();
        let deleted_at = now_millis();

        self.run(move |conn| {
            conn.execute(
                "UPDATE environments SET deleted_at = ?2 WHERE uuid = ?1 AND deleted_at IS NULL",
                params![uuid, deleted_at],
            )
        })
        .await?;
        Ok(())
    }

    async fn get_all_environment_uuids(&self) -> Result<Vec<String>> {
        self.run(|conn| {
            let mut stmt = conn
                .prepare("SELECT uuid FROM environments WHERE deleted_at IS NULL ORDER BY rowid")?;
            let uuids = stmt.query_map([], |row| row.get(0))?;
            uuids.collect()
        })
        .await
    }

    async fn update_last_sync(&self, timestamp_ms: i64) -> Result<()> {
        self.run(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO sync_metadata (key, value) VALUES (?1, ?2)",
                params![LAST_SYNC_KEY, timestamp_ms.to_string()],
            )
        })
        .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let closed = self
            .blocking(|slot, _| match slot.take() {
                Some(conn) => {
                    conn.close().map_err(|(_, e)| storage_err(e))?;
                    Ok(true)
                }
                None => Ok(false),
            })
            .await?;

        if closed {
            info!("SQLite database closed");
        }
        Ok(())
    }
}

#[async_trait]
impl SoftDeleteAdapter for SqliteAdapter {
    async fn list_deleted(&self) -> Result<Vec<EnvironmentRecord>> {
        self.query_records(format!(
            "{} WHERE deleted_at IS NOT NULL ORDER BY deleted_at",
            SELECT_COLUMNS
        ))
        .await
    }

    async fn restore_environment(&self, uuid: &str) -> Result<EnvironmentRecord> {
        let key = uuid.to_string();
        let row = self
            .run(move |conn| {
                let changed = conn.execute(
                    "UPDATE environments SET deleted_at = NULL \
                     WHERE uuid = ?1 AND deleted_at IS NOT NULL",
                    [&key],
                )?;
                if changed == 0 {
                    return Ok(None);
                }
                conn.query_row(
                    &format!("{} WHERE uuid = ?1", SELECT_COLUMNS),
                    [&key],
                    StoredRow::from_row,
                )
                .optional()
            })
            .await?;

        let row = row.ok_or_else(|| Error::NotFound(format!("No deleted environment {}", uuid)))?;
        info!("Restored environment {}", uuid);
        row.into_record()
    }

    async fn permanently_delete_environment(&self, uuid: &str) -> Result<()> {
        let key = uuid.to_string();
        let changed = self
            .run(move |conn| {
                conn.execute(
                    "DELETE FROM environments WHERE uuid = ?1 AND deleted_at IS NOT NULL",
                    [&key],
                )
            })
            .await?;

        if changed == 0 {
            return Err(Error::NotFound(format!("No deleted environment {}", uuid)));
        }
        info!("Permanently deleted environment {}", uuid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(uuid: &str, name: &str, timestamp: i64) -> EnvironmentRecord {
        EnvironmentRecord::from_document(json!({"uuid": uuid, "name": name}), timestamp).unwrap()
    }

    async fn open() -> SqliteAdapter {
        let adapter = SqliteAdapter::in_memory();
        adapter.initialize().await.unwrap();
        adapter
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let adapter = open().await;
        adapter.save_environment(&record("env-1", "Demo", 1)).await.unwrap();
        adapter.save_environment(&record("env-1", "Renamed", 2)).await.unwrap();

        let loaded = adapter.load_environments().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name(), Some("Renamed"));
        assert_eq!(loaded[0].timestamp, 2);
    }

    #[tokio::test]
    async fn test_soft_delete_and_restore() {
        let adapter = open().await;
        adapter.save_environment(&record("env-1", "Demo", 1)).await.unwrap();
        adapter.save_environment(&record("env-2", "Other", 1)).await.unwrap();

        adapter.delete_environment("env-1").await.unwrap();

        assert_eq!(
            adapter.get_all_environment_uuids().await.unwrap(),
            vec!["env-2".to_string()]
        );
        let deleted = adapter.list_deleted().await.unwrap();
        assert_eq!(deleted.len(), 1);
        assert!(deleted[0].is_deleted());

        let restored = adapter.restore_environment("env-1").await.unwrap();
        assert!(!restored.is_deleted());
        assert_eq!(restored.name(), Some("Demo"));
        assert_eq!(adapter.load_environments().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_save_clears_soft_delete() {
        let adapter = open().await;
        adapter.save_environment(&record("env-1", "Demo", 1)).await.unwrap();
        adapter.delete_environment("env-1").await.unwrap();

        adapter.save_environment(&record("env-1", "Demo", 2)).await.unwrap();

        assert!(adapter.list_deleted().await.unwrap().is_empty());
        assert_eq!(adapter.load_environments().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_permanent_delete_requires_soft_delete() {
        let adapter = open().await;
        adapter.save_environment(&record("env-1", "Demo", 1)).await.unwrap();

        assert!(matches!(
            adapter.permanently_delete_environment("env-1").await,
            Err(Error::NotFound(_))
        ));

        adapter.delete_environment("env-1").await.unwrap();
        adapter.permanently_delete_environment("env-1").await.unwrap();

        assert!(adapter.list_deleted().await.unwrap().is_empty());
        assert!(matches!(
            adapter.restore_environment("env-1").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_last_sync() {
        let adapter = open().await;
        assert_eq!(adapter.last_sync().unwrap(), None);

        adapter.update_last_sync(1234).await.unwrap();
        adapter.update_last_sync(5678).await.unwrap();
        assert_eq!(adapter.last_sync().unwrap(), Some(5678));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("envs.db");

        let adapter = SqliteAdapter::new(&path);
        adapter.initialize().await.unwrap();
        adapter.save_environment(&record("env-1", "Demo", 7)).await.unwrap();
        adapter.close().await.unwrap();

        let reopened = SqliteAdapter::new(&path);
        reopened.initialize().await.unwrap();
        let loaded = reopened.load_environments().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].environment_uuid, "env-1");
        assert_eq!(loaded[0].timestamp, 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_saves_from_tasks() {
        let adapter = Arc::new(open().await);

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let adapter = adapter.clone();
                tokio::spawn(async move {
                    adapter
                        .save_environment(&record(&format!("env-{}", i), "Demo", i))
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(adapter.get_all_environment_uuids().await.unwrap().len(), 16);
        adapter.close().await.unwrap();
        assert!(matches!(
            adapter.get_all_environment_uuids().await,
            Err(Error::NotInitialized(_))
        ));
    }

    #[tokio::test]
    async fn test_use_before_initialize_fails() {
        let adapter = SqliteAdapter::in_memory();
        assert!(matches!(
            adapter.load_environments().await,
            Err(Error::NotInitialized(_))
        ));
    }
}
