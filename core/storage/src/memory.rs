//! In-memory persistence adapter for testing.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use envsync_common::{EnvironmentRecord, Error, Result};

use crate::adapter::PersistenceAdapter;

/// Calls observed by a [`MemoryAdapter`].
#[derive(Debug, Clone, Default)]
pub struct AdapterCalls {
    pub initialize: usize,
    pub load: usize,
    /// Every record passed to `save_environment`, in call order.
    pub saves: Vec<EnvironmentRecord>,
    /// Every uuid passed to `delete_environment`, in call order.
    pub deletes: Vec<String>,
    pub list_uuids: usize,
    /// Timestamps passed to `update_last_sync`, in call order.
    pub last_syncs: Vec<i64>,
    pub close: usize,
}

impl AdapterCalls {
    /// Number of saves for a given uuid.
    pub fn saves_for(&self, uuid: &str) -> usize {
        self.saves
            .iter()
            .filter(|r| r.environment_uuid == uuid)
            .count()
    }

    /// Number of deletes for a given uuid.
    pub fn deletes_for(&self, uuid: &str) -> usize {
        self.deletes.iter().filter(|u| *u == uuid).count()
    }
}

#[derive(Default)]
struct Inner {
    records: BTreeMap<String, EnvironmentRecord>,
    calls: AdapterCalls,
    failures_remaining: usize,
    closed: bool,
}

/// In-memory persistence adapter.
///
/// Hard-deletes on `delete_environment`. Records every call it receives and
/// can be told to fail the next N operations, which makes it the test double
/// for the sync store. All data is lost on drop.
pub struct MemoryAdapter {
    inner: Mutex<Inner>,
}

impl MemoryAdapter {
    /// Create a new empty adapter.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Create an adapter pre-populated with records.
    pub fn with_records(records: impl IntoIterator<Item = EnvironmentRecord>) -> Self {
        let adapter = Self::new();
        if let Ok(mut inner) = adapter.inner.lock() {
            for record in records {
                inner.records.insert(record.environment_uuid.clone(), record);
            }
        }
        adapter
    }

    /// Make the next `count` operations fail with a storage error.
    pub fn fail_next(&self, count: usize) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failures_remaining = count;
        }
    }

    /// Snapshot of the calls observed so far.
    pub fn calls(&self) -> AdapterCalls {
        self.inner
            .lock()
            .map(|inner| inner.calls.clone())
            .unwrap_or_default()
    }

    /// Forget the calls observed so far.
    pub fn reset_calls(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.calls = AdapterCalls::default();
        }
    }

    /// Currently stored record for a uuid.
    pub fn stored(&self, uuid: &str) -> Option<EnvironmentRecord> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.records.get(uuid).cloned())
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.records.len()).unwrap_or(0)
    }

    /// Whether no records are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().map(|inner| inner.closed).unwrap_or(false)
    }

    /// Lock the state, consuming one injected failure if any are queued.
    fn begin(&self, operation: &str) -> Result<MutexGuard<'_, Inner>> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| Error::Storage("Memory adapter lock poisoned".to_string()))?;

        if inner.failures_remaining > 0 {
            inner.failures_remaining -= 1;
            return Err(Error::Storage(format!("Injected failure in {}", operation)));
        }

        Ok(inner)
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceAdapter for MemoryAdapter {
    fn name(&self) -> &str {
        "memory"
    }

    async fn initialize(&self) -> Result<()> {
        let mut inner = self.begin("initialize")?;
        inner.calls.initialize += 1;
        inner.closed = false;
        Ok(())
    }

    async fn load_environments(&self) -> Result<Vec<EnvironmentRecord>> {
        let mut inner = self.begin("load_environments")?;
        inner.calls.load += 1;
        Ok(inner.records.values().cloned().collect())
    }

    async fn save_environment(&self, record: &EnvironmentRecord) -> Result<()> {
        let mut inner = self.begin("save_environment")?;
        inner.calls.saves.push(record.clone());

        let mut stored = record.clone();
        stored.deleted_at = None;
        inner.records.insert(stored.environment_uuid.clone(), stored);
        Ok(())
    }

    async fn delete_environment(&self, uuid: &str) -> Result<()> {
        let mut inner = self.begin("delete_environment")?;
        inner.calls.deletes.push(uuid.to_string());
        inner.records.remove(uuid);
        Ok(())
    }

    async fn get_all_environment_uuids(&self) -> Result<Vec<String>> {
        let mut inner = self.begin("get_all_environment_uuids")?;
        inner.calls.list_uuids += 1;
        Ok(inner.records.keys().cloned().collect())
    }

    async fn update_last_sync(&self, timestamp_ms: i64) -> Result<()> {
        let mut inner = self.begin("update_last_sync")?;
        inner.calls.last_syncs.push(timestamp_ms);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut inner = self.begin("close")?;
        inner.calls.close += 1;
        inner.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(uuid: &str, timestamp: i64) -> EnvironmentRecord {
        EnvironmentRecord::from_document(json!({"uuid": uuid}), timestamp).unwrap()
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let adapter = MemoryAdapter::new();
        adapter.save_environment(&record("env-1", 1)).await.unwrap();
        adapter.save_environment(&record("env-1", 2)).await.unwrap();

        let loaded = adapter.load_environments().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].timestamp, 2);
        assert_eq!(adapter.calls().saves_for("env-1"), 2);
    }

    #[tokio::test]
    async fn test_delete_is_hard() {
        let adapter = MemoryAdapter::with_records([record("env-1", 1), record("env-2", 1)]);

        adapter.delete_environment("env-1").await.unwrap();

        assert!(adapter.stored("env-1").is_none());
        assert_eq!(
            adapter.get_all_environment_uuids().await.unwrap(),
            vec!["env-2".to_string()]
        );
        assert_eq!(adapter.calls().deletes_for("env-1"), 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let adapter = MemoryAdapter::new();
        adapter.fail_next(2);

        assert!(adapter.initialize().await.is_err());
        assert!(adapter.save_environment(&record("env-1", 1)).await.is_err());
        adapter.save_environment(&record("env-1", 1)).await.unwrap();

        assert_eq!(adapter.len(), 1);
        assert_eq!(adapter.calls().initialize, 0);
    }

    #[tokio::test]
    async fn test_close_marks_closed() {
        let adapter = MemoryAdapter::new();
        adapter.initialize().await.unwrap();
        assert!(!adapter.is_closed());

        adapter.close().await.unwrap();
        assert!(adapter.is_closed());
        assert_eq!(adapter.calls().close, 1);
    }
}
