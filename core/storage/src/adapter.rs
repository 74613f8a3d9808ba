//! Persistence adapter trait definition.

use async_trait::async_trait;

use envsync_common::{EnvironmentRecord, Result};

/// Backing store for environment records.
///
/// The sync store owns the canonical in-memory state and only ever talks to
/// the backing store through this trait: once at startup to load, then on
/// each flush to reconcile.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// Get the adapter name (e.g., "memory", "sqlite").
    fn name(&self) -> &str;

    /// Open connections, create schema.
    ///
    /// # Errors
    /// - Backing store unreachable or schema creation failed
    async fn initialize(&self) -> Result<()>;

    /// Load every live (non-deleted) record.
    async fn load_environments(&self) -> Result<Vec<EnvironmentRecord>>;

    /// Insert or fully overwrite a record.
    ///
    /// # Postconditions
    /// - The stored record equals `record`; a soft-delete marker is cleared
    async fn save_environment(&self, record: &EnvironmentRecord) -> Result<()>;

    /// Remove a record from the live set.
    ///
    /// Whether this is a hard delete or a soft delete depends on the binding.
    async fn delete_environment(&self, uuid: &str) -> Result<()>;

    /// List the uuids of every live record.
    async fn get_all_environment_uuids(&self) -> Result<Vec<String>>;

    /// Record the time (epoch millis) of the last successful flush.
    async fn update_last_sync(&self, timestamp_ms: i64) -> Result<()>;

    /// Release connections. The adapter must not be used afterwards.
    async fn close(&self) -> Result<()>;
}

/// Extension trait for bindings that soft-delete.
///
/// `delete_environment` only sets `deleted_at`; the record stays in the
/// backing store until restored or permanently deleted.
#[async_trait]
pub trait SoftDeleteAdapter: PersistenceAdapter {
    /// List records carrying a soft-delete marker.
    async fn list_deleted(&self) -> Result<Vec<EnvironmentRecord>>;

    /// Clear the soft-delete marker and return the restored record.
    ///
    /// # Errors
    /// - No soft-deleted record with this uuid
    async fn restore_environment(&self, uuid: &str) -> Result<EnvironmentRecord>;

    /// Remove a soft-deleted record for good.
    ///
    /// # Errors
    /// - No soft-deleted record with this uuid
    async fn permanently_delete_environment(&self, uuid: &str) -> Result<()>;
}
