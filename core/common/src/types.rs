//! Common types used throughout envsync.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Logical document key of an environment.
pub type EnvironmentUuid = String;

/// The structural environment document.
///
/// Only the mutation library looks inside it; the store and the adapters
/// pass it through untouched, apart from reading its top-level `uuid`.
pub type OpaqueDocument = Value;

/// Current wall-clock time as epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A persisted environment together with its bookkeeping fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentRecord {
    /// Stable identifier, equal to `environment_uuid`.
    pub id: String,
    /// Logical document key; unique across the live collection.
    pub environment_uuid: EnvironmentUuid,
    /// The environment document itself.
    pub environment: OpaqueDocument,
    /// Timestamp (epoch millis) of the last action applied to this record.
    pub timestamp: i64,
    /// Soft-delete marker (epoch millis), when the binding supports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
}

impl EnvironmentRecord {
    /// Build a record for a document, keyed by the document's own `uuid`.
    ///
    /// # Errors
    /// - Returns error if the document has no string `uuid` field
    pub fn from_document(environment: OpaqueDocument, timestamp: i64) -> crate::Result<Self> {
        let uuid = document_uuid(&environment).ok_or_else(|| {
            crate::Error::InvalidInput("Environment document has no uuid".to_string())
        })?;

        Ok(Self {
            id: uuid.clone(),
            environment_uuid: uuid,
            environment,
            timestamp,
            deleted_at: None,
        })
    }

    /// Whether the record carries a soft-delete marker.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Human-readable name of the environment, if the document has one.
    pub fn name(&self) -> Option<&str> {
        self.environment.get("name").and_then(Value::as_str)
    }
}

/// Read the top-level `uuid` of an environment document.
pub fn document_uuid(document: &OpaqueDocument) -> Option<EnvironmentUuid> {
    document
        .get("uuid")
        .and_then(Value::as_str)
        .filter(|uuid| !uuid.is_empty())
        .map(str::to_string)
}
