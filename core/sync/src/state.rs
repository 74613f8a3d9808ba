//! In-memory snapshot of the environment collection.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use envsync_common::{EnvironmentRecord, EnvironmentUuid};

/// The store's state: live environment records in insertion order.
///
/// Records are shared behind `Arc` so a transition only allocates the
/// records it changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    pub data: Vec<Arc<EnvironmentRecord>>,
}

impl StoreState {
    /// Create an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a state from loaded records.
    ///
    /// If several records share a uuid the last one wins, keeping the
    /// position of the first.
    pub fn from_records(records: impl IntoIterator<Item = EnvironmentRecord>) -> Self {
        let mut state = Self::new();
        for record in records {
            state = state.upsert(Arc::new(record));
        }
        state
    }

    /// Find a record by uuid.
    pub fn get(&self, uuid: &str) -> Option<&Arc<EnvironmentRecord>> {
        self.data.iter().find(|r| r.environment_uuid == uuid)
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.get(uuid).is_some()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Uuids of all records, in order.
    pub fn uuids(&self) -> Vec<EnvironmentUuid> {
        self.data.iter().map(|r| r.environment_uuid.clone()).collect()
    }

    /// Return a new state with `record` replacing the record of the same
    /// uuid in place, or appended if there is none.
    pub fn upsert(&self, record: Arc<EnvironmentRecord>) -> Self {
        let mut data = self.data.clone();
        match data
            .iter()
            .position(|r| r.environment_uuid == record.environment_uuid)
        {
            Some(index) => data[index] = record,
            None => data.push(record),
        }
        Self { data }
    }

    /// Whether no two records share a uuid.
    pub fn has_unique_uuids(&self) -> bool {
        let mut seen = HashSet::with_capacity(self.data.len());
        self.data
            .iter()
            .all(|r| seen.insert(r.environment_uuid.as_str()))
    }
}
