//! Replay and out-of-order protection.
//!
//! The store keeps a bounded log of recently applied actions per
//! environment and consults a [`ConflictFilter`] with it before reducing
//! each incoming action.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use envsync_common::{now_millis, EnvironmentUuid};

use crate::action::SyncAction;
use crate::hash::ActionHash;

/// Default bound of the per-environment log.
pub const DEFAULT_RECENT_ACTIONS: usize = 100;

/// One applied action, as remembered by the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentAction {
    pub hash: ActionHash,
    pub kind: String,
    /// Entity an `UPDATE_*` action touched.
    pub entity: Option<String>,
    /// Caller-supplied logical time of the action.
    pub timestamp: Option<i64>,
    /// Wall-clock time (epoch millis) the action was applied.
    pub applied_at: i64,
}

impl RecentAction {
    /// Describe an applied action.
    pub fn from_action(action: &SyncAction, hash: &ActionHash) -> Self {
        Self {
            hash: hash.clone(),
            kind: action.kind().to_string(),
            entity: action.updated_entity().map(str::to_string),
            timestamp: action.timestamp(),
            applied_at: now_millis(),
        }
    }
}

/// Recently applied actions of one environment, oldest first.
#[derive(Debug, Clone, Default)]
pub struct RecentActions(VecDeque<RecentAction>);

impl RecentActions {
    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &RecentAction> {
        self.0.iter()
    }

    /// Whether an action with this hash was applied.
    pub fn contains_hash(&self, hash: &ActionHash) -> bool {
        self.0.iter().any(|a| &a.hash == hash)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Bounded per-environment log of applied actions.
#[derive(Debug, Clone)]
pub struct RecentActionsStore {
    capacity: usize,
    by_environment: HashMap<EnvironmentUuid, RecentActions>,
}

impl RecentActionsStore {
    /// Create a log keeping at most `capacity` actions per environment.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            by_environment: HashMap::new(),
        }
    }

    /// Log for an environment, if anything was recorded for it.
    pub fn get(&self, uuid: &str) -> Option<&RecentActions> {
        self.by_environment.get(uuid)
    }

    /// Append an entry, evicting the oldest when over capacity.
    pub fn push(&mut self, uuid: &str, entry: RecentAction) {
        let log = self.by_environment.entry(uuid.to_string()).or_default();
        log.0.push_back(entry);
        while log.0.len() > self.capacity {
            log.0.pop_front();
        }
    }

    /// Drop the log of an environment.
    pub fn forget(&mut self, uuid: &str) {
        self.by_environment.remove(uuid);
    }

    /// Number of environments with a log.
    pub fn environments(&self) -> usize {
        self.by_environment.len()
    }
}

impl Default for RecentActionsStore {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_ACTIONS)
    }
}

/// Decides whether an incoming action may be applied.
pub trait ConflictFilter: Send + Sync {
    /// Return the action to apply (unchanged or rewritten), or `None` to
    /// drop it.
    fn filter(
        &self,
        action: SyncAction,
        hash: &ActionHash,
        recent: &RecentActions,
    ) -> Option<SyncAction>;

    /// Remember that `action` was applied.
    fn record(&self, action: &SyncAction, hash: &ActionHash, store: &mut RecentActionsStore);
}

/// Applies everything and remembers nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughFilter;

impl ConflictFilter for PassThroughFilter {
    fn filter(
        &self,
        action: SyncAction,
        _hash: &ActionHash,
        _recent: &RecentActions,
    ) -> Option<SyncAction> {
        Some(action)
    }

    fn record(&self, _action: &SyncAction, _hash: &ActionHash, _store: &mut RecentActionsStore) {}
}

/// Drops stale updates.
///
/// An `UPDATE_*` action is dropped when the log already holds an update of
/// the same kind to the same entity with a strictly later timestamp: a
/// client replaying or delivering out of order must not roll back a newer
/// write. Everything else passes through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecentActionsFilter;

impl ConflictFilter for RecentActionsFilter {
    fn filter(
        &self,
        action: SyncAction,
        _hash: &ActionHash,
        recent: &RecentActions,
    ) -> Option<SyncAction> {
        let (Some(entity), Some(timestamp)) = (action.updated_entity(), action.timestamp()) else {
            return Some(action);
        };

        let superseded = recent.iter().any(|applied| {
            applied.kind == action.kind()
                && applied.entity.as_deref() == Some(entity)
                && applied.timestamp.is_some_and(|t| t > timestamp)
        });

        if superseded {
            debug!(
                "Dropping stale {} for {} (timestamp {})",
                action.kind(),
                entity,
                timestamp
            );
            return None;
        }

        Some(action)
    }

    fn record(&self, action: &SyncAction, hash: &ActionHash, store: &mut RecentActionsStore) {
        let Some(uuid) = action.affected_environment() else {
            return;
        };

        if matches!(action, SyncAction::RemoveCloudEnvironment { .. }) {
            store.forget(&uuid);
            return;
        }
        store.push(&uuid, RecentAction::from_action(action, hash));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ActionHasher;
    use serde_json::json;

    fn rename_route(name: &str, timestamp: i64) -> SyncAction {
        SyncAction::UpdateRoute {
            environment_uuid: "env-1".to_string(),
            route_uuid: "route-1".to_string(),
            properties: json!({ "endpoint": name }),
            timestamp,
        }
    }

    fn apply(
        filter: &dyn ConflictFilter,
        store: &mut RecentActionsStore,
        action: SyncAction,
    ) -> bool {
        let hash = ActionHasher::hash(&action).unwrap();
        let empty = RecentActions::default();
        let recent = store.get("env-1").unwrap_or(&empty);
        match filter.filter(action, &hash, recent) {
            Some(applied) => {
                filter.record(&applied, &hash, store);
                true
            }
            None => false,
        }
    }

    #[test]
    fn test_stale_update_dropped() {
        let filter = RecentActionsFilter;
        let mut store = RecentActionsStore::default();

        assert!(apply(&filter, &mut store, rename_route("new", 2000)));
        assert!(!apply(&filter, &mut store, rename_route("old", 1000)));
        assert!(apply(&filter, &mut store, rename_route("newer", 3000)));
        assert_eq!(store.get("env-1").unwrap().len(), 2);
    }

    #[test]
    fn test_equal_timestamp_passes() {
        let filter = RecentActionsFilter;
        let mut store = RecentActionsStore::default();

        assert!(apply(&filter, &mut store, rename_route("a", 2000)));
        assert!(apply(&filter, &mut store, rename_route("b", 2000)));
    }

    #[test]
    fn test_other_entities_unaffected() {
        let filter = RecentActionsFilter;
        let mut store = RecentActionsStore::default();

        assert!(apply(&filter, &mut store, rename_route("new", 2000)));
        let other_route = SyncAction::UpdateRoute {
            environment_uuid: "env-1".to_string(),
            route_uuid: "route-2".to_string(),
            properties: json!({}),
            timestamp: 1000,
        };
        assert!(apply(&filter, &mut store, other_route));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let filter = RecentActionsFilter;
        let mut store = RecentActionsStore::new(3);

        for ts in 1..=5 {
            apply(&filter, &mut store, rename_route("x", ts));
        }

        let timestamps: Vec<_> = store
            .get("env-1")
            .unwrap()
            .iter()
            .map(|a| a.timestamp)
            .collect();
        assert_eq!(timestamps, vec![Some(3), Some(4), Some(5)]);
    }

    #[test]
    fn test_add_logged_under_new_environment() {
        let filter = RecentActionsFilter;
        let mut store = RecentActionsStore::default();
        let add = SyncAction::AddCloudEnvironment {
            environment: json!({"uuid": "env-9"}),
            timestamp: 1,
        };
        let hash = ActionHasher::hash(&add).unwrap();

        filter.record(&add, &hash, &mut store);

        assert!(store.get("env-9").unwrap().contains_hash(&hash));
    }

    #[test]
    fn test_remove_drops_log() {
        let filter = RecentActionsFilter;
        let mut store = RecentActionsStore::default();
        apply(&filter, &mut store, rename_route("x", 5));

        let remove = SyncAction::RemoveCloudEnvironment {
            environment_uuid: "env-1".to_string(),
            timestamp: 6,
        };
        apply(&filter, &mut store, remove);

        assert!(store.get("env-1").is_none());
        assert_eq!(store.environments(), 0);
    }

    #[test]
    fn test_pass_through() {
        let filter = PassThroughFilter;
        let mut store = RecentActionsStore::default();
        assert!(apply(&filter, &mut store, rename_route("new", 2000)));
        assert!(apply(&filter, &mut store, rename_route("old", 1000)));
        assert_eq!(store.environments(), 0);
    }
}
