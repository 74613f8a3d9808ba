//! Pure state transitions.

use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use envsync_common::{EnvironmentRecord, OpaqueDocument};

use crate::action::SyncAction;
use crate::mutations::MutationLibrary;
use crate::state::StoreState;

/// Apply one action to a state, returning the next state.
///
/// The input is never modified. Records other than the one the action
/// targets are carried over by reference. Actions naming an environment
/// that is not in the state, unknown kinds, and `ADD_CLOUD_ENVIRONMENT`
/// documents without a uuid leave the state as it was.
pub fn reduce(
    state: &StoreState,
    action: &SyncAction,
    mutations: &dyn MutationLibrary,
) -> StoreState {
    match action {
        SyncAction::AddCloudEnvironment {
            environment,
            timestamp,
        } => match EnvironmentRecord::from_document(environment.clone(), *timestamp) {
            Ok(record) => state.upsert(Arc::new(record)),
            Err(e) => {
                debug!("Ignoring {}: {}", action.kind(), e);
                state.clone()
            }
        },

        SyncAction::RemoveCloudEnvironment {
            environment_uuid, ..
        } => StoreState {
            data: state
                .data
                .iter()
                .filter(|r| &r.environment_uuid != environment_uuid)
                .cloned()
                .collect(),
        },

        SyncAction::Unknown => {
            debug!("Ignoring unknown action");
            state.clone()
        }

        _ => {
            let (Some(uuid), Some(timestamp)) = (action.environment_uuid(), action.timestamp())
            else {
                return state.clone();
            };
            apply_to_environment(state, uuid, timestamp, |doc| {
                mutate(doc, action, mutations)
            })
        }
    }
}

/// Replace the document of one environment and stamp the action's time.
fn apply_to_environment(
    state: &StoreState,
    uuid: &str,
    timestamp: i64,
    f: impl FnOnce(&OpaqueDocument) -> OpaqueDocument,
) -> StoreState {
    let Some(index) = state.data.iter().position(|r| r.environment_uuid == uuid) else {
        debug!("Environment {} not found, action ignored", uuid);
        return state.clone();
    };

    let current = &state.data[index];
    let next = EnvironmentRecord {
        environment: f(&current.environment),
        timestamp,
        ..EnvironmentRecord::clone(current)
    };

    let mut data = state.data.clone();
    data[index] = Arc::new(next);
    StoreState { data }
}

fn mutate(doc: &Value, action: &SyncAction, m: &dyn MutationLibrary) -> Value {
    match action {
        SyncAction::UpdateEnvironment { properties, .. } => m.update_environment(doc, properties),

        SyncAction::AddRoute {
            route, parent_id, ..
        } => m.add_route(doc, route, parent_id.as_deref()),
        SyncAction::RemoveRoute { route_uuid, .. } => m.remove_route(doc, route_uuid),
        SyncAction::UpdateRoute {
            route_uuid,
            properties,
            ..
        } => m.update_route(doc, route_uuid, properties),

        SyncAction::AddRouteResponse {
            route_uuid,
            route_response,
            ..
        } => m.add_route_response(doc, route_uuid, route_response),
        SyncAction::RemoveRouteResponse {
            route_uuid,
            route_response_uuid,
            ..
        } => m.remove_route_response(doc, route_uuid, route_response_uuid),
        SyncAction::UpdateRouteResponse {
            route_uuid,
            route_response_uuid,
            properties,
            ..
        } => m.update_route_response(doc, route_uuid, route_response_uuid, properties),

        SyncAction::AddFolder {
            folder, parent_id, ..
        } => m.add_folder(doc, folder, parent_id.as_deref()),
        SyncAction::RemoveFolder { folder_uuid, .. } => m.remove_folder(doc, folder_uuid),
        SyncAction::UpdateFolder {
            folder_uuid,
            properties,
            ..
        } => m.update_folder(doc, folder_uuid, properties),

        SyncAction::AddCallback { callback, .. } => m.add_callback(doc, callback),
        SyncAction::RemoveCallback { callback_uuid, .. } => m.remove_callback(doc, callback_uuid),
        SyncAction::UpdateCallback {
            callback_uuid,
            properties,
            ..
        } => m.update_callback(doc, callback_uuid, properties),

        SyncAction::AddDatabucket { databucket, .. } => m.add_databucket(doc, databucket),
        SyncAction::RemoveDatabucket {
            databucket_uuid, ..
        } => m.remove_databucket(doc, databucket_uuid),
        SyncAction::UpdateDatabucket {
            databucket_uuid,
            properties,
            ..
        } => m.update_databucket(doc, databucket_uuid, properties),

        SyncAction::ReorderRoutes { reorder_action, .. } => m.reorder_routes(doc, reorder_action),
        SyncAction::ReorderDatabuckets { reorder_action, .. } => {
            m.reorder_databuckets(doc, reorder_action)
        }
        SyncAction::ReorderCallbacks { reorder_action, .. } => {
            m.reorder_callbacks(doc, reorder_action)
        }
        SyncAction::ReorderRouteResponses {
            route_uuid,
            reorder_action,
            ..
        } => m.reorder_route_responses(doc, route_uuid, reorder_action),

        SyncAction::AddCloudEnvironment { .. }
        | SyncAction::RemoveCloudEnvironment { .. }
        | SyncAction::Unknown => doc.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutations::JsonMutations;
    use proptest::prelude::*;
    use serde_json::json;

    fn add(uuid: &str, timestamp: i64) -> SyncAction {
        SyncAction::AddCloudEnvironment {
            environment: json!({ "uuid": uuid, "name": "Demo" }),
            timestamp,
        }
    }

    fn rename(uuid: &str, name: &str, timestamp: i64) -> SyncAction {
        SyncAction::UpdateEnvironment {
            environment_uuid: uuid.to_string(),
            properties: json!({ "name": name }),
            timestamp,
        }
    }

    fn remove(uuid: &str, timestamp: i64) -> SyncAction {
        SyncAction::RemoveCloudEnvironment {
            environment_uuid: uuid.to_string(),
            timestamp,
        }
    }

    #[test]
    fn test_add_update_remove() {
        let lib = JsonMutations;
        let state = reduce(&StoreState::new(), &add("env-1", 1000), &lib);
        assert_eq!(state.len(), 1);
        assert_eq!(state.data[0].environment_uuid, "env-1");
        assert_eq!(state.data[0].id, "env-1");
        assert_eq!(state.data[0].timestamp, 1000);

        let state = reduce(&state, &rename("env-1", "Renamed", 2000), &lib);
        let record = state.get("env-1").unwrap();
        assert_eq!(record.environment["name"], "Renamed");
        assert_eq!(record.timestamp, 2000);

        let state = reduce(&state, &remove("env-1", 3000), &lib);
        assert!(state.is_empty());
    }

    #[test]
    fn test_input_state_untouched() {
        let lib = JsonMutations;
        let state = reduce(&StoreState::new(), &add("env-1", 1), &lib);
        let snapshot = state.clone();

        let _ = reduce(&state, &rename("env-1", "Changed", 2), &lib);

        assert_eq!(state, snapshot);
        assert_eq!(state.data[0].environment["name"], "Demo");
    }

    #[test]
    fn test_unrelated_records_shared() {
        let lib = JsonMutations;
        let state = reduce(&StoreState::new(), &add("env-1", 1), &lib);
        let state = reduce(&state, &add("env-2", 1), &lib);

        let next = reduce(&state, &rename("env-2", "Changed", 2), &lib);

        assert!(Arc::ptr_eq(&state.data[0], &next.data[0]));
        assert!(!Arc::ptr_eq(&state.data[1], &next.data[1]));
    }

    #[test]
    fn test_unknown_and_missing_are_noops() {
        let lib = JsonMutations;
        let state = reduce(&StoreState::new(), &add("env-1", 1), &lib);

        assert_eq!(reduce(&state, &SyncAction::Unknown, &lib), state);

        let next = reduce(&state, &rename("missing", "x", 5), &lib);
        assert_eq!(next, state);
        assert_eq!(next.data[0].timestamp, 1);
    }

    #[test]
    fn test_add_without_uuid_ignored() {
        let action = SyncAction::AddCloudEnvironment {
            environment: json!({ "name": "anonymous" }),
            timestamp: 1,
        };
        assert!(reduce(&StoreState::new(), &action, &JsonMutations).is_empty());
    }

    #[test]
    fn test_add_existing_replaces() {
        let lib = JsonMutations;
        let state = reduce(&StoreState::new(), &add("env-1", 1), &lib);
        let state = reduce(&state, &add("env-1", 2), &lib);
        assert_eq!(state.len(), 1);
        assert_eq!(state.data[0].timestamp, 2);
    }

    #[test]
    fn test_route_mutation_delegated() {
        let lib = JsonMutations;
        let state = reduce(&StoreState::new(), &add("env-1", 1), &lib);
        let action = SyncAction::AddRoute {
            environment_uuid: "env-1".to_string(),
            route: json!({ "uuid": "r1", "endpoint": "users" }),
            parent_id: None,
            timestamp: 7,
        };

        let state = reduce(&state, &action, &lib);
        let record = state.get("env-1").unwrap();
        assert_eq!(record.environment["routes"][0]["uuid"], "r1");
        assert_eq!(record.environment["rootChildren"][0]["uuid"], "r1");
        assert_eq!(record.timestamp, 7);
    }

    fn arb_action() -> impl Strategy<Value = SyncAction> {
        let uuid = prop::sample::select(vec!["a", "b", "c"]);
        prop_oneof![
            (uuid.clone(), 0i64..100).prop_map(|(u, t)| add(u, t)),
            (uuid.clone(), 0i64..100).prop_map(|(u, t)| remove(u, t)),
            (uuid, 0i64..100).prop_map(|(u, t)| rename(u, "n", t)),
            Just(SyncAction::Unknown),
        ]
    }

    proptest! {
        #[test]
        fn prop_uuids_stay_unique(actions in prop::collection::vec(arb_action(), 0..40)) {
            let lib = JsonMutations;
            let mut state = StoreState::new();
            for action in &actions {
                state = reduce(&state, action, &lib);
                prop_assert!(state.has_unique_uuids());
            }
        }
    }
}
