//! Mutation actions accepted by the store.
//!
//! Actions arrive from the transport layer as JSON objects tagged by a
//! `type` field. Every variant except `ADD_CLOUD_ENVIRONMENT` names the
//! environment it applies to; all carry the caller-supplied `timestamp`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use envsync_common::document_uuid;

/// Where a reordered item lands relative to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReorderType {
    Before,
    After,
    /// Into the target container (a folder); only meaningful for routes.
    Inside,
}

/// Move one item of an ordered collection next to (or into) another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderAction {
    pub source_id: String,
    pub target_id: String,
    pub reorder_type: ReorderType,
    /// Folder currently holding the source; `None` for the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_parent_id: Option<String>,
    /// Folder holding the target; `None` for the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_parent_id: Option<String>,
}

/// A structured description of one state mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncAction {
    #[serde(rename_all = "camelCase")]
    AddCloudEnvironment { environment: Value, timestamp: i64 },

    #[serde(rename_all = "camelCase")]
    RemoveCloudEnvironment {
        environment_uuid: String,
        timestamp: i64,
    },

    #[serde(rename_all = "camelCase")]
    UpdateEnvironment {
        environment_uuid: String,
        properties: Value,
        timestamp: i64,
    },

    #[serde(rename_all = "camelCase")]
    AddRoute {
        environment_uuid: String,
        route: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<String>,
        timestamp: i64,
    },

    #[serde(rename_all = "camelCase")]
    RemoveRoute {
        environment_uuid: String,
        route_uuid: String,
        timestamp: i64,
    },

    #[serde(rename_all = "camelCase")]
    UpdateRoute {
        environment_uuid: String,
        route_uuid: String,
        properties: Value,
        timestamp: i64,
    },

    #[serde(rename_all = "camelCase")]
    AddRouteResponse {
        environment_uuid: String,
        route_uuid: String,
        route_response: Value,
        timestamp: i64,
    },

    #[serde(rename_all = "camelCase")]
    RemoveRouteResponse {
        environment_uuid: String,
        route_uuid: String,
        route_response_uuid: String,
        timestamp: i64,
    },

    #[serde(rename_all = "camelCase")]
    UpdateRouteResponse {
        environment_uuid: String,
        route_uuid: String,
        route_response_uuid: String,
        properties: Value,
        timestamp: i64,
    },

    #[serde(rename_all = "camelCase")]
    AddFolder {
        environment_uuid: String,
        folder: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<String>,
        timestamp: i64,
    },

    #[serde(rename_all = "camelCase")]
    RemoveFolder {
        environment_uuid: String,
        folder_uuid: String,
        timestamp: i64,
    },

    #[serde(rename_all = "camelCase")]
    UpdateFolder {
        environment_uuid: String,
        folder_uuid: String,
        properties: Value,
        timestamp: i64,
    },

    #[serde(rename_all = "camelCase")]
    AddCallback {
        environment_uuid: String,
        callback: Value,
        timestamp: i64,
    },

    #[serde(rename_all = "camelCase")]
    RemoveCallback {
        environment_uuid: String,
        callback_uuid: String,
        timestamp: i64,
    },

    #[serde(rename_all = "camelCase")]
    UpdateCallback {
        environment_uuid: String,
        callback_uuid: String,
        properties: Value,
        timestamp: i64,
    },

    #[serde(rename_all = "camelCase")]
    AddDatabucket {
        environment_uuid: String,
        databucket: Value,
        timestamp: i64,
    },

    #[serde(rename_all = "camelCase")]
    RemoveDatabucket {
        environment_uuid: String,
        databucket_uuid: String,
        timestamp: i64,
    },

    #[serde(rename_all = "camelCase")]
    UpdateDatabucket {
        environment_uuid: String,
        databucket_uuid: String,
        properties: Value,
        timestamp: i64,
    },

    #[serde(rename_all = "camelCase")]
    ReorderRoutes {
        environment_uuid: String,
        reorder_action: ReorderAction,
        timestamp: i64,
    },

    #[serde(rename_all = "camelCase")]
    ReorderDatabuckets {
        environment_uuid: String,
        reorder_action: ReorderAction,
        timestamp: i64,
    },

    #[serde(rename_all = "camelCase")]
    ReorderCallbacks {
        environment_uuid: String,
        reorder_action: ReorderAction,
        timestamp: i64,
    },

    #[serde(rename_all = "camelCase")]
    ReorderRouteResponses {
        environment_uuid: String,
        route_uuid: String,
        reorder_action: ReorderAction,
        timestamp: i64,
    },

    /// Any `type` this build does not know. Applying it is a no-op.
    #[serde(other)]
    Unknown,
}

impl SyncAction {
    /// Wire name of the action kind.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncAction::AddCloudEnvironment { .. } => "ADD_CLOUD_ENVIRONMENT",
            SyncAction::RemoveCloudEnvironment { .. } => "REMOVE_CLOUD_ENVIRONMENT",
            SyncAction::UpdateEnvironment { .. } => "UPDATE_ENVIRONMENT",
            SyncAction::AddRoute { .. } => "ADD_ROUTE",
            SyncAction::RemoveRoute { .. } => "REMOVE_ROUTE",
            SyncAction::UpdateRoute { .. } => "UPDATE_ROUTE",
            SyncAction::AddRouteResponse { .. } => "ADD_ROUTE_RESPONSE",
            SyncAction::RemoveRouteResponse { .. } => "REMOVE_ROUTE_RESPONSE",
            SyncAction::UpdateRouteResponse { .. } => "UPDATE_ROUTE_RESPONSE",
            SyncAction::AddFolder { .. } => "ADD_FOLDER",
            SyncAction::RemoveFolder { .. } => "REMOVE_FOLDER",
            SyncAction::UpdateFolder { .. } => "UPDATE_FOLDER",
            SyncAction::AddCallback { .. } => "ADD_CALLBACK",
            SyncAction::RemoveCallback { .. } => "REMOVE_CALLBACK",
            SyncAction::UpdateCallback { .. } => "UPDATE_CALLBACK",
            SyncAction::AddDatabucket { .. } => "ADD_DATABUCKET",
            SyncAction::RemoveDatabucket { .. } => "REMOVE_DATABUCKET",
            SyncAction::UpdateDatabucket { .. } => "UPDATE_DATABUCKET",
            SyncAction::ReorderRoutes { .. } => "REORDER_ROUTES",
            SyncAction::ReorderDatabuckets { .. } => "REORDER_DATABUCKETS",
            SyncAction::ReorderCallbacks { .. } => "REORDER_CALLBACKS",
            SyncAction::ReorderRouteResponses { .. } => "REORDER_ROUTE_RESPONSES",
            SyncAction::Unknown => "UNKNOWN",
        }
    }

    /// The `environmentUuid` field, for actions that carry one.
    ///
    /// `ADD_CLOUD_ENVIRONMENT` carries the whole document instead and
    /// returns `None` here.
    pub fn environment_uuid(&self) -> Option<&str> {
        match self {
            SyncAction::RemoveCloudEnvironment { environment_uuid, .. }
            | SyncAction::UpdateEnvironment { environment_uuid, .. }
            | SyncAction::AddRoute { environment_uuid, .. }
            | SyncAction::RemoveRoute { environment_uuid, .. }
            | SyncAction::UpdateRoute { environment_uuid, .. }
            | SyncAction::AddRouteResponse { environment_uuid, .. }
            | SyncAction::RemoveRouteResponse { environment_uuid, .. }
            | SyncAction::UpdateRouteResponse { environment_uuid, .. }
            | SyncAction::AddFolder { environment_uuid, .. }
            | SyncAction::RemoveFolder { environment_uuid, .. }
            | SyncAction::UpdateFolder { environment_uuid, .. }
            | SyncAction::AddCallback { environment_uuid, .. }
            | SyncAction::RemoveCallback { environment_uuid, .. }
            | SyncAction::UpdateCallback { environment_uuid, .. }
            | SyncAction::AddDatabucket { environment_uuid, .. }
            | SyncAction::RemoveDatabucket { environment_uuid, .. }
            | SyncAction::UpdateDatabucket { environment_uuid, .. }
            | SyncAction::ReorderRoutes { environment_uuid, .. }
            | SyncAction::ReorderDatabuckets { environment_uuid, .. }
            | SyncAction::ReorderCallbacks { environment_uuid, .. }
            | SyncAction::ReorderRouteResponses { environment_uuid, .. } => {
                Some(environment_uuid)
            }
            SyncAction::AddCloudEnvironment { .. } | SyncAction::Unknown => None,
        }
    }

    /// The environment this action affects, including the uuid of the
    /// document an `ADD_CLOUD_ENVIRONMENT` creates.
    pub fn affected_environment(&self) -> Option<String> {
        match self {
            SyncAction::AddCloudEnvironment { environment, .. } => document_uuid(environment),
            other => other.environment_uuid().map(str::to_string),
        }
    }

    /// The caller-supplied logical time.
    pub fn timestamp(&self) -> Option<i64> {
        match self {
            SyncAction::AddCloudEnvironment { timestamp, .. }
            | SyncAction::RemoveCloudEnvironment { timestamp, .. }
            | SyncAction::UpdateEnvironment { timestamp, .. }
            | SyncAction::AddRoute { timestamp, .. }
            | SyncAction::RemoveRoute { timestamp, .. }
            | SyncAction::UpdateRoute { timestamp, .. }
            | SyncAction::AddRouteResponse { timestamp, .. }
            | SyncAction::RemoveRouteResponse { timestamp, .. }
            | SyncAction::UpdateRouteResponse { timestamp, .. }
            | SyncAction::AddFolder { timestamp, .. }
            | SyncAction::RemoveFolder { timestamp, .. }
            | SyncAction::UpdateFolder { timestamp, .. }
            | SyncAction::AddCallback { timestamp, .. }
            | SyncAction::RemoveCallback { timestamp, .. }
            | SyncAction::UpdateCallback { timestamp, .. }
            | SyncAction::AddDatabucket { timestamp, .. }
            | SyncAction::RemoveDatabucket { timestamp, .. }
            | SyncAction::UpdateDatabucket { timestamp, .. }
            | SyncAction::ReorderRoutes { timestamp, .. }
            | SyncAction::ReorderDatabuckets { timestamp, .. }
            | SyncAction::ReorderCallbacks { timestamp, .. }
            | SyncAction::ReorderRouteResponses { timestamp, .. } => Some(*timestamp),
            SyncAction::Unknown => None,
        }
    }

    /// The innermost entity the action updates, for `UPDATE_*` kinds.
    pub fn updated_entity(&self) -> Option<&str> {
        match self {
            SyncAction::UpdateEnvironment { environment_uuid, .. } => Some(environment_uuid),
            SyncAction::UpdateRoute { route_uuid, .. } => Some(route_uuid),
            SyncAction::UpdateRouteResponse { route_response_uuid, .. } => {
                Some(route_response_uuid)
            }
            SyncAction::UpdateFolder { folder_uuid, .. } => Some(folder_uuid),
            SyncAction::UpdateCallback { callback_uuid, .. } => Some(callback_uuid),
            SyncAction::UpdateDatabucket { databucket_uuid, .. } => Some(databucket_uuid),
            _ => None,
        }
    }

    /// Parse an action from its JSON wire form.
    pub fn from_json(json: &str) -> envsync_common::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_add_cloud_environment() {
        let action = SyncAction::from_json(
            r#"{"type":"ADD_CLOUD_ENVIRONMENT","timestamp":1000,
                "environment":{"uuid":"env-1","name":"Demo"}}"#,
        )
        .unwrap();

        assert_eq!(action.kind(), "ADD_CLOUD_ENVIRONMENT");
        assert_eq!(action.environment_uuid(), None);
        assert_eq!(action.affected_environment().as_deref(), Some("env-1"));
        assert_eq!(action.timestamp(), Some(1000));
    }

    #[test]
    fn test_parse_update_route_response() {
        let action: SyncAction = serde_json::from_value(json!({
            "type": "UPDATE_ROUTE_RESPONSE",
            "environmentUuid": "env-1",
            "routeUuid": "route-1",
            "routeResponseUuid": "resp-1",
            "properties": {"statusCode": 404},
            "timestamp": 5
        }))
        .unwrap();

        assert_eq!(action.environment_uuid(), Some("env-1"));
        assert_eq!(action.updated_entity(), Some("resp-1"));
    }

    #[test]
    fn test_parse_reorder() {
        let action: SyncAction = serde_json::from_value(json!({
            "type": "REORDER_DATABUCKETS",
            "environmentUuid": "env-1",
            "reorderAction": {"sourceId": "a", "targetId": "b", "reorderType": "after"},
            "timestamp": 9
        }))
        .unwrap();

        match action {
            SyncAction::ReorderDatabuckets { reorder_action, .. } => {
                assert_eq!(reorder_action.reorder_type, ReorderType::After);
                assert!(reorder_action.source_parent_id.is_none());
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_parses() {
        let action = SyncAction::from_json(r#"{"type":"SOMETHING_NEW","timestamp":1}"#).unwrap();
        assert_eq!(action, SyncAction::Unknown);
        assert_eq!(action.environment_uuid(), None);
        assert_eq!(action.timestamp(), None);
    }

    #[test]
    fn test_serialized_tag_and_fields() {
        let action = SyncAction::RemoveCloudEnvironment {
            environment_uuid: "env-1".to_string(),
            timestamp: 3000,
        };
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "REMOVE_CLOUD_ENVIRONMENT",
                "environmentUuid": "env-1",
                "timestamp": 3000
            })
        );
    }

    #[test]
    fn test_missing_fields_rejected() {
        assert!(SyncAction::from_json(r#"{"type":"UPDATE_ROUTE","environmentUuid":"e"}"#).is_err());
    }
}
