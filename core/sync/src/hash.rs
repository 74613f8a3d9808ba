//! Deterministic action digests.
//!
//! An action is hashed over a canonical JSON rendering (object keys sorted
//! at every level, no whitespace), so two actions that differ only in key
//! order produce the same digest.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use envsync_common::Result;

use crate::action::SyncAction;

/// Hex-encoded BLAKE2b-256 digest of an action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionHash(String);

impl ActionHash {
    /// Get the hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Computes [`ActionHash`]es.
pub struct ActionHasher;

impl ActionHasher {
    /// Hash an action.
    ///
    /// # Errors
    /// - The action could not be serialized
    pub fn hash(action: &SyncAction) -> Result<ActionHash> {
        let value = serde_json::to_value(action)?;
        Ok(Self::hash_value(&value))
    }

    /// Hash an arbitrary JSON value with the same canonical rendering.
    pub fn hash_value(value: &Value) -> ActionHash {
        // serde_json::Map is a BTreeMap without the preserve_order feature,
        // so the compact rendering already has sorted keys.
        let canonical = value.to_string();

        let mut hasher = Blake2b::<U32>::new();
        hasher.update(canonical.as_bytes());
        ActionHash(format!("{:x}", hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn update(name: &str, timestamp: i64) -> SyncAction {
        SyncAction::UpdateEnvironment {
            environment_uuid: "env-1".to_string(),
            properties: json!({ "name": name }),
            timestamp,
        }
    }

    #[test]
    fn test_same_action_same_hash() {
        let a = ActionHasher::hash(&update("Renamed", 2000)).unwrap();
        let b = ActionHasher::hash(&update("Renamed", 2000)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_different_payload_different_hash() {
        let a = ActionHasher::hash(&update("Renamed", 2000)).unwrap();
        assert_ne!(a, ActionHasher::hash(&update("Renamed", 2001)).unwrap());
        assert_ne!(a, ActionHasher::hash(&update("Other", 2000)).unwrap());
    }

    #[test]
    fn test_canonical_rendering() {
        let value = json!({"b": [1, {"d": null, "c": "x"}], "a": true});
        assert_eq!(value.to_string(), r#"{"a":true,"b":[1,{"c":"x","d":null}]}"#);
        assert_eq!(
            ActionHasher::hash_value(&value),
            ActionHasher::hash_value(&json!({"a": true, "b": [1, {"c": "x", "d": null}]}))
        );
    }

    proptest! {
        #[test]
        fn prop_key_order_does_not_matter(
            entries in proptest::collection::btree_map("[a-z]{1,6}", any::<i32>(), 0..8)
        ) {
            let forward: serde_json::Map<String, Value> =
                entries.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
            let reversed: serde_json::Map<String, Value> =
                entries.iter().rev().map(|(k, v)| (k.clone(), json!(v))).collect();

            prop_assert_eq!(
                ActionHasher::hash_value(&Value::Object(forward)),
                ActionHasher::hash_value(&Value::Object(reversed))
            );
        }
    }
}
