//! Structural mutators for environment documents.
//!
//! The store treats environment documents as opaque. Every structural
//! change goes through a [`MutationLibrary`], which takes a document and
//! returns a new one without touching the input.

use std::collections::HashSet;

use serde_json::{json, Value};

use crate::action::{ReorderAction, ReorderType};

/// One pure function per structural operation.
///
/// Implementations must be total: an operation naming an entity that does
/// not exist returns the document unchanged rather than failing.
pub trait MutationLibrary: Send + Sync {
    fn update_environment(&self, environment: &Value, properties: &Value) -> Value;

    fn add_route(&self, environment: &Value, route: &Value, parent_id: Option<&str>) -> Value;
    fn remove_route(&self, environment: &Value, route_uuid: &str) -> Value;
    fn update_route(&self, environment: &Value, route_uuid: &str, properties: &Value) -> Value;

    fn add_route_response(&self, environment: &Value, route_uuid: &str, response: &Value) -> Value;
    fn remove_route_response(
        &self,
        environment: &Value,
        route_uuid: &str,
        response_uuid: &str,
    ) -> Value;
    fn update_route_response(
        &self,
        environment: &Value,
        route_uuid: &str,
        response_uuid: &str,
        properties: &Value,
    ) -> Value;

    fn add_folder(&self, environment: &Value, folder: &Value, parent_id: Option<&str>) -> Value;
    fn remove_folder(&self, environment: &Value, folder_uuid: &str) -> Value;
    fn update_folder(&self, environment: &Value, folder_uuid: &str, properties: &Value) -> Value;

    fn add_callback(&self, environment: &Value, callback: &Value) -> Value;
    fn remove_callback(&self, environment: &Value, callback_uuid: &str) -> Value;
    fn update_callback(&self, environment: &Value, callback_uuid: &str, properties: &Value)
        -> Value;

    fn add_databucket(&self, environment: &Value, databucket: &Value) -> Value;
    fn remove_databucket(&self, environment: &Value, databucket_uuid: &str) -> Value;
    fn update_databucket(
        &self,
        environment: &Value,
        databucket_uuid: &str,
        properties: &Value,
    ) -> Value;

    fn reorder_routes(&self, environment: &Value, reorder: &ReorderAction) -> Value;
    fn reorder_databuckets(&self, environment: &Value, reorder: &ReorderAction) -> Value;
    fn reorder_callbacks(&self, environment: &Value, reorder: &ReorderAction) -> Value;
    fn reorder_route_responses(
        &self,
        environment: &Value,
        route_uuid: &str,
        reorder: &ReorderAction,
    ) -> Value;
}

const ROUTES: &str = "routes";
const RESPONSES: &str = "responses";
const FOLDERS: &str = "folders";
const CHILDREN: &str = "children";
const ROOT_CHILDREN: &str = "rootChildren";
const CALLBACKS: &str = "callbacks";
const DATABUCKETS: &str = "data";

/// Mutation library over mock-API environment documents.
///
/// Documents are JSON objects holding flat `routes`, `folders`, `callbacks`
/// and `data` arrays of uuid-keyed objects. The route tree is described by
/// `rootChildren` and each folder's `children`, lists of
/// `{"type": "route" | "folder", "uuid": ...}` references.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMutations;

fn uuid_of(item: &Value) -> Option<&str> {
    item.get("uuid").and_then(Value::as_str)
}

fn array_mut<'a>(doc: &'a mut Value, key: &str) -> Option<&'a mut Vec<Value>> {
    doc.get_mut(key).and_then(Value::as_array_mut)
}

/// Get an array field, creating it when missing. `None` if `doc` is not an
/// object or the field holds something else.
fn array_or_default<'a>(doc: &'a mut Value, key: &str) -> Option<&'a mut Vec<Value>> {
    let object = doc.as_object_mut()?;
    object
        .entry(key.to_string())
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
}

fn find_mut<'a>(items: &'a mut [Value], uuid: &str) -> Option<&'a mut Value> {
    items.iter_mut().find(|item| uuid_of(item) == Some(uuid))
}

/// Shallow-merge `properties` into `target`. The `uuid` key is never
/// overwritten.
fn merge(target: &mut Value, properties: &Value) {
    let (Some(target), Some(properties)) = (target.as_object_mut(), properties.as_object()) else {
        return;
    };
    for (key, value) in properties {
        if key != "uuid" {
            target.insert(key.clone(), value.clone());
        }
    }
}

fn add_item(doc: &Value, key: &str, item: &Value) -> Value {
    let mut next = doc.clone();
    if let Some(items) = array_or_default(&mut next, key) {
        items.push(item.clone());
    }
    next
}

fn remove_item(doc: &Value, key: &str, uuid: &str) -> Value {
    let mut next = doc.clone();
    if let Some(items) = array_mut(&mut next, key) {
        items.retain(|item| uuid_of(item) != Some(uuid));
    }
    next
}

fn update_item(doc: &Value, key: &str, uuid: &str, properties: &Value) -> Value {
    let mut next = doc.clone();
    if let Some(item) = array_mut(&mut next, key).and_then(|items| find_mut(items, uuid)) {
        merge(item, properties);
    }
    next
}

fn position_of(items: &[Value], uuid: &str) -> Option<usize> {
    items.iter().position(|item| uuid_of(item) == Some(uuid))
}

/// Move `source_id` before or after `target_id` within one list.
fn move_within(items: &mut Vec<Value>, reorder: &ReorderAction) {
    if reorder.source_id == reorder.target_id || position_of(items, &reorder.target_id).is_none() {
        return;
    }
    let Some(source_index) = position_of(items, &reorder.source_id) else {
        return;
    };

    let moved = items.remove(source_index);
    let Some(target_index) = position_of(items, &reorder.target_id) else {
        items.insert(source_index, moved);
        return;
    };
    let insert_at = match reorder.reorder_type {
        ReorderType::Before => target_index,
        ReorderType::After | ReorderType::Inside => target_index + 1,
    };
    items.insert(insert_at, moved);
}

fn reorder_items(doc: &Value, key: &str, reorder: &ReorderAction) -> Value {
    let mut next = doc.clone();
    if let Some(items) = array_mut(&mut next, key) {
        move_within(items, reorder);
    }
    next
}

fn child_ref(kind: &str, uuid: &str) -> Value {
    json!({ "type": kind, "uuid": uuid })
}

/// The children list of a folder, or `rootChildren` when `parent` is `None`.
fn container_mut<'a>(doc: &'a mut Value, parent: Option<&str>) -> Option<&'a mut Vec<Value>> {
    match parent {
        None => array_or_default(doc, ROOT_CHILDREN),
        Some(folder_uuid) => {
            let folder = array_mut(doc, FOLDERS).and_then(|f| find_mut(f, folder_uuid))?;
            array_or_default(folder, CHILDREN)
        }
    }
}

/// Remove every reference to `uuid` from the root and all folders.
fn detach_everywhere(doc: &mut Value, uuid: &str) {
    if let Some(root) = array_mut(doc, ROOT_CHILDREN) {
        root.retain(|child| uuid_of(child) != Some(uuid));
    }
    if let Some(folders) = array_mut(doc, FOLDERS) {
        for folder in folders.iter_mut() {
            if let Some(children) = array_mut(folder, CHILDREN) {
                children.retain(|child| uuid_of(child) != Some(uuid));
            }
        }
    }
}

/// Insert an item and reference it from its parent (or the root when the
/// parent is absent or unknown).
fn add_tree_item(
    doc: &Value,
    key: &str,
    kind: &str,
    item: &Value,
    parent_id: Option<&str>,
) -> Value {
    let Some(uuid) = uuid_of(item) else {
        return doc.clone();
    };
    let mut next = add_item(doc, key, item);

    let reference = child_ref(kind, uuid);
    match container_mut(&mut next, parent_id) {
        Some(children) => children.push(reference),
        None => {
            if let Some(root) = array_or_default(&mut next, ROOT_CHILDREN) {
                root.push(reference);
            }
        }
    }
    next
}

/// Uuids of the folder and every folder nested below it. Stops on cycles.
fn folder_subtree(doc: &Value, folder_uuid: &str) -> HashSet<String> {
    let mut seen = HashSet::new();
    let mut pending = vec![folder_uuid.to_string()];

    while let Some(uuid) = pending.pop() {
        if !seen.insert(uuid.clone()) {
            continue;
        }
        let children = doc
            .get(FOLDERS)
            .and_then(Value::as_array)
            .and_then(|folders| folders.iter().find(|f| uuid_of(f) == Some(uuid.as_str())))
            .and_then(|folder| folder.get(CHILDREN))
            .and_then(Value::as_array);
        for child in children.into_iter().flatten() {
            if child.get("type").and_then(Value::as_str) == Some("folder") {
                if let Some(child_uuid) = uuid_of(child) {
                    pending.push(child_uuid.to_string());
                }
            }
        }
    }
    seen
}

/// Remove a folder, its reference, and everything nested inside it.
fn remove_folder_recursive(doc: &mut Value, folder_uuid: &str) {
    let folders = folder_subtree(doc, folder_uuid);

    let routes: HashSet<String> = doc
        .get(FOLDERS)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|folder| uuid_of(folder).is_some_and(|uuid| folders.contains(uuid)))
        .filter_map(|folder| folder.get(CHILDREN).and_then(Value::as_array))
        .flatten()
        .filter(|child| child.get("type").and_then(Value::as_str) == Some("route"))
        .filter_map(|child| uuid_of(child).map(str::to_string))
        .collect();

    if let Some(items) = array_mut(doc, ROUTES) {
        items.retain(|route| !uuid_of(route).is_some_and(|uuid| routes.contains(uuid)));
    }
    if let Some(items) = array_mut(doc, FOLDERS) {
        items.retain(|folder| !uuid_of(folder).is_some_and(|uuid| folders.contains(uuid)));
    }
    for uuid in &folders {
        detach_everywhere(doc, uuid);
    }
}

impl MutationLibrary for JsonMutations {
    fn update_environment(&self, environment: &Value, properties: &Value) -> Value {
        let mut next = environment.clone();
        merge(&mut next, properties);
        next
    }

    fn add_route(&self, environment: &Value, route: &Value, parent_id: Option<&str>) -> Value {
        add_tree_item(environment, ROUTES, "route", route, parent_id)
    }

    fn remove_route(&self, environment: &Value, route_uuid: &str) -> Value {
        let mut next = remove_item(environment, ROUTES, route_uuid);
        detach_everywhere(&mut next, route_uuid);
        next
    }

    fn update_route(&self, environment: &Value, route_uuid: &str, properties: &Value) -> Value {
        update_item(environment, ROUTES, route_uuid, properties)
    }

    fn add_route_response(&self, environment: &Value, route_uuid: &str, response: &Value) -> Value {
        let mut next = environment.clone();
        if let Some(route) = array_mut(&mut next, ROUTES).and_then(|r| find_mut(r, route_uuid)) {
            *route = add_item(route, RESPONSES, response);
        }
        next
    }

    fn remove_route_response(
        &self,
        environment: &Value,
        route_uuid: &str,
        response_uuid: &str,
    ) -> Value {
        let mut next = environment.clone();
        if let Some(route) = array_mut(&mut next, ROUTES).and_then(|r| find_mut(r, route_uuid)) {
            *route = remove_item(route, RESPONSES, response_uuid);
        }
        next
    }

    fn update_route_response(
        &self,
        environment: &Value,
        route_uuid: &str,
        response_uuid: &str,
        properties: &Value,
    ) -> Value {
        let mut next = environment.clone();
        if let Some(route) = array_mut(&mut next, ROUTES).and_then(|r| find_mut(r, route_uuid)) {
            *route = update_item(route, RESPONSES, response_uuid, properties);
        }
        next
    }

    fn add_folder(&self, environment: &Value, folder: &Value, parent_id: Option<&str>) -> Value {
        add_tree_item(environment, FOLDERS, "folder", folder, parent_id)
    }

    fn remove_folder(&self, environment: &Value, folder_uuid: &str) -> Value {
        let mut next = environment.clone();
        remove_folder_recursive(&mut next, folder_uuid);
        next
    }

    fn update_folder(&self, environment: &Value, folder_uuid: &str, properties: &Value) -> Value {
        update_item(environment, FOLDERS, folder_uuid, properties)
    }

    fn add_callback(&self, environment: &Value, callback: &Value) -> Value {
        add_item(environment, CALLBACKS, callback)
    }

    fn remove_callback(&self, environment: &Value, callback_uuid: &str) -> Value {
        remove_item(environment, CALLBACKS, callback_uuid)
    }

    fn update_callback(
        &self,
        environment: &Value,
        callback_uuid: &str,
        properties: &Value,
    ) -> Value {
        update_item(environment, CALLBACKS, callback_uuid, properties)
    }

    fn add_databucket(&self, environment: &Value, databucket: &Value) -> Value {
        add_item(environment, DATABUCKETS, databucket)
    }

    fn remove_databucket(&self, environment: &Value, databucket_uuid: &str) -> Value {
        remove_item(environment, DATABUCKETS, databucket_uuid)
    }

    fn update_databucket(
        &self,
        environment: &Value,
        databucket_uuid: &str,
        properties: &Value,
    ) -> Value {
        update_item(environment, DATABUCKETS, databucket_uuid, properties)
    }

    fn reorder_routes(&self, environment: &Value, reorder: &ReorderAction) -> Value {
        if reorder.source_id == reorder.target_id {
            return environment.clone();
        }
        // A folder cannot move into itself or below one of its descendants.
        let destination = match reorder.reorder_type {
            ReorderType::Inside => Some(reorder.target_id.as_str()),
            ReorderType::Before | ReorderType::After => reorder.target_parent_id.as_deref(),
        };
        if let Some(destination) = destination {
            if folder_subtree(environment, &reorder.source_id).contains(destination) {
                return environment.clone();
            }
        }
        let mut next = environment.clone();

        // Take the source reference out of its current container.
        let source_ref = container_mut(&mut next, reorder.source_parent_id.as_deref())
            .and_then(|children| {
                let index = position_of(children, &reorder.source_id)?;
                Some(children.remove(index))
            });
        let Some(source_ref) = source_ref else {
            return environment.clone();
        };

        let placed = match reorder.reorder_type {
            ReorderType::Inside => container_mut(&mut next, Some(reorder.target_id.as_str()))
                .map(|children| children.push(source_ref))
                .is_some(),
            ReorderType::Before | ReorderType::After => {
                container_mut(&mut next, reorder.target_parent_id.as_deref())
                    .and_then(|children| {
                        let index = position_of(children, &reorder.target_id)?;
                        let at = if reorder.reorder_type == ReorderType::Before {
                            index
                        } else {
                            index + 1
                        };
                        children.insert(at, source_ref);
                        Some(())
                    })
                    .is_some()
            }
        };

        if placed {
            next
        } else {
            environment.clone()
        }
    }

    fn reorder_databuckets(&self, environment: &Value, reorder: &ReorderAction) -> Value {
        reorder_items(environment, DATABUCKETS, reorder)
    }

    fn reorder_callbacks(&self, environment: &Value, reorder: &ReorderAction) -> Value {
        reorder_items(environment, CALLBACKS, reorder)
    }

    fn reorder_route_responses(
        &self,
        environment: &Value,
        route_uuid: &str,
        reorder: &ReorderAction,
    ) -> Value {
        let mut next = environment.clone();
        if let Some(route) = array_mut(&mut next, ROUTES).and_then(|r| find_mut(r, route_uuid)) {
            *route = reorder_items(route, RESPONSES, reorder);
        }
        next
    }
}
