// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Extraction of the fields a field manager owns, based on `metadata.managedFields`.
//!
//! The API server records every field set by a server-side apply in a `FieldsV1`
//! trie. Projecting an observed object through that trie yields exactly what the
//! manager last applied, without the defaults the server filled in.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ManagedFieldsEntry;
use serde_json::{Map, Value};

/// Find the fields trie recorded for `manager`'s apply operations.
pub fn applied_fields<'a>(entries: &'a [ManagedFieldsEntry], manager: &str) -> Option<&'a Value> {
    entries
        .iter()
        .filter(|e| e.manager.as_deref() == Some(manager))
        .filter(|e| e.operation.as_deref() == Some("Apply"))
        .find_map(|e| e.fields_v1.as_ref().map(|f| &f.0))
}

/// Project `observed` onto the `FieldsV1` trie in `fields`.
pub fn project(observed: &Value, fields: &Value) -> Value {
    match fields.as_object() {
        Some(children) if !is_leaf(children) => project_node(observed, children),
        // A leaf owns the whole value
        _ => observed.clone(),
    }
}

fn is_leaf(children: &Map<String, Value>) -> bool {
    children.keys().all(|k| k == ".")
}

fn project_node(observed: &Value, children: &Map<String, Value>) -> Value {
    match observed {
        Value::Object(object) => {
            let mut out = Map::new();
            for (path, sub) in children {
                let Some(field) = path.strip_prefix("f:") else {
                    continue;
                };
                if let Some(value) = object.get(field) {
                    out.insert(field.to_string(), project(value, sub));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .filter_map(|(index, item)| {
                    children
                        .iter()
                        .find(|(path, _)| element_matches(path, index, item))
                        .map(|(_, sub)| project(item, sub))
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Whether a list path element (`k:`, `v:` or `i:`) selects `item` at `index`.
fn element_matches(path: &str, index: usize, item: &Value) -> bool {
    if let Some(key) = path.strip_prefix("k:") {
        let Ok(Value::Object(key)) = serde_json::from_str::<Value>(key) else {
            return false;
        };
        return key.iter().all(|(k, v)| item.get(k) == Some(v));
    }
    if let Some(value) = path.strip_prefix("v:") {
        return serde_json::from_str::<Value>(value).is_ok_and(|v| &v == item);
    }
    if let Some(position) = path.strip_prefix("i:") {
        return position.parse::<usize>().is_ok_and(|p| p == index);
    }
    false
}
