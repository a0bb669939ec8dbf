//! Key-presence diff between two snapshot payloads.
//!
//! A key present in the old payload and absent from the new one is a
//! breaking change. Value and type changes are not reported.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotDiff {
    /// Dotted paths of keys that disappeared.
    pub breaking_changes: Vec<String>,
    /// Dotted paths of keys that appeared.
    pub additions: Vec<String>,
    pub has_breaking_changes: bool,
}

pub fn compare_snapshots(old: &Value, new: &Value) -> SnapshotDiff {
    let mut breaking = Vec::new();
    let mut additions = Vec::new();
    walk(old, new, "", &mut breaking, &mut additions);
    breaking.sort();
    additions.sort();
    SnapshotDiff {
        has_breaking_changes: !breaking.is_empty(),
        breaking_changes: breaking,
        additions,
    }
}

fn walk(old: &Value, new: &Value, path: &str, breaking: &mut Vec<String>, additions: &mut Vec<String>) {
    let (Value::Object(old_map), Value::Object(new_map)) = (old, new) else {
        return;
    };
    for (key, old_value) in old_map {
        let child = if path.is_empty() {
            key.clone()
        } else {
            format!("{path}.{key}")
        };
        match new_map.get(key) {
            None => breaking.push(child),
            Some(new_value) => walk(old_value, new_value, &child, breaking, additions),
        }
    }
    for key in new_map.keys().filter(|k| !old_map.contains_key(*k)) {
        additions.push(if path.is_empty() {
            key.clone()
        } else {
            format!("{path}.{key}")
        });
    }
}
