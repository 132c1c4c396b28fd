//! Structural diffing of schema snapshots.
//!
//! Snapshots are compared as generic JSON trees. Every leaf value that differs
//! becomes a `Change`, and every subtree present on only one side becomes a
//! single `Create` or `Remove` carrying the whole subtree. The path of an
//! entry encodes what changed:
//!
//! ```text
//! CREATE  table.users                          (whole table)
//! CHANGE  table.users.columns.email.isNullable (one column field)
//! REMOVE  uniqueConstraints.users.users_email_key
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use monolayer_schema::SchemaSnapshot;

use crate::error::MigrateResult;

/// Kind of a raw diff entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiffKind {
    /// Present only in the declared snapshot.
    Create,
    /// Present only in the actual snapshot.
    Remove,
    /// Present in both with a different leaf value.
    Change,
}

impl std::fmt::Display for DiffKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => f.write_str("CREATE"),
            Self::Remove => f.write_str("REMOVE"),
            Self::Change => f.write_str("CHANGE"),
        }
    }
}

/// A path-addressed difference between two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDiffEntry {
    /// Kind of difference.
    pub kind: DiffKind,
    /// Keys from the snapshot root to the differing value.
    pub path: Vec<String>,
    /// Declared value (`Create`, `Change`).
    pub value: Option<Value>,
    /// Actual value (`Remove`, `Change`).
    pub old_value: Option<Value>,
}

impl RawDiffEntry {
    /// Create a `Create` entry.
    pub fn create(path: &[&str], value: Value) -> Self {
        Self {
            kind: DiffKind::Create,
            path: path.iter().map(|p| p.to_string()).collect(),
            value: Some(value),
            old_value: None,
        }
    }

    /// Create a `Remove` entry.
    pub fn remove(path: &[&str], old_value: Value) -> Self {
        Self {
            kind: DiffKind::Remove,
            path: path.iter().map(|p| p.to_string()).collect(),
            value: None,
            old_value: Some(old_value),
        }
    }

    /// Create a `Change` entry.
    pub fn change(path: &[&str], value: Value, old_value: Value) -> Self {
        Self {
            kind: DiffKind::Change,
            path: path.iter().map(|p| p.to_string()).collect(),
            value: Some(value),
            old_value: Some(old_value),
        }
    }

    /// Path segment at `index`.
    pub fn segment(&self, index: usize) -> Option<&str> {
        self.path.get(index).map(String::as_str)
    }
}

/// Diff two JSON trees. `old` is the actual state, `new` the declared one.
pub fn diff(old: &Value, new: &Value) -> Vec<RawDiffEntry> {
    let mut entries = Vec::new();
    let mut path = Vec::new();
    diff_into(old, new, &mut path, &mut entries);
    entries
}

/// Diff an actual snapshot against a declared one.
pub fn diff_snapshots(
    actual: &SchemaSnapshot,
    declared: &SchemaSnapshot,
) -> MigrateResult<Vec<RawDiffEntry>> {
    let entries = diff(&actual.to_value()?, &declared.to_value()?);
    debug!(entries = entries.len(), schema = %declared.schema_name, "Computed snapshot diff");
    Ok(entries)
}

fn diff_into(old: &Value, new: &Value, path: &mut Vec<String>, out: &mut Vec<RawDiffEntry>) {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (key, old_child) in old_map {
                path.push(key.clone());
                match new_map.get(key) {
                    Some(new_child) => diff_into(old_child, new_child, path, out),
                    None => out.push(RawDiffEntry {
                        kind: DiffKind::Remove,
                        path: path.clone(),
                        value: None,
                        old_value: Some(old_child.clone()),
                    }),
                }
                path.pop();
            }
            for (key, new_child) in new_map {
                if !old_map.contains_key(key) {
                    path.push(key.clone());
                    out.push(RawDiffEntry {
                        kind: DiffKind::Create,
                        path: path.clone(),
                        value: Some(new_child.clone()),
                        old_value: None,
                    });
                    path.pop();
                }
            }
        }
        _ if old != new => out.push(RawDiffEntry {
            kind: DiffKind::Change,
            path: path.clone(),
            value: Some(new.clone()),
            old_value: Some(old.clone()),
        }),
        _ => {}
    }
}
