//! Deterministic identifier naming and content hashing.
//!
//! PostgreSQL truncates identifiers longer than 63 bytes, which silently
//! merges distinct constraint names. Every generated name is therefore
//! bounded here:
//!
//! ```text
//! users_email_key                      -- short enough, used verbatim
//! account_memberships_a1b2c3d4_key     -- {table}_{digest}_{suffix}
//! ```
//!
//! The digest covers the full, uncapped candidate name, so two objects that
//! only differ past the truncation point still get different identifiers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Maximum identifier length accepted by PostgreSQL (`NAMEDATALEN - 1`).
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Length of the hex digest used when a name has to be shortened.
pub const DIGEST_LENGTH: usize = 8;

/// Separator between a content hash and the value it fingerprints.
pub const HASH_SEPARATOR: char = ':';

/// The kind of database object an identifier names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IdentifierKind {
    /// Primary key constraint.
    PrimaryKey,
    /// Unique constraint.
    Unique,
    /// Foreign key constraint.
    ForeignKey,
    /// Check constraint.
    Check,
    /// Index.
    Index,
    /// Trigger.
    Trigger,
}

impl IdentifierKind {
    /// Suffix appended to generated identifiers.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::PrimaryKey => "pkey",
            Self::Unique => "key",
            Self::ForeignKey => "fkey",
            Self::Check => "check",
            Self::Index => "idx",
            Self::Trigger => "trg",
        }
    }
}

/// A `from -> to` rename of a table or column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RenamePair {
    /// Name before the rename.
    pub from: String,
    /// Name after the rename.
    pub to: String,
}

impl RenamePair {
    /// Create a rename pair.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Build the identifier for an object of `kind` on `table` covering `columns`.
///
/// Pure: identical arguments always yield the identical identifier.
pub fn identifier(kind: IdentifierKind, table: &str, columns: &[&str]) -> String {
    let candidate = candidate_name(kind, table, columns);
    bounded(kind, table, &candidate, &digest(&candidate)[..DIGEST_LENGTH])
}

/// Recompute the identifier an object would carry after pending renames.
///
/// `columns` are the column names as they were before the renames.
pub fn renamed_identifier(
    kind: IdentifierKind,
    table: &str,
    columns: &[&str],
    column_renames: &[RenamePair],
) -> String {
    let renamed: Vec<&str> = columns
        .iter()
        .map(|column| {
            column_renames
                .iter()
                .find(|pair| pair.from == *column)
                .map(|pair| pair.to.as_str())
                .unwrap_or(*column)
        })
        .collect();
    identifier(kind, table, &renamed)
}

/// The full, uncapped `{table}_{columns}_{suffix}` name.
pub fn candidate_name(kind: IdentifierKind, table: &str, columns: &[&str]) -> String {
    if columns.is_empty() {
        format!("{}_{}", table, kind.suffix())
    } else {
        format!("{}_{}_{}", table, columns.join("_"), kind.suffix())
    }
}

/// Short content hash of a SQL fragment, used as a change fingerprint.
pub fn content_hash(content: &str) -> String {
    digest(content)[..DIGEST_LENGTH].to_string()
}

/// Prefix a value with its content hash (`hash:value`).
pub fn hashed(content: &str) -> String {
    format!("{}{}{}", content_hash(content), HASH_SEPARATOR, content)
}

/// Split a `hash:value` string. Values without a valid hash prefix are
/// returned unchanged with no hash.
pub fn split_hashed(value: &str) -> (Option<&str>, &str) {
    match value.split_once(HASH_SEPARATOR) {
        Some((hash, rest))
            if hash.len() == DIGEST_LENGTH && hash.chars().all(|c| c.is_ascii_hexdigit()) =>
        {
            (Some(hash), rest)
        }
        _ => (None, value),
    }
}

fn digest(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

fn bounded(kind: IdentifierKind, table: &str, candidate: &str, digest: &str) -> String {
    if candidate.len() <= MAX_IDENTIFIER_LENGTH {
        return candidate.to_string();
    }
    digested(kind, table, digest)
}

/// `{table}_{digest}_{suffix}`, with the table part cut to fit.
fn digested(kind: IdentifierKind, table: &str, digest: &str) -> String {
    let reserved = digest.len() + kind.suffix().len() + 2;
    let mut table_part = table;
    if table_part.len() + reserved > MAX_IDENTIFIER_LENGTH {
        let mut end = MAX_IDENTIFIER_LENGTH.saturating_sub(reserved);
        while !table_part.is_char_boundary(end) {
            end -= 1;
        }
        table_part = &table_part[..end];
    }
    format!("{}_{}_{}", table_part, digest, kind.suffix())
}

/// Hands out identifiers for one diff run and guarantees that two different
/// candidate names never end up with the same final identifier.
///
/// Names of objects the run does not create are [reserved](Self::reserve)
/// first. When a name is already taken the digested form is used, widening
/// the digest until the name is free.
#[derive(Debug, Default)]
pub struct IdentifierAllocator {
    /// Final identifier to the candidate it was allocated for; `None` for
    /// reserved names.
    assigned: HashMap<String, Option<String>>,
}

impl IdentifierAllocator {
    /// Create an empty allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an existing name as taken. Returns `false` when the name was
    /// already allocated to a generated identifier.
    pub fn reserve(&mut self, name: &str) -> bool {
        match self.assigned.get(name) {
            Some(Some(_)) => false,
            Some(None) => true,
            None => {
                self.assigned.insert(name.to_string(), None);
                true
            }
        }
    }

    /// Allocate the identifier for an object.
    pub fn allocate(&mut self, kind: IdentifierKind, table: &str, columns: &[&str]) -> String {
        self.allocate_with(kind, table, columns, digest)
    }

    fn allocate_with(
        &mut self,
        kind: IdentifierKind,
        table: &str,
        columns: &[&str],
        digest_fn: impl Fn(&str) -> String,
    ) -> String {
        let candidate = candidate_name(kind, table, columns);
        let full_digest = digest_fn(&candidate);

        let mut width = DIGEST_LENGTH.min(full_digest.len());
        let mut name = bounded(kind, table, &candidate, &full_digest[..width]);
        while self.is_taken(&name, &candidate) && width < full_digest.len() {
            width = (width + 4).min(full_digest.len());
            name = digested(kind, table, &full_digest[..width]);
        }
        self.assigned.insert(name.clone(), Some(candidate));
        name
    }

    fn is_taken(&self, name: &str, candidate: &str) -> bool {
        match self.assigned.get(name) {
            Some(Some(owner)) => owner != candidate,
            Some(None) => true,
            None => false,
        }
    }

    /// Number of names taken so far, reserved ones included.
    pub fn len(&self) -> usize {
        self.assigned.len()
    }

    /// Whether no name has been taken yet.
    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }
}
