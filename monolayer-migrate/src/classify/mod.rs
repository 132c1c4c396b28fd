//! Classification of raw diff entries into semantic operations.
//!
//! Every entry is decoded once into a [`DecodedEntry`] and then offered to
//! an ordered list of classifiers for its subject. The first classifier that
//! matches decides the outcome. Classifiers are pure functions of the entry
//! and the [`RenameIntentContext`]; the predicates of one list are pairwise
//! exclusive, so the order only matters for readability.
//!
//! An entry that no classifier recognizes is a planning error. Entries that
//! are deliberately ignored are reported as [`Classification::Suppressed`]
//! so nothing disappears silently.

mod column;
mod namespace;
mod object;
mod table;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use monolayer_schema::Category;

use crate::context::RenameIntentContext;
use crate::differ::{DiffKind, RawDiffEntry};
use crate::error::{MigrateResult, MigrationError};
use crate::operation::{ObjectKind, SchemaOperation};

/// Why an entry produced no operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SuppressReason {
    /// The other half of a rename pair.
    RenamePartner,
    /// Object of a table that is dropped as a whole.
    DroppedTable,
    /// Definition only differs by names a rename already changes.
    RenameRipple,
    /// Detail field implied by the column data type.
    CoveredByDataType,
    /// Default expression with an unchanged content hash.
    FormattingOnly,
}

/// Result of a successful classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// The entry becomes an operation.
    Operation(SchemaOperation),
    /// The entry is intentionally ignored.
    Suppressed(SuppressReason),
}

/// Column fields that can change individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnField {
    /// `dataType`
    DataType,
    /// `isNullable`
    IsNullable,
    /// `defaultValue`, a `hash:expression` string.
    DefaultValue,
    /// `identity`
    Identity,
    /// `numericPrecision`, implied by the data type.
    NumericPrecision,
    /// `numericScale`, implied by the data type.
    NumericScale,
    /// `characterMaximumLength`, implied by the data type.
    CharacterMaximumLength,
    /// `datetimePrecision`, implied by the data type.
    DatetimePrecision,
    /// `enum` flag.
    Enum,
}

impl ColumnField {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "dataType" => Some(Self::DataType),
            "isNullable" => Some(Self::IsNullable),
            "defaultValue" => Some(Self::DefaultValue),
            "identity" => Some(Self::Identity),
            "numericPrecision" => Some(Self::NumericPrecision),
            "numericScale" => Some(Self::NumericScale),
            "characterMaximumLength" => Some(Self::CharacterMaximumLength),
            "datetimePrecision" => Some(Self::DatetimePrecision),
            "enum" => Some(Self::Enum),
            _ => None,
        }
    }
}

/// What a diff entry addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject<'e> {
    /// `table.T`
    Table { table: &'e str },
    /// `table.T.columns.C`
    Column { table: &'e str, column: &'e str },
    /// `table.T.columns.C.field`
    ColumnField {
        table: &'e str,
        column: &'e str,
        field: ColumnField,
    },
    /// `<category>.T`: every object of a kind on a table.
    TableObjects { kind: ObjectKind, table: &'e str },
    /// `<category>.T.name`
    Object {
        kind: ObjectKind,
        table: &'e str,
        name: &'e str,
    },
    /// `enums.name`
    Enum { name: &'e str },
    /// `extensions.name`
    Extension { name: &'e str },
    /// `schemaInfo.name`
    Schema { name: &'e str },
}

/// A raw entry decoded into a typed subject.
#[derive(Debug, Clone, Copy)]
pub struct DecodedEntry<'e> {
    /// Diff kind.
    pub kind: DiffKind,
    /// Addressed subject.
    pub subject: Subject<'e>,
    /// Underlying raw entry.
    pub raw: &'e RawDiffEntry,
}

impl<'e> DecodedEntry<'e> {
    /// Decode a raw entry. Returns `None` for paths of unknown shape.
    pub fn decode(raw: &'e RawDiffEntry) -> Option<Self> {
        let segments: Vec<&str> = raw.path.iter().map(String::as_str).collect();
        let category = Category::from_key(segments.first()?)?;

        let subject = match (category, segments.as_slice()) {
            (Category::Table, &[_, table]) => Subject::Table { table },
            (Category::Table, &[_, table, "columns", column]) => Subject::Column { table, column },
            (Category::Table, &[_, table, "columns", column, field]) => Subject::ColumnField {
                table,
                column,
                field: ColumnField::from_key(field)?,
            },
            (Category::Enums, &[_, name]) => Subject::Enum { name },
            (Category::Extensions, &[_, name]) => Subject::Extension { name },
            (Category::SchemaInfo, &[_, name]) => Subject::Schema { name },
            (category, &[_, table]) => Subject::TableObjects {
                kind: ObjectKind::from_category(category)?,
                table,
            },
            (category, &[_, table, name]) => Subject::Object {
                kind: ObjectKind::from_category(category)?,
                table,
                name,
            },
            _ => return None,
        };

        Some(Self {
            kind: raw.kind,
            subject,
            raw,
        })
    }

    /// Declared value as a string.
    pub fn value_str(&self) -> Option<&'e str> {
        self.raw.value.as_ref().and_then(Value::as_str)
    }

    /// Actual value as a string.
    pub fn old_value_str(&self) -> Option<&'e str> {
        self.raw.old_value.as_ref().and_then(Value::as_str)
    }

    /// Whether the declared value is absent or JSON null.
    pub fn value_is_null(&self) -> bool {
        self.raw.value.as_ref().is_none_or(Value::is_null)
    }

    /// Whether the actual value is absent or JSON null.
    pub fn old_value_is_null(&self) -> bool {
        self.raw.old_value.as_ref().is_none_or(Value::is_null)
    }
}

/// A classifier function.
pub type ClassifyFn = fn(&DecodedEntry<'_>, &RenameIntentContext<'_>) -> Option<Classification>;

/// A named classifier.
#[derive(Clone, Copy)]
pub struct Classifier {
    /// Name used in logs and tests.
    pub name: &'static str,
    /// Classifier function.
    pub classify: ClassifyFn,
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier").field("name", &self.name).finish()
    }
}

/// Classifiers responsible for a subject, in evaluation order.
pub fn classifiers_for(subject: &Subject<'_>) -> &'static [Classifier] {
    match subject {
        Subject::Table { .. } => table::CLASSIFIERS,
        Subject::Column { .. } | Subject::ColumnField { .. } => column::CLASSIFIERS,
        Subject::TableObjects { .. } | Subject::Object { .. } => object::CLASSIFIERS,
        Subject::Enum { .. } => namespace::ENUM_CLASSIFIERS,
        Subject::Extension { .. } => namespace::EXTENSION_CLASSIFIERS,
        Subject::Schema { .. } => namespace::SCHEMA_CLASSIFIERS,
    }
}

/// Classify one entry. `None` means no classifier recognized it.
pub fn classify(raw: &RawDiffEntry, ctx: &RenameIntentContext<'_>) -> Option<Classification> {
    let entry = DecodedEntry::decode(raw)?;
    classifiers_for(&entry.subject).iter().find_map(|classifier| {
        let outcome = (classifier.classify)(&entry, ctx);
        if outcome.is_some() {
            trace!(classifier = classifier.name, path = %raw.path.join("."), "Classified diff entry");
        }
        outcome
    })
}

/// Names of every classifier matching an entry. Used to check exclusivity.
pub fn matching_classifiers(raw: &RawDiffEntry, ctx: &RenameIntentContext<'_>) -> Vec<&'static str> {
    let Some(entry) = DecodedEntry::decode(raw) else {
        return Vec::new();
    };
    classifiers_for(&entry.subject)
        .iter()
        .filter(|classifier| (classifier.classify)(&entry, ctx).is_some())
        .map(|classifier| classifier.name)
        .collect()
}

/// Operations and suppressed entries of a classified diff.
#[derive(Debug, Clone, Default)]
pub struct ClassifiedDiff {
    /// Recognized operations, in diff order.
    pub operations: Vec<SchemaOperation>,
    /// Entries that intentionally produced no operation.
    pub suppressed: Vec<(RawDiffEntry, SuppressReason)>,
}

impl ClassifiedDiff {
    /// Append another classified diff.
    pub fn extend(&mut self, other: ClassifiedDiff) {
        self.operations.extend(other.operations);
        self.suppressed.extend(other.suppressed);
    }
}

/// Classify every entry; any unrecognized entry fails the whole run.
pub fn classify_all(
    entries: &[RawDiffEntry],
    ctx: &RenameIntentContext<'_>,
) -> MigrateResult<ClassifiedDiff> {
    let mut classified = ClassifiedDiff::default();
    let mut unclassified = Vec::new();

    for entry in entries {
        match classify(entry, ctx) {
            Some(Classification::Operation(op)) => classified.operations.push(op),
            Some(Classification::Suppressed(reason)) => {
                classified.suppressed.push((entry.clone(), reason))
            }
            None => unclassified.push(entry.clone()),
        }
    }

    if !unclassified.is_empty() {
        return Err(MigrationError::UnclassifiedDiff {
            entries: unclassified,
        });
    }

    debug!(
        operations = classified.operations.len(),
        suppressed = classified.suppressed.len(),
        "Classified diff entries"
    );
    Ok(classified)
}

/// Classify every pass of a diff run between two snapshots.
#[cfg(test)]
pub(crate) fn classify_snapshots(
    local: &monolayer_schema::SchemaSnapshot,
    remote: &monolayer_schema::SchemaSnapshot,
) -> MigrateResult<ClassifiedDiff> {
    let ctx = RenameIntentContext::new(local, remote)?;
    let mut classified = ClassifiedDiff::default();
    for pass in crate::planner::DiffPass::ALL {
        classified.extend(classify_all(&pass.entries(&ctx)?, &ctx)?);
    }
    Ok(classified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use monolayer_schema::{ColumnInfo, SchemaSnapshot, TableInfo};
    use serde_json::json;

    fn users() -> SchemaSnapshot {
        SchemaSnapshot::new("public").with_table(
            "users",
            TableInfo::new().column("id", ColumnInfo::new("integer").not_null()),
        )
    }

    #[test]
    fn test_decode_paths() {
        let raw = RawDiffEntry::change(
            &["table", "users", "columns", "email", "isNullable"],
            json!(false),
            json!(true),
        );
        let entry = DecodedEntry::decode(&raw).unwrap();
        assert_eq!(
            entry.subject,
            Subject::ColumnField {
                table: "users",
                column: "email",
                field: ColumnField::IsNullable
            }
        );

        let raw = RawDiffEntry::create(&["uniqueConstraints", "users"], json!({}));
        assert_eq!(
            DecodedEntry::decode(&raw).unwrap().subject,
            Subject::TableObjects {
                kind: ObjectKind::Unique,
                table: "users"
            }
        );

        let raw = RawDiffEntry::create(&["views", "active_users"], json!("..."));
        assert!(DecodedEntry::decode(&raw).is_none());

        let raw = RawDiffEntry::change(&["table", "users", "columns", "id", "collation"], json!("C"), json!(null));
        assert!(DecodedEntry::decode(&raw).is_none());
    }

    /// One representative create and remove entry per category must be
    /// recognized, so no category is left without classifiers.
    #[test]
    fn test_every_category_is_classified() {
        let local = users()
            .with_table("books", TableInfo::new().column("id", ColumnInfo::new("integer")))
            .with_object(Category::Index, "books", "books_id_idx", "CREATE INDEX \"books_id_idx\" ON \"public\".\"books\" (\"id\")")
            .with_object(Category::UniqueConstraints, "books", "books_id_key", "UNIQUE NULLS DISTINCT (\"id\")")
            .with_object(Category::ForeignKeyConstraints, "books", "books_id_fkey", "FOREIGN KEY (\"id\") REFERENCES \"users\" (\"id\")")
            .with_object(Category::PrimaryKey, "books", "books_pkey", "PRIMARY KEY (\"id\")")
            .with_object(Category::CheckConstraints, "books", "books_id_check", "CHECK ((id > 0))")
            .with_object(Category::Triggers, "books", "books_touch_trg", "CREATE OR REPLACE TRIGGER \"books_touch_trg\" BEFORE UPDATE ON \"public\".\"books\" FOR EACH ROW EXECUTE FUNCTION touch()")
            .with_enum("role", &["admin"])
            .with_extension("pgcrypto")
            .with_schema("billing");
        let remote = users();
        let ctx = RenameIntentContext::new(&local, &remote).unwrap();

        for category in Category::ALL {
            let path: Vec<&str> = match category {
                Category::Table => vec!["table", "books"],
                Category::Enums => vec!["enums", "role"],
                Category::Extensions => vec!["extensions", "pgcrypto"],
                Category::SchemaInfo => vec!["schemaInfo", "billing"],
                other => vec![other.key(), "books"],
            };
            let create = RawDiffEntry::create(&path, json!({}));
            assert!(
                classify(&create, &ctx).is_some(),
                "no classifier for CREATE {}",
                category
            );
        }
    }

    #[test]
    fn test_classify_all_reports_every_unclassified_entry() {
        let local = users();
        let remote = users();
        let ctx = RenameIntentContext::new(&local, &remote).unwrap();
        let entries = vec![
            RawDiffEntry::change(&["enums", "role"], json!("admin"), json!("admin, member")),
            RawDiffEntry::change(&["extensions", "pgcrypto"], json!(false), json!(true)),
        ];
        let err = classify_all(&entries, &ctx).unwrap_err();
        match err {
            MigrationError::UnclassifiedDiff { entries } => assert_eq!(entries.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }
}
