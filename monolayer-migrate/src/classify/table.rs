//! Whole-table classifiers.

use super::{Classification, Classifier, DecodedEntry, Subject, SuppressReason};
use crate::context::RenameIntentContext;
use crate::differ::DiffKind;
use crate::operation::{NamedObject, ObjectKind, SchemaOperation, TableDependents};

pub(super) const CLASSIFIERS: &[Classifier] = &[
    Classifier {
        name: "createTable",
        classify: create_table,
    },
    Classifier {
        name: "renameTable",
        classify: rename_table,
    },
    Classifier {
        name: "dropTable",
        classify: drop_table,
    },
    Classifier {
        name: "renamedTableSource",
        classify: renamed_table_source,
    },
];

fn table_of<'e>(entry: &DecodedEntry<'e>, kind: DiffKind) -> Option<&'e str> {
    match entry.subject {
        Subject::Table { table } if entry.kind == kind => Some(table),
        _ => None,
    }
}

fn create_table(entry: &DecodedEntry<'_>, ctx: &RenameIntentContext<'_>) -> Option<Classification> {
    let table = table_of(entry, DiffKind::Create)?;
    if ctx.table_renamed_from(table).is_some() {
        return None;
    }
    let definition = ctx.local().table.get(table)?.clone();
    Some(Classification::Operation(SchemaOperation::CreateTable {
        table: table.to_string(),
        definition,
    }))
}

fn rename_table(entry: &DecodedEntry<'_>, ctx: &RenameIntentContext<'_>) -> Option<Classification> {
    let table = table_of(entry, DiffKind::Create)?;
    let from = ctx.table_renamed_from(table)?;
    Some(Classification::Operation(SchemaOperation::RenameTable {
        from: from.to_string(),
        to: table.to_string(),
    }))
}

fn drop_table(entry: &DecodedEntry<'_>, ctx: &RenameIntentContext<'_>) -> Option<Classification> {
    let table = table_of(entry, DiffKind::Remove)?;
    if ctx.is_table_rename_source(table) {
        return None;
    }
    let remote = ctx.remote();
    let definition = remote.table.get(table)?.clone();

    // Outbound foreign keys are dropped on their own, ahead of every table.
    let mut dependents = TableDependents::default();
    for kind in ObjectKind::ALL.into_iter().filter(|k| *k != ObjectKind::ForeignKey) {
        if let Some(objects) = remote.objects_on(kind.category(), table) {
            dependents.objects.extend(
                objects
                    .iter()
                    .map(|(name, definition)| (kind, NamedObject::new(name, definition))),
            );
        }
    }

    Some(Classification::Operation(SchemaOperation::DropTable {
        table: table.to_string(),
        definition,
        dependents,
    }))
}

fn renamed_table_source(
    entry: &DecodedEntry<'_>,
    ctx: &RenameIntentContext<'_>,
) -> Option<Classification> {
    let table = table_of(entry, DiffKind::Remove)?;
    ctx.is_table_rename_source(table)
        .then_some(Classification::Suppressed(SuppressReason::RenamePartner))
}

#[cfg(test)]
mod tests {
    use super::super::classify_snapshots;
    use super::*;
    use monolayer_schema::{Category, ColumnInfo, SchemaSnapshot, TableInfo};
    use pretty_assertions::assert_eq;

    fn books() -> TableInfo {
        TableInfo::new()
            .column("id", ColumnInfo::new("integer").not_null())
            .column("author_id", ColumnInfo::new("integer"))
    }

    fn authors() -> SchemaSnapshot {
        SchemaSnapshot::new("public")
            .with_table("authors", TableInfo::new().column("id", ColumnInfo::new("integer").not_null()))
    }

    #[test]
    fn test_create_table() {
        let local = authors().with_table("books", books());
        let classified = classify_snapshots(&local, &authors()).unwrap();
        assert_eq!(
            classified.operations,
            vec![SchemaOperation::CreateTable {
                table: "books".into(),
                definition: books(),
            }]
        );
    }

    #[test]
    fn test_rename_table_suppresses_source() {
        let remote = authors().with_table("books", books());
        let local = authors().with_table("publications", books().rename_from("books"));

        let classified = classify_snapshots(&local, &remote).unwrap();
        assert_eq!(
            classified.operations,
            vec![SchemaOperation::RenameTable {
                from: "books".into(),
                to: "publications".into(),
            }]
        );
        assert_eq!(classified.suppressed.len(), 1);
        assert_eq!(classified.suppressed[0].1, SuppressReason::RenamePartner);
    }

    #[test]
    fn test_drop_table_leaves_foreign_keys_out_of_dependents() {
        let fkey = "FOREIGN KEY (\"author_id\") REFERENCES \"authors\" (\"id\")";
        let remote = authors()
            .with_table("books", books())
            .with_object(Category::PrimaryKey, "books", "books_pkey", "PRIMARY KEY (\"id\")")
            .with_object(Category::ForeignKeyConstraints, "books", "books_author_id_fkey", fkey);

        let classified = classify_snapshots(&authors(), &remote).unwrap();
        assert_eq!(classified.operations.len(), 2);
        assert!(classified.operations.contains(&SchemaOperation::DropTable {
            table: "books".into(),
            definition: books(),
            dependents: TableDependents {
                objects: vec![(
                    ObjectKind::PrimaryKey,
                    NamedObject::new("books_pkey", "PRIMARY KEY (\"id\")")
                )],
            },
        }));
        assert!(classified.operations.contains(&SchemaOperation::DropObjects {
            kind: ObjectKind::ForeignKey,
            table: "books".into(),
            objects: vec![NamedObject::new("books_author_id_fkey", fkey)],
        }));
        assert!(
            classified
                .suppressed
                .iter()
                .all(|(_, reason)| *reason == SuppressReason::DroppedTable)
        );
    }
}
