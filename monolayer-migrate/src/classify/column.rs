//! Column classifiers: added, dropped and renamed columns plus changes of
//! individual column fields.

use monolayer_schema::naming::split_hashed;
use monolayer_schema::Identity;

use super::{Classification, Classifier, ColumnField, DecodedEntry, Subject, SuppressReason};
use crate::context::RenameIntentContext;
use crate::differ::DiffKind;
use crate::operation::SchemaOperation;

pub(super) const CLASSIFIERS: &[Classifier] = &[
    Classifier {
        name: "createColumn",
        classify: create_column,
    },
    Classifier {
        name: "createNonNullableColumn",
        classify: create_non_nullable_column,
    },
    Classifier {
        name: "renameColumn",
        classify: rename_column,
    },
    Classifier {
        name: "dropColumn",
        classify: drop_column,
    },
    Classifier {
        name: "renamedColumnSource",
        classify: renamed_column_source,
    },
    Classifier {
        name: "changeColumnDataType",
        classify: change_data_type,
    },
    Classifier {
        name: "addColumnDefault",
        classify: add_default,
    },
    Classifier {
        name: "dropColumnDefault",
        classify: drop_default,
    },
    Classifier {
        name: "changeColumnDefault",
        classify: change_default,
    },
    Classifier {
        name: "defaultFormatting",
        classify: default_formatting,
    },
    Classifier {
        name: "addColumnIdentity",
        classify: add_identity,
    },
    Classifier {
        name: "dropColumnIdentity",
        classify: drop_identity,
    },
    Classifier {
        name: "changeColumnIdentity",
        classify: change_identity,
    },
    Classifier {
        name: "changeColumnNullability",
        classify: change_nullability,
    },
    Classifier {
        name: "coveredByDataType",
        classify: covered_by_data_type,
    },
];

fn column_of<'e>(entry: &DecodedEntry<'e>, kind: DiffKind) -> Option<(&'e str, &'e str)> {
    match entry.subject {
        Subject::Column { table, column } if entry.kind == kind => Some((table, column)),
        _ => None,
    }
}

fn field_change<'e>(entry: &DecodedEntry<'e>, wanted: ColumnField) -> Option<(&'e str, &'e str)> {
    match entry.subject {
        Subject::ColumnField {
            table,
            column,
            field,
        } if field == wanted && entry.kind == DiffKind::Change => Some((table, column)),
        _ => None,
    }
}

fn added_column(
    entry: &DecodedEntry<'_>,
    ctx: &RenameIntentContext<'_>,
    nullable: bool,
) -> Option<Classification> {
    let (table, column) = column_of(entry, DiffKind::Create)?;
    if ctx.column_renamed_from(table, column).is_some() {
        return None;
    }
    let definition = ctx.local().column(table, column)?.clone();
    if definition.is_nullable != nullable {
        return None;
    }
    let (table, column) = (table.to_string(), column.to_string());
    let op = if nullable {
        SchemaOperation::CreateColumn {
            table,
            column,
            definition,
        }
    } else {
        SchemaOperation::CreateNonNullableColumn {
            table,
            column,
            definition,
        }
    };
    Some(Classification::Operation(op))
}

fn create_column(entry: &DecodedEntry<'_>, ctx: &RenameIntentContext<'_>) -> Option<Classification> {
    added_column(entry, ctx, true)
}

fn create_non_nullable_column(
    entry: &DecodedEntry<'_>,
    ctx: &RenameIntentContext<'_>,
) -> Option<Classification> {
    added_column(entry, ctx, false)
}

fn rename_column(entry: &DecodedEntry<'_>, ctx: &RenameIntentContext<'_>) -> Option<Classification> {
    let (table, column) = column_of(entry, DiffKind::Create)?;
    let from = ctx.column_renamed_from(table, column)?;
    Some(Classification::Operation(SchemaOperation::RenameColumn {
        table: table.to_string(),
        from: from.to_string(),
        to: column.to_string(),
    }))
}

fn drop_column(entry: &DecodedEntry<'_>, ctx: &RenameIntentContext<'_>) -> Option<Classification> {
    let (table, column) = column_of(entry, DiffKind::Remove)?;
    if ctx.is_column_rename_source(table, column) || ctx.is_dropped_table(table) {
        return None;
    }
    let definition = ctx.tables_aligned().column(table, column)?.clone();
    Some(Classification::Operation(SchemaOperation::DropColumn {
        table: table.to_string(),
        column: column.to_string(),
        definition,
    }))
}

fn renamed_column_source(
    entry: &DecodedEntry<'_>,
    ctx: &RenameIntentContext<'_>,
) -> Option<Classification> {
    let (table, column) = column_of(entry, DiffKind::Remove)?;
    ctx.is_column_rename_source(table, column)
        .then_some(Classification::Suppressed(SuppressReason::RenamePartner))
}

fn change_data_type(entry: &DecodedEntry<'_>, _ctx: &RenameIntentContext<'_>) -> Option<Classification> {
    let (table, column) = field_change(entry, ColumnField::DataType)?;
    Some(Classification::Operation(SchemaOperation::ChangeColumnDataType {
        table: table.to_string(),
        column: column.to_string(),
        from: entry.old_value_str()?.to_string(),
        to: entry.value_str()?.to_string(),
    }))
}

fn add_default(entry: &DecodedEntry<'_>, _ctx: &RenameIntentContext<'_>) -> Option<Classification> {
    let (table, column) = field_change(entry, ColumnField::DefaultValue)?;
    if !entry.old_value_is_null() {
        return None;
    }
    Some(Classification::Operation(SchemaOperation::AddColumnDefault {
        table: table.to_string(),
        column: column.to_string(),
        value: entry.value_str()?.to_string(),
    }))
}

fn drop_default(entry: &DecodedEntry<'_>, _ctx: &RenameIntentContext<'_>) -> Option<Classification> {
    let (table, column) = field_change(entry, ColumnField::DefaultValue)?;
    if !entry.value_is_null() {
        return None;
    }
    Some(Classification::Operation(SchemaOperation::DropColumnDefault {
        table: table.to_string(),
        column: column.to_string(),
        previous: entry.old_value_str()?.to_string(),
    }))
}

/// Both sides carry the same content hash: the database only reformatted
/// the expression.
fn same_default_hash(entry: &DecodedEntry<'_>) -> Option<bool> {
    let (new_hash, _) = split_hashed(entry.value_str()?);
    let (old_hash, _) = split_hashed(entry.old_value_str()?);
    Some(new_hash.is_some() && new_hash == old_hash)
}

fn change_default(entry: &DecodedEntry<'_>, _ctx: &RenameIntentContext<'_>) -> Option<Classification> {
    let (table, column) = field_change(entry, ColumnField::DefaultValue)?;
    if same_default_hash(entry)? {
        return None;
    }
    Some(Classification::Operation(SchemaOperation::ChangeColumnDefault {
        table: table.to_string(),
        column: column.to_string(),
        from: entry.old_value_str()?.to_string(),
        to: entry.value_str()?.to_string(),
    }))
}

fn default_formatting(entry: &DecodedEntry<'_>, _ctx: &RenameIntentContext<'_>) -> Option<Classification> {
    field_change(entry, ColumnField::DefaultValue)?;
    same_default_hash(entry)?
        .then_some(Classification::Suppressed(SuppressReason::FormattingOnly))
}

fn add_identity(entry: &DecodedEntry<'_>, _ctx: &RenameIntentContext<'_>) -> Option<Classification> {
    let (table, column) = field_change(entry, ColumnField::Identity)?;
    if !entry.old_value_is_null() {
        return None;
    }
    Some(Classification::Operation(SchemaOperation::AddColumnIdentity {
        table: table.to_string(),
        column: column.to_string(),
        identity: Identity::parse(entry.value_str()?)?,
    }))
}

fn drop_identity(entry: &DecodedEntry<'_>, _ctx: &RenameIntentContext<'_>) -> Option<Classification> {
    let (table, column) = field_change(entry, ColumnField::Identity)?;
    if !entry.value_is_null() {
        return None;
    }
    Some(Classification::Operation(SchemaOperation::DropColumnIdentity {
        table: table.to_string(),
        column: column.to_string(),
        previous: Identity::parse(entry.old_value_str()?)?,
    }))
}

fn change_identity(entry: &DecodedEntry<'_>, _ctx: &RenameIntentContext<'_>) -> Option<Classification> {
    let (table, column) = field_change(entry, ColumnField::Identity)?;
    Some(Classification::Operation(SchemaOperation::ChangeColumnIdentity {
        table: table.to_string(),
        column: column.to_string(),
        from: Identity::parse(entry.old_value_str()?)?,
        to: Identity::parse(entry.value_str()?)?,
    }))
}

fn change_nullability(entry: &DecodedEntry<'_>, _ctx: &RenameIntentContext<'_>) -> Option<Classification> {
    let (table, column) = field_change(entry, ColumnField::IsNullable)?;
    let nullable = entry.raw.value.as_ref()?.as_bool()?;
    Some(Classification::Operation(SchemaOperation::ChangeColumnNullability {
        table: table.to_string(),
        column: column.to_string(),
        nullable,
    }))
}

fn covered_by_data_type(
    entry: &DecodedEntry<'_>,
    _ctx: &RenameIntentContext<'_>,
) -> Option<Classification> {
    let covered = [
        ColumnField::NumericPrecision,
        ColumnField::NumericScale,
        ColumnField::CharacterMaximumLength,
        ColumnField::DatetimePrecision,
        ColumnField::Enum,
    ];
    covered
        .into_iter()
        .find_map(|field| field_change(entry, field))
        .map(|_| Classification::Suppressed(SuppressReason::CoveredByDataType))
}

#[cfg(test)]
mod tests {
    use super::super::classify_snapshots;
    use super::*;
    use monolayer_schema::naming::{content_hash, hashed};
    use monolayer_schema::{ColumnInfo, SchemaSnapshot, TableInfo};
    use pretty_assertions::assert_eq;

    fn users(table: TableInfo) -> SchemaSnapshot {
        SchemaSnapshot::new("public")
            .with_table("users", table.column("id", ColumnInfo::new("integer").not_null()))
    }

    fn operations(local: &SchemaSnapshot, remote: &SchemaSnapshot) -> Vec<SchemaOperation> {
        classify_snapshots(local, remote).unwrap().operations
    }

    #[test]
    fn test_nullable_and_non_nullable_columns() {
        let remote = users(TableInfo::new());
        let local = users(
            TableInfo::new()
                .column("nickname", ColumnInfo::new("text"))
                .column("email", ColumnInfo::new("text").not_null()),
        );

        let ops = operations(&local, &remote);
        assert_eq!(ops.len(), 2);
        assert!(ops.contains(&SchemaOperation::CreateColumn {
            table: "users".into(),
            column: "nickname".into(),
            definition: ColumnInfo::new("text"),
        }));
        assert!(ops.contains(&SchemaOperation::CreateNonNullableColumn {
            table: "users".into(),
            column: "email".into(),
            definition: ColumnInfo::new("text").not_null(),
        }));
    }

    #[test]
    fn test_dropped_and_renamed_columns() {
        let remote = users(
            TableInfo::new()
                .column("legacy", ColumnInfo::new("text"))
                .column("title", ColumnInfo::new("text")),
        );
        let local = users(TableInfo::new().column("name", ColumnInfo::new("text").rename_from("title")));

        let classified = classify_snapshots(&local, &remote).unwrap();
        assert_eq!(classified.operations.len(), 2);
        assert!(classified.operations.contains(&SchemaOperation::RenameColumn {
            table: "users".into(),
            from: "title".into(),
            to: "name".into(),
        }));
        assert!(classified.operations.contains(&SchemaOperation::DropColumn {
            table: "users".into(),
            column: "legacy".into(),
            definition: ColumnInfo::new("text"),
        }));
        assert!(
            classified
                .suppressed
                .iter()
                .any(|(_, reason)| *reason == SuppressReason::RenamePartner)
        );
    }

    #[test]
    fn test_identity_drop_and_change() {
        let remote = users(
            TableInfo::new()
                .column("a", ColumnInfo::new("integer").identity(Identity::Always))
                .column("b", ColumnInfo::new("integer").identity(Identity::Always)),
        );
        let local = users(
            TableInfo::new()
                .column("a", ColumnInfo::new("integer").not_null())
                .column("b", ColumnInfo::new("integer").identity(Identity::ByDefault)),
        );

        let ops = operations(&local, &remote);
        assert_eq!(ops.len(), 2);
        assert!(ops.contains(&SchemaOperation::DropColumnIdentity {
            table: "users".into(),
            column: "a".into(),
            previous: Identity::Always,
        }));
        assert!(ops.contains(&SchemaOperation::ChangeColumnIdentity {
            table: "users".into(),
            column: "b".into(),
            from: Identity::Always,
            to: Identity::ByDefault,
        }));
    }

    #[test]
    fn test_nullability_drop() {
        let remote = users(TableInfo::new().column("bio", ColumnInfo::new("text").not_null()));
        let local = users(TableInfo::new().column("bio", ColumnInfo::new("text")));

        assert_eq!(
            operations(&local, &remote),
            vec![SchemaOperation::ChangeColumnNullability {
                table: "users".into(),
                column: "bio".into(),
                nullable: true,
            }]
        );
    }

    #[test]
    fn test_default_add_drop_and_change() {
        let remote = users(
            TableInfo::new()
                .column("d", ColumnInfo::new("text"))
                .column("e", ColumnInfo::new("text").default_sql("'x'"))
                .column("f", ColumnInfo::new("text").default_sql("'a'")),
        );
        let local = users(
            TableInfo::new()
                .column("d", ColumnInfo::new("text").default_sql("'y'"))
                .column("e", ColumnInfo::new("text"))
                .column("f", ColumnInfo::new("text").default_sql("'b'")),
        );

        let ops = operations(&local, &remote);
        assert_eq!(ops.len(), 3);
        assert!(ops.contains(&SchemaOperation::AddColumnDefault {
            table: "users".into(),
            column: "d".into(),
            value: hashed("'y'"),
        }));
        assert!(ops.contains(&SchemaOperation::DropColumnDefault {
            table: "users".into(),
            column: "e".into(),
            previous: hashed("'x'"),
        }));
        assert!(ops.contains(&SchemaOperation::ChangeColumnDefault {
            table: "users".into(),
            column: "f".into(),
            from: hashed("'a'"),
            to: hashed("'b'"),
        }));
    }

    #[test]
    fn test_reformatted_default_is_suppressed() {
        let mut reformatted = ColumnInfo::new("timestamptz");
        reformatted.default_value = Some(format!("{}:{}", content_hash("now()"), "now()::timestamptz"));
        let remote = users(TableInfo::new().column("at", reformatted));
        let local = users(TableInfo::new().column("at", ColumnInfo::new("timestamptz").default_sql("now()")));

        let classified = classify_snapshots(&local, &remote).unwrap();
        assert!(classified.operations.is_empty());
        assert_eq!(classified.suppressed.len(), 1);
        assert_eq!(classified.suppressed[0].1, SuppressReason::FormattingOnly);
    }

    #[test]
    fn test_type_details_follow_data_type() {
        let remote = users(TableInfo::new().column("code", ColumnInfo::new("varchar(10)").max_length(10)));
        let local = users(TableInfo::new().column("code", ColumnInfo::new("varchar(20)").max_length(20)));

        let classified = classify_snapshots(&local, &remote).unwrap();
        assert_eq!(
            classified.operations,
            vec![SchemaOperation::ChangeColumnDataType {
                table: "users".into(),
                column: "code".into(),
                from: "varchar(10)".into(),
                to: "varchar(20)".into(),
            }]
        );
        assert_eq!(classified.suppressed[0].1, SuppressReason::CoveredByDataType);
    }
}
