//! Index, constraint and trigger classifiers.
//!
//! Object definitions embed table and column names. When a table or column
//! is renamed, every object touching it shows up as a changed definition or
//! as a remove/create pair under a new name. Definitions from the actual
//! schema are therefore rewritten with the confirmed renames before they are
//! compared, and an object's own name is masked so that a renamed object with
//! an unchanged definition is recognized as a rename.
//!
//! Objects named by the naming convention are also matched by name: the
//! identifier is recomputed with the pending renames, and a declared object
//! carrying that identifier is the renamed one.

use monolayer_schema::naming::{renamed_identifier, split_hashed};
use tracing::debug;

use super::{Classification, Classifier, DecodedEntry, Subject, SuppressReason};
use crate::context::RenameIntentContext;
use crate::ddl::rewrite_identifiers;
use crate::differ::DiffKind;
use crate::operation::{NamedObject, ObjectKind, SchemaOperation};

pub(super) const CLASSIFIERS: &[Classifier] = &[
    Classifier {
        name: "createAllObjects",
        classify: create_all,
    },
    Classifier {
        name: "dropAllObjects",
        classify: drop_all,
    },
    Classifier {
        name: "droppedTableObjects",
        classify: dropped_table_objects,
    },
    Classifier {
        name: "createObject",
        classify: create_object,
    },
    Classifier {
        name: "renameObject",
        classify: rename_object,
    },
    Classifier {
        name: "replacePrimaryKey",
        classify: replace_primary_key,
    },
    Classifier {
        name: "dropObject",
        classify: drop_object,
    },
    Classifier {
        name: "renamedObjectSource",
        classify: renamed_object_source,
    },
    Classifier {
        name: "changeObject",
        classify: change_object,
    },
    Classifier {
        name: "unchangedAfterRename",
        classify: unchanged_after_rename,
    },
];

const SELF_PLACEHOLDER: &str = "$self";

fn table_objects_of<'e>(entry: &DecodedEntry<'e>, kind: DiffKind) -> Option<(ObjectKind, &'e str)> {
    match entry.subject {
        Subject::TableObjects { kind: object, table } if entry.kind == kind => Some((object, table)),
        _ => None,
    }
}

fn object_of<'e>(entry: &DecodedEntry<'e>, kind: DiffKind) -> Option<(ObjectKind, &'e str, &'e str)> {
    match entry.subject {
        Subject::Object {
            kind: object,
            table,
            name,
        } if entry.kind == kind => Some((object, table, name)),
        _ => None,
    }
}

/// Body of a declared definition with its own name masked.
fn normalize_local(name: &str, definition: &str) -> String {
    let (_, body) = split_hashed(definition);
    rewrite_identifiers(body, |ident| (ident == name).then(|| SELF_PLACEHOLDER.to_string()))
}

/// Body of an actual definition rewritten with the confirmed renames.
///
/// Foreign keys are split at `REFERENCES`: the local column list follows the
/// renames of `table`, the referenced table and columns follow the renames
/// of the referenced table.
fn rewrite_remote(
    ctx: &RenameIntentContext<'_>,
    kind: ObjectKind,
    table: &str,
    name: &str,
    body: &str,
    mask_name: bool,
) -> String {
    let renamed_from = ctx.table_renamed_from(table);
    let columns = ctx.column_renames(table);
    let own = |ident: &str| -> Option<String> {
        if mask_name && ident == name {
            return Some(SELF_PLACEHOLDER.to_string());
        }
        if renamed_from == Some(ident) {
            return Some(table.to_string());
        }
        columns
            .iter()
            .find(|pair| pair.from == ident)
            .map(|pair| pair.to.clone())
    };

    let split = match kind {
        ObjectKind::ForeignKey => body.find(" REFERENCES "),
        _ => None,
    };
    let Some(at) = split else {
        return rewrite_identifiers(body, own);
    };

    let (local_part, referenced) = body.split_at(at);
    let (target, rest) = match referenced.find('(') {
        Some(paren) => referenced.split_at(paren),
        None => (referenced, ""),
    };
    let target = rewrite_identifiers(target, |ident| {
        ctx.table_renames()
            .iter()
            .find(|pair| pair.from == ident)
            .map(|pair| pair.to.clone())
    });
    let referenced_table = crate::ddl::quoted_identifiers(&target)
        .pop()
        .unwrap_or_default();
    let referenced_columns = ctx.column_renames(&referenced_table);
    let rest = rewrite_identifiers(rest, |ident| {
        referenced_columns
            .iter()
            .find(|pair| pair.from == ident)
            .map(|pair| pair.to.clone())
    });

    format!("{}{}{}", rewrite_identifiers(local_part, own), target, rest)
}

fn normalize_remote(
    ctx: &RenameIntentContext<'_>,
    kind: ObjectKind,
    table: &str,
    name: &str,
    definition: &str,
) -> String {
    let (_, body) = split_hashed(definition);
    rewrite_remote(ctx, kind, table, name, body, true)
}

/// An actual definition with renames applied, keeping its hash prefix.
fn renamed_remote_definition(
    ctx: &RenameIntentContext<'_>,
    kind: ObjectKind,
    table: &str,
    name: &str,
    definition: &str,
) -> String {
    let (hash, body) = split_hashed(definition);
    let body = rewrite_remote(ctx, kind, table, name, body, false);
    match hash {
        Some(hash) => format!("{}:{}", hash, body),
        None => body,
    }
}

/// Identifier an actual object should carry after the pending renames.
///
/// `None` when the actual name does not follow the naming convention, in
/// which case nothing can be recomputed.
fn expected_name(
    ctx: &RenameIntentContext<'_>,
    kind: ObjectKind,
    table: &str,
    name: &str,
    definition: &str,
) -> Option<String> {
    let actual_table = ctx.table_renamed_from(table).unwrap_or(table);
    if kind.generated_name(actual_table, definition)? != name {
        return None;
    }
    let columns = kind.naming_columns(definition)?;
    let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
    Some(renamed_identifier(
        kind.identifier_kind(),
        table,
        &columns,
        ctx.column_renames(table),
    ))
}

/// Pairs of (declared name, actual name) that are the same object.
///
/// Declared candidates are visited in name order. Each takes the unclaimed
/// actual candidate whose recomputed identifier is the declared name, or
/// else the first unclaimed one, in name order, with an equal definition.
/// A table has a single primary key, so its candidates always pair up.
fn rename_pairs(ctx: &RenameIntentContext<'_>, kind: ObjectKind, table: &str) -> Vec<(String, String)> {
    let category = kind.category();
    let local = ctx.local().objects_on(category, table);
    let remote = ctx.aligned().objects_on(category, table);
    let (Some(local), Some(remote)) = (local, remote) else {
        return Vec::new();
    };

    let mut local_candidates: Vec<(&String, &String)> = local
        .iter()
        .filter(|(name, _)| !remote.contains_key(*name))
        .collect();
    let mut remote_candidates: Vec<(&String, &String)> = remote
        .iter()
        .filter(|(name, _)| !local.contains_key(*name))
        .collect();
    local_candidates.sort_by(|a, b| a.0.cmp(b.0));
    remote_candidates.sort_by(|a, b| a.0.cmp(b.0));

    let mut pairs = Vec::new();
    for (local_name, local_def) in local_candidates {
        let wanted = normalize_local(local_name, local_def);
        let matches = |remote_name: &str, remote_def: &str| {
            kind == ObjectKind::PrimaryKey
                || normalize_remote(ctx, kind, table, remote_name, remote_def) == wanted
        };
        let by_name = remote_candidates.iter().position(|(remote_name, remote_def)| {
            matches(remote_name.as_str(), remote_def.as_str())
                && expected_name(ctx, kind, table, remote_name, remote_def).as_deref()
                    == Some(local_name.as_str())
        });
        let position = by_name.or_else(|| {
            remote_candidates
                .iter()
                .position(|(remote_name, remote_def)| matches(remote_name.as_str(), remote_def.as_str()))
        });
        if let Some(position) = position {
            let (remote_name, _) = remote_candidates.remove(position);
            pairs.push((local_name.clone(), remote_name.clone()));
        }
    }
    pairs
}

fn remote_partner(
    ctx: &RenameIntentContext<'_>,
    kind: ObjectKind,
    table: &str,
    local_name: &str,
) -> Option<String> {
    rename_pairs(ctx, kind, table)
        .into_iter()
        .find(|(local, _)| local == local_name)
        .map(|(_, remote)| remote)
}

fn has_local_partner(ctx: &RenameIntentContext<'_>, kind: ObjectKind, table: &str, remote_name: &str) -> bool {
    rename_pairs(ctx, kind, table)
        .iter()
        .any(|(_, remote)| remote == remote_name)
}

/// Whether a renamed pair keeps its definition.
fn same_definition(
    ctx: &RenameIntentContext<'_>,
    kind: ObjectKind,
    table: &str,
    local_name: &str,
    remote_name: &str,
) -> Option<bool> {
    let local_def = ctx.local().object(kind.category(), table, local_name)?;
    let remote_def = ctx.aligned().object(kind.category(), table, remote_name)?;
    Some(
        normalize_local(local_name, local_def)
            == normalize_remote(ctx, kind, table, remote_name, remote_def),
    )
}

/// Whether objects of `kind` on `table` disappear with the table itself.
///
/// Foreign keys of a dropped table are dropped separately so that a table
/// referenced by another dropped table can be dropped in any order.
fn dropped_with_table(ctx: &RenameIntentContext<'_>, kind: ObjectKind, table: &str) -> bool {
    kind != ObjectKind::ForeignKey && ctx.is_dropped_table(table)
}

fn create_all(entry: &DecodedEntry<'_>, ctx: &RenameIntentContext<'_>) -> Option<Classification> {
    let (kind, table) = table_objects_of(entry, DiffKind::Create)?;
    let objects: Vec<NamedObject> = ctx
        .local()
        .objects_on(kind.category(), table)?
        .iter()
        .map(|(name, definition)| NamedObject::new(name, definition))
        .collect();
    if objects.is_empty() {
        return None;
    }
    Some(Classification::Operation(SchemaOperation::CreateObjects {
        kind,
        table: table.to_string(),
        objects,
        existing_table: ctx.is_existing_table(table),
    }))
}

fn drop_all(entry: &DecodedEntry<'_>, ctx: &RenameIntentContext<'_>) -> Option<Classification> {
    let (kind, table) = table_objects_of(entry, DiffKind::Remove)?;
    if dropped_with_table(ctx, kind, table) {
        return None;
    }
    let objects: Vec<NamedObject> = ctx
        .aligned()
        .objects_on(kind.category(), table)?
        .iter()
        .map(|(name, definition)| {
            NamedObject::new(name, renamed_remote_definition(ctx, kind, table, name, definition))
        })
        .collect();
    if objects.is_empty() {
        return None;
    }
    Some(Classification::Operation(SchemaOperation::DropObjects {
        kind,
        table: table.to_string(),
        objects,
    }))
}

fn dropped_table_objects(
    entry: &DecodedEntry<'_>,
    ctx: &RenameIntentContext<'_>,
) -> Option<Classification> {
    if entry.kind != DiffKind::Remove {
        return None;
    }
    let (kind, table) = match entry.subject {
        Subject::TableObjects { kind, table } | Subject::Object { kind, table, .. } => (kind, table),
        _ => return None,
    };
    dropped_with_table(ctx, kind, table)
        .then_some(Classification::Suppressed(SuppressReason::DroppedTable))
}

fn create_object(entry: &DecodedEntry<'_>, ctx: &RenameIntentContext<'_>) -> Option<Classification> {
    let (kind, table, name) = object_of(entry, DiffKind::Create)?;
    if remote_partner(ctx, kind, table, name).is_some() {
        return None;
    }
    let definition = ctx.local().object(kind.category(), table, name)?;
    Some(Classification::Operation(SchemaOperation::CreateObjects {
        kind,
        table: table.to_string(),
        objects: vec![NamedObject::new(name, definition)],
        existing_table: ctx.is_existing_table(table),
    }))
}

fn rename_object(entry: &DecodedEntry<'_>, ctx: &RenameIntentContext<'_>) -> Option<Classification> {
    let (kind, table, name) = object_of(entry, DiffKind::Create)?;
    let from = remote_partner(ctx, kind, table, name)?;
    if !same_definition(ctx, kind, table, name, &from)? {
        return None;
    }
    let definition = ctx.aligned().object(kind.category(), table, &from)?;
    if expected_name(ctx, kind, table, &from, definition).as_deref() == Some(name) {
        debug!(kind = kind.label(), table, from = %from, to = name, "Generated name follows rename");
    }
    Some(Classification::Operation(SchemaOperation::RenameObject {
        kind,
        table: table.to_string(),
        from,
        to: name.to_string(),
    }))
}

fn replace_primary_key(
    entry: &DecodedEntry<'_>,
    ctx: &RenameIntentContext<'_>,
) -> Option<Classification> {
    let (kind, table, name) = object_of(entry, DiffKind::Create)?;
    if kind != ObjectKind::PrimaryKey {
        return None;
    }
    let from = remote_partner(ctx, kind, table, name)?;
    if same_definition(ctx, kind, table, name, &from)? {
        return None;
    }
    let previous = ctx.aligned().object(kind.category(), table, &from)?;
    let current = ctx.local().object(kind.category(), table, name)?;
    Some(Classification::Operation(SchemaOperation::ChangeObject {
        kind,
        table: table.to_string(),
        previous: NamedObject::new(
            from.as_str(),
            renamed_remote_definition(ctx, kind, table, &from, previous),
        ),
        current: NamedObject::new(name, current),
    }))
}

fn drop_object(entry: &DecodedEntry<'_>, ctx: &RenameIntentContext<'_>) -> Option<Classification> {
    let (kind, table, name) = object_of(entry, DiffKind::Remove)?;
    if dropped_with_table(ctx, kind, table) || has_local_partner(ctx, kind, table, name) {
        return None;
    }
    let definition = ctx.aligned().object(kind.category(), table, name)?;
    Some(Classification::Operation(SchemaOperation::DropObjects {
        kind,
        table: table.to_string(),
        objects: vec![NamedObject::new(
            name,
            renamed_remote_definition(ctx, kind, table, name, definition),
        )],
    }))
}

fn renamed_object_source(
    entry: &DecodedEntry<'_>,
    ctx: &RenameIntentContext<'_>,
) -> Option<Classification> {
    let (kind, table, name) = object_of(entry, DiffKind::Remove)?;
    if ctx.is_dropped_table(table) {
        return None;
    }
    has_local_partner(ctx, kind, table, name)
        .then_some(Classification::Suppressed(SuppressReason::RenamePartner))
}

fn changed_definition(
    entry: &DecodedEntry<'_>,
    ctx: &RenameIntentContext<'_>,
) -> Option<(ObjectKind, String, NamedObject, NamedObject, bool)> {
    let (kind, table, name) = object_of(entry, DiffKind::Change)?;
    let previous = entry.old_value_str()?;
    let current = entry.value_str()?;
    let unchanged =
        normalize_remote(ctx, kind, table, name, previous) == normalize_local(name, current);
    Some((
        kind,
        table.to_string(),
        NamedObject::new(name, renamed_remote_definition(ctx, kind, table, name, previous)),
        NamedObject::new(name, current),
        unchanged,
    ))
}

fn change_object(entry: &DecodedEntry<'_>, ctx: &RenameIntentContext<'_>) -> Option<Classification> {
    let (kind, table, previous, current, unchanged) = changed_definition(entry, ctx)?;
    if unchanged {
        return None;
    }
    Some(Classification::Operation(SchemaOperation::ChangeObject {
        kind,
        table,
        previous,
        current,
    }))
}

fn unchanged_after_rename(
    entry: &DecodedEntry<'_>,
    ctx: &RenameIntentContext<'_>,
) -> Option<Classification> {
    let (.., unchanged) = changed_definition(entry, ctx)?;
    unchanged.then_some(Classification::Suppressed(SuppressReason::RenameRipple))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_identifiers() {
        let sql = "CREATE INDEX \"books_id_idx\" ON \"public\".\"books\" (\"id\")";
        let rewritten = rewrite_identifiers(sql, |ident| match ident {
            "books" => Some("publications".to_string()),
            "id" => Some("book_id".to_string()),
            _ => None,
        });
        assert_eq!(
            rewritten,
            "CREATE INDEX \"books_id_idx\" ON \"public\".\"publications\" (\"book_id\")"
        );
    }

    #[test]
    fn test_expected_name_follows_column_rename() {
        use monolayer_schema::{Category, ColumnInfo, SchemaSnapshot, TableInfo};

        let remote = SchemaSnapshot::new("public")
            .with_table("users", TableInfo::new().column("email", ColumnInfo::new("text")))
            .with_object(
                Category::UniqueConstraints,
                "users",
                "users_email_key",
                "UNIQUE NULLS DISTINCT (\"email\")",
            );
        let local = SchemaSnapshot::new("public").with_table(
            "users",
            TableInfo::new().column("mail", ColumnInfo::new("text").rename_from("email")),
        );
        let ctx = RenameIntentContext::new(&local, &remote).unwrap();

        assert_eq!(
            expected_name(
                &ctx,
                ObjectKind::Unique,
                "users",
                "users_email_key",
                "UNIQUE NULLS DISTINCT (\"email\")"
            ),
            Some("users_mail_key".to_string())
        );
        assert_eq!(
            expected_name(
                &ctx,
                ObjectKind::Unique,
                "users",
                "legacy_unique",
                "UNIQUE NULLS DISTINCT (\"email\")"
            ),
            None
        );
    }

    #[test]
    fn test_normalize_local_masks_own_name() {
        let a = normalize_local("a_idx", "CREATE INDEX \"a_idx\" ON \"public\".\"t\" (\"x\")");
        let b = normalize_local("b_idx", "CREATE INDEX \"b_idx\" ON \"public\".\"t\" (\"x\")");
        assert_eq!(a, b);
        assert!(a.contains("$self"));
    }
}
