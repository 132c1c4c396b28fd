//! Enum, extension and schema classifiers.

use monolayer_schema::snapshot::split_enum_values;

use super::{Classification, Classifier, DecodedEntry, Subject};
use crate::context::RenameIntentContext;
use crate::differ::DiffKind;
use crate::operation::SchemaOperation;

pub(super) const ENUM_CLASSIFIERS: &[Classifier] = &[
    Classifier {
        name: "createEnum",
        classify: create_enum,
    },
    Classifier {
        name: "dropEnum",
        classify: drop_enum,
    },
    Classifier {
        name: "changeEnum",
        classify: change_enum,
    },
];

pub(super) const EXTENSION_CLASSIFIERS: &[Classifier] = &[
    Classifier {
        name: "createExtension",
        classify: create_extension,
    },
    Classifier {
        name: "dropExtension",
        classify: drop_extension,
    },
];

pub(super) const SCHEMA_CLASSIFIERS: &[Classifier] = &[
    Classifier {
        name: "createSchema",
        classify: create_schema,
    },
    Classifier {
        name: "dropSchema",
        classify: drop_schema,
    },
];

fn values(list: &str) -> Vec<String> {
    split_enum_values(list).into_iter().map(str::to_string).collect()
}

fn enum_of<'e>(entry: &DecodedEntry<'e>, kind: DiffKind) -> Option<&'e str> {
    match entry.subject {
        Subject::Enum { name } if entry.kind == kind => Some(name),
        _ => None,
    }
}

fn create_enum(entry: &DecodedEntry<'_>, ctx: &RenameIntentContext<'_>) -> Option<Classification> {
    let name = enum_of(entry, DiffKind::Create)?;
    Some(Classification::Operation(SchemaOperation::CreateEnum {
        name: name.to_string(),
        values: values(ctx.local().enums.get(name)?),
    }))
}

fn drop_enum(entry: &DecodedEntry<'_>, ctx: &RenameIntentContext<'_>) -> Option<Classification> {
    let name = enum_of(entry, DiffKind::Remove)?;
    Some(Classification::Operation(SchemaOperation::DropEnum {
        name: name.to_string(),
        values: values(ctx.remote().enums.get(name)?),
    }))
}

/// Values may only be added. Every existing value must stay, in its
/// original relative order; removals are left unclassified.
fn change_enum(entry: &DecodedEntry<'_>, _ctx: &RenameIntentContext<'_>) -> Option<Classification> {
    let name = enum_of(entry, DiffKind::Change)?;
    let previous = values(entry.old_value_str()?);
    let declared = values(entry.value_str()?);

    let kept: Vec<&String> = declared.iter().filter(|v| previous.contains(v)).collect();
    if kept.len() != previous.len() || kept.iter().zip(&previous).any(|(a, b)| *a != b) {
        return None;
    }

    Some(Classification::Operation(SchemaOperation::ChangeEnum {
        name: name.to_string(),
        previous,
        values: declared,
    }))
}

fn create_extension(entry: &DecodedEntry<'_>, _ctx: &RenameIntentContext<'_>) -> Option<Classification> {
    match entry.subject {
        Subject::Extension { name } if entry.kind == DiffKind::Create => Some(
            Classification::Operation(SchemaOperation::CreateExtension {
                name: name.to_string(),
            }),
        ),
        _ => None,
    }
}

fn drop_extension(entry: &DecodedEntry<'_>, _ctx: &RenameIntentContext<'_>) -> Option<Classification> {
    match entry.subject {
        Subject::Extension { name } if entry.kind == DiffKind::Remove => Some(
            Classification::Operation(SchemaOperation::DropExtension {
                name: name.to_string(),
            }),
        ),
        _ => None,
    }
}

fn create_schema(entry: &DecodedEntry<'_>, _ctx: &RenameIntentContext<'_>) -> Option<Classification> {
    match entry.subject {
        Subject::Schema { name } if entry.kind == DiffKind::Create => {
            Some(Classification::Operation(SchemaOperation::CreateSchema {
                schema: name.to_string(),
            }))
        }
        _ => None,
    }
}

fn drop_schema(entry: &DecodedEntry<'_>, _ctx: &RenameIntentContext<'_>) -> Option<Classification> {
    match entry.subject {
        Subject::Schema { name } if entry.kind == DiffKind::Remove => {
            Some(Classification::Operation(SchemaOperation::DropSchema {
                schema: name.to_string(),
            }))
        }
        _ => None,
    }
}
