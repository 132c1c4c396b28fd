//! Semantic schema operations recognized from raw diff entries.

use monolayer_schema::naming::{identifier, split_hashed};
use monolayer_schema::{Category, ColumnInfo, Identity, IdentifierKind, TableInfo};
use serde::{Deserialize, Serialize};

use crate::ddl::quoted_identifiers;

/// Table-scoped object kinds (indexes, constraints and triggers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ObjectKind {
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

impl ObjectKind {
    /// All object kinds.
    pub const ALL: [ObjectKind; 6] = [
        ObjectKind::PrimaryKey,
        ObjectKind::Unique,
        ObjectKind::ForeignKey,
        ObjectKind::Check,
        ObjectKind::Index,
        ObjectKind::Trigger,
    ];

    /// Map a snapshot category to an object kind.
    pub fn from_category(category: Category) -> Option<Self> {
        match category {
            Category::PrimaryKey => Some(Self::PrimaryKey),
            Category::UniqueConstraints => Some(Self::Unique),
            Category::ForeignKeyConstraints => Some(Self::ForeignKey),
            Category::CheckConstraints => Some(Self::Check),
            Category::Index => Some(Self::Index),
            Category::Triggers => Some(Self::Trigger),
            Category::Table | Category::Enums | Category::Extensions | Category::SchemaInfo => None,
        }
    }

    /// Snapshot category holding objects of this kind.
    pub fn category(self) -> Category {
        match self {
            Self::PrimaryKey => Category::PrimaryKey,
            Self::Unique => Category::UniqueConstraints,
            Self::ForeignKey => Category::ForeignKeyConstraints,
            Self::Check => Category::CheckConstraints,
            Self::Index => Category::Index,
            Self::Trigger => Category::Triggers,
        }
    }

    /// Naming kind used for generated identifiers.
    pub fn identifier_kind(self) -> IdentifierKind {
        match self {
            Self::PrimaryKey => IdentifierKind::PrimaryKey,
            Self::Unique => IdentifierKind::Unique,
            Self::ForeignKey => IdentifierKind::ForeignKey,
            Self::Check => IdentifierKind::Check,
            Self::Index => IdentifierKind::Index,
            Self::Trigger => IdentifierKind::Trigger,
        }
    }

    /// Whether objects of this kind are table constraints.
    pub fn is_constraint(self) -> bool {
        matches!(
            self,
            Self::PrimaryKey | Self::Unique | Self::ForeignKey | Self::Check
        )
    }

    /// Columns covered by an object definition, in declaration order.
    ///
    /// `None` for checks, triggers and definitions without a column list.
    /// Foreign keys report their local columns only.
    pub fn definition_columns(self, definition: &str) -> Option<Vec<String>> {
        let (_, body) = split_hashed(definition);
        let scope = match self {
            Self::PrimaryKey | Self::Unique => body,
            Self::ForeignKey => body.split(" REFERENCES ").next().unwrap_or(body),
            Self::Index => &body[body.find(" ON ")?..],
            Self::Check | Self::Trigger => return None,
        };
        let open = scope.find('(')?;
        let close = open + scope[open..].find(')')?;
        let columns = quoted_identifiers(&scope[open..close]);
        (!columns.is_empty()).then_some(columns)
    }

    /// Columns that take part in a generated identifier. A primary key is
    /// named after its table alone.
    pub fn naming_columns(self, definition: &str) -> Option<Vec<String>> {
        let columns = self.definition_columns(definition)?;
        Some(if self == Self::PrimaryKey { Vec::new() } else { columns })
    }

    /// Identifier the naming convention gives this object on `table`.
    pub fn generated_name(self, table: &str, definition: &str) -> Option<String> {
        let columns = self.naming_columns(definition)?;
        let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
        Some(identifier(self.identifier_kind(), table, &columns))
    }

    /// Human readable name.
    pub fn label(self) -> &'static str {
        match self {
            Self::PrimaryKey => "primary key",
            Self::Unique => "unique constraint",
            Self::ForeignKey => "foreign key",
            Self::Check => "check constraint",
            Self::Index => "index",
            Self::Trigger => "trigger",
        }
    }
}

/// A named object definition taken from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedObject {
    /// Object name.
    pub name: String,
    /// Canonical definition, possibly `hash:`-prefixed.
    pub definition: String,
}

impl NamedObject {
    /// Create a named object.
    pub fn new(name: impl Into<String>, definition: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            definition: definition.into(),
        }
    }
}

/// Objects that disappear together with a dropped table and must be
/// recreated when the drop is reverted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDependents {
    /// Objects by kind, in snapshot order.
    pub objects: Vec<(ObjectKind, NamedObject)>,
}

/// A semantic schema operation.
///
/// Each variant carries what is needed to render forward and reverse DDL.
/// Object variants are batch operations: a whole-map diff entry yields one
/// operation covering every object, which the assembler expands into one
/// changeset per object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum SchemaOperation {
    /// Create a namespace.
    CreateSchema { schema: String },
    /// Drop a namespace.
    DropSchema { schema: String },
    /// Install an extension.
    CreateExtension { name: String },
    /// Remove an extension.
    DropExtension { name: String },
    /// Create an enumerated type.
    CreateEnum { name: String, values: Vec<String> },
    /// Drop an enumerated type.
    DropEnum { name: String, values: Vec<String> },
    /// Add values to an enumerated type. `values` is the declared list and
    /// keeps every previous value in its original order.
    ChangeEnum {
        name: String,
        previous: Vec<String>,
        values: Vec<String>,
    },
    /// Create a table with its columns.
    CreateTable { table: String, definition: TableInfo },
    /// Drop a table.
    DropTable {
        table: String,
        definition: TableInfo,
        dependents: TableDependents,
    },
    /// Rename a table.
    RenameTable { from: String, to: String },
    /// Add a nullable column.
    CreateColumn {
        table: String,
        column: String,
        definition: ColumnInfo,
    },
    /// Add a `NOT NULL` column.
    CreateNonNullableColumn {
        table: String,
        column: String,
        definition: ColumnInfo,
    },
    /// Drop a column.
    DropColumn {
        table: String,
        column: String,
        definition: ColumnInfo,
    },
    /// Rename a column.
    RenameColumn {
        table: String,
        from: String,
        to: String,
    },
    /// Change a column's data type.
    ChangeColumnDataType {
        table: String,
        column: String,
        from: String,
        to: String,
    },
    /// Add a default to a column.
    AddColumnDefault {
        table: String,
        column: String,
        value: String,
    },
    /// Remove a column default.
    DropColumnDefault {
        table: String,
        column: String,
        previous: String,
    },
    /// Replace a column default.
    ChangeColumnDefault {
        table: String,
        column: String,
        from: String,
        to: String,
    },
    /// Turn a column into an identity column.
    AddColumnIdentity {
        table: String,
        column: String,
        identity: Identity,
    },
    /// Remove identity generation from a column.
    DropColumnIdentity {
        table: String,
        column: String,
        previous: Identity,
    },
    /// Switch between `ALWAYS` and `BY DEFAULT` identity generation.
    ChangeColumnIdentity {
        table: String,
        column: String,
        from: Identity,
        to: Identity,
    },
    /// Set or drop `NOT NULL`.
    ChangeColumnNullability {
        table: String,
        column: String,
        nullable: bool,
    },
    /// Create one or more objects of a kind on a table.
    CreateObjects {
        kind: ObjectKind,
        table: String,
        objects: Vec<NamedObject>,
        existing_table: bool,
    },
    /// Drop one or more objects of a kind from a table.
    DropObjects {
        kind: ObjectKind,
        table: String,
        objects: Vec<NamedObject>,
    },
    /// Rename an object whose definition is otherwise unchanged.
    RenameObject {
        kind: ObjectKind,
        table: String,
        from: String,
        to: String,
    },
    /// Replace an object definition.
    ChangeObject {
        kind: ObjectKind,
        table: String,
        previous: NamedObject,
        current: NamedObject,
    },
}

impl SchemaOperation {
    /// Values added by a `ChangeEnum`, each with the existing value it is
    /// inserted before (`None` appends).
    pub fn added_enum_values(&self) -> Vec<(&str, Option<&str>)> {
        let Self::ChangeEnum { previous, values, .. } = self else {
            return Vec::new();
        };
        values
            .iter()
            .enumerate()
            .filter(|(_, value)| !previous.contains(value))
            .map(|(index, value)| {
                let before = values[index + 1..]
                    .iter()
                    .find(|next| previous.contains(next))
                    .map(String::as_str);
                (value.as_str(), before)
            })
            .collect()
    }

    /// Operation name, with `Multiple` batch names for object batches.
    pub fn name(&self) -> String {
        let simple = match self {
            Self::CreateSchema { .. } => "createSchema",
            Self::DropSchema { .. } => "dropSchema",
            Self::CreateExtension { .. } => "createExtension",
            Self::DropExtension { .. } => "dropExtension",
            Self::CreateEnum { .. } => "createEnum",
            Self::DropEnum { .. } => "dropEnum",
            Self::ChangeEnum { .. } => "changeEnum",
            Self::CreateTable { .. } => "createTable",
            Self::DropTable { .. } => "dropTable",
            Self::RenameTable { .. } => "renameTable",
            Self::CreateColumn { .. } => "createColumn",
            Self::CreateNonNullableColumn { .. } => "createNonNullableColumn",
            Self::DropColumn { .. } => "dropColumn",
            Self::RenameColumn { .. } => "renameColumn",
            Self::ChangeColumnDataType { .. } => "changeColumnDataType",
            Self::AddColumnDefault { .. } => "addColumnDefault",
            Self::DropColumnDefault { .. } => "dropColumnDefault",
            Self::ChangeColumnDefault { .. } => "changeColumnDefault",
            Self::AddColumnIdentity { .. } => "addColumnIdentity",
            Self::DropColumnIdentity { .. } => "dropColumnIdentity",
            Self::ChangeColumnIdentity { .. } => "changeColumnIdentity",
            Self::ChangeColumnNullability { .. } => "changeColumnNullability",
            Self::CreateObjects { kind, objects, .. } => {
                return batch_name("create", *kind, objects.len());
            }
            Self::DropObjects { kind, objects, .. } => {
                return batch_name("drop", *kind, objects.len());
            }
            Self::RenameObject { kind, .. } => return format!("rename{}", kind_name(*kind)),
            Self::ChangeObject { kind, .. } => return format!("change{}", kind_name(*kind)),
        };
        simple.to_string()
    }

    /// Table the operation applies to, if any.
    pub fn table(&self) -> Option<&str> {
        match self {
            Self::CreateSchema { .. }
            | Self::DropSchema { .. }
            | Self::CreateExtension { .. }
            | Self::DropExtension { .. }
            | Self::CreateEnum { .. }
            | Self::DropEnum { .. }
            | Self::ChangeEnum { .. } => None,
            Self::RenameTable { to, .. } => Some(to),
            Self::CreateTable { table, .. }
            | Self::DropTable { table, .. }
            | Self::CreateColumn { table, .. }
            | Self::CreateNonNullableColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::RenameColumn { table, .. }
            | Self::ChangeColumnDataType { table, .. }
            | Self::AddColumnDefault { table, .. }
            | Self::DropColumnDefault { table, .. }
            | Self::ChangeColumnDefault { table, .. }
            | Self::AddColumnIdentity { table, .. }
            | Self::DropColumnIdentity { table, .. }
            | Self::ChangeColumnIdentity { table, .. }
            | Self::ChangeColumnNullability { table, .. }
            | Self::CreateObjects { table, .. }
            | Self::DropObjects { table, .. }
            | Self::RenameObject { table, .. }
            | Self::ChangeObject { table, .. } => Some(table),
        }
    }
}

fn kind_name(kind: ObjectKind) -> &'static str {
    match kind {
        ObjectKind::PrimaryKey => "PrimaryKey",
        ObjectKind::Unique => "Unique",
        ObjectKind::ForeignKey => "ForeignKey",
        ObjectKind::Check => "Check",
        ObjectKind::Index => "Index",
        ObjectKind::Trigger => "Trigger",
    }
}

fn batch_name(verb: &str, kind: ObjectKind, count: usize) -> String {
    if count > 1 {
        format!("{}Multiple{}", verb, kind_name(kind))
    } else {
        format!("{}{}", verb, kind_name(kind))
    }
}
