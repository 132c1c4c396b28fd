//! Changesets: the unit of rendered migration work.

use serde::{Deserialize, Serialize};

/// Migration phase.
///
/// A full run applies phases in [`ChangesetPhase::RUN_ORDER`]; every phase has
/// its own artifact directory, ledger table and lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangesetPhase {
    /// Additive, backward-compatible changes.
    Expand,
    /// In-place changes of existing objects.
    Alter,
    /// User-scaffolded data migrations.
    Data,
    /// Removal of objects no longer declared.
    Contract,
}

impl ChangesetPhase {
    /// Order in which a full run applies phases.
    pub const RUN_ORDER: [ChangesetPhase; 4] = [
        ChangesetPhase::Expand,
        ChangesetPhase::Alter,
        ChangesetPhase::Data,
        ChangesetPhase::Contract,
    ];

    /// Order in which a full rollback reverts phases. Data migrations are
    /// hand-written and are only reverted by name.
    pub const ROLLBACK_ORDER: [ChangesetPhase; 3] = [
        ChangesetPhase::Contract,
        ChangesetPhase::Alter,
        ChangesetPhase::Expand,
    ];

    /// Directory and ledger name of the phase.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Expand => "expand",
            Self::Alter => "alter",
            Self::Data => "data",
            Self::Contract => "contract",
        }
    }

    /// Parse a phase name.
    pub fn parse(value: &str) -> Option<Self> {
        Self::RUN_ORDER.into_iter().find(|p| p.as_str() == value)
    }
}

impl std::fmt::Display for ChangesetPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Changeset type. One per semantic operation kind, after batch expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangesetType {
    /// Create a namespace.
    CreateSchema,
    /// Install an extension.
    CreateExtension,
    /// Create an enumerated type.
    CreateEnum,
    /// Add values to an enumerated type.
    ChangeEnum,
    /// Rename a table.
    RenameTable,
    /// Create a table with its columns.
    CreateTable,
    /// Add a nullable column.
    CreateColumn,
    /// Add a column that ends up `NOT NULL`.
    CreateNonNullableColumn,
    /// Rename a column.
    RenameColumn,
    /// Change a column data type.
    ChangeColumnDataType,
    /// Set a default on a column without one.
    AddColumnDefault,
    /// Remove a column default.
    DropColumnDefault,
    /// Replace a column default.
    ChangeColumnDefault,
    /// Turn a column into an identity column.
    AddColumnIdentity,
    /// Remove identity generation from a column.
    DropColumnIdentity,
    /// Switch between `ALWAYS` and `BY DEFAULT` generation.
    ChangeColumnIdentity,
    /// Set or drop `NOT NULL`.
    ChangeColumnNullability,
    /// Add a primary key.
    CreatePrimaryKey,
    /// Rename a primary key.
    RenamePrimaryKey,
    /// Replace a primary key definition.
    ChangePrimaryKey,
    /// Add a unique constraint.
    CreateUnique,
    /// Rename a unique constraint.
    RenameUnique,
    /// Replace a unique constraint definition.
    ChangeUnique,
    /// Add a check constraint.
    CreateCheck,
    /// Rename a check constraint.
    RenameCheck,
    /// Replace a check constraint definition.
    ChangeCheck,
    /// Add a foreign key.
    CreateForeignKey,
    /// Rename a foreign key.
    RenameForeignKey,
    /// Replace a foreign key definition.
    ChangeForeignKey,
    /// Create an index.
    CreateIndex,
    /// Rename an index.
    RenameIndex,
    /// Rebuild an index with a new definition.
    ChangeIndex,
    /// Create a trigger.
    CreateTrigger,
    /// Rename a trigger.
    RenameTrigger,
    /// Replace a trigger definition.
    ChangeTrigger,
    /// Drop a trigger.
    DropTrigger,
    /// Drop an index.
    DropIndex,
    /// Drop a foreign key.
    DropForeignKey,
    /// Drop a check constraint.
    DropCheck,
    /// Drop a unique constraint.
    DropUnique,
    /// Drop a primary key.
    DropPrimaryKey,
    /// Drop a column.
    DropColumn,
    /// Drop a table.
    DropTable,
    /// Drop an enumerated type.
    DropEnum,
    /// Remove an extension.
    DropExtension,
    /// Drop a namespace.
    DropSchema,
}

impl ChangesetType {
    /// Execution priority. Lower values run first; the table defines a total
    /// order in which every object exists before anything depending on it.
    ///
    /// Identity is dropped before `NOT NULL` is relaxed and added after it is
    /// set, since PostgreSQL requires identity columns to be `NOT NULL`.
    pub fn priority(self) -> u32 {
        match self {
            Self::CreateSchema => 0,
            Self::CreateExtension => 1,
            Self::CreateEnum => 2,
            Self::ChangeEnum => 3,
            Self::RenameTable => 900,
            Self::CreateTable => 2001,
            Self::CreateColumn => 2003,
            Self::CreateNonNullableColumn => 2004,
            Self::RenameColumn => 3000,
            Self::ChangeColumnDataType => 3001,
            Self::AddColumnDefault => 3002,
            Self::DropColumnDefault => 3003,
            Self::ChangeColumnDefault => 3004,
            Self::DropColumnIdentity => 3005,
            Self::ChangeColumnNullability => 3006,
            Self::AddColumnIdentity => 3007,
            Self::ChangeColumnIdentity => 3008,
            Self::CreatePrimaryKey => 4000,
            Self::RenamePrimaryKey => 4001,
            Self::ChangePrimaryKey => 4002,
            Self::CreateUnique => 4003,
            Self::RenameUnique => 4004,
            Self::ChangeUnique => 4005,
            Self::CreateCheck => 4006,
            Self::RenameCheck => 4007,
            Self::ChangeCheck => 4008,
            Self::CreateForeignKey => 4009,
            Self::RenameForeignKey => 4010,
            Self::ChangeForeignKey => 4011,
            Self::CreateIndex => 4012,
            Self::RenameIndex => 4013,
            Self::ChangeIndex => 4014,
            Self::CreateTrigger => 5000,
            Self::RenameTrigger => 5001,
            Self::ChangeTrigger => 5002,
            Self::DropTrigger => 6000,
            Self::DropIndex => 6001,
            Self::DropForeignKey => 6002,
            Self::DropCheck => 6003,
            Self::DropUnique => 6004,
            Self::DropPrimaryKey => 6005,
            Self::DropColumn => 6006,
            Self::DropTable => 6007,
            Self::DropEnum => 6008,
            Self::DropExtension => 6009,
            Self::DropSchema => 6010,
        }
    }

    /// Phase a changeset of this type belongs to.
    ///
    /// Renames land in Expand so that every later phase already sees the
    /// declared names.
    pub fn phase(self) -> ChangesetPhase {
        match self {
            Self::CreateSchema
            | Self::CreateExtension
            | Self::CreateEnum
            | Self::ChangeEnum
            | Self::RenameTable
            | Self::CreateTable
            | Self::CreateColumn
            | Self::CreateNonNullableColumn
            | Self::RenameColumn
            | Self::CreatePrimaryKey
            | Self::RenamePrimaryKey
            | Self::CreateUnique
            | Self::RenameUnique
            | Self::CreateCheck
            | Self::RenameCheck
            | Self::CreateForeignKey
            | Self::RenameForeignKey
            | Self::CreateIndex
            | Self::RenameIndex
            | Self::CreateTrigger
            | Self::RenameTrigger => ChangesetPhase::Expand,
            Self::ChangeColumnDataType
            | Self::AddColumnDefault
            | Self::DropColumnDefault
            | Self::ChangeColumnDefault
            | Self::AddColumnIdentity
            | Self::DropColumnIdentity
            | Self::ChangeColumnIdentity
            | Self::ChangeColumnNullability
            | Self::ChangePrimaryKey
            | Self::ChangeUnique
            | Self::ChangeCheck
            | Self::ChangeForeignKey
            | Self::ChangeIndex
            | Self::ChangeTrigger => ChangesetPhase::Alter,
            Self::DropTrigger
            | Self::DropIndex
            | Self::DropForeignKey
            | Self::DropCheck
            | Self::DropUnique
            | Self::DropPrimaryKey
            | Self::DropColumn
            | Self::DropTable
            | Self::DropEnum
            | Self::DropExtension
            | Self::DropSchema => ChangesetPhase::Contract,
        }
    }

    /// Serialized name.
    pub fn as_str(self) -> String {
        serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default()
    }
}

/// Warning category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WarningKind {
    /// Data is lost when applied.
    Destructive,
    /// Clients using the old shape break.
    BackwardIncompatible,
    /// May fail on existing data.
    MightFail,
    /// Takes a lock that blocks reads or writes.
    Blocking,
}

/// Warning codes attached to changesets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WarningCode {
    /// Schema dropped.
    D001,
    /// Table dropped.
    D002,
    /// Column dropped.
    D003,
    /// Column type narrowed.
    D004,
    /// Extension dropped.
    D005,
    /// Table renamed.
    BI001,
    /// Column renamed.
    BI002,
    /// Unique constraint added to an existing table.
    MF001,
    /// Primary key added to an existing table.
    MF002,
    /// Non-nullable column added without a default.
    MF003,
    /// Column set to `NOT NULL`.
    MF004,
    /// Column type changed.
    MF005,
    /// Foreign key or check constraint added to an existing table.
    MF006,
    /// Statement takes a blocking lock on an existing table.
    B001,
}

impl WarningCode {
    /// Category of the warning.
    pub fn kind(self) -> WarningKind {
        match self {
            Self::D001 | Self::D002 | Self::D003 | Self::D004 | Self::D005 => {
                WarningKind::Destructive
            }
            Self::BI001 | Self::BI002 => WarningKind::BackwardIncompatible,
            Self::MF001 | Self::MF002 | Self::MF003 | Self::MF004 | Self::MF005 | Self::MF006 => {
                WarningKind::MightFail
            }
            Self::B001 => WarningKind::Blocking,
        }
    }

    /// Short description.
    pub fn description(self) -> &'static str {
        match self {
            Self::D001 => "schema dropped",
            Self::D002 => "table dropped",
            Self::D003 => "column dropped",
            Self::D004 => "column type narrowed",
            Self::D005 => "extension dropped",
            Self::BI001 => "table renamed",
            Self::BI002 => "column renamed",
            Self::MF001 => "unique constraint added to an existing table",
            Self::MF002 => "primary key added to an existing table",
            Self::MF003 => "non-nullable column added without a default",
            Self::MF004 => "column set to NOT NULL",
            Self::MF005 => "column data type changed",
            Self::MF006 => "constraint added to an existing table",
            Self::B001 => "blocking lock on an existing table",
        }
    }
}

/// A warning attached to a changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeWarning {
    /// Warning code.
    pub code: WarningCode,
    /// Warning category.
    #[serde(rename = "type")]
    pub kind: WarningKind,
    /// Schema the change applies to.
    pub schema: String,
    /// Table, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Column or object, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
}

impl ChangeWarning {
    /// Create a warning.
    pub fn new(code: WarningCode, schema: impl Into<String>) -> Self {
        Self {
            code,
            kind: code.kind(),
            schema: schema.into(),
            table: None,
            object: None,
        }
    }

    /// Set the table.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Set the column or object.
    pub fn object(mut self, object: impl Into<String>) -> Self {
        self.object = Some(object.into());
        self
    }
}

impl std::fmt::Display for ChangeWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.code.description())?;
        match (&self.table, &self.object) {
            (Some(table), Some(object)) => write!(f, " ({}.{}.{})", self.schema, table, object),
            (Some(table), None) => write!(f, " ({}.{})", self.schema, table),
            (None, Some(object)) => write!(f, " ({}.{})", self.schema, object),
            (None, None) => write!(f, " ({})", self.schema),
        }
    }
}

/// One rendered, phase-tagged unit of migration work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Changeset {
    /// Phase.
    pub phase: ChangesetPhase,
    /// Execution priority.
    pub priority: u32,
    /// Changeset type.
    #[serde(rename = "type")]
    pub kind: ChangesetType,
    /// Schema name.
    pub schema_name: String,
    /// Table name after the change.
    pub table_name: Option<String>,
    /// Table name at the time the changeset runs.
    pub current_table_name: Option<String>,
    /// Column, constraint or other object name used to order ties.
    pub object_name: Option<String>,
    /// Forward statements.
    pub up: Vec<String>,
    /// Reverse statements.
    pub down: Vec<String>,
    /// Attached warnings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ChangeWarning>,
    /// Whether the changeset may run inside a transaction.
    pub transaction: bool,
}

impl Changeset {
    /// Create a transactional changeset with phase and priority taken from
    /// its type.
    pub fn new(kind: ChangesetType, schema_name: impl Into<String>) -> Self {
        Self {
            phase: kind.phase(),
            priority: kind.priority(),
            kind,
            schema_name: schema_name.into(),
            table_name: None,
            current_table_name: None,
            object_name: None,
            up: Vec::new(),
            down: Vec::new(),
            warnings: Vec::new(),
            transaction: true,
        }
    }

    /// Set the table the changeset applies to.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        let table = table.into();
        self.current_table_name = Some(table.clone());
        self.table_name = Some(table);
        self
    }

    /// Set the table name at execution time when it differs.
    pub fn current_table(mut self, table: impl Into<String>) -> Self {
        self.current_table_name = Some(table.into());
        self
    }

    /// Set the object name.
    pub fn object(mut self, object: impl Into<String>) -> Self {
        self.object_name = Some(object.into());
        self
    }

    /// Set forward statements.
    pub fn up(mut self, statements: Vec<String>) -> Self {
        self.up = statements;
        self
    }

    /// Set reverse statements.
    pub fn down(mut self, statements: Vec<String>) -> Self {
        self.down = statements;
        self
    }

    /// Attach a warning.
    pub fn warn(mut self, warning: ChangeWarning) -> Self {
        self.warnings.push(warning);
        self
    }

    /// Mark the changeset as unable to run inside a transaction.
    pub fn without_transaction(mut self) -> Self {
        self.transaction = false;
        self
    }

    /// Ordering key: priority, then table, then object name.
    pub fn sort_key(&self) -> (u32, &str, &str) {
        (
            self.priority,
            self.table_name.as_deref().unwrap_or(""),
            self.object_name.as_deref().unwrap_or(""),
        )
    }

    /// Whether any warning is destructive.
    pub fn is_destructive(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| w.kind == WarningKind::Destructive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_priorities() {
        assert_eq!(ChangesetType::RenameTable.priority(), 900);
        assert_eq!(ChangesetType::CreateTable.priority(), 2001);
        assert_eq!(ChangesetType::RenameColumn.priority(), 3000);
    }

    #[test]
    fn test_dependency_order() {
        use ChangesetType::*;
        assert!(CreateSchema.priority() < CreateEnum.priority());
        assert!(CreateEnum.priority() < CreateTable.priority());
        assert!(CreateTable.priority() < CreateColumn.priority());
        assert!(CreatePrimaryKey.priority() < CreateForeignKey.priority());
        assert!(CreateUnique.priority() < CreateForeignKey.priority());
        assert!(CreateForeignKey.priority() < CreateTrigger.priority());
        assert!(DropForeignKey.priority() < DropPrimaryKey.priority());
        assert!(DropColumnIdentity.priority() < ChangeColumnNullability.priority());
        assert!(ChangeColumnNullability.priority() < AddColumnIdentity.priority());
        assert!(DropColumn.priority() < DropTable.priority());
        assert!(DropTable.priority() < DropEnum.priority());
        assert!(DropEnum.priority() < DropSchema.priority());
    }

    #[test]
    fn test_phase_of_types() {
        assert_eq!(ChangesetType::CreateTable.phase(), ChangesetPhase::Expand);
        assert_eq!(ChangesetType::RenameColumn.phase(), ChangesetPhase::Expand);
        assert_eq!(
            ChangesetType::ChangeColumnNullability.phase(),
            ChangesetPhase::Alter
        );
        assert_eq!(ChangesetType::DropTable.phase(), ChangesetPhase::Contract);
    }

    #[test]
    fn test_phase_names() {
        for phase in ChangesetPhase::RUN_ORDER {
            assert_eq!(ChangesetPhase::parse(phase.as_str()), Some(phase));
        }
        assert_eq!(ChangesetPhase::Contract.to_string(), "contract");
        assert_eq!(ChangesetPhase::parse("seed"), None);
    }

    #[test]
    fn test_type_name() {
        assert_eq!(ChangesetType::CreateNonNullableColumn.as_str(), "createNonNullableColumn");
    }

    #[test]
    fn test_warning_kinds() {
        assert_eq!(WarningCode::D003.kind(), WarningKind::Destructive);
        assert_eq!(WarningCode::BI001.kind(), WarningKind::BackwardIncompatible);
        assert_eq!(WarningCode::MF002.kind(), WarningKind::MightFail);
        assert_eq!(WarningCode::B001.kind(), WarningKind::Blocking);

        let warning = ChangeWarning::new(WarningCode::D003, "public")
            .table("users")
            .object("email");
        assert_eq!(warning.to_string(), "D003: column dropped (public.users.email)");
    }

    #[test]
    fn test_changeset_builder() {
        let changeset = Changeset::new(ChangesetType::RenameTable, "public")
            .table("publications")
            .current_table("books")
            .without_transaction();
        assert_eq!(changeset.phase, ChangesetPhase::Expand);
        assert_eq!(changeset.priority, 900);
        assert_eq!(changeset.current_table_name.as_deref(), Some("books"));
        assert!(!changeset.transaction);
        assert_eq!(changeset.sort_key(), (900, "publications", ""));
    }
}
