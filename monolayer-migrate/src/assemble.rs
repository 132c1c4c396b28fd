//! Changeset assembly: semantic operations to rendered, ordered changesets.

use std::collections::HashSet;

use monolayer_schema::{IdentifierAllocator, IdentifierKind};
use tracing::{debug, warn};

use crate::changeset::{ChangeWarning, Changeset, ChangesetType, WarningCode};
use crate::context::RenameIntentContext;
use crate::ddl::{PostgresDdl, rewrite_identifiers};
use crate::operation::{NamedObject, ObjectKind, SchemaOperation};

#[derive(Debug, Clone, Copy)]
enum Verb {
    Create,
    Drop,
    Rename,
    Change,
}

fn object_type(kind: ObjectKind, verb: Verb) -> ChangesetType {
    use ChangesetType as T;
    match (kind, verb) {
        (ObjectKind::PrimaryKey, Verb::Create) => T::CreatePrimaryKey,
        (ObjectKind::PrimaryKey, Verb::Drop) => T::DropPrimaryKey,
        (ObjectKind::PrimaryKey, Verb::Rename) => T::RenamePrimaryKey,
        (ObjectKind::PrimaryKey, Verb::Change) => T::ChangePrimaryKey,
        (ObjectKind::Unique, Verb::Create) => T::CreateUnique,
        (ObjectKind::Unique, Verb::Drop) => T::DropUnique,
        (ObjectKind::Unique, Verb::Rename) => T::RenameUnique,
        (ObjectKind::Unique, Verb::Change) => T::ChangeUnique,
        (ObjectKind::ForeignKey, Verb::Create) => T::CreateForeignKey,
        (ObjectKind::ForeignKey, Verb::Drop) => T::DropForeignKey,
        (ObjectKind::ForeignKey, Verb::Rename) => T::RenameForeignKey,
        (ObjectKind::ForeignKey, Verb::Change) => T::ChangeForeignKey,
        (ObjectKind::Check, Verb::Create) => T::CreateCheck,
        (ObjectKind::Check, Verb::Drop) => T::DropCheck,
        (ObjectKind::Check, Verb::Rename) => T::RenameCheck,
        (ObjectKind::Check, Verb::Change) => T::ChangeCheck,
        (ObjectKind::Index, Verb::Create) => T::CreateIndex,
        (ObjectKind::Index, Verb::Drop) => T::DropIndex,
        (ObjectKind::Index, Verb::Rename) => T::RenameIndex,
        (ObjectKind::Index, Verb::Change) => T::ChangeIndex,
        (ObjectKind::Trigger, Verb::Create) => T::CreateTrigger,
        (ObjectKind::Trigger, Verb::Drop) => T::DropTrigger,
        (ObjectKind::Trigger, Verb::Rename) => T::RenameTrigger,
        (ObjectKind::Trigger, Verb::Change) => T::ChangeTrigger,
    }
}

/// Whether changing a column from `from` to `to` can lose data.
pub fn is_narrowing(from: &str, to: &str) -> bool {
    let (from_base, from_args) = split_type(from);
    let (to_base, to_args) = split_type(to);

    if from_base == to_base {
        if from_args.is_empty() {
            return !to_args.is_empty();
        }
        return to_args.iter().zip(&from_args).any(|(t, f)| t < f);
    }

    let integer_rank = |base: &str| match base {
        "smallint" | "int2" => Some(1),
        "integer" | "int" | "int4" => Some(2),
        "bigint" | "int8" => Some(3),
        _ => None,
    };
    if let (Some(a), Some(b)) = (integer_rank(&from_base), integer_rank(&to_base)) {
        return b < a;
    }

    let is_text = |base: &str| matches!(base, "text" | "character varying" | "varchar");
    let is_bounded_text = |base: &str| {
        matches!(base, "character varying" | "varchar" | "character" | "char")
    };
    (is_text(&from_base) && is_bounded_text(&to_base) && !to_args.is_empty())
        || (matches!(from_base.as_str(), "double precision" | "float8") && to_base == "real")
}

fn split_type(data_type: &str) -> (String, Vec<u32>) {
    let lower = data_type.trim().to_ascii_lowercase();
    match (lower.find('('), lower.rfind(')')) {
        (Some(open), Some(close)) if open < close => {
            let args = lower[open + 1..close]
                .split(',')
                .filter_map(|arg| arg.trim().parse().ok())
                .collect();
            (lower[..open].trim().to_string(), args)
        }
        _ => (lower, Vec::new()),
    }
}

/// Objects an operation creates or renames to, by kind and name.
fn created_names(op: &SchemaOperation) -> Vec<(ObjectKind, &str)> {
    match op {
        SchemaOperation::CreateObjects { kind, objects, .. } => objects
            .iter()
            .map(|object| (*kind, object.name.as_str()))
            .collect(),
        SchemaOperation::RenameObject { kind, to, .. } => vec![(*kind, to.as_str())],
        SchemaOperation::ChangeObject { kind, current, .. } => {
            vec![(*kind, current.name.as_str())]
        }
        _ => Vec::new(),
    }
}

/// Turns semantic operations into changesets.
///
/// Batch operations expand into one changeset per object. The result is
/// ordered by priority, then table name, then object name.
///
/// Every identifier the run creates goes through one [`IdentifierAllocator`],
/// so no two objects of a run end up with the same name.
#[derive(Debug)]
pub struct ChangesetAssembler<'c, 'a> {
    ctx: &'c RenameIntentContext<'a>,
    ddl: PostgresDdl,
}

impl<'c, 'a> ChangesetAssembler<'c, 'a> {
    /// Create an assembler for a diff run.
    pub fn new(ctx: &'c RenameIntentContext<'a>) -> Self {
        Self {
            ddl: PostgresDdl::new(ctx.schema_name()),
            ctx,
        }
    }

    /// Render and order changesets for `operations`.
    pub fn assemble(&self, operations: &[SchemaOperation]) -> Vec<Changeset> {
        let mut names = IdentifierAllocator::new();
        let operations = self.allocate_names(operations, &mut names);
        let mut changesets: Vec<Changeset> = operations
            .iter()
            .flat_map(|op| self.changesets(op, &mut names))
            .collect();
        changesets.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        debug!(
            operations = operations.len(),
            changesets = changesets.len(),
            "Assembled changesets"
        );
        changesets
    }

    /// Reserve every object name the run leaves alone, then allocate the
    /// names of created objects that follow the naming convention.
    ///
    /// A convention name only changes on a collision; the object's
    /// definition is rewritten to match.
    fn allocate_names(
        &self,
        operations: &[SchemaOperation],
        names: &mut IdentifierAllocator,
    ) -> Vec<SchemaOperation> {
        let created: HashSet<(ObjectKind, &str)> =
            operations.iter().flat_map(created_names).collect();
        for snapshot in [self.ctx.local(), self.ctx.aligned()] {
            for kind in ObjectKind::ALL {
                let Some(tables) = snapshot.table_objects(kind.category()) else {
                    continue;
                };
                for name in tables.values().flat_map(|objects| objects.keys()) {
                    if !created.contains(&(kind, name.as_str())) {
                        names.reserve(name);
                    }
                }
            }
        }

        let mut operations = operations.to_vec();
        for op in &mut operations {
            match op {
                SchemaOperation::CreateObjects {
                    kind, table, objects, ..
                } => {
                    for object in objects.iter_mut() {
                        let definition = object.definition.clone();
                        self.allocate(*kind, table, &mut object.name, Some(&mut object.definition), &definition, names);
                    }
                }
                SchemaOperation::ChangeObject {
                    kind,
                    table,
                    current,
                    ..
                } => {
                    let definition = current.definition.clone();
                    self.allocate(*kind, table, &mut current.name, Some(&mut current.definition), &definition, names);
                }
                SchemaOperation::RenameObject { kind, table, to, .. } => {
                    let definition = self
                        .ctx
                        .local()
                        .object(kind.category(), table, to)
                        .unwrap_or_default()
                        .to_string();
                    self.allocate(*kind, table, to, None, &definition, names);
                }
                _ => {}
            }
        }
        operations
    }

    fn allocate(
        &self,
        kind: ObjectKind,
        table: &str,
        name: &mut String,
        definition: Option<&mut String>,
        source: &str,
        names: &mut IdentifierAllocator,
    ) {
        let columns = match (kind.generated_name(table, source), kind.naming_columns(source)) {
            (Some(generated), Some(columns)) if generated == *name => columns,
            _ => {
                if !names.reserve(name) {
                    warn!(kind = kind.label(), table, name = %name, "Identifier used twice in one run");
                }
                return;
            }
        };

        let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
        let allocated = names.allocate(kind.identifier_kind(), table, &columns);
        if allocated == *name {
            return;
        }
        debug!(kind = kind.label(), table, from = %name, to = %allocated, "Identifier collision resolved");
        if let Some(definition) = definition {
            let previous = name.as_str();
            *definition = rewrite_identifiers(definition, |ident| {
                (ident == previous).then(|| allocated.clone())
            });
        }
        *name = allocated;
    }

    fn schema(&self) -> &str {
        self.ctx.schema_name()
    }

    fn changeset(&self, kind: ChangesetType) -> Changeset {
        Changeset::new(kind, self.schema())
    }

    fn warning(&self, code: WarningCode) -> ChangeWarning {
        ChangeWarning::new(code, self.schema())
    }

    fn changesets(&self, op: &SchemaOperation, names: &mut IdentifierAllocator) -> Vec<Changeset> {
        let ddl = &self.ddl;
        let changeset = match op {
            SchemaOperation::CreateSchema { schema } => Changeset::new(ChangesetType::CreateSchema, schema)
                .object(schema)
                .up(ddl.create_schema(schema))
                .down(vec![ddl.drop_schema(schema)]),
            SchemaOperation::DropSchema { schema } => Changeset::new(ChangesetType::DropSchema, schema)
                .object(schema)
                .up(vec![ddl.drop_schema(schema)])
                .down(ddl.create_schema(schema))
                .warn(ChangeWarning::new(WarningCode::D001, schema)),
            SchemaOperation::CreateExtension { name } => self
                .changeset(ChangesetType::CreateExtension)
                .object(name)
                .up(vec![ddl.create_extension(name)])
                .down(vec![ddl.drop_extension(name)]),
            SchemaOperation::DropExtension { name } => self
                .changeset(ChangesetType::DropExtension)
                .object(name)
                .up(vec![ddl.drop_extension(name)])
                .down(vec![ddl.create_extension(name)])
                .warn(self.warning(WarningCode::D005).object(name)),
            SchemaOperation::CreateEnum { name, values } => self
                .changeset(ChangesetType::CreateEnum)
                .object(name)
                .up(vec![ddl.create_enum(name, values)])
                .down(vec![ddl.drop_enum(name)]),
            SchemaOperation::DropEnum { name, values } => self
                .changeset(ChangesetType::DropEnum)
                .object(name)
                .up(vec![ddl.drop_enum(name)])
                .down(vec![ddl.create_enum(name, values)]),
            SchemaOperation::ChangeEnum { name, previous, .. } => self
                .changeset(ChangesetType::ChangeEnum)
                .object(name)
                .up(op
                    .added_enum_values()
                    .into_iter()
                    .map(|(value, before)| ddl.add_enum_value(name, value, before))
                    .collect())
                .down(ddl.rebuild_enum(name, previous, &self.enum_columns(name)))
                .without_transaction(),
            SchemaOperation::CreateTable { table, definition } => self
                .changeset(ChangesetType::CreateTable)
                .table(table)
                .up(ddl.create_table(table, definition))
                .down(vec![ddl.drop_table(table)]),
            SchemaOperation::DropTable {
                table,
                definition,
                dependents,
            } => {
                let mut down = ddl.create_table(table, definition);
                for (kind, object) in &dependents.objects {
                    down.extend(self.recreate(*kind, table, object));
                }
                self.changeset(ChangesetType::DropTable)
                    .table(table)
                    .up(vec![ddl.drop_table(table)])
                    .down(down)
                    .warn(self.warning(WarningCode::D002).table(table))
            }
            SchemaOperation::RenameTable { from, to } => self
                .changeset(ChangesetType::RenameTable)
                .table(to)
                .current_table(from)
                .up(vec![ddl.rename_table(from, to)])
                .down(vec![ddl.rename_table(to, from)])
                .warn(self.warning(WarningCode::BI001).table(from).object(to)),
            SchemaOperation::CreateColumn {
                table,
                column,
                definition,
            } => self
                .changeset(ChangesetType::CreateColumn)
                .table(table)
                .object(column)
                .up(ddl.add_column(table, column, definition))
                .down(vec![ddl.drop_column(table, column)]),
            SchemaOperation::CreateNonNullableColumn {
                table,
                column,
                definition,
            } => {
                let changeset = self
                    .changeset(ChangesetType::CreateNonNullableColumn)
                    .table(table)
                    .object(column)
                    .down(vec![ddl.drop_column(table, column)]);
                if definition.default_value.is_some() || definition.identity.is_some() {
                    return vec![changeset.up(ddl.add_column(table, column, definition))];
                }

                // Existing rows have no value yet: add the column nullable,
                // leave room for a data migration, then enforce NOT NULL.
                let mut nullable = definition.clone();
                nullable.is_nullable = true;
                let check = names.allocate(IdentifierKind::Check, table, &[column.as_str()]);
                let enforce = self
                    .changeset(ChangesetType::ChangeColumnNullability)
                    .table(table)
                    .object(column)
                    .up(ddl.set_not_null_online(table, column, &check))
                    .down(vec![ddl.set_nullability(table, column, true)])
                    .warn(self.warning(WarningCode::MF004).table(table).object(column));
                return vec![
                    changeset
                        .up(ddl.add_column(table, column, &nullable))
                        .warn(self.warning(WarningCode::MF003).table(table).object(column)),
                    enforce,
                ];
            }
            SchemaOperation::DropColumn {
                table,
                column,
                definition,
            } => self
                .changeset(ChangesetType::DropColumn)
                .table(table)
                .object(column)
                .up(vec![ddl.drop_column(table, column)])
                .down(ddl.add_column(table, column, definition))
                .warn(self.warning(WarningCode::D003).table(table).object(column)),
            SchemaOperation::RenameColumn { table, from, to } => self
                .changeset(ChangesetType::RenameColumn)
                .table(table)
                .object(to)
                .up(vec![ddl.rename_column(table, from, to)])
                .down(vec![ddl.rename_column(table, to, from)])
                .warn(self.warning(WarningCode::BI002).table(table).object(from)),
            SchemaOperation::ChangeColumnDataType {
                table,
                column,
                from,
                to,
            } => {
                let code = if is_narrowing(from, to) {
                    WarningCode::D004
                } else {
                    WarningCode::MF005
                };
                self.changeset(ChangesetType::ChangeColumnDataType)
                    .table(table)
                    .object(column)
                    .up(vec![ddl.alter_column_type(table, column, to)])
                    .down(vec![ddl.alter_column_type(table, column, from)])
                    .warn(self.warning(code).table(table).object(column))
            }
            SchemaOperation::AddColumnDefault {
                table,
                column,
                value,
            } => self
                .changeset(ChangesetType::AddColumnDefault)
                .table(table)
                .object(column)
                .up(ddl.set_default(table, column, value))
                .down(ddl.drop_default(table, column)),
            SchemaOperation::DropColumnDefault {
                table,
                column,
                previous,
            } => self
                .changeset(ChangesetType::DropColumnDefault)
                .table(table)
                .object(column)
                .up(ddl.drop_default(table, column))
                .down(ddl.set_default(table, column, previous)),
            SchemaOperation::ChangeColumnDefault {
                table,
                column,
                from,
                to,
            } => self
                .changeset(ChangesetType::ChangeColumnDefault)
                .table(table)
                .object(column)
                .up(ddl.set_default(table, column, to))
                .down(ddl.set_default(table, column, from)),
            SchemaOperation::AddColumnIdentity {
                table,
                column,
                identity,
            } => self
                .changeset(ChangesetType::AddColumnIdentity)
                .table(table)
                .object(column)
                .up(vec![ddl.add_identity(table, column, *identity)])
                .down(vec![ddl.drop_identity(table, column)]),
            SchemaOperation::DropColumnIdentity {
                table,
                column,
                previous,
            } => self
                .changeset(ChangesetType::DropColumnIdentity)
                .table(table)
                .object(column)
                .up(vec![ddl.drop_identity(table, column)])
                .down(vec![ddl.add_identity(table, column, *previous)]),
            SchemaOperation::ChangeColumnIdentity {
                table,
                column,
                from,
                to,
            } => self
                .changeset(ChangesetType::ChangeColumnIdentity)
                .table(table)
                .object(column)
                .up(vec![ddl.set_identity(table, column, *to)])
                .down(vec![ddl.set_identity(table, column, *from)]),
            SchemaOperation::ChangeColumnNullability {
                table,
                column,
                nullable,
            } => {
                let changeset = self
                    .changeset(ChangesetType::ChangeColumnNullability)
                    .table(table)
                    .object(column)
                    .up(vec![ddl.set_nullability(table, column, *nullable)])
                    .down(vec![ddl.set_nullability(table, column, !*nullable)]);
                if *nullable {
                    changeset
                } else {
                    changeset.warn(self.warning(WarningCode::MF004).table(table).object(column))
                }
            }
            SchemaOperation::CreateObjects {
                kind,
                table,
                objects,
                existing_table,
            } => {
                return objects
                    .iter()
                    .map(|object| self.create_object(*kind, table, object, *existing_table))
                    .collect();
            }
            SchemaOperation::DropObjects {
                kind,
                table,
                objects,
            } => {
                return objects
                    .iter()
                    .map(|object| {
                        self.changeset(object_type(*kind, Verb::Drop))
                            .table(table)
                            .object(&object.name)
                            .up(vec![self.drop(*kind, table, &object.name)])
                            .down(self.recreate(*kind, table, object))
                    })
                    .collect();
            }
            SchemaOperation::RenameObject {
                kind,
                table,
                from,
                to,
            } => self
                .changeset(object_type(*kind, Verb::Rename))
                .table(table)
                .object(to)
                .up(vec![self.rename(*kind, table, from, to)])
                .down(vec![self.rename(*kind, table, to, from)]),
            SchemaOperation::ChangeObject {
                kind,
                table,
                previous,
                current,
            } => {
                let mut up = vec![self.drop(*kind, table, &previous.name)];
                up.extend(self.recreate(*kind, table, current));
                let mut down = vec![self.drop(*kind, table, &current.name)];
                down.extend(self.recreate(*kind, table, previous));

                let code = match kind {
                    ObjectKind::PrimaryKey => Some(WarningCode::MF002),
                    ObjectKind::Unique => Some(WarningCode::MF001),
                    ObjectKind::ForeignKey | ObjectKind::Check => Some(WarningCode::MF006),
                    ObjectKind::Index => Some(WarningCode::B001),
                    ObjectKind::Trigger => None,
                };
                let changeset = self
                    .changeset(object_type(*kind, Verb::Change))
                    .table(table)
                    .object(&current.name)
                    .up(up)
                    .down(down);
                match code {
                    Some(code) => {
                        changeset.warn(self.warning(code).table(table).object(&current.name))
                    }
                    None => changeset,
                }
            }
        };
        vec![changeset]
    }

    /// Declared columns whose type is the enum `name`.
    fn enum_columns(&self, name: &str) -> Vec<(String, String)> {
        let qualified = self.ddl.qualified(name);
        let qualified = qualified.as_str();
        self.ctx
            .local()
            .table
            .iter()
            .flat_map(|(table, info)| {
                info.columns
                    .iter()
                    .filter(move |(_, column)| {
                        column.is_enum && (column.data_type == name || column.data_type == qualified)
                    })
                    .map(move |(column, _)| (table.clone(), column.clone()))
            })
            .collect()
    }

    /// Create an object, online-safe when the table already holds data.
    fn create_object(
        &self,
        kind: ObjectKind,
        table: &str,
        object: &NamedObject,
        existing_table: bool,
    ) -> Changeset {
        let ddl = &self.ddl;
        let name = object.name.as_str();
        let base = self
            .changeset(object_type(kind, Verb::Create))
            .table(table)
            .object(name);

        if !existing_table {
            return base
                .up(self.recreate(kind, table, object))
                .down(vec![self.drop(kind, table, name)]);
        }

        let warning = |code| self.warning(code).table(table).object(name);
        match kind {
            ObjectKind::PrimaryKey => base
                .up(ddl.add_constraint(table, name, &object.definition))
                .down(vec![ddl.drop_constraint(table, name)])
                .warn(warning(WarningCode::MF002)),
            ObjectKind::Unique => base
                .up(ddl.add_unique_concurrently(table, name, &object.definition))
                .down(vec![
                    ddl.drop_constraint_if_exists(table, name),
                    ddl.drop_index(name, true),
                ])
                .warn(warning(WarningCode::MF001))
                .without_transaction(),
            ObjectKind::ForeignKey | ObjectKind::Check => base
                .up(ddl.add_constraint_not_valid(table, name, &object.definition))
                .down(vec![ddl.drop_constraint(table, name)])
                .warn(warning(WarningCode::MF006)),
            ObjectKind::Index => base
                .up(ddl.create_index(name, &object.definition, true))
                .down(vec![ddl.drop_index(name, true)])
                .without_transaction(),
            ObjectKind::Trigger => base
                .up(ddl.create_trigger(table, name, &object.definition))
                .down(vec![ddl.drop_trigger(table, name)]),
        }
    }

    /// Plain, transactional creation of an object.
    fn recreate(&self, kind: ObjectKind, table: &str, object: &NamedObject) -> Vec<String> {
        match kind {
            kind if kind.is_constraint() => {
                self.ddl.add_constraint(table, &object.name, &object.definition)
            }
            ObjectKind::Index => self.ddl.create_index(&object.name, &object.definition, false),
            _ => self.ddl.create_trigger(table, &object.name, &object.definition),
        }
    }

    fn drop(&self, kind: ObjectKind, table: &str, name: &str) -> String {
        match kind {
            kind if kind.is_constraint() => self.ddl.drop_constraint(table, name),
            ObjectKind::Index => self.ddl.drop_index(name, false),
            _ => self.ddl.drop_trigger(table, name),
        }
    }

    fn rename(&self, kind: ObjectKind, table: &str, from: &str, to: &str) -> String {
        match kind {
            kind if kind.is_constraint() => self.ddl.rename_constraint(table, from, to),
            ObjectKind::Index => self.ddl.rename_index(from, to),
            _ => self.ddl.rename_trigger(table, from, to),
        }
    }
}
