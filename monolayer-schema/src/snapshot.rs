//! Normalized, comparable schema snapshots.
//!
//! Both the declared schema and the introspected database produce a
//! [`SchemaSnapshot`] of identical shape so the differ can treat them
//! uniformly. Every category is keyed by object name; members inside a table
//! keep the insertion order of the declaration but are compared by key.
//!
//! ```text
//! table               -> { users: { columns: { id: {dataType, isNullable, ..} } } }
//! index               -> { users: { users_email_idx: "hash:CREATE INDEX .." } }
//! uniqueConstraints   -> { users: { users_email_key: "UNIQUE NULLS DISTINCT (\"email\")" } }
//! foreignKeyConstraints, primaryKey, checkConstraints, triggers -> same shape
//! enums               -> { role: "admin, member" }
//! extensions          -> { pgcrypto: true }
//! schemaInfo          -> { public: true }
//! ```

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{SchemaError, SchemaResult};
use crate::naming::{self, RenamePair};

/// Per-table map of object name to canonical definition.
pub type TableObjects = IndexMap<String, IndexMap<String, String>>;

/// Snapshot categories, in the order they appear in a serialized snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    /// Tables and their columns.
    Table,
    /// Indexes.
    Index,
    /// Unique constraints.
    UniqueConstraints,
    /// Foreign key constraints.
    ForeignKeyConstraints,
    /// Primary keys.
    PrimaryKey,
    /// Check constraints.
    CheckConstraints,
    /// Triggers.
    Triggers,
    /// Enumerated types.
    Enums,
    /// Extensions.
    Extensions,
    /// Namespaces.
    SchemaInfo,
}

impl Category {
    /// All categories.
    pub const ALL: [Category; 10] = [
        Category::Table,
        Category::Index,
        Category::UniqueConstraints,
        Category::ForeignKeyConstraints,
        Category::PrimaryKey,
        Category::CheckConstraints,
        Category::Triggers,
        Category::Enums,
        Category::Extensions,
        Category::SchemaInfo,
    ];

    /// Key used for this category in a serialized snapshot.
    pub fn key(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Index => "index",
            Self::UniqueConstraints => "uniqueConstraints",
            Self::ForeignKeyConstraints => "foreignKeyConstraints",
            Self::PrimaryKey => "primaryKey",
            Self::CheckConstraints => "checkConstraints",
            Self::Triggers => "triggers",
            Self::Enums => "enums",
            Self::Extensions => "extensions",
            Self::SchemaInfo => "schemaInfo",
        }
    }

    /// Parse a serialized category key.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.key() == key)
    }

    /// Whether this category holds table-scoped objects (`{table: {name: def}}`).
    pub fn is_table_scoped(self) -> bool {
        matches!(
            self,
            Self::Index
                | Self::UniqueConstraints
                | Self::ForeignKeyConstraints
                | Self::PrimaryKey
                | Self::CheckConstraints
                | Self::Triggers
        )
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Identity column generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Identity {
    /// `GENERATED ALWAYS AS IDENTITY`.
    #[serde(rename = "ALWAYS")]
    Always,
    /// `GENERATED BY DEFAULT AS IDENTITY`.
    #[serde(rename = "BY DEFAULT")]
    ByDefault,
}

impl Identity {
    /// SQL keyword(s) for this identity kind.
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Always => "ALWAYS",
            Self::ByDefault => "BY DEFAULT",
        }
    }

    /// Parse the serialized identity value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ALWAYS" => Some(Self::Always),
            "BY DEFAULT" => Some(Self::ByDefault),
            _ => None,
        }
    }
}

/// Canonical column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    /// Full SQL data type, including modifiers (`varchar(255)`, `numeric(10, 2)`).
    pub data_type: String,
    /// Whether the column accepts NULL.
    pub is_nullable: bool,
    /// Default expression, stored as `hash:expression`.
    pub default_value: Option<String>,
    /// Identity generation, if any.
    pub identity: Option<Identity>,
    /// Numeric precision.
    pub numeric_precision: Option<u32>,
    /// Numeric scale.
    pub numeric_scale: Option<u32>,
    /// Character maximum length.
    pub character_maximum_length: Option<u32>,
    /// Datetime precision.
    pub datetime_precision: Option<u32>,
    /// Whether the data type is an enumerated type.
    #[serde(rename = "enum")]
    pub is_enum: bool,
    /// Previous column name declared by the user.
    #[serde(skip)]
    pub rename_from: Option<String>,
}

impl ColumnInfo {
    /// Create a nullable column of the given data type.
    pub fn new(data_type: impl Into<String>) -> Self {
        Self {
            data_type: data_type.into(),
            is_nullable: true,
            default_value: None,
            identity: None,
            numeric_precision: None,
            numeric_scale: None,
            character_maximum_length: None,
            datetime_precision: None,
            is_enum: false,
            rename_from: None,
        }
    }

    /// Mark the column `NOT NULL`.
    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }

    /// Set the default expression; the content hash is added automatically.
    pub fn default_sql(mut self, expression: &str) -> Self {
        self.default_value = Some(naming::hashed(expression));
        self
    }

    /// Make the column an identity column (implies `NOT NULL`).
    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self.is_nullable = false;
        self
    }

    /// Set the character maximum length.
    pub fn max_length(mut self, length: u32) -> Self {
        self.character_maximum_length = Some(length);
        self
    }

    /// Set numeric precision and scale.
    pub fn numeric(mut self, precision: u32, scale: u32) -> Self {
        self.numeric_precision = Some(precision);
        self.numeric_scale = Some(scale);
        self
    }

    /// Mark the data type as an enumerated type.
    pub fn enum_type(mut self) -> Self {
        self.is_enum = true;
        self
    }

    /// Declare that this column was previously named `from`.
    pub fn rename_from(mut self, from: impl Into<String>) -> Self {
        self.rename_from = Some(from.into());
        self
    }

    /// The default expression without its content hash.
    pub fn default_expression(&self) -> Option<&str> {
        self.default_value
            .as_deref()
            .map(|value| naming::split_hashed(value).1)
    }
}

/// Canonical table definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    /// Columns in declaration order.
    pub columns: IndexMap<String, ColumnInfo>,
    /// Previous table name declared by the user.
    #[serde(skip)]
    pub rename_from: Option<String>,
}

impl TableInfo {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column.
    pub fn column(mut self, name: impl Into<String>, column: ColumnInfo) -> Self {
        self.columns.insert(name.into(), column);
        self
    }

    /// Declare that this table was previously named `from`.
    pub fn rename_from(mut self, from: impl Into<String>) -> Self {
        self.rename_from = Some(from.into());
        self
    }
}

/// A normalized snapshot of one database schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSnapshot {
    /// Name of the schema this snapshot describes.
    #[serde(skip, default = "default_schema_name")]
    pub schema_name: String,
    /// Tables.
    #[serde(default)]
    pub table: IndexMap<String, TableInfo>,
    /// Indexes, as `hash:CREATE INDEX ..`.
    #[serde(default)]
    pub index: TableObjects,
    /// Unique constraints.
    #[serde(default)]
    pub unique_constraints: TableObjects,
    /// Foreign key constraints.
    #[serde(default)]
    pub foreign_key_constraints: TableObjects,
    /// Primary keys.
    #[serde(default)]
    pub primary_key: TableObjects,
    /// Check constraints, as `hash:CHECK (..)`.
    #[serde(default)]
    pub check_constraints: TableObjects,
    /// Triggers, as `hash:CREATE OR REPLACE TRIGGER ..`.
    #[serde(default)]
    pub triggers: TableObjects,
    /// Enumerated types, as comma separated values.
    #[serde(default)]
    pub enums: IndexMap<String, String>,
    /// Installed extensions.
    #[serde(default)]
    pub extensions: IndexMap<String, bool>,
    /// Namespaces.
    #[serde(default)]
    pub schema_info: IndexMap<String, bool>,
}

fn default_schema_name() -> String {
    "public".to_string()
}

impl Default for SchemaSnapshot {
    fn default() -> Self {
        Self::new("public")
    }
}

impl SchemaSnapshot {
    /// Create an empty snapshot for a schema.
    pub fn new(schema_name: impl Into<String>) -> Self {
        Self {
            schema_name: schema_name.into(),
            table: IndexMap::new(),
            index: IndexMap::new(),
            unique_constraints: IndexMap::new(),
            foreign_key_constraints: IndexMap::new(),
            primary_key: IndexMap::new(),
            check_constraints: IndexMap::new(),
            triggers: IndexMap::new(),
            enums: IndexMap::new(),
            extensions: IndexMap::new(),
            schema_info: IndexMap::new(),
        }
    }

    /// Load a snapshot from a JSON file.
    pub fn from_file(path: impl AsRef<Path>, schema_name: &str) -> SchemaResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| SchemaError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;
        let mut snapshot = Self::from_json(&content)?;
        snapshot.schema_name = schema_name.to_string();
        Ok(snapshot)
    }

    /// Parse a snapshot from JSON.
    pub fn from_json(content: &str) -> SchemaResult<Self> {
        let snapshot: Self =
            serde_json::from_str(content).map_err(|e| SchemaError::JsonError { source: e })?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Serialize to canonical JSON. Identical snapshots yield identical bytes.
    pub fn to_json(&self) -> SchemaResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| SchemaError::JsonError { source: e })
    }

    /// Convert to a generic JSON tree for structural diffing.
    pub fn to_value(&self) -> SchemaResult<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| SchemaError::JsonError { source: e })
    }

    /// Check that every table-scoped object refers to a known table.
    pub fn validate(&self) -> SchemaResult<()> {
        for category in Category::ALL.into_iter().filter(|c| c.is_table_scoped()) {
            if let Some(objects) = self.table_objects(category) {
                for table in objects.keys() {
                    if !self.table.contains_key(table) {
                        return Err(SchemaError::invalid_snapshot(format!(
                            "{} on unknown table `{}`",
                            category, table
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Add a table.
    pub fn with_table(mut self, name: impl Into<String>, table: TableInfo) -> Self {
        self.table.insert(name.into(), table);
        self
    }

    /// Add a table-scoped object (index, constraint or trigger).
    pub fn with_object(
        mut self,
        category: Category,
        table: impl Into<String>,
        name: impl Into<String>,
        definition: impl Into<String>,
    ) -> Self {
        if let Some(objects) = self.table_objects_mut(category) {
            objects
                .entry(table.into())
                .or_default()
                .insert(name.into(), definition.into());
        }
        self
    }

    /// Add an enumerated type.
    pub fn with_enum(mut self, name: impl Into<String>, values: &[&str]) -> Self {
        self.enums.insert(name.into(), values.join(", "));
        self
    }

    /// Add an extension.
    pub fn with_extension(mut self, name: impl Into<String>) -> Self {
        self.extensions.insert(name.into(), true);
        self
    }

    /// Add a namespace.
    pub fn with_schema(mut self, name: impl Into<String>) -> Self {
        self.schema_info.insert(name.into(), true);
        self
    }

    /// Objects of a table-scoped category.
    pub fn table_objects(&self, category: Category) -> Option<&TableObjects> {
        match category {
            Category::Index => Some(&self.index),
            Category::UniqueConstraints => Some(&self.unique_constraints),
            Category::ForeignKeyConstraints => Some(&self.foreign_key_constraints),
            Category::PrimaryKey => Some(&self.primary_key),
            Category::CheckConstraints => Some(&self.check_constraints),
            Category::Triggers => Some(&self.triggers),
            Category::Table | Category::Enums | Category::Extensions | Category::SchemaInfo => None,
        }
    }

    fn table_objects_mut(&mut self, category: Category) -> Option<&mut TableObjects> {
        match category {
            Category::Index => Some(&mut self.index),
            Category::UniqueConstraints => Some(&mut self.unique_constraints),
            Category::ForeignKeyConstraints => Some(&mut self.foreign_key_constraints),
            Category::PrimaryKey => Some(&mut self.primary_key),
            Category::CheckConstraints => Some(&mut self.check_constraints),
            Category::Triggers => Some(&mut self.triggers),
            Category::Table | Category::Enums | Category::Extensions | Category::SchemaInfo => None,
        }
    }

    /// Definition of a single table-scoped object.
    pub fn object(&self, category: Category, table: &str, name: &str) -> Option<&str> {
        self.table_objects(category)?
            .get(table)?
            .get(name)
            .map(String::as_str)
    }

    /// All objects of a category on one table.
    pub fn objects_on(&self, category: Category, table: &str) -> Option<&IndexMap<String, String>> {
        self.table_objects(category)?.get(table)
    }

    /// Look up a column.
    pub fn column(&self, table: &str, column: &str) -> Option<&ColumnInfo> {
        self.table.get(table)?.columns.get(column)
    }

    /// Values of an enumerated type.
    pub fn enum_values(&self, name: &str) -> Option<Vec<&str>> {
        self.enums.get(name).map(|values| split_enum_values(values))
    }

    /// Tables declared with a `rename_from` marker.
    pub fn table_renames(&self) -> Vec<RenamePair> {
        self.table
            .iter()
            .filter_map(|(name, table)| {
                table
                    .rename_from
                    .as_ref()
                    .map(|from| RenamePair::new(from.clone(), name.clone()))
            })
            .collect()
    }

    /// Columns declared with a `rename_from` marker, keyed by table.
    pub fn column_renames(&self) -> IndexMap<String, Vec<RenamePair>> {
        let mut renames: IndexMap<String, Vec<RenamePair>> = IndexMap::new();
        for (table_name, table) in &self.table {
            for (column_name, column) in &table.columns {
                if let Some(from) = &column.rename_from {
                    renames
                        .entry(table_name.clone())
                        .or_default()
                        .push(RenamePair::new(from.clone(), column_name.clone()));
                }
            }
        }
        renames
    }

    /// Move every object of `from` to `to`, across all categories.
    ///
    /// The table keeps its position so the snapshot stays deterministic.
    pub fn rename_table(&mut self, from: &str, to: &str) {
        rename_key(&mut self.table, from, to);
        for category in Category::ALL.into_iter().filter(|c| c.is_table_scoped()) {
            if let Some(objects) = self.table_objects_mut(category) {
                rename_key(objects, from, to);
            }
        }
    }

    /// Rename a column of a table, keeping its position.
    pub fn rename_column(&mut self, table: &str, from: &str, to: &str) {
        if let Some(info) = self.table.get_mut(table) {
            rename_key(&mut info.columns, from, to);
        }
    }
}

/// Split a serialized enum value list.
pub fn split_enum_values(values: &str) -> Vec<&str> {
    values
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect()
}

fn rename_key<V>(map: &mut IndexMap<String, V>, from: &str, to: &str) {
    if let Some(index) = map.get_index_of(from) {
        if let Some((_, value)) = map.shift_remove_index(index) {
            let (new_index, _) = map.insert_full(to.to_string(), value);
            map.move_index(new_index, index.min(map.len() - 1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn users() -> SchemaSnapshot {
        SchemaSnapshot::new("public")
            .with_table(
                "users",
                TableInfo::new()
                    .column("id", ColumnInfo::new("integer").identity(Identity::Always))
                    .column("email", ColumnInfo::new("text").not_null()),
            )
            .with_object(
                Category::PrimaryKey,
                "users",
                "users_pkey",
                "PRIMARY KEY (\"id\")",
            )
    }

    #[test]
    fn test_identical_snapshots_serialize_identically() {
        assert_eq!(users().to_json().unwrap(), users().to_json().unwrap());
    }

    #[test]
    fn test_json_roundtrip_preserves_column_order() {
        let json = users().to_json().unwrap();
        let parsed = SchemaSnapshot::from_json(&json).unwrap();
        let columns: Vec<_> = parsed.table["users"].columns.keys().cloned().collect();
        assert_eq!(columns, vec!["id", "email"]);
        assert_eq!(parsed, users());
    }

    #[test]
    fn test_rename_markers_are_not_serialized() {
        let snapshot = SchemaSnapshot::new("public").with_table(
            "books",
            TableInfo::new()
                .column("book_id", ColumnInfo::new("integer").rename_from("id"))
                .rename_from("publications"),
        );
        let json = snapshot.to_json().unwrap();
        assert!(!json.contains("rename"));
        assert_eq!(snapshot.table_renames(), vec![RenamePair::new("publications", "books")]);
        assert_eq!(
            snapshot.column_renames()["books"],
            vec![RenamePair::new("id", "book_id")]
        );
    }

    #[test]
    fn test_validate_rejects_orphan_objects() {
        let snapshot = SchemaSnapshot::new("public").with_object(
            Category::Index,
            "ghosts",
            "ghosts_id_idx",
            "CREATE INDEX ..",
        );
        assert!(snapshot.validate().is_err());
    }

    #[test]
    fn test_rename_table_moves_objects() {
        let mut snapshot = users();
        snapshot.rename_table("users", "accounts");
        assert!(snapshot.table.contains_key("accounts"));
        assert!(!snapshot.table.contains_key("users"));
        assert_eq!(
            snapshot.object(Category::PrimaryKey, "accounts", "users_pkey"),
            Some("PRIMARY KEY (\"id\")")
        );
    }

    #[test]
    fn test_rename_column_keeps_position() {
        let mut snapshot = users();
        snapshot.rename_column("users", "id", "user_id");
        let columns: Vec<_> = snapshot.table["users"].columns.keys().cloned().collect();
        assert_eq!(columns, vec!["user_id", "email"]);
    }

    #[test]
    fn test_default_expression_strips_hash() {
        let column = ColumnInfo::new("timestamptz").default_sql("now()");
        assert_eq!(column.default_expression(), Some("now()"));
        assert!(column.default_value.unwrap().ends_with(":now()"));
    }

    #[test]
    fn test_category_keys() {
        for category in Category::ALL {
            assert_eq!(Category::from_key(category.key()), Some(category));
        }
        assert_eq!(Category::from_key("views"), None);
    }
}
