//! Rename intent shared by every classification pass.
//!
//! The context is computed once per diff run from the declared rename markers
//! and the actual snapshot, then passed by reference to every classifier. It
//! never changes after construction, so the outcome of one classifier cannot
//! depend on which entries were classified before it.

use indexmap::IndexMap;
use tracing::{debug, warn};

use monolayer_schema::{Category, RenamePair, SchemaSnapshot};

use crate::ddl::quoted_identifiers;
use crate::error::{MigrateResult, MigrationError};

/// Confirmed renames plus the actual and declared snapshots.
#[derive(Debug)]
pub struct RenameIntentContext<'a> {
    local: &'a SchemaSnapshot,
    remote: &'a SchemaSnapshot,
    tables_aligned: SchemaSnapshot,
    aligned: SchemaSnapshot,
    table_renames: Vec<RenamePair>,
    column_renames: IndexMap<String, Vec<RenamePair>>,
    dropped_tables: Vec<String>,
}

impl<'a> RenameIntentContext<'a> {
    /// Build the context for diffing `remote` (actual) towards `local` (declared).
    pub fn new(local: &'a SchemaSnapshot, remote: &'a SchemaSnapshot) -> MigrateResult<Self> {
        let table_renames = confirm_table_renames(local, remote)?;
        let column_renames = confirm_column_renames(local, remote, &table_renames)?;

        let mut tables_aligned = remote.clone();
        for pair in &table_renames {
            tables_aligned.rename_table(&pair.from, &pair.to);
        }
        let mut aligned = tables_aligned.clone();
        for (table, pairs) in &column_renames {
            for pair in pairs {
                aligned.rename_column(table, &pair.from, &pair.to);
            }
        }

        let dropped_tables = tables_aligned
            .table
            .keys()
            .filter(|name| !local.table.contains_key(*name))
            .cloned()
            .collect();

        debug!(
            schema = %local.schema_name,
            table_renames = table_renames.len(),
            column_renames = column_renames.values().map(Vec::len).sum::<usize>(),
            "Resolved rename intent"
        );

        Ok(Self {
            local,
            remote,
            tables_aligned,
            aligned,
            table_renames,
            column_renames,
            dropped_tables,
        })
    }

    /// Schema the diff run applies to.
    pub fn schema_name(&self) -> &str {
        &self.local.schema_name
    }

    /// Declared snapshot.
    pub fn local(&self) -> &SchemaSnapshot {
        self.local
    }

    /// Actual snapshot.
    pub fn remote(&self) -> &SchemaSnapshot {
        self.remote
    }

    /// Actual snapshot with confirmed table renames applied.
    pub fn tables_aligned(&self) -> &SchemaSnapshot {
        &self.tables_aligned
    }

    /// Actual snapshot with confirmed table and column renames applied.
    pub fn aligned(&self) -> &SchemaSnapshot {
        &self.aligned
    }

    /// Confirmed table renames.
    pub fn table_renames(&self) -> &[RenamePair] {
        &self.table_renames
    }

    /// Confirmed column renames of a table, keyed by its declared name.
    pub fn column_renames(&self, table: &str) -> &[RenamePair] {
        self.column_renames
            .get(table)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Actual name of a table that is renamed to `to`.
    pub fn table_renamed_from(&self, to: &str) -> Option<&str> {
        self.table_renames
            .iter()
            .find(|pair| pair.to == to)
            .map(|pair| pair.from.as_str())
    }

    /// Whether `from` is the actual name of a table being renamed.
    pub fn is_table_rename_source(&self, from: &str) -> bool {
        self.table_renames.iter().any(|pair| pair.from == from)
    }

    /// Actual name of a column renamed to `to` on the declared `table`.
    pub fn column_renamed_from(&self, table: &str, to: &str) -> Option<&str> {
        self.column_renames(table)
            .iter()
            .find(|pair| pair.to == to)
            .map(|pair| pair.from.as_str())
    }

    /// Whether `from` is the actual name of a column being renamed.
    pub fn is_column_rename_source(&self, table: &str, from: &str) -> bool {
        self.column_renames(table).iter().any(|pair| pair.from == from)
    }

    /// Whether the table exists in the actual schema and is not declared.
    pub fn is_dropped_table(&self, table: &str) -> bool {
        self.dropped_tables.iter().any(|t| t == table)
    }

    /// Whether the declared table already exists, possibly under another name.
    pub fn is_existing_table(&self, table: &str) -> bool {
        self.tables_aligned.table.contains_key(table)
    }

    /// Tables dropped in this run.
    pub fn dropped_tables(&self) -> &[String] {
        &self.dropped_tables
    }
}

fn primary_key_columns(snapshot: &SchemaSnapshot, table: &str) -> Option<Vec<String>> {
    snapshot
        .objects_on(Category::PrimaryKey, table)
        .and_then(|keys| keys.values().next())
        .map(|definition| quoted_identifiers(definition))
}

fn confirm_table_renames(
    local: &SchemaSnapshot,
    remote: &SchemaSnapshot,
) -> MigrateResult<Vec<RenamePair>> {
    let declared_column_renames = local.column_renames();
    let mut confirmed = Vec::new();

    for pair in local.table_renames() {
        let source_exists = remote.table.contains_key(&pair.from);
        let target_exists = remote.table.contains_key(&pair.to);

        match (source_exists, target_exists) {
            (false, true) => {
                debug!(from = %pair.from, to = %pair.to, "Table rename already applied");
                continue;
            }
            (false, false) => {
                return Err(MigrationError::invalid_rename(format!(
                    "table `{}` renamed from `{}`, but `{}` does not exist",
                    pair.to, pair.from, pair.from
                )));
            }
            (true, true) => {
                return Err(MigrationError::invalid_rename(format!(
                    "cannot rename table `{}` to `{}`: `{}` already exists",
                    pair.from, pair.to, pair.to
                )));
            }
            (true, false) => {}
        }
        if local.table.contains_key(&pair.from) {
            return Err(MigrationError::invalid_rename(format!(
                "table `{}` is still declared after being renamed to `{}`",
                pair.from, pair.to
            )));
        }
        if confirmed.iter().any(|c: &RenamePair| c.from == pair.from) {
            return Err(MigrationError::invalid_rename(format!(
                "table `{}` is renamed more than once",
                pair.from
            )));
        }

        let renames = declared_column_renames
            .get(&pair.to)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let remote_key = primary_key_columns(remote, &pair.from).map(|columns| {
            columns
                .into_iter()
                .map(|column| {
                    renames
                        .iter()
                        .find(|r| r.from == column)
                        .map(|r| r.to.clone())
                        .unwrap_or(column)
                })
                .collect::<Vec<_>>()
        });
        let local_key = primary_key_columns(local, &pair.to);

        if remote_key != local_key {
            warn!(
                from = %pair.from,
                to = %pair.to,
                "Primary key differs, table rename treated as drop and create"
            );
            continue;
        }
        confirmed.push(pair);
    }

    Ok(confirmed)
}

fn confirm_column_renames(
    local: &SchemaSnapshot,
    remote: &SchemaSnapshot,
    table_renames: &[RenamePair],
) -> MigrateResult<IndexMap<String, Vec<RenamePair>>> {
    let mut confirmed: IndexMap<String, Vec<RenamePair>> = IndexMap::new();

    for (table, pairs) in local.column_renames() {
        let remote_name = table_renames
            .iter()
            .find(|pair| pair.to == table)
            .map(|pair| pair.from.as_str())
            .unwrap_or(table.as_str());
        let Some(remote_table) = remote.table.get(remote_name) else {
            continue;
        };
        let Some(local_table) = local.table.get(&table) else {
            continue;
        };

        for pair in pairs {
            let source_exists = remote_table.columns.contains_key(&pair.from);
            let target_exists = remote_table.columns.contains_key(&pair.to);
            match (source_exists, target_exists) {
                (false, true) => continue,
                (false, false) => {
                    return Err(MigrationError::invalid_rename(format!(
                        "column `{}.{}` renamed from `{}`, but `{}` does not exist",
                        table, pair.to, pair.from, pair.from
                    )));
                }
                (true, true) => {
                    return Err(MigrationError::invalid_rename(format!(
                        "cannot rename column `{}.{}` to `{}`: `{}` already exists",
                        table, pair.from, pair.to, pair.to
                    )));
                }
                (true, false) => {}
            }
            if local_table.columns.contains_key(&pair.from) {
                return Err(MigrationError::invalid_rename(format!(
                    "column `{}.{}` is still declared after being renamed to `{}`",
                    table, pair.from, pair.to
                )));
            }
            let entry = confirmed.entry(table.clone()).or_default();
            if entry.iter().any(|c| c.from == pair.from) {
                return Err(MigrationError::invalid_rename(format!(
                    "column `{}.{}` is renamed more than once",
                    table, pair.from
                )));
            }
            entry.push(pair);
        }
    }

    Ok(confirmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use monolayer_schema::{ColumnInfo, TableInfo};

    fn books(name: &str) -> SchemaSnapshot {
        SchemaSnapshot::new("public")
            .with_table(
                name,
                TableInfo::new()
                    .column("id", ColumnInfo::new("integer").not_null())
                    .column("title", ColumnInfo::new("text")),
            )
            .with_object(
                Category::PrimaryKey,
                name,
                format!("{}_pkey", name),
                "PRIMARY KEY (\"id\")",
            )
    }

    #[test]
    fn test_confirms_table_and_column_renames() {
        let remote = books("books");
        let local = SchemaSnapshot::new("public")
            .with_table(
                "publications",
                TableInfo::new()
                    .column("book_id", ColumnInfo::new("integer").not_null().rename_from("id"))
                    .column("title", ColumnInfo::new("text"))
                    .rename_from("books"),
            )
            .with_object(
                Category::PrimaryKey,
                "publications",
                "publications_pkey",
                "PRIMARY KEY (\"book_id\")",
            );

        let ctx = RenameIntentContext::new(&local, &remote).unwrap();
        assert_eq!(ctx.table_renames(), &[RenamePair::new("books", "publications")]);
        assert_eq!(ctx.table_renamed_from("publications"), Some("books"));
        assert!(ctx.is_table_rename_source("books"));
        assert_eq!(ctx.column_renamed_from("publications", "book_id"), Some("id"));
        assert!(ctx.is_existing_table("publications"));
        assert!(ctx.dropped_tables().is_empty());

        let columns: Vec<_> = ctx.aligned().table["publications"]
            .columns
            .keys()
            .cloned()
            .collect();
        assert_eq!(columns, vec!["book_id", "title"]);
    }

    #[test]
    fn test_primary_key_mismatch_is_not_a_rename() {
        let remote = books("books");
        let local = SchemaSnapshot::new("public")
            .with_table(
                "publications",
                TableInfo::new()
                    .column("id", ColumnInfo::new("integer").not_null())
                    .column("title", ColumnInfo::new("text").not_null())
                    .rename_from("books"),
            )
            .with_object(
                Category::PrimaryKey,
                "publications",
                "publications_pkey",
                "PRIMARY KEY (\"title\")",
            );

        let ctx = RenameIntentContext::new(&local, &remote).unwrap();
        assert!(ctx.table_renames().is_empty());
        assert_eq!(ctx.dropped_tables(), &["books".to_string()]);
        assert!(!ctx.is_existing_table("publications"));
    }

    #[test]
    fn test_missing_rename_source_is_an_error() {
        let remote = SchemaSnapshot::new("public");
        let local = SchemaSnapshot::new("public")
            .with_table("publications", TableInfo::new().rename_from("books"));
        let err = RenameIntentContext::new(&local, &remote).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidRename(_)));
    }

    #[test]
    fn test_applied_rename_is_ignored() {
        let remote = books("publications");
        let mut local = books("publications");
        if let Some(table) = local.table.get_mut("publications") {
            table.rename_from = Some("books".into());
        }
        let ctx = RenameIntentContext::new(&local, &remote).unwrap();
        assert!(ctx.table_renames().is_empty());
    }

    #[test]
    fn test_column_rename_onto_existing_column_is_an_error() {
        let remote = books("books");
        let local = SchemaSnapshot::new("public").with_table(
            "books",
            TableInfo::new()
                .column("id", ColumnInfo::new("integer").not_null())
                .column("title", ColumnInfo::new("text").rename_from("id")),
        );
        let err = RenameIntentContext::new(&local, &remote).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }
}
