//! Diff run planning: snapshots in, ordered changesets out.
//!
//! A rename moves everything below it to a new path, so one structural diff
//! cannot tell renamed children from new ones. Planning therefore diffs in
//! three passes, each against a progressively aligned copy of the actual
//! snapshot, and classifies every pass against the same context:
//!
//! ```text
//! tables   actual              vs declared   table.T
//! columns  actual + tables     vs declared   table.T.columns.C
//! objects  actual + all names  vs declared   everything else
//! ```

use tracing::{debug, info, warn};

use monolayer_schema::{Category, SchemaSnapshot};

use crate::assemble::ChangesetAssembler;
use crate::changeset::{ChangeWarning, Changeset, ChangesetPhase, WarningKind};
use crate::classify::{ClassifiedDiff, SuppressReason, classify_all};
use crate::context::RenameIntentContext;
use crate::differ::{RawDiffEntry, diff_snapshots};
use crate::error::MigrateResult;

/// One pass of a diff run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffPass {
    /// Whole tables, against the actual snapshot.
    Tables,
    /// Whole columns, against the actual snapshot with table renames applied.
    Columns,
    /// Everything else, against the fully aligned snapshot.
    Objects,
}

impl DiffPass {
    /// Passes in execution order.
    pub const ALL: [DiffPass; 3] = [DiffPass::Tables, DiffPass::Columns, DiffPass::Objects];

    fn baseline<'c>(self, ctx: &'c RenameIntentContext<'_>) -> &'c SchemaSnapshot {
        match self {
            Self::Tables => ctx.remote(),
            Self::Columns => ctx.tables_aligned(),
            Self::Objects => ctx.aligned(),
        }
    }

    fn includes(self, entry: &RawDiffEntry) -> bool {
        let is_table = entry.segment(0) == Some(Category::Table.key());
        let depth = entry.path.len();
        match self {
            Self::Tables => is_table && depth == 2,
            Self::Columns => is_table && depth == 4,
            Self::Objects => !(is_table && (depth == 2 || depth == 4)),
        }
    }

    /// Raw entries this pass is responsible for.
    pub fn entries(self, ctx: &RenameIntentContext<'_>) -> MigrateResult<Vec<RawDiffEntry>> {
        let mut entries = diff_snapshots(self.baseline(ctx), ctx.local())?;
        entries.retain(|entry| self.includes(entry));
        Ok(entries)
    }
}

/// Ordered changesets of one diff run.
#[derive(Debug, Clone, Default)]
pub struct ChangesetPlan {
    /// Schema the plan applies to.
    pub schema_name: String,
    /// Changesets in execution order.
    pub changesets: Vec<Changeset>,
    /// Diff entries that intentionally produced no changeset.
    pub suppressed: Vec<(RawDiffEntry, SuppressReason)>,
}

impl ChangesetPlan {
    /// Check if the plan contains no changes.
    pub fn is_empty(&self) -> bool {
        self.changesets.is_empty()
    }

    /// Changesets of one phase, in execution order.
    pub fn by_phase(&self, phase: ChangesetPhase) -> Vec<&Changeset> {
        self.changesets
            .iter()
            .filter(|changeset| changeset.phase == phase)
            .collect()
    }

    /// Every warning attached to the plan, unfiltered.
    pub fn warnings(&self) -> Vec<&ChangeWarning> {
        self.changesets
            .iter()
            .flat_map(|changeset| changeset.warnings.iter())
            .collect()
    }

    /// Check if any changeset discards data.
    pub fn has_destructive_changes(&self) -> bool {
        self.changesets.iter().any(Changeset::is_destructive)
    }

    /// Get a summary of the plan.
    pub fn summary(&self) -> String {
        let mut parts: Vec<String> = ChangesetPhase::RUN_ORDER
            .into_iter()
            .map(|phase| (phase, self.by_phase(phase).len()))
            .filter(|(_, count)| *count > 0)
            .map(|(phase, count)| format!("{} {}", count, phase))
            .collect();

        if parts.is_empty() {
            return "No schema changes".to_string();
        }

        let destructive = self
            .warnings()
            .iter()
            .filter(|w| w.kind == WarningKind::Destructive)
            .count();
        if destructive > 0 {
            parts.push(format!("{} destructive", destructive));
        }
        parts.join(", ")
    }
}

/// Plans the changesets that move an actual schema to a declared one.
#[derive(Debug, Clone, Copy)]
pub struct Planner<'a> {
    local: &'a SchemaSnapshot,
    remote: &'a SchemaSnapshot,
}

impl<'a> Planner<'a> {
    /// Create a planner diffing `remote` (actual) towards `local` (declared).
    pub fn new(local: &'a SchemaSnapshot, remote: &'a SchemaSnapshot) -> Self {
        Self { local, remote }
    }

    /// Classify all passes and assemble the changesets.
    ///
    /// Fails without producing anything when a rename is invalid or an entry
    /// matches no classifier.
    pub fn plan(&self) -> MigrateResult<ChangesetPlan> {
        let ctx = RenameIntentContext::new(self.local, self.remote)?;

        let mut classified = ClassifiedDiff::default();
        for pass in DiffPass::ALL {
            let entries = pass.entries(&ctx)?;
            debug!(pass = ?pass, entries = entries.len(), "Classifying diff pass");
            classified.extend(classify_all(&entries, &ctx)?);
        }
        for op in &classified.operations {
            debug!(
                operation = %op.name(),
                table = op.table().unwrap_or_default(),
                "Planned operation"
            );
        }

        let changesets = ChangesetAssembler::new(&ctx).assemble(&classified.operations);
        let plan = ChangesetPlan {
            schema_name: ctx.schema_name().to_string(),
            changesets,
            suppressed: classified.suppressed,
        };

        for warning in plan.warnings() {
            if warning.kind == WarningKind::Destructive {
                warn!(code = ?warning.code, schema = %warning.schema, "{}", warning);
            }
        }
        info!(
            schema = %plan.schema_name,
            operations = classified.operations.len(),
            changesets = plan.changesets.len(),
            dropped_tables = ctx.dropped_tables().len(),
            suppressed = plan.suppressed.len(),
            "Planned schema changes"
        );
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::{ChangesetType, WarningCode};
    use crate::classify::matching_classifiers;
    use crate::ddl::PostgresDdl;
    use crate::error::MigrationError;
    use monolayer_schema::{ColumnInfo, Identity, TableInfo};
    use pretty_assertions::assert_eq;

    fn kinds(plan: &ChangesetPlan) -> Vec<ChangesetType> {
        plan.changesets.iter().map(|c| c.kind).collect()
    }

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
            .with_object(
                Category::Index,
                name,
                format!("{}_title_idx", name),
                format!(
                    "CREATE INDEX \"{}_title_idx\" ON \"public\".\"{}\" USING btree (\"title\")",
                    name, name
                ),
            )
    }

    #[test]
    fn test_identical_snapshots_plan_nothing() {
        let plan = Planner::new(&books("books"), &books("books")).plan().unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.summary(), "No schema changes");
    }

    #[test]
    fn test_new_table() {
        let local = SchemaSnapshot::new("public")
            .with_table("users", TableInfo::new().column("id", ColumnInfo::new("integer")));
        let remote = SchemaSnapshot::new("public");

        let plan = Planner::new(&local, &remote).plan().unwrap();
        assert_eq!(plan.changesets.len(), 1);

        let changeset = &plan.changesets[0];
        assert_eq!(changeset.kind, ChangesetType::CreateTable);
        assert_eq!(changeset.phase, ChangesetPhase::Expand);
        assert_eq!(changeset.priority, 2001);
        assert!(changeset.up[0].starts_with("CREATE TABLE \"public\".\"users\""));
        assert_eq!(changeset.down, vec!["DROP TABLE \"public\".\"users\";"]);
        assert_eq!(plan.summary(), "1 expand");
    }

    #[test]
    fn test_table_and_column_rename_in_one_run() {
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
            )
            .with_object(
                Category::Index,
                "publications",
                "publications_title_idx",
                "CREATE INDEX \"publications_title_idx\" ON \"public\".\"publications\" USING btree (\"title\")",
            );

        let plan = Planner::new(&local, &remote).plan().unwrap();
        assert_eq!(
            kinds(&plan),
            vec![
                ChangesetType::RenameTable,
                ChangesetType::RenameColumn,
                ChangesetType::RenamePrimaryKey,
                ChangesetType::RenameIndex,
            ]
        );

        let rename_table = &plan.changesets[0];
        assert_eq!(rename_table.priority, 900);
        assert_eq!(rename_table.table_name.as_deref(), Some("publications"));
        assert_eq!(rename_table.current_table_name.as_deref(), Some("books"));
        assert_eq!(plan.changesets[1].priority, 3000);
        assert_eq!(
            plan.changesets[1].up,
            vec!["ALTER TABLE \"public\".\"publications\" RENAME COLUMN \"id\" TO \"book_id\";"]
        );
        assert!(
            plan.changesets
                .iter()
                .all(|c| c.kind != ChangesetType::DropColumn && c.kind != ChangesetType::CreateColumn)
        );
        assert!(!plan.has_destructive_changes());
    }

    #[test]
    fn test_dropped_table_suppresses_its_constraints() {
        let remote = books("books")
            .with_table(
                "accounts",
                TableInfo::new().column("email", ColumnInfo::new("text")),
            )
            .with_object(
                Category::UniqueConstraints,
                "accounts",
                "accounts_email_key",
                "UNIQUE NULLS DISTINCT (\"email\")",
            );
        let local = books("books");

        let plan = Planner::new(&local, &remote).plan().unwrap();
        assert_eq!(kinds(&plan), vec![ChangesetType::DropTable]);

        let drop = &plan.changesets[0];
        assert_eq!(drop.phase, ChangesetPhase::Contract);
        assert_eq!(drop.warnings[0].code, WarningCode::D002);
        assert!(drop.down.iter().any(|s| s.contains("ADD CONSTRAINT \"accounts_email_key\"")));
        assert!(
            plan.suppressed
                .iter()
                .any(|(_, reason)| *reason == SuppressReason::DroppedTable)
        );
    }

    #[test]
    fn test_column_rename_ripple_on_index_is_suppressed() {
        let remote = books("books");
        let local = SchemaSnapshot::new("public")
            .with_table(
                "books",
                TableInfo::new()
                    .column("id", ColumnInfo::new("integer").not_null())
                    .column("name", ColumnInfo::new("text").rename_from("title")),
            )
            .with_object(Category::PrimaryKey, "books", "books_pkey", "PRIMARY KEY (\"id\")")
            .with_object(
                Category::Index,
                "books",
                "books_title_idx",
                "CREATE INDEX \"books_title_idx\" ON \"public\".\"books\" USING btree (\"name\")",
            );

        let plan = Planner::new(&local, &remote).plan().unwrap();
        assert_eq!(kinds(&plan), vec![ChangesetType::RenameColumn]);
        assert!(
            plan.suppressed
                .iter()
                .any(|(_, reason)| *reason == SuppressReason::RenameRipple)
        );
    }

    #[test]
    fn test_identity_and_nullability_order() {
        let remote = SchemaSnapshot::new("public").with_table(
            "users",
            TableInfo::new().column("id", ColumnInfo::new("integer")),
        );
        let local = SchemaSnapshot::new("public").with_table(
            "users",
            TableInfo::new().column("id", ColumnInfo::new("integer").identity(Identity::Always)),
        );

        let plan = Planner::new(&local, &remote).plan().unwrap();
        assert_eq!(
            kinds(&plan),
            vec![
                ChangesetType::ChangeColumnNullability,
                ChangesetType::AddColumnIdentity,
            ]
        );
        assert!(plan.by_phase(ChangesetPhase::Alter).len() == 2);
        assert_eq!(plan.changesets[0].warnings[0].code, WarningCode::MF004);
    }

    #[test]
    fn test_enum_value_removal_is_unclassified() {
        let remote = SchemaSnapshot::new("public").with_enum("role", &["admin", "member"]);
        let local = SchemaSnapshot::new("public").with_enum("role", &["admin"]);

        let err = Planner::new(&local, &remote).plan().unwrap_err();
        match err {
            MigrationError::UnclassifiedDiff { entries } => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].path, vec!["enums", "role"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_enum_value_addition() {
        let remote = SchemaSnapshot::new("public").with_enum("role", &["admin", "member"]);
        let local = SchemaSnapshot::new("public").with_enum("role", &["owner", "admin", "member"]);

        let plan = Planner::new(&local, &remote).plan().unwrap();
        assert_eq!(kinds(&plan), vec![ChangesetType::ChangeEnum]);
        assert!(!plan.changesets[0].transaction);
        assert!(plan.changesets[0].up[0].contains("BEFORE 'admin'"));
    }

    #[test]
    fn test_classifiers_are_exclusive() {
        let remote = books("books")
            .with_table(
                "authors",
                TableInfo::new()
                    .column("id", ColumnInfo::new("bigint").not_null())
                    .column("bio", ColumnInfo::new("text").default_sql("''"))
                    .column("legacy", ColumnInfo::new("text")),
            )
            .with_object(Category::PrimaryKey, "authors", "authors_pkey", "PRIMARY KEY (\"id\")")
            .with_object(
                Category::CheckConstraints,
                "authors",
                "authors_bio_chk",
                "CHECK (length(\"bio\") < 1000)",
            )
            .with_table("audit", TableInfo::new().column("at", ColumnInfo::new("timestamptz")))
            .with_extension("pgcrypto");

        let local = SchemaSnapshot::new("public")
            .with_table(
                "publications",
                TableInfo::new()
                    .column("id", ColumnInfo::new("integer").not_null())
                    .column("name", ColumnInfo::new("varchar(200)").rename_from("title"))
                    .column("author_id", ColumnInfo::new("bigint"))
                    .rename_from("books"),
            )
            .with_object(
                Category::PrimaryKey,
                "publications",
                "publications_pkey",
                "PRIMARY KEY (\"id\")",
            )
            .with_object(
                Category::ForeignKeyConstraints,
                "publications",
                "publications_author_id_fkey",
                "FOREIGN KEY (\"author_id\") REFERENCES \"public\".\"authors\" (\"id\")",
            )
            .with_table(
                "authors",
                TableInfo::new()
                    .column("id", ColumnInfo::new("bigint").identity(Identity::ByDefault))
                    .column("bio", ColumnInfo::new("text"))
                    .column("email", ColumnInfo::new("text").not_null()),
            )
            .with_object(Category::PrimaryKey, "authors", "authors_pkey", "PRIMARY KEY (\"id\")")
            .with_enum("role", &["admin"]);

        let ctx = RenameIntentContext::new(&local, &remote).unwrap();
        let mut checked = 0;
        for pass in DiffPass::ALL {
            for entry in pass.entries(&ctx).unwrap() {
                let matches = matching_classifiers(&entry, &ctx);
                assert_eq!(matches.len(), 1, "{} {:?}: {:?}", entry.kind, entry.path, matches);
                checked += 1;
            }
        }
        assert!(checked > 10);

        let plan = Planner::new(&local, &remote).plan().unwrap();
        let types = kinds(&plan);
        for expected in [
            ChangesetType::CreateEnum,
            ChangesetType::RenameTable,
            ChangesetType::CreateColumn,
            ChangesetType::CreateNonNullableColumn,
            ChangesetType::RenameColumn,
            ChangesetType::ChangeColumnDataType,
            ChangesetType::DropColumnDefault,
            ChangesetType::AddColumnIdentity,
            ChangesetType::RenamePrimaryKey,
            ChangesetType::CreateForeignKey,
            ChangesetType::DropIndex,
            ChangesetType::DropCheck,
            ChangesetType::DropColumn,
            ChangesetType::DropTable,
            ChangesetType::DropExtension,
        ] {
            assert!(types.contains(&expected), "missing {:?} in {:?}", expected, types);
        }
        let priorities: Vec<u32> = plan.changesets.iter().map(|c| c.priority).collect();
        assert!(priorities.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_dropped_tables_linked_by_foreign_key() {
        let remote = SchemaSnapshot::new("public")
            .with_table(
                "authors",
                TableInfo::new().column("id", ColumnInfo::new("integer").not_null()),
            )
            .with_object(Category::PrimaryKey, "authors", "authors_pkey", "PRIMARY KEY (\"id\")")
            .with_table(
                "books",
                TableInfo::new()
                    .column("id", ColumnInfo::new("integer").not_null())
                    .column("author_id", ColumnInfo::new("integer")),
            )
            .with_object(Category::PrimaryKey, "books", "books_pkey", "PRIMARY KEY (\"id\")")
            .with_object(
                Category::ForeignKeyConstraints,
                "books",
                "books_author_id_fkey",
                "FOREIGN KEY (\"author_id\") REFERENCES \"public\".\"authors\" (\"id\")",
            );
        let local = SchemaSnapshot::new("public");

        let plan = Planner::new(&local, &remote).plan().unwrap();
        assert_eq!(
            kinds(&plan),
            vec![
                ChangesetType::DropForeignKey,
                ChangesetType::DropTable,
                ChangesetType::DropTable,
            ]
        );

        let fkey = &plan.changesets[0];
        assert_eq!(fkey.table_name.as_deref(), Some("books"));
        assert_eq!(
            fkey.up,
            vec!["ALTER TABLE \"public\".\"books\" DROP CONSTRAINT \"books_author_id_fkey\";"]
        );
        assert!(fkey.down[0].contains("ADD CONSTRAINT \"books_author_id_fkey\" FOREIGN KEY"));

        // Reverting recreates both tables before the foreign key comes back.
        let books = &plan.changesets[2];
        assert_eq!(books.table_name.as_deref(), Some("books"));
        assert!(books.down.iter().all(|s| !s.contains("REFERENCES")));
        assert!(books.down.iter().any(|s| s.contains("\"books_pkey\"")));
    }

    #[test]
    fn test_renamed_objects_pair_by_generated_name() {
        let remote = SchemaSnapshot::new("public")
            .with_table("users", TableInfo::new().column("email", ColumnInfo::new("text")))
            .with_object(
                Category::UniqueConstraints,
                "users",
                "users_a_key",
                "UNIQUE NULLS DISTINCT (\"email\")",
            )
            .with_object(
                Category::UniqueConstraints,
                "users",
                "users_email_key",
                "UNIQUE NULLS DISTINCT (\"email\")",
            );
        let local = SchemaSnapshot::new("public")
            .with_table(
                "users",
                TableInfo::new().column("mail", ColumnInfo::new("text").rename_from("email")),
            )
            .with_object(
                Category::UniqueConstraints,
                "users",
                "users_mail_key",
                "UNIQUE NULLS DISTINCT (\"mail\")",
            )
            .with_object(
                Category::UniqueConstraints,
                "users",
                "users_z_key",
                "UNIQUE NULLS DISTINCT (\"mail\")",
            );

        let plan = Planner::new(&local, &remote).plan().unwrap();
        assert_eq!(
            kinds(&plan),
            vec![
                ChangesetType::RenameColumn,
                ChangesetType::RenameUnique,
                ChangesetType::RenameUnique,
            ]
        );
        let ddl = PostgresDdl::new("public");
        assert_eq!(
            plan.changesets[1].up,
            vec![ddl.rename_constraint("users", "users_email_key", "users_mail_key")]
        );
        assert_eq!(
            plan.changesets[2].up,
            vec![ddl.rename_constraint("users", "users_a_key", "users_z_key")]
        );
    }

    #[test]
    fn test_created_name_avoids_existing_identifier() {
        let snapshot = || {
            SchemaSnapshot::new("public")
                .with_table("users", TableInfo::new().column("email", ColumnInfo::new("text")))
                .with_object(
                    Category::Index,
                    "users",
                    "users_email_key",
                    "CREATE UNIQUE INDEX \"users_email_key\" ON \"public\".\"users\" USING btree (\"email\")",
                )
        };
        let remote = snapshot();
        let local = snapshot().with_object(
            Category::UniqueConstraints,
            "users",
            "users_email_key",
            "UNIQUE NULLS DISTINCT (\"email\")",
        );

        let plan = Planner::new(&local, &remote).plan().unwrap();
        assert_eq!(kinds(&plan), vec![ChangesetType::CreateUnique]);

        let unique = &plan.changesets[0];
        let name = unique.object_name.clone().unwrap();
        assert_ne!(name, "users_email_key");
        assert!(name.starts_with("users_") && name.ends_with("_key"));
        assert!(unique.up.iter().all(|s| !s.contains("\"users_email_key\"")));
        assert!(unique.up[0].starts_with(&format!("CREATE UNIQUE INDEX CONCURRENTLY \"{}\"", name)));
    }

    #[test]
    fn test_non_nullable_column_is_phased() {
        let remote = SchemaSnapshot::new("public").with_table(
            "users",
            TableInfo::new().column("id", ColumnInfo::new("integer").not_null()),
        );
        let local = SchemaSnapshot::new("public").with_table(
            "users",
            TableInfo::new()
                .column("id", ColumnInfo::new("integer").not_null())
                .column("email", ColumnInfo::new("text").not_null()),
        );

        let plan = Planner::new(&local, &remote).plan().unwrap();
        assert_eq!(
            kinds(&plan),
            vec![
                ChangesetType::CreateNonNullableColumn,
                ChangesetType::ChangeColumnNullability,
            ]
        );

        let ddl = PostgresDdl::new("public");
        let add = &plan.changesets[0];
        assert_eq!(add.phase, ChangesetPhase::Expand);
        assert_eq!(add.up, ddl.add_column("users", "email", &ColumnInfo::new("text")));
        assert_eq!(add.down, vec![ddl.drop_column("users", "email")]);
        assert_eq!(add.warnings[0].code, WarningCode::MF003);

        let enforce = &plan.changesets[1];
        assert_eq!(enforce.phase, ChangesetPhase::Alter);
        assert_eq!(enforce.up, ddl.set_not_null_online("users", "email", "users_email_check"));
        assert_eq!(enforce.up.len(), 4);
        assert_eq!(enforce.down, vec![ddl.set_nullability("users", "email", true)]);
        assert_eq!(enforce.warnings[0].code, WarningCode::MF004);
    }

    #[test]
    fn test_non_nullable_column_with_default_is_added_at_once() {
        let remote = SchemaSnapshot::new("public").with_table(
            "users",
            TableInfo::new().column("id", ColumnInfo::new("integer").not_null()),
        );
        let column = ColumnInfo::new("text").not_null().default_sql("''");
        let local = SchemaSnapshot::new("public").with_table(
            "users",
            TableInfo::new()
                .column("id", ColumnInfo::new("integer").not_null())
                .column("email", column.clone()),
        );

        let plan = Planner::new(&local, &remote).plan().unwrap();
        assert_eq!(kinds(&plan), vec![ChangesetType::CreateNonNullableColumn]);
        assert_eq!(
            plan.changesets[0].up,
            PostgresDdl::new("public").add_column("users", "email", &column)
        );
        assert!(plan.changesets[0].warnings.is_empty());
    }

    /// Every reversible changeset's down is what planning the opposite
    /// direction runs as its up. Destructive changesets lose data and are
    /// exempt; renames are checked against the swapped rename.
    #[test]
    fn test_down_reverses_up() {
        let remote = SchemaSnapshot::new("public").with_table(
            "users",
            TableInfo::new()
                .column("id", ColumnInfo::new("integer").not_null())
                .column("bio", ColumnInfo::new("text").default_sql("'a'"))
                .column("nick", ColumnInfo::new("text"))
                .column("seq", ColumnInfo::new("integer").not_null())
                .column("title", ColumnInfo::new("text"))
                .column("legacy", ColumnInfo::new("text")),
        );
        let local = SchemaSnapshot::new("public")
            .with_table(
                "users",
                TableInfo::new()
                    .column("id", ColumnInfo::new("bigint").not_null())
                    .column("bio", ColumnInfo::new("text").default_sql("'b'"))
                    .column("nick", ColumnInfo::new("text").default_sql("'x'"))
                    .column("seq", ColumnInfo::new("integer").identity(Identity::ByDefault))
                    .column("name", ColumnInfo::new("text").rename_from("title"))
                    .column("note", ColumnInfo::new("text")),
            )
            .with_table("tags", TableInfo::new().column("label", ColumnInfo::new("text")))
            .with_enum("mood", &["happy", "sad"])
            .with_extension("pgcrypto");

        let forward = Planner::new(&local, &remote).plan().unwrap();
        let reverse = Planner::new(&remote, &local).plan().unwrap();
        let ddl = PostgresDdl::new("public");

        let destructive: Vec<ChangesetType> = forward
            .changesets
            .iter()
            .filter(|c| c.is_destructive())
            .map(|c| c.kind)
            .collect();
        assert_eq!(destructive, vec![ChangesetType::DropColumn]);

        let mut checked = 0;
        for changeset in forward.changesets.iter().filter(|c| !c.is_destructive()) {
            if changeset.kind == ChangesetType::RenameColumn {
                assert_eq!(changeset.up, vec![ddl.rename_column("users", "title", "name")]);
                assert_eq!(changeset.down, vec![ddl.rename_column("users", "name", "title")]);
                continue;
            }
            assert!(
                reverse.changesets.iter().any(|r| r.up == changeset.down),
                "no reverse changeset runs the down of {:?}: {:?}",
                changeset.kind,
                changeset.down
            );
            checked += 1;
        }
        assert_eq!(checked, 8);
    }
}
