//! Migration artifacts on disk.
//!
//! Every phase has its own directory. A migration is a directory named
//! `{timestamp}-{slug}[-{index}]` holding `migration.toml`, `up.sql` and
//! `down.sql`:
//!
//! ```text
//! migrations/
//!   expand/20261016T101500.123Z-schema-change-001/
//!     migration.toml
//!     up.sql
//!     down.sql
//!   alter/
//!   data/
//!   contract/
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::changeset::{ChangeWarning, Changeset, ChangesetPhase};
use crate::error::{MigrateResult, MigrationError};
use crate::planner::ChangesetPlan;

/// Separator between statements in `up.sql` and `down.sql`.
pub const STATEMENT_BREAKPOINT: &str = "--> statement-breakpoint";

const METADATA_FILE: &str = "migration.toml";
const UP_FILE: &str = "up.sql";
const DOWN_FILE: &str = "down.sql";
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3fZ";

/// Contents of `migration.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationMetadata {
    /// Migration name, equal to its directory name.
    pub name: String,
    /// Phase.
    pub phase: ChangesetPhase,
    /// Whether the migration runs inside a transaction.
    pub transaction: bool,
    /// Types of the changesets it was rendered from.
    #[serde(default)]
    pub changesets: Vec<String>,
    /// Warnings of those changesets.
    #[serde(default)]
    pub warnings: Vec<ChangeWarning>,
}

/// A migration artifact with its statements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationArtifact {
    /// Directory of the migration.
    pub path: PathBuf,
    /// Metadata.
    pub metadata: MigrationMetadata,
    /// Forward statements.
    pub up: Vec<String>,
    /// Reverse statements.
    pub down: Vec<String>,
}

impl MigrationArtifact {
    /// Migration name.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Phase of the migration.
    pub fn phase(&self) -> ChangesetPhase {
        self.metadata.phase
    }

    /// Whether the migration runs inside a transaction.
    pub fn transaction(&self) -> bool {
        self.metadata.transaction
    }
}

/// Split changesets of one phase into migrations.
///
/// Consecutive transactional changesets share a migration; every
/// non-transactional changeset gets one of its own.
pub fn group_changesets<'c>(changesets: &[&'c Changeset]) -> Vec<Vec<&'c Changeset>> {
    let mut groups: Vec<Vec<&Changeset>> = Vec::new();
    for &changeset in changesets {
        let extend = changeset.transaction
            && groups
                .last()
                .is_some_and(|group| group.iter().all(|c| c.transaction));
        match groups.last_mut() {
            Some(group) if extend => group.push(changeset),
            _ => groups.push(vec![changeset]),
        }
    }
    groups
}

/// Join statements into the text of an `.sql` file.
pub fn render_statements(statements: &[String]) -> String {
    if statements.is_empty() {
        return String::new();
    }
    let mut out = statements.join(&format!("\n{}\n", STATEMENT_BREAKPOINT));
    out.push('\n');
    out
}

/// Split the text of an `.sql` file into statements. Chunks holding only
/// comments are dropped.
pub fn parse_statements(sql: &str) -> Vec<String> {
    sql.split(STATEMENT_BREAKPOINT)
        .map(str::trim)
        .filter(|chunk| {
            chunk
                .lines()
                .any(|line| !line.trim().is_empty() && !line.trim_start().starts_with("--"))
        })
        .map(str::to_string)
        .collect()
}

fn slugify(slug: &str) -> String {
    let mut out = String::with_capacity(slug.len());
    for c in slug.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let out = out.trim_matches('-').to_string();
    if out.is_empty() {
        "migration".to_string()
    } else {
        out
    }
}

/// Migration name for the `index`-th of `count` migrations created at `at`.
pub fn migration_name(at: DateTime<Utc>, slug: &str, index: usize, count: usize) -> String {
    let timestamp = at.format(TIMESTAMP_FORMAT);
    if count > 1 {
        format!("{}-{}-{:03}", timestamp, slugify(slug), index + 1)
    } else {
        format!("{}-{}", timestamp, slugify(slug))
    }
}

/// Migration artifact reader/writer.
#[derive(Debug, Clone)]
pub struct MigrationFileManager {
    folder: PathBuf,
}

impl MigrationFileManager {
    /// Create a file manager rooted at `folder`.
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    /// Root folder.
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Directory of a phase.
    pub fn phase_dir(&self, phase: ChangesetPhase) -> PathBuf {
        self.folder.join(phase.as_str())
    }

    /// Create every phase directory that does not exist yet.
    pub async fn ensure_phase_dirs(&self) -> MigrateResult<()> {
        for phase in ChangesetPhase::RUN_ORDER {
            tokio::fs::create_dir_all(self.phase_dir(phase)).await?;
        }
        Ok(())
    }

    /// Migrations of a phase, ordered by name.
    pub async fn list_migrations(&self, phase: ChangesetPhase) -> MigrateResult<Vec<MigrationArtifact>> {
        let dir = self.phase_dir(phase);
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }

        let mut entries = tokio::fs::read_dir(&dir).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_dir() && path.join(UP_FILE).exists() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut migrations = Vec::with_capacity(paths.len());
        for path in paths {
            migrations.push(self.read_migration(phase, &path).await?);
        }
        Ok(migrations)
    }

    /// Read one migration directory.
    async fn read_migration(&self, phase: ChangesetPhase, path: &Path) -> MigrateResult<MigrationArtifact> {
        let dir_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| MigrationError::invalid_migration("Invalid path"))?;

        let metadata_path = path.join(METADATA_FILE);
        let metadata = if metadata_path.exists() {
            let content = tokio::fs::read_to_string(&metadata_path).await?;
            let metadata: MigrationMetadata = toml::from_str(&content)?;
            if metadata.name != dir_name || metadata.phase != phase {
                return Err(MigrationError::invalid_migration(format!(
                    "{} does not match its location {}",
                    METADATA_FILE,
                    path.display()
                )));
            }
            metadata
        } else {
            MigrationMetadata {
                name: dir_name.to_string(),
                phase,
                transaction: true,
                changesets: Vec::new(),
                warnings: Vec::new(),
            }
        };

        let up = tokio::fs::read_to_string(path.join(UP_FILE)).await?;
        let down_path = path.join(DOWN_FILE);
        let down = if down_path.exists() {
            tokio::fs::read_to_string(&down_path).await?
        } else {
            String::new()
        };

        Ok(MigrationArtifact {
            path: path.to_path_buf(),
            metadata,
            up: parse_statements(&up),
            down: parse_statements(&down),
        })
    }

    /// Write one migration to its phase directory.
    pub async fn write_migration(
        &self,
        metadata: MigrationMetadata,
        up: Vec<String>,
        down: Vec<String>,
    ) -> MigrateResult<MigrationArtifact> {
        let dir = self.phase_dir(metadata.phase).join(&metadata.name);
        tokio::fs::create_dir_all(&dir).await?;

        tokio::fs::write(dir.join(METADATA_FILE), toml::to_string(&metadata)?).await?;
        tokio::fs::write(dir.join(UP_FILE), render_statements(&up)).await?;
        tokio::fs::write(dir.join(DOWN_FILE), render_statements(&down)).await?;

        debug!(
            phase = %metadata.phase,
            migration = %metadata.name,
            statements = up.len(),
            "Wrote migration"
        );
        Ok(MigrationArtifact {
            path: dir,
            metadata,
            up,
            down,
        })
    }

    /// Render a plan into migrations, one set per phase, named after `at`.
    ///
    /// The timestamp moves forward by a millisecond while any resulting name
    /// is already taken.
    pub async fn write_plan_at(
        &self,
        plan: &ChangesetPlan,
        slug: &str,
        at: DateTime<Utc>,
    ) -> MigrateResult<Vec<MigrationArtifact>> {
        if plan.is_empty() {
            return Err(MigrationError::NoChanges);
        }
        self.ensure_phase_dirs().await?;

        let mut written = Vec::new();
        for phase in ChangesetPhase::RUN_ORDER {
            let groups = group_changesets(&plan.by_phase(phase));
            if groups.is_empty() {
                continue;
            }

            let mut at = at;
            while self.any_taken(phase, at, slug, groups.len()).await? {
                at += Duration::milliseconds(1);
            }

            for (index, group) in groups.iter().enumerate() {
                let metadata = MigrationMetadata {
                    name: migration_name(at, slug, index, groups.len()),
                    phase,
                    transaction: group.iter().all(|c| c.transaction),
                    changesets: group.iter().map(|c| c.kind.as_str()).collect(),
                    warnings: group.iter().flat_map(|c| c.warnings.clone()).collect(),
                };
                let up = group.iter().flat_map(|c| c.up.clone()).collect();
                let down = group.iter().rev().flat_map(|c| c.down.clone()).collect();
                written.push(self.write_migration(metadata, up, down).await?);
            }
        }

        info!(
            schema = %plan.schema_name,
            migrations = written.len(),
            "Generated migrations"
        );
        Ok(written)
    }

    /// Render a plan into migrations named after the current time.
    pub async fn write_plan(&self, plan: &ChangesetPlan, slug: &str) -> MigrateResult<Vec<MigrationArtifact>> {
        self.write_plan_at(plan, slug, Utc::now()).await
    }

    /// Create an empty Data-phase migration for a hand-written backfill.
    pub async fn scaffold_data_migration(&self, slug: &str) -> MigrateResult<MigrationArtifact> {
        self.ensure_phase_dirs().await?;

        let mut at = Utc::now();
        while self.any_taken(ChangesetPhase::Data, at, slug, 1).await? {
            at += Duration::milliseconds(1);
        }
        let metadata = MigrationMetadata {
            name: migration_name(at, slug, 0, 1),
            phase: ChangesetPhase::Data,
            transaction: true,
            changesets: Vec::new(),
            warnings: Vec::new(),
        };

        let dir = self.phase_dir(ChangesetPhase::Data).join(&metadata.name);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(METADATA_FILE), toml::to_string(&metadata)?).await?;
        tokio::fs::write(dir.join(UP_FILE), "-- Write the data migration here.\n").await?;
        tokio::fs::write(dir.join(DOWN_FILE), "-- Write the reverse data migration here.\n").await?;

        info!(migration = %metadata.name, "Scaffolded data migration");
        Ok(MigrationArtifact {
            path: dir,
            metadata,
            up: Vec::new(),
            down: Vec::new(),
        })
    }

    async fn any_taken(
        &self,
        phase: ChangesetPhase,
        at: DateTime<Utc>,
        slug: &str,
        count: usize,
    ) -> MigrateResult<bool> {
        for index in 0..count {
            let name = migration_name(at, slug, index, count);
            if tokio::fs::try_exists(self.phase_dir(phase).join(name)).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::{ChangesetType, WarningCode};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 10, 15, 0).unwrap() + Duration::milliseconds(123)
    }

    fn changeset(kind: ChangesetType, up: &str, down: &str) -> Changeset {
        Changeset::new(kind, "public")
            .table("users")
            .up(vec![up.to_string()])
            .down(vec![down.to_string()])
    }

    fn plan() -> ChangesetPlan {
        ChangesetPlan {
            schema_name: "public".into(),
            changesets: vec![
                changeset(ChangesetType::CreateTable, "CREATE TABLE a();", "DROP TABLE a;"),
                changeset(ChangesetType::CreateColumn, "ALTER TABLE a ADD b int;", "ALTER TABLE a DROP b;"),
                changeset(ChangesetType::CreateIndex, "CREATE INDEX CONCURRENTLY i;", "DROP INDEX i;")
                    .without_transaction(),
                changeset(ChangesetType::DropColumn, "ALTER TABLE a DROP c;", "ALTER TABLE a ADD c int;")
                    .warn(ChangeWarning::new(WarningCode::D003, "public").table("a").object("c")),
            ],
            suppressed: Vec::new(),
        }
    }

    #[test]
    fn test_migration_name() {
        assert_eq!(
            migration_name(at(), "Add users!", 0, 1),
            "20261016T101500.123Z-add-users"
        );
        assert_eq!(
            migration_name(at(), "schema-change", 1, 2),
            "20261016T101500.123Z-schema-change-002"
        );
    }

    #[test]
    fn test_statements_round_trip_and_comments() {
        let statements = vec!["CREATE TABLE a();".to_string(), "DROP TABLE b;".to_string()];
        assert_eq!(parse_statements(&render_statements(&statements)), statements);
        assert!(parse_statements("-- nothing to do\n").is_empty());
        assert!(parse_statements("").is_empty());
    }

    #[test]
    fn test_group_changesets() {
        let plan = plan();
        let expand = plan.by_phase(ChangesetPhase::Expand);
        let groups = group_changesets(&expand);
        let sizes: Vec<usize> = groups.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 1]);
        assert!(!groups[1][0].transaction);
    }

    #[tokio::test]
    async fn test_write_and_list_plan() {
        let dir = TempDir::new().unwrap();
        let manager = MigrationFileManager::new(dir.path());

        let written = manager.write_plan_at(&plan(), "schema-change", at()).await.unwrap();
        assert_eq!(written.len(), 3);

        let expand = manager.list_migrations(ChangesetPhase::Expand).await.unwrap();
        assert_eq!(expand.len(), 2);
        assert_eq!(expand[0].name(), "20261016T101500.123Z-schema-change-001");
        assert!(expand[0].transaction());
        assert_eq!(
            expand[0].up,
            vec!["CREATE TABLE a();", "ALTER TABLE a ADD b int;"]
        );
        assert_eq!(expand[0].down, vec!["ALTER TABLE a DROP b;", "DROP TABLE a;"]);
        assert!(!expand[1].transaction());

        let contract = manager.list_migrations(ChangesetPhase::Contract).await.unwrap();
        assert_eq!(contract.len(), 1);
        assert_eq!(contract[0].name(), "20261016T101500.123Z-schema-change");
        assert_eq!(contract[0].metadata.warnings[0].code, WarningCode::D003);
        assert_eq!(contract[0].metadata.changesets, vec!["dropColumn"]);

        assert!(manager.list_migrations(ChangesetPhase::Alter).await.unwrap().is_empty());
        assert!(manager.phase_dir(ChangesetPhase::Data).exists());
    }

    #[tokio::test]
    async fn test_names_never_collide() {
        let dir = TempDir::new().unwrap();
        let manager = MigrationFileManager::new(dir.path());
        let plan = ChangesetPlan {
            schema_name: "public".into(),
            changesets: vec![changeset(ChangesetType::CreateTable, "CREATE TABLE a();", "DROP TABLE a;")],
            suppressed: Vec::new(),
        };

        let first = manager.write_plan_at(&plan, "users", at()).await.unwrap();
        let second = manager.write_plan_at(&plan, "users", at()).await.unwrap();
        assert_ne!(first[0].name(), second[0].name());
        assert_eq!(second[0].name(), "20261016T101500.124Z-users");
    }

    #[tokio::test]
    async fn test_empty_plan_is_rejected() {
        let dir = TempDir::new().unwrap();
        let manager = MigrationFileManager::new(dir.path());
        let err = manager
            .write_plan_at(&ChangesetPlan::default(), "noop", at())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::NoChanges));
    }

    #[tokio::test]
    async fn test_scaffold_data_migration() {
        let dir = TempDir::new().unwrap();
        let manager = MigrationFileManager::new(dir.path());

        let scaffold = manager.scaffold_data_migration("backfill emails").await.unwrap();
        assert!(scaffold.name().ends_with("-backfill-emails"));

        let data = manager.list_migrations(ChangesetPhase::Data).await.unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].phase(), ChangesetPhase::Data);
        assert!(data[0].up.is_empty());
    }
}
