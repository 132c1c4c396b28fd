//! Phased migration orchestrator.
//!
//! Applies and reverts migration artifacts phase by phase against a
//! [`MigrationDriver`]. Pending migrations of a run are grouped into
//! transaction plans: a maximal run of transactional migrations of one phase
//! shares a transaction, a non-transactional migration runs alone. When a
//! plan fails, the failing plan is undone and every plan applied earlier in
//! the same invocation is reverted in reverse order.

use std::collections::BTreeSet;
use std::ops::Range;
use std::path::PathBuf;

use chrono::Utc;
use tracing::{error, info, warn};

use monolayer_schema::{MonolayerConfig, SchemaSnapshot};

use crate::changeset::ChangesetPhase;
use crate::error::{MigrateResult, MigrationError};
use crate::file::{MigrationArtifact, MigrationFileManager};
use crate::ledger::{LedgerTables, MigrationDriver};
use crate::planner::Planner;
use crate::postgres::PgMigrationDriver;

/// Runtime options of the orchestrator.
#[derive(Debug, Clone)]
pub struct MigratorConfig {
    /// Root folder holding one directory per phase.
    pub migrations_dir: PathBuf,
    /// Slug of generated migration names.
    pub slug: String,
    /// Prefix of the ledger and lock tables.
    pub table_prefix: String,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self::from(&MonolayerConfig::default())
    }
}

impl From<&MonolayerConfig> for MigratorConfig {
    fn from(config: &MonolayerConfig) -> Self {
        Self {
            migrations_dir: config.migrations.folder.clone(),
            slug: config.migrations.slug.clone(),
            table_prefix: config.ledger.table_prefix.clone(),
        }
    }
}

impl MigratorConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the migrations directory.
    pub fn migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    /// Set the slug of generated migrations.
    pub fn slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = slug.into();
        self
    }

    /// Set the ledger table prefix.
    pub fn table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    /// Ledger tables named with the configured prefix.
    pub fn ledger_tables(&self) -> LedgerTables {
        LedgerTables::new(self.table_prefix.clone())
    }
}

/// Direction a migration was run in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `up` statements.
    Up,
    /// `down` statements.
    Down,
}

/// Outcome status of one migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStatus {
    /// All statements ran.
    Success,
    /// A statement failed.
    Error,
    /// The run stopped before reaching the migration.
    NotExecuted,
}

/// Outcome of one migration in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOutcome {
    /// Migration name.
    pub name: String,
    /// Migration phase.
    pub phase: ChangesetPhase,
    /// Direction it was run in.
    pub direction: Direction,
    /// What happened to it.
    pub status: MigrationStatus,
    /// Whether its effects were undone after a later failure.
    pub rolled_back: bool,
}

/// Result of a migrate or rollback run.
#[derive(Debug)]
pub struct MigrationReport {
    /// One outcome per migration considered, in run order.
    pub outcomes: Vec<MigrationOutcome>,
    /// The error that stopped the run.
    pub error: Option<MigrationError>,
}

impl MigrationReport {
    fn pending(migrations: &[MigrationArtifact], direction: Direction) -> Self {
        Self {
            outcomes: migrations
                .iter()
                .map(|m| MigrationOutcome {
                    name: m.name().to_string(),
                    phase: m.phase(),
                    direction,
                    status: MigrationStatus::NotExecuted,
                    rolled_back: false,
                })
                .collect(),
            error: None,
        }
    }

    /// Check if the run completed without error.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Names of migrations that ran and were not undone.
    pub fn applied(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.status == MigrationStatus::Success && !o.rolled_back)
            .map(|o| o.name.as_str())
            .collect()
    }

    /// Outcome of a migration by name.
    pub fn outcome(&self, name: &str) -> Option<&MigrationOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }

    /// Get a summary of the report.
    pub fn summary(&self) -> String {
        let count = |status| self.outcomes.iter().filter(|o| o.status == status).count();
        let rolled_back = self.outcomes.iter().filter(|o| o.rolled_back).count();

        let mut parts = Vec::new();
        for (n, label) in [
            (count(MigrationStatus::Success), "succeeded"),
            (count(MigrationStatus::Error), "failed"),
            (count(MigrationStatus::NotExecuted), "not executed"),
            (rolled_back, "rolled back"),
        ] {
            if n > 0 {
                parts.push(format!("{} {}", n, label));
            }
        }

        if parts.is_empty() {
            "No migrations executed".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Migration counts of one phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseStats {
    /// Migrations on disk.
    pub all: Vec<String>,
    /// Migrations recorded in the ledger.
    pub executed: Vec<String>,
    /// Migrations on disk not recorded in the ledger.
    pub pending: Vec<String>,
    /// Pending migrations newer than the latest executed one.
    pub local_pending: Vec<String>,
}

#[derive(Debug, Clone)]
struct TransactionPlan {
    transaction: bool,
    range: Range<usize>,
}

/// Group migrations into transaction plans.
fn transaction_plans(migrations: &[MigrationArtifact]) -> Vec<TransactionPlan> {
    let mut plans: Vec<TransactionPlan> = Vec::new();
    for (index, migration) in migrations.iter().enumerate() {
        match plans.last_mut() {
            Some(plan)
                if plan.transaction
                    && migration.transaction()
                    && migrations[plan.range.start].phase() == migration.phase() =>
            {
                plan.range.end = index + 1;
            }
            _ => plans.push(TransactionPlan {
                transaction: migration.transaction(),
                range: index..index + 1,
            }),
        }
    }
    plans
}

struct PlanFailure {
    /// Offset of the failing migration inside the plan.
    index: usize,
    /// Statements of the failing migration that ran before the failure.
    executed: usize,
    error: MigrationError,
}

/// Applies and reverts migrations phase by phase.
pub struct PhasedMigrator<D: MigrationDriver> {
    config: MigratorConfig,
    driver: D,
    files: MigrationFileManager,
}

impl PhasedMigrator<PgMigrationDriver> {
    /// Connect to the database configured in `monolayer.toml`.
    pub async fn connect(config: &MonolayerConfig) -> MigrateResult<Self> {
        let url = config
            .database_url()
            .ok_or_else(|| MigrationError::database("no database url configured"))?;
        let migrator_config = MigratorConfig::from(config);
        let driver = PgMigrationDriver::connect(url, migrator_config.ledger_tables()).await?;
        Ok(Self::new(migrator_config, driver))
    }
}

impl<D: MigrationDriver> PhasedMigrator<D> {
    /// Create a migrator over `driver`.
    pub fn new(config: MigratorConfig, driver: D) -> Self {
        let files = MigrationFileManager::new(&config.migrations_dir);
        Self {
            config,
            driver,
            files,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    /// Get the driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Get the artifact file manager.
    pub fn files(&self) -> &MigrationFileManager {
        &self.files
    }

    /// Plan the changes from `remote` to `local` and write them as migrations.
    pub async fn create_migrations(
        &self,
        local: &SchemaSnapshot,
        remote: &SchemaSnapshot,
    ) -> MigrateResult<Vec<MigrationArtifact>> {
        let plan = Planner::new(local, remote).plan()?;
        self.files.write_plan(&plan, &self.config.slug).await
    }

    /// Create an empty Data-phase migration.
    pub async fn create_data_migration(&self, slug: &str) -> MigrateResult<MigrationArtifact> {
        self.files.scaffold_data_migration(slug).await
    }

    /// Ledger and artifact counts of every phase, in run order.
    pub async fn migration_stats_by_phase(&self) -> MigrateResult<Vec<(ChangesetPhase, PhaseStats)>> {
        self.files.ensure_phase_dirs().await?;

        let mut stats = Vec::with_capacity(ChangesetPhase::RUN_ORDER.len());
        for phase in ChangesetPhase::RUN_ORDER {
            self.driver.ensure_ledger(phase).await?;
            let all: Vec<String> = self
                .files
                .list_migrations(phase)
                .await?
                .iter()
                .map(|m| m.name().to_string())
                .collect();
            let executed: Vec<String> = self
                .driver
                .executed_migrations(phase)
                .await?
                .into_iter()
                .map(|e| e.name)
                .collect();

            let done: BTreeSet<&str> = executed.iter().map(String::as_str).collect();
            let pending: Vec<String> = all
                .iter()
                .filter(|name| !done.contains(name.as_str()))
                .cloned()
                .collect();
            let latest = executed.iter().max();
            let local_pending = pending
                .iter()
                .filter(|name| latest.is_none_or(|latest| *name > latest))
                .cloned()
                .collect();

            stats.push((
                phase,
                PhaseStats {
                    all,
                    executed,
                    pending,
                    local_pending,
                },
            ));
        }
        Ok(stats)
    }

    /// Apply every pending migration of every phase.
    pub async fn migrate_to_latest(&self) -> MigrateResult<MigrationReport> {
        self.migrate_phases_to_latest(&ChangesetPhase::RUN_ORDER).await
    }

    /// Apply every pending migration of one phase.
    pub async fn migrate_phase_to_latest(&self, phase: ChangesetPhase) -> MigrateResult<MigrationReport> {
        self.migrate_phases_to_latest(&[phase]).await
    }

    /// Apply every pending migration of `phases`, in the given order.
    ///
    /// A failure reverts everything this call applied, across phases.
    pub async fn migrate_phases_to_latest(&self, phases: &[ChangesetPhase]) -> MigrateResult<MigrationReport> {
        self.lock(phases).await?;
        let result = self.migrate_locked(phases).await;
        self.unlock(phases).await;
        result
    }

    async fn migrate_locked(&self, phases: &[ChangesetPhase]) -> MigrateResult<MigrationReport> {
        let mut pending = Vec::new();
        for &phase in phases {
            pending.extend(self.pending_migrations(phase).await?);
        }
        Ok(self.run_up(&pending).await)
    }

    /// Apply one pending migration of a phase.
    pub async fn migrate_target_up_in_phase(
        &self,
        phase: ChangesetPhase,
        name: &str,
    ) -> MigrateResult<MigrationReport> {
        self.lock(&[phase]).await?;
        let result = self.migrate_target_locked(phase, name).await;
        self.unlock(&[phase]).await;
        result
    }

    async fn migrate_target_locked(&self, phase: ChangesetPhase, name: &str) -> MigrateResult<MigrationReport> {
        let target = self
            .pending_migrations(phase)
            .await?
            .into_iter()
            .find(|m| m.name() == name)
            .ok_or_else(|| MigrationError::NotFound(name.to_string()))?;
        Ok(self.run_up(std::slice::from_ref(&target)).await)
    }

    /// Revert the given executed migrations, in the given order.
    ///
    /// Stops at the first migration that is not recorded as executed or
    /// whose `down` fails.
    pub async fn rollback(&self, targets: &[(ChangesetPhase, &str)]) -> MigrateResult<MigrationReport> {
        let phases: Vec<ChangesetPhase> = targets
            .iter()
            .map(|(phase, _)| *phase)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        self.lock(&phases).await?;
        let result = self.rollback_locked(targets).await;
        self.unlock(&phases).await;
        result
    }

    /// Revert every executed Contract, Alter and Expand migration, in that
    /// order. Data migrations stay applied; revert them with [`Self::rollback`].
    pub async fn rollback_all(&self) -> MigrateResult<MigrationReport> {
        let mut targets = Vec::new();
        for phase in ChangesetPhase::ROLLBACK_ORDER {
            self.driver.ensure_ledger(phase).await?;
            let executed = self.driver.executed_migrations(phase).await?;
            targets.extend(executed.into_iter().rev().map(|e| (phase, e.name)));
        }

        let targets: Vec<(ChangesetPhase, &str)> =
            targets.iter().map(|(phase, name)| (*phase, name.as_str())).collect();
        self.rollback(&targets).await
    }

    async fn rollback_locked(&self, targets: &[(ChangesetPhase, &str)]) -> MigrateResult<MigrationReport> {
        let mut migrations = Vec::with_capacity(targets.len());
        for &(phase, name) in targets {
            let artifact = self
                .files
                .list_migrations(phase)
                .await?
                .into_iter()
                .find(|m| m.name() == name)
                .ok_or_else(|| MigrationError::NotFound(name.to_string()))?;
            migrations.push(artifact);
        }

        let mut report = MigrationReport::pending(&migrations, Direction::Down);
        for (index, migration) in migrations.iter().enumerate() {
            let executed = self.driver.executed_migrations(migration.phase()).await?;
            if !executed.iter().any(|e| e.name == migration.name()) {
                report.outcomes[index].status = MigrationStatus::Error;
                report.error = Some(MigrationError::execution(
                    migration.name(),
                    migration.phase(),
                    "migration is not recorded as executed",
                ));
                return Ok(report);
            }

            match self.revert_plan(migration.transaction(), std::slice::from_ref(migration)).await {
                Ok(()) => report.outcomes[index].status = MigrationStatus::Success,
                Err(e) => {
                    error!(phase = %migration.phase(), migration = %migration.name(), error = %e, "Rollback failed");
                    report.outcomes[index].status = MigrationStatus::Error;
                    report.error = Some(e);
                    return Ok(report);
                }
            }
        }

        info!(summary = %report.summary(), "Rollback finished");
        Ok(report)
    }

    async fn pending_migrations(&self, phase: ChangesetPhase) -> MigrateResult<Vec<MigrationArtifact>> {
        let executed: BTreeSet<String> = self
            .driver
            .executed_migrations(phase)
            .await?
            .into_iter()
            .map(|e| e.name)
            .collect();
        let mut migrations = self.files.list_migrations(phase).await?;
        migrations.retain(|m| !executed.contains(m.name()));
        Ok(migrations)
    }

    async fn lock(&self, phases: &[ChangesetPhase]) -> MigrateResult<()> {
        for &phase in phases {
            self.driver.ensure_ledger(phase).await?;
        }
        for (index, &phase) in phases.iter().enumerate() {
            if let Err(e) = self.driver.acquire_lock(phase).await {
                self.unlock(&phases[..index]).await;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn unlock(&self, phases: &[ChangesetPhase]) {
        for &phase in phases {
            if let Err(e) = self.driver.release_lock(phase).await {
                error!(phase = %phase, error = %e, "Failed to release migration lock");
            }
        }
    }

    async fn run_up(&self, migrations: &[MigrationArtifact]) -> MigrationReport {
        let mut report = MigrationReport::pending(migrations, Direction::Up);
        let plans = transaction_plans(migrations);
        let mut applied: Vec<&TransactionPlan> = Vec::new();

        for plan in &plans {
            let batch = &migrations[plan.range.clone()];
            info!(
                phase = %batch[0].phase(),
                migrations = batch.len(),
                transaction = plan.transaction,
                "Applying plan"
            );

            let failure = match self.apply_plan(plan.transaction, batch).await {
                Ok(()) => {
                    for outcome in &mut report.outcomes[plan.range.clone()] {
                        outcome.status = MigrationStatus::Success;
                    }
                    applied.push(plan);
                    continue;
                }
                Err(failure) => failure,
            };

            let failed = plan.range.start + failure.index;
            let migration = &migrations[failed];
            error!(
                phase = %migration.phase(),
                migration = %migration.name(),
                error = %failure.error,
                "Migration failed"
            );

            for outcome in &mut report.outcomes[plan.range.start..failed] {
                outcome.status = MigrationStatus::Success;
                outcome.rolled_back = plan.transaction;
            }
            report.outcomes[failed].status = MigrationStatus::Error;

            if plan.transaction {
                if let Err(e) = self.driver.rollback().await {
                    report.error = Some(MigrationError::rollback(migration.name(), migration.phase(), e.to_string()));
                    return report;
                }
                report.outcomes[failed].rolled_back = true;
                info!(phase = %migration.phase(), "Rolled back plan");
            } else if failure.executed > 0 {
                warn!(
                    migration = %migration.name(),
                    "Non-transactional migration partially applied, running its down statements"
                );
                if let Err(e) = self.run_down_statements(migration).await {
                    error!(migration = %migration.name(), error = %e, "Rollback failed");
                    report.error = Some(e);
                    return report;
                }
                report.outcomes[failed].rolled_back = true;
            }

            for done in applied.iter().rev() {
                if let Err(e) = self
                    .revert_plan(done.transaction, &migrations[done.range.clone()])
                    .await
                {
                    error!(error = %e, "Rollback failed");
                    report.error = Some(e);
                    return report;
                }
                for outcome in &mut report.outcomes[done.range.clone()] {
                    outcome.rolled_back = true;
                }
            }

            report.error = Some(failure.error);
            return report;
        }

        info!(summary = %report.summary(), "Migration run finished");
        report
    }

    async fn apply_plan(&self, transaction: bool, batch: &[MigrationArtifact]) -> Result<(), PlanFailure> {
        let last = batch.len().saturating_sub(1);
        if transaction {
            self.driver.begin().await.map_err(|error| PlanFailure {
                index: 0,
                executed: 0,
                error,
            })?;
        }

        for (index, migration) in batch.iter().enumerate() {
            for (executed, statement) in migration.up.iter().enumerate() {
                if let Err(e) = self.driver.execute(statement).await {
                    return Err(PlanFailure {
                        index,
                        executed,
                        error: MigrationError::execution(migration.name(), migration.phase(), e.to_string()),
                    });
                }
            }
            self.driver
                .record_applied(migration.phase(), migration.name(), Utc::now())
                .await
                .map_err(|error| PlanFailure {
                    index,
                    executed: migration.up.len(),
                    error,
                })?;
            info!(phase = %migration.phase(), migration = %migration.name(), "Applied migration");
        }

        if transaction {
            self.driver.commit().await.map_err(|error| PlanFailure {
                index: last,
                executed: 0,
                error,
            })?;
        }
        Ok(())
    }

    /// Run the `down` statements of `batch` in reverse order and drop them
    /// from the ledger.
    async fn revert_plan(&self, transaction: bool, batch: &[MigrationArtifact]) -> MigrateResult<()> {
        if transaction {
            self.driver.begin().await?;
        }

        for migration in batch.iter().rev() {
            let reverted = match self.run_down_statements(migration).await {
                Ok(()) => self
                    .driver
                    .record_reverted(migration.phase(), migration.name())
                    .await
                    .map_err(|e| MigrationError::rollback(migration.name(), migration.phase(), e.to_string())),
                Err(e) => Err(e),
            };

            let result = match reverted {
                Ok(0) => Err(MigrationError::rollback(
                    migration.name(),
                    migration.phase(),
                    "no ledger entry was removed",
                )),
                Ok(_) => Ok(()),
                Err(e) => Err(e),
            };

            if let Err(e) = result {
                if transaction {
                    if let Err(abort) = self.driver.rollback().await {
                        error!(error = %abort, "Failed to abort rollback transaction");
                    }
                }
                return Err(e);
            }
            info!(phase = %migration.phase(), migration = %migration.name(), "Reverted migration");
        }

        if transaction {
            self.driver.commit().await?;
        }
        Ok(())
    }

    async fn run_down_statements(&self, migration: &MigrationArtifact) -> MigrateResult<()> {
        for statement in &migration.down {
            self.driver
                .execute(statement)
                .await
                .map_err(|e| MigrationError::rollback(migration.name(), migration.phase(), e.to_string()))?;
        }
        Ok(())
    }
}
