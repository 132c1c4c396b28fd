//! Per-phase migration ledger.
//!
//! Each phase records executed migrations in its own table and serializes
//! runs through its own lock table, so phases never touch each other's
//! bookkeeping:
//!
//! ```text
//! monolayer_expand_migration        (name, executed_at)
//! monolayer_expand_migration_lock   (id, is_locked)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::changeset::ChangesetPhase;
use crate::ddl::quote;
use crate::error::MigrateResult;

/// Id of the single row of every lock table.
pub const LOCK_ROW_ID: &str = "migration_lock";

/// A migration recorded as executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Migration name.
    pub name: String,
    /// When the migration was applied.
    pub executed_at: DateTime<Utc>,
}

/// Names and SQL of the ledger and lock tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTables {
    prefix: String,
}

impl Default for LedgerTables {
    fn default() -> Self {
        Self::new("monolayer")
    }
}

impl LedgerTables {
    /// Create ledger tables named with `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Ledger table of a phase.
    pub fn ledger(&self, phase: ChangesetPhase) -> String {
        format!("{}_{}_migration", self.prefix, phase)
    }

    /// Lock table of a phase.
    pub fn lock(&self, phase: ChangesetPhase) -> String {
        format!("{}_{}_migration_lock", self.prefix, phase)
    }

    /// Statements creating the ledger and lock tables of a phase.
    pub fn create_sql(&self, phase: ChangesetPhase) -> Vec<String> {
        let ledger = quote(&self.ledger(phase));
        let lock = quote(&self.lock(phase));
        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {} (name varchar(255) NOT NULL PRIMARY KEY, executed_at timestamptz NOT NULL);",
                ledger
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (id varchar(255) NOT NULL PRIMARY KEY, is_locked integer NOT NULL DEFAULT 0);",
                lock
            ),
            format!(
                "INSERT INTO {} (id, is_locked) VALUES ('{}', 0) ON CONFLICT (id) DO NOTHING;",
                lock, LOCK_ROW_ID
            ),
        ]
    }

    /// Query of executed migrations, oldest first.
    pub fn select_executed_sql(&self, phase: ChangesetPhase) -> String {
        format!(
            "SELECT name, executed_at FROM {} ORDER BY name",
            quote(&self.ledger(phase))
        )
    }

    /// Insert of an executed migration (`$1` name, `$2` timestamp).
    pub fn insert_sql(&self, phase: ChangesetPhase) -> String {
        format!(
            "INSERT INTO {} (name, executed_at) VALUES ($1, $2)",
            quote(&self.ledger(phase))
        )
    }

    /// Delete of a reverted migration (`$1` name).
    pub fn delete_sql(&self, phase: ChangesetPhase) -> String {
        format!("DELETE FROM {} WHERE name = $1", quote(&self.ledger(phase)))
    }

    /// Update taking the lock; affects no row while it is held.
    pub fn acquire_lock_sql(&self, phase: ChangesetPhase) -> String {
        format!(
            "UPDATE {} SET is_locked = 1 WHERE id = '{}' AND is_locked = 0",
            quote(&self.lock(phase)),
            LOCK_ROW_ID
        )
    }

    /// Update releasing the lock.
    pub fn release_lock_sql(&self, phase: ChangesetPhase) -> String {
        format!(
            "UPDATE {} SET is_locked = 0 WHERE id = '{}'",
            quote(&self.lock(phase)),
            LOCK_ROW_ID
        )
    }
}

/// Database access used by the orchestrator.
///
/// Calls are made sequentially over one session; `begin`, `commit` and
/// `rollback` bracket the statements of a transactional plan, including the
/// ledger writes made inside it.
#[async_trait::async_trait]
pub trait MigrationDriver: Send + Sync {
    /// Create the ledger and lock tables of a phase if missing.
    async fn ensure_ledger(&self, phase: ChangesetPhase) -> MigrateResult<()>;

    /// Executed migrations of a phase, ordered by name.
    async fn executed_migrations(&self, phase: ChangesetPhase) -> MigrateResult<Vec<LedgerEntry>>;

    /// Take the lock of a phase. Fails with `LockFailed` when it is held.
    async fn acquire_lock(&self, phase: ChangesetPhase) -> MigrateResult<()>;

    /// Release the lock of a phase.
    async fn release_lock(&self, phase: ChangesetPhase) -> MigrateResult<()>;

    /// Open a transaction.
    async fn begin(&self) -> MigrateResult<()>;

    /// Commit the open transaction.
    async fn commit(&self) -> MigrateResult<()>;

    /// Abort the open transaction.
    async fn rollback(&self) -> MigrateResult<()>;

    /// Execute one migration statement.
    async fn execute(&self, statement: &str) -> MigrateResult<()>;

    /// Record a migration as executed.
    async fn record_applied(
        &self,
        phase: ChangesetPhase,
        name: &str,
        executed_at: DateTime<Utc>,
    ) -> MigrateResult<()>;

    /// Remove a migration from the ledger. Returns the number of removed rows.
    async fn record_reverted(&self, phase: ChangesetPhase, name: &str) -> MigrateResult<u64>;
}
