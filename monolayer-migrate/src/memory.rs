//! In-memory migration driver.
//!
//! Keeps the ledger and lock state of every phase in process memory and logs
//! every statement it receives. Transactions snapshot the ledger on `begin`
//! and restore it on `rollback`. Used to exercise the orchestrator without a
//! database.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::changeset::ChangesetPhase;
use crate::error::{MigrateResult, MigrationError};
use crate::ledger::{LedgerEntry, LedgerTables, MigrationDriver};

type Ledgers = BTreeMap<ChangesetPhase, Vec<LedgerEntry>>;

#[derive(Debug, Default)]
struct MemoryState {
    ledgers: Ledgers,
    locks: BTreeSet<ChangesetPhase>,
    touched: BTreeSet<String>,
    log: Vec<String>,
    transaction: Option<Ledgers>,
}

impl MemoryState {
    fn ledger_mut(&mut self, tables: &LedgerTables, phase: ChangesetPhase) -> MigrateResult<&mut Vec<LedgerEntry>> {
        self.touched.insert(tables.ledger(phase));
        self.ledgers
            .get_mut(&phase)
            .ok_or_else(|| MigrationError::database(format!("relation \"{}\" does not exist", tables.ledger(phase))))
    }
}

/// Migration driver backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryMigrationDriver {
    tables: LedgerTables,
    fail_on: Vec<String>,
    state: Mutex<MemoryState>,
}

impl MemoryMigrationDriver {
    /// Create an empty driver using the default ledger names.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use ledger tables named with `prefix`.
    pub fn with_tables(mut self, tables: LedgerTables) -> Self {
        self.tables = tables;
        self
    }

    /// Fail every statement containing `pattern`.
    pub fn fail_on(mut self, pattern: impl Into<String>) -> Self {
        self.fail_on.push(pattern.into());
        self
    }

    /// Mark the lock of a phase as held by another run.
    pub async fn hold_lock(&self, phase: ChangesetPhase) {
        self.state.lock().await.locks.insert(phase);
    }

    /// Whether the lock of a phase is held.
    pub async fn is_locked(&self, phase: ChangesetPhase) -> bool {
        self.state.lock().await.locks.contains(&phase)
    }

    /// Names recorded in the ledger of a phase.
    pub async fn ledger(&self, phase: ChangesetPhase) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .ledgers
            .get(&phase)
            .map(|entries| entries.iter().map(|e| e.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Every statement received, including transaction control.
    pub async fn log(&self) -> Vec<String> {
        self.state.lock().await.log.clone()
    }

    /// Migration statements received, without transaction control.
    pub async fn statements(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .log
            .iter()
            .filter(|s| !matches!(s.as_str(), "BEGIN" | "COMMIT" | "ROLLBACK"))
            .cloned()
            .collect()
    }

    /// Ledger and lock tables read or written so far.
    pub async fn touched_tables(&self) -> BTreeSet<String> {
        self.state.lock().await.touched.clone()
    }
}

#[async_trait::async_trait]
impl MigrationDriver for MemoryMigrationDriver {
    async fn ensure_ledger(&self, phase: ChangesetPhase) -> MigrateResult<()> {
        let mut state = self.state.lock().await;
        state.touched.insert(self.tables.ledger(phase));
        state.touched.insert(self.tables.lock(phase));
        state.ledgers.entry(phase).or_default();
        Ok(())
    }

    async fn executed_migrations(&self, phase: ChangesetPhase) -> MigrateResult<Vec<LedgerEntry>> {
        let mut state = self.state.lock().await;
        let mut entries = state.ledger_mut(&self.tables, phase)?.clone();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn acquire_lock(&self, phase: ChangesetPhase) -> MigrateResult<()> {
        let mut state = self.state.lock().await;
        state.touched.insert(self.tables.lock(phase));
        if !state.locks.insert(phase) {
            return Err(MigrationError::lock_failed(format!(
                "{} is held by another run",
                self.tables.lock(phase)
            )));
        }
        Ok(())
    }

    async fn release_lock(&self, phase: ChangesetPhase) -> MigrateResult<()> {
        let mut state = self.state.lock().await;
        state.touched.insert(self.tables.lock(phase));
        state.locks.remove(&phase);
        Ok(())
    }

    async fn begin(&self) -> MigrateResult<()> {
        let mut state = self.state.lock().await;
        if state.transaction.is_some() {
            return Err(MigrationError::database("transaction already open"));
        }
        state.transaction = Some(state.ledgers.clone());
        state.log.push("BEGIN".to_string());
        Ok(())
    }

    async fn commit(&self) -> MigrateResult<()> {
        let mut state = self.state.lock().await;
        if state.transaction.take().is_none() {
            return Err(MigrationError::database("no transaction open"));
        }
        state.log.push("COMMIT".to_string());
        Ok(())
    }

    async fn rollback(&self) -> MigrateResult<()> {
        let mut state = self.state.lock().await;
        let snapshot = state
            .transaction
            .take()
            .ok_or_else(|| MigrationError::database("no transaction open"))?;
        state.ledgers = snapshot;
        state.log.push("ROLLBACK".to_string());
        Ok(())
    }

    async fn execute(&self, statement: &str) -> MigrateResult<()> {
        if let Some(pattern) = self.fail_on.iter().find(|p| statement.contains(p.as_str())) {
            return Err(MigrationError::database(format!(
                "statement matched failure pattern '{}'",
                pattern
            )));
        }
        self.state.lock().await.log.push(statement.to_string());
        Ok(())
    }

    async fn record_applied(
        &self,
        phase: ChangesetPhase,
        name: &str,
        executed_at: DateTime<Utc>,
    ) -> MigrateResult<()> {
        let mut state = self.state.lock().await;
        let ledger = state.ledger_mut(&self.tables, phase)?;
        if ledger.iter().any(|e| e.name == name) {
            return Err(MigrationError::database(format!(
                "duplicate key value violates unique constraint: {}",
                name
            )));
        }
        ledger.push(LedgerEntry {
            name: name.to_string(),
            executed_at,
        });
        Ok(())
    }

    async fn record_reverted(&self, phase: ChangesetPhase, name: &str) -> MigrateResult<u64> {
        let mut state = self.state.lock().await;
        let ledger = state.ledger_mut(&self.tables, phase)?;
        let before = ledger.len();
        ledger.retain(|e| e.name != name);
        Ok((before - ledger.len()) as u64)
    }
}
