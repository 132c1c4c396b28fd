//! PostgreSQL migration driver.

use chrono::{DateTime, Utc};
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error};

use crate::changeset::ChangesetPhase;
use crate::error::{MigrateResult, MigrationError};
use crate::ledger::{LedgerEntry, LedgerTables, MigrationDriver};

/// Migration driver over one `tokio-postgres` session.
pub struct PgMigrationDriver {
    client: Client,
    tables: LedgerTables,
}

impl PgMigrationDriver {
    /// Wrap an established client.
    pub fn new(client: Client, tables: LedgerTables) -> Self {
        Self { client, tables }
    }

    /// Connect to `url` and spawn the connection task.
    pub async fn connect(url: &str, tables: LedgerTables) -> MigrateResult<Self> {
        let (client, connection) = tokio_postgres::connect(url, NoTls)
            .await
            .map_err(|e| MigrationError::database(format!("Failed to connect: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection error");
            }
        });

        Ok(Self::new(client, tables))
    }

    /// Ledger table names used by this driver.
    pub fn tables(&self) -> &LedgerTables {
        &self.tables
    }

    /// Get the underlying client.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait::async_trait]
impl MigrationDriver for PgMigrationDriver {
    async fn ensure_ledger(&self, phase: ChangesetPhase) -> MigrateResult<()> {
        for sql in self.tables.create_sql(phase) {
            debug!(phase = %phase, sql = %sql, "Ensuring ledger");
            self.client.batch_execute(&sql).await?;
        }
        Ok(())
    }

    async fn executed_migrations(&self, phase: ChangesetPhase) -> MigrateResult<Vec<LedgerEntry>> {
        let sql = self.tables.select_executed_sql(phase);
        let rows = self.client.query(sql.as_str(), &[]).await?;
        rows.iter()
            .map(|row| -> MigrateResult<LedgerEntry> {
                Ok(LedgerEntry {
                    name: row.try_get(0)?,
                    executed_at: row.try_get(1)?,
                })
            })
            .collect()
    }

    async fn acquire_lock(&self, phase: ChangesetPhase) -> MigrateResult<()> {
        let sql = self.tables.acquire_lock_sql(phase);
        let updated = self.client.execute(sql.as_str(), &[]).await?;
        if updated == 0 {
            return Err(MigrationError::lock_failed(format!(
                "{} is held by another run",
                self.tables.lock(phase)
            )));
        }
        debug!(phase = %phase, "Acquired migration lock");
        Ok(())
    }

    async fn release_lock(&self, phase: ChangesetPhase) -> MigrateResult<()> {
        let sql = self.tables.release_lock_sql(phase);
        self.client.execute(sql.as_str(), &[]).await?;
        debug!(phase = %phase, "Released migration lock");
        Ok(())
    }

    async fn begin(&self) -> MigrateResult<()> {
        debug!("Beginning transaction");
        self.client.batch_execute("BEGIN").await?;
        Ok(())
    }

    async fn commit(&self) -> MigrateResult<()> {
        debug!("Committing transaction");
        self.client.batch_execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&self) -> MigrateResult<()> {
        debug!("Rolling back transaction");
        self.client.batch_execute("ROLLBACK").await?;
        Ok(())
    }

    async fn execute(&self, statement: &str) -> MigrateResult<()> {
        debug!(sql = %statement, "Executing statement");
        self.client.batch_execute(statement).await?;
        Ok(())
    }

    async fn record_applied(
        &self,
        phase: ChangesetPhase,
        name: &str,
        executed_at: DateTime<Utc>,
    ) -> MigrateResult<()> {
        let sql = self.tables.insert_sql(phase);
        self.client
            .execute(sql.as_str(), &[&name, &executed_at])
            .await?;
        Ok(())
    }

    async fn record_reverted(&self, phase: ChangesetPhase, name: &str) -> MigrateResult<u64> {
        let sql = self.tables.delete_sql(phase);
        Ok(self.client.execute(sql.as_str(), &[&name]).await?)
    }
}
