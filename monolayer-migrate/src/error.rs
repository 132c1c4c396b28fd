//! Error types for the migration engine.

use monolayer_schema::SchemaError;
use thiserror::Error;

use crate::changeset::ChangesetPhase;
use crate::differ::RawDiffEntry;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur during planning or migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot or configuration error.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Database operation error.
    #[error("Database error: {0}")]
    Database(String),

    /// Migration metadata could not be read or written.
    #[error("Invalid migration: {0}")]
    InvalidMigration(String),

    /// One or more raw diff entries matched no classifier.
    #[error("{} schema difference(s) could not be classified: {}", entries.len(), describe(entries))]
    UnclassifiedDiff {
        /// The entries no classifier recognized.
        entries: Vec<RawDiffEntry>,
    },

    /// A declared rename does not match the actual schema.
    #[error("Invalid rename: {0}")]
    InvalidRename(String),

    /// Migration not found in the pending set.
    #[error("Migration '{0}' not found")]
    NotFound(String),

    /// A statement failed while applying a migration.
    #[error("Migration '{migration}' failed in {phase} phase: {message}")]
    Execution {
        /// Migration name.
        migration: String,
        /// Phase of the migration.
        phase: ChangesetPhase,
        /// Database error message.
        message: String,
    },

    /// A down action failed; the database may be in an intermediate state.
    #[error("Rollback of migration '{migration}' in {phase} phase failed: {message}")]
    Rollback {
        /// Migration name.
        migration: String,
        /// Phase of the migration.
        phase: ChangesetPhase,
        /// Database error message.
        message: String,
    },

    /// Lock acquisition failed.
    #[error("Failed to acquire migration lock: {0}")]
    LockFailed(String),

    /// No changes to migrate.
    #[error("No schema changes detected")]
    NoChanges,
}

fn describe(entries: &[RawDiffEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("{} {}", e.kind, e.path.join(".")))
        .collect::<Vec<_>>()
        .join(", ")
}

impl MigrationError {
    /// Create a database error.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create an invalid migration error.
    pub fn invalid_migration(msg: impl Into<String>) -> Self {
        Self::InvalidMigration(msg.into())
    }

    /// Create an invalid rename error.
    pub fn invalid_rename(msg: impl Into<String>) -> Self {
        Self::InvalidRename(msg.into())
    }

    /// Create a lock failed error.
    pub fn lock_failed(msg: impl Into<String>) -> Self {
        Self::LockFailed(msg.into())
    }

    /// Create an execution error.
    pub fn execution(
        migration: impl Into<String>,
        phase: ChangesetPhase,
        msg: impl Into<String>,
    ) -> Self {
        Self::Execution {
            migration: migration.into(),
            phase,
            message: msg.into(),
        }
    }

    /// Create a rollback error.
    pub fn rollback(
        migration: impl Into<String>,
        phase: ChangesetPhase,
        msg: impl Into<String>,
    ) -> Self {
        Self::Rollback {
            migration: migration.into(),
            phase,
            message: msg.into(),
        }
    }

    /// Check if this is a recoverable error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::LockFailed(_) | Self::NoChanges)
    }

    /// Whether the database may have been left in an undocumented state.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Rollback { .. })
    }
}

impl From<tokio_postgres::Error> for MigrationError {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<toml::de::Error> for MigrationError {
    fn from(err: toml::de::Error) -> Self {
        Self::InvalidMigration(format!("failed to parse migration metadata: {}", err))
    }
}

impl From<toml::ser::Error> for MigrationError {
    fn from(err: toml::ser::Error) -> Self {
        Self::InvalidMigration(format!("failed to serialize migration metadata: {}", err))
    }
}
