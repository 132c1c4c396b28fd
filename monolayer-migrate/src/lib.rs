//! # monolayer-migrate
//!
//! Schema diffing and phased migrations for PostgreSQL.
//!
//! This crate provides:
//! - A structural differ over [`monolayer_schema::SchemaSnapshot`]s
//! - Classification of raw differences into semantic operations, with
//!   declared renames resolved through a [`RenameIntentContext`]
//! - Assembly of operations into prioritized, reversible [`Changeset`]s
//! - Migration artifacts on disk, one directory per phase
//! - A [`PhasedMigrator`] applying and reverting migrations with a per-phase
//!   ledger and lock
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ Declared +   │────▶│ Differ       │────▶│ Classifiers  │
//! │ Actual snap  │     │ (3 passes)   │     │              │
//! └──────────────┘     └──────────────┘     └──────────────┘
//!                                                  │
//!                                                  ▼
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ Phased       │◀────│ Artifacts    │◀────│ Assembler    │
//! │ Migrator     │     │ expand/ ...  │     │ (changesets) │
//! └──────────────┘     └──────────────┘     └──────────────┘
//!        │
//!        ▼
//! ┌──────────────────────────────┐
//! │ {prefix}_{phase}_migration   │
//! │ {prefix}_{phase}_migration_lock
//! └──────────────────────────────┘
//! ```
//!
//! ## Phases
//!
//! | Phase      | Contents                                   |
//! |------------|--------------------------------------------|
//! | `expand`   | additive changes and renames               |
//! | `alter`    | in-place changes of existing objects       |
//! | `data`     | hand-written data migrations               |
//! | `contract` | removal of objects no longer declared      |
//!
//! A full run applies `expand`, `alter`, `data`, then `contract`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use monolayer_migrate::{MemoryMigrationDriver, MigratorConfig, PhasedMigrator};
//! use monolayer_schema::{ColumnInfo, SchemaSnapshot, TableInfo};
//!
//! async fn run() -> Result<(), Box<dyn std::error::Error>> {
//!     let declared = SchemaSnapshot::new("public")
//!         .with_table("users", TableInfo::new().column("id", ColumnInfo::new("integer")));
//!     let actual = SchemaSnapshot::new("public");
//!
//!     let config = MigratorConfig::new().migrations_dir("./monolayer/migrations");
//!     let migrator = PhasedMigrator::new(config, MemoryMigrationDriver::new());
//!
//!     migrator.create_migrations(&declared, &actual).await?;
//!     let report = migrator.migrate_to_latest().await?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

pub mod assemble;
pub mod changeset;
pub mod classify;
pub mod context;
pub mod ddl;
pub mod differ;
pub mod error;
pub mod file;
pub mod ledger;
pub mod memory;
pub mod operation;
pub mod orchestrator;
pub mod planner;
pub mod postgres;

// Re-exports
pub use assemble::ChangesetAssembler;
pub use changeset::{ChangeWarning, Changeset, ChangesetPhase, ChangesetType, WarningCode, WarningKind};
pub use classify::{Classification, ClassifiedDiff, SuppressReason};
pub use context::RenameIntentContext;
pub use ddl::PostgresDdl;
pub use differ::{DiffKind, RawDiffEntry, diff_snapshots};
pub use error::{MigrateResult, MigrationError};
pub use file::{MigrationArtifact, MigrationFileManager, MigrationMetadata};
pub use ledger::{LedgerEntry, LedgerTables, MigrationDriver};
pub use memory::MemoryMigrationDriver;
pub use operation::{NamedObject, ObjectKind, SchemaOperation, TableDependents};
pub use orchestrator::{
    Direction, MigrationOutcome, MigrationReport, MigrationStatus, MigratorConfig, PhaseStats,
    PhasedMigrator,
};
pub use planner::{ChangesetPlan, DiffPass, Planner};
pub use postgres::PgMigrationDriver;
