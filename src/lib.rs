//! # Monolayer
//!
//! Phased, reversible PostgreSQL schema migrations computed from a declared
//! schema.
//!
//! Monolayer provides:
//! - A normalized schema snapshot shared by declaration and introspection
//! - A diff engine turning two snapshots into ordered, reversible changesets
//! - Migration artifacts split into `expand`, `alter`, `data` and `contract`
//!   phases for zero-downtime rollouts
//! - An async orchestrator with per-phase ledgers, locks and automatic
//!   rollback on failure
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use monolayer::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MonolayerConfig::from_file("monolayer.toml")?;
//!     let migrator = PhasedMigrator::connect(&config).await?;
//!
//!     let declared = SchemaSnapshot::new("public").with_table(
//!         "users",
//!         TableInfo::new().column("id", ColumnInfo::new("integer").not_null()),
//!     );
//!     let actual = SchemaSnapshot::new("public");
//!
//!     migrator.create_migrations(&declared, &actual).await?;
//!     let report = migrator.migrate_to_latest().await?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// Schema snapshots, naming and configuration.
pub mod schema {
    pub use monolayer_schema::*;
}

/// Diffing, changesets and migration execution.
pub mod migrate {
    pub use monolayer_migrate::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::migrate::{
        Changeset, ChangesetPhase, ChangesetPlan, MemoryMigrationDriver, MigrateResult,
        MigrationDriver, MigrationError, MigrationReport, MigrationStatus, MigratorConfig,
        PgMigrationDriver, PhasedMigrator, Planner,
    };
    pub use crate::schema::{
        Category, ColumnInfo, Identity, MonolayerConfig, SchemaSnapshot, TableInfo,
    };
}

pub use monolayer_migrate::{MigrateResult, MigrationError};
pub use monolayer_schema::{SchemaError, SchemaResult};
