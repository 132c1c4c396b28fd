//! # monolayer-schema
//!
//! Schema snapshot model for monolayer.
//!
//! This crate provides:
//! - [`SchemaSnapshot`], the normalized representation produced by both the
//!   schema declaration and database introspection
//! - Deterministic, length-bounded identifier naming and content hashing
//! - Configuration parser for `monolayer.toml` files
//!
//! ## Example
//!
//! ```rust
//! use monolayer_schema::{ColumnInfo, SchemaSnapshot, TableInfo};
//!
//! let declared = SchemaSnapshot::new("public").with_table(
//!     "users",
//!     TableInfo::new().column("id", ColumnInfo::new("integer").not_null()),
//! );
//!
//! assert_eq!(declared.to_json().unwrap(), declared.clone().to_json().unwrap());
//! ```

pub mod config;
pub mod error;
pub mod naming;
pub mod snapshot;

pub use config::MonolayerConfig;
pub use error::{SchemaError, SchemaResult};
pub use naming::{IdentifierAllocator, IdentifierKind, RenamePair};
pub use snapshot::{Category, ColumnInfo, Identity, SchemaSnapshot, TableInfo, TableObjects};
