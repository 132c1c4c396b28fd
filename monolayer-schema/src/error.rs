//! Error types for snapshots and configuration.

// These warnings are false positives - the fields are used by derive macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Result type for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors that can occur while loading snapshots or configuration.
#[derive(Error, Debug, Diagnostic)]
pub enum SchemaError {
    /// Error reading a file.
    #[error("failed to read file: {path}")]
    #[diagnostic(code(monolayer::schema::io_error))]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A snapshot document could not be decoded.
    #[error("failed to decode snapshot")]
    #[diagnostic(code(monolayer::schema::json_error))]
    JsonError {
        #[source]
        source: serde_json::Error,
    },

    /// A snapshot is structurally inconsistent.
    #[error("invalid snapshot: {message}")]
    #[diagnostic(code(monolayer::schema::invalid_snapshot))]
    InvalidSnapshot { message: String },

    /// Duplicate definition.
    #[error("duplicate {kind} `{name}`")]
    #[diagnostic(code(monolayer::schema::duplicate))]
    Duplicate { kind: String, name: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    #[diagnostic(code(monolayer::schema::config_error))]
    ConfigError { message: String },

    /// TOML parsing error.
    #[error("failed to parse TOML")]
    #[diagnostic(code(monolayer::schema::toml_error))]
    TomlError {
        #[source]
        source: toml::de::Error,
    },
}

impl SchemaError {
    /// Create an invalid snapshot error.
    pub fn invalid_snapshot(message: impl Into<String>) -> Self {
        Self::InvalidSnapshot {
            message: message.into(),
        }
    }

    /// Create a duplicate definition error.
    pub fn duplicate(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Duplicate {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchemaError::duplicate("column", "users.email");
        assert_eq!(err.to_string(), "duplicate column `users.email`");
    }

    #[test]
    fn test_invalid_snapshot_display() {
        let err = SchemaError::invalid_snapshot("index on unknown table `books`");
        assert!(err.to_string().contains("unknown table `books`"));
    }
}
