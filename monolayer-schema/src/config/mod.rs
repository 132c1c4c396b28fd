//! Configuration file parsing for `monolayer.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{SchemaError, SchemaResult};

/// Default configuration file name.
pub const CONFIG_FILE: &str = "monolayer.toml";

/// Main configuration structure for `monolayer.toml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MonolayerConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Migration artifact settings.
    #[serde(default)]
    pub migrations: MigrationsConfig,

    /// Ledger table settings.
    #[serde(default)]
    pub ledger: LedgerConfig,
}

impl MonolayerConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> SchemaResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading configuration");
        let content = std::fs::read_to_string(path).map_err(|e| SchemaError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> SchemaResult<Self> {
        let expanded = expand_env_vars(content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| SchemaError::TomlError { source: e })?;
        config.validate()?;
        Ok(config)
    }

    /// Get the database URL.
    pub fn database_url(&self) -> Option<&str> {
        self.database.url.as_deref()
    }

    fn validate(&self) -> SchemaResult<()> {
        if self.database.schemas.is_empty() {
            return Err(SchemaError::config("at least one schema must be configured"));
        }
        if self.ledger.table_prefix.trim().is_empty() {
            return Err(SchemaError::config("ledger.table_prefix must not be empty"));
        }
        Ok(())
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Connection URL (supports `${ENV_VAR}` interpolation).
    pub url: Option<String>,

    /// Schemas managed by monolayer.
    #[serde(default = "default_schemas")]
    pub schemas: Vec<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            schemas: default_schemas(),
        }
    }
}

fn default_schemas() -> Vec<String> {
    vec!["public".to_string()]
}

/// Migration artifact settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationsConfig {
    /// Root folder holding one directory per phase.
    #[serde(default = "default_folder")]
    pub folder: PathBuf,

    /// Slug used for generated migration names.
    #[serde(default = "default_slug")]
    pub slug: String,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            folder: default_folder(),
            slug: default_slug(),
        }
    }
}

fn default_folder() -> PathBuf {
    PathBuf::from("./monolayer/migrations")
}

fn default_slug() -> String {
    "schema-change".to_string()
}

/// Ledger table settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    /// Prefix of the per-phase ledger and lock tables.
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            table_prefix: default_table_prefix(),
        }
    }
}

fn default_table_prefix() -> String {
    "monolayer".to_string()
}

/// Expand `${VAR}` references using the process environment.
fn expand_env_vars(content: &str) -> String {
    let mut result = content.to_string();
    let Ok(re) = regex_lite::Regex::new(r"\$\{([^}]+)\}") else {
        return result;
    };

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        let full_match = &cap[0];

        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(full_match, &value);
        }
    }

    result
}
