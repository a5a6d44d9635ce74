//! Configuration schema (sqlcheck.toml)

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::schema::TypeRenderer;

/// Default pattern for migration file names (Flyway style)
pub const DEFAULT_MIGRATION_PATTERN: &str = r"^V.*\.sql$";

/// PostgreSQL connection settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Connection URL; falls back to `DATABASE_URL`
    #[serde(default)]
    pub url: Option<String>,

    /// Name of the dedicated check database to (re)create
    #[serde(default)]
    pub database_name: Option<String>,

    /// Treat `url` as an admin connection and create a blank check database on it
    #[serde(default)]
    pub create_database: bool,

    /// Connect with TLS
    #[serde(default)]
    pub tls: bool,
}

/// Extra host type for a SQL type in "Fix it to" suggestions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomSqlTypeMapping {
    pub host_type_name: String,
    pub sql_type_name: String,
}

/// A table column whose values get their own host type
///
/// Result columns traced to `table_name.column_name` get the SQL type
/// `table_name(column_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueTableColumnType {
    pub host_type_name: String,
    pub table_name: String,
    pub column_name: String,
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding migration files, relative to the project root
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,

    /// Regex selecting migration files by file name
    #[serde(default = "default_migration_pattern")]
    pub migration_file_pattern: String,

    #[serde(default)]
    pub postgres: PostgresConfig,

    /// Prefix generated view names with a snake_cased hint
    #[serde(default)]
    pub view_name_hints: bool,

    #[serde(default)]
    pub custom_sql_type_mappings: Vec<CustomSqlTypeMapping>,

    #[serde(default)]
    pub unique_table_column_types: Vec<UniqueTableColumnType>,

    /// Project root path (for resolving relative paths)
    #[serde(skip)]
    pub project_root: PathBuf,
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_migration_pattern() -> String {
    DEFAULT_MIGRATION_PATTERN.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            migrations_dir: default_migrations_dir(),
            migration_file_pattern: default_migration_pattern(),
            postgres: PostgresConfig::default(),
            view_name_hints: false,
            custom_sql_type_mappings: Vec::new(),
            unique_table_column_types: Vec::new(),
            project_root: std::env::current_dir().unwrap_or_default(),
        }
    }
}

impl Config {
    /// Load config from TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let mut config = Self::from_toml(&contents)?;

        // Set project root to parent of config file
        if let Some(parent) = path.parent() {
            config.project_root = parent.to_path_buf();
        }

        Ok(config)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(toml)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        // Reject a bad pattern at load time
        config.migration_regex()?;

        Ok(config)
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Absolute migrations directory
    pub fn migrations_path(&self) -> PathBuf {
        self.project_root.join(&self.migrations_dir)
    }

    pub fn migration_regex(&self) -> Result<Regex, ConfigError> {
        Regex::new(&self.migration_file_pattern)
            .map_err(|e| ConfigError::InvalidPattern(e.to_string()))
    }

    /// Connection URL from config, or `DATABASE_URL`
    pub fn database_url(&self) -> Result<String, ConfigError> {
        match &self.postgres.url {
            Some(url) => Ok(url.clone()),
            None => std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl),
        }
    }

    /// Renderer with the configured type vocabulary
    pub fn type_renderer(&self) -> TypeRenderer {
        TypeRenderer::with_mappings(&self.custom_sql_type_mappings, &self.unique_table_column_types)
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid migration file pattern: {0}")]
    InvalidPattern(String),

    #[error("No database URL: set postgres.url in sqlcheck.toml or DATABASE_URL")]
    MissingDatabaseUrl,
}
