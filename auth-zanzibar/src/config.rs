// Engine configuration
use crate::{check::DEFAULT_MAX_CHECK_DEPTH, error::ZanzibarError, expand::DEFAULT_EXPAND_DEPTH};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix, e.g. `ZANZIBAR_CACHE_TTL_SECS`
pub const ENV_PREFIX: &str = "ZANZIBAR";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Memoize check results
    pub cache_enabled: bool,

    /// Lifetime of a cached check result in seconds (default: 60)
    pub cache_ttl_secs: u64,

    /// Depth used by expand when the caller gives none (default: 10)
    pub expand_max_depth: u32,

    /// Recursion ceiling for a single check (default: 32)
    pub max_check_depth: u32,

    /// Register the organization/project/document namespaces
    pub load_builtin_namespaces: bool,

    /// PostgreSQL connection string; in-memory stores when absent
    pub database_url: Option<String>,

    pub database_max_connections: u32,

    /// Append tuple_created / tuple_deleted events
    pub audit_enabled: bool,

    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl_secs: 60,
            expand_max_depth: DEFAULT_EXPAND_DEPTH,
            max_check_depth: DEFAULT_MAX_CHECK_DEPTH,
            load_builtin_namespaces: true,
            database_url: None,
            database_max_connections: 10,
            audit_enabled: true,
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// Structured JSON output instead of human-readable lines
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl EngineConfig {
    /// Environment only
    pub fn from_env() -> Result<Self, ZanzibarError> {
        Self::build(Config::builder())
    }

    /// A TOML file overridden by the environment
    pub fn from_file(path: &Path) -> Result<Self, ZanzibarError> {
        Self::build(Config::builder().add_source(File::from(path).format(FileFormat::Toml)))
    }

    /// Inline TOML, without the environment
    pub fn from_toml(contents: &str) -> Result<Self, ZanzibarError> {
        let config = Config::builder()
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()?;
        let parsed: Self = config.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    fn build(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ZanzibarError> {
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let parsed: Self = config.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<(), ZanzibarError> {
        if self.expand_max_depth == 0 {
            return Err(ZanzibarError::ConfigError(
                "expand_max_depth must be at least 1".to_string(),
            ));
        }
        if self.max_check_depth == 0 {
            return Err(ZanzibarError::ConfigError(
                "max_check_depth must be at least 1".to_string(),
            ));
        }
        if self.database_max_connections == 0 {
            return Err(ZanzibarError::ConfigError(
                "database_max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}
