//! Runtime configuration.
//!
//! Values come from a TOML file or from `DONOW_*` environment variables.
//! Every field has a default, so an empty file or environment is valid.
//!
//! | Variable | Field |
//! |---|---|
//! | `DONOW_DB_PATH` | `database.path` |
//! | `DONOW_LOG_LEVEL` | `logging.level` |
//! | `DONOW_LOG_DIR` | `logging.dir` |
//! | `DONOW_AI_ENDPOINT` | `enrichment.endpoint` |
//! | `DONOW_AI_API_KEY` | `enrichment.api_key` |
//! | `DONOW_AI_MODEL` | `enrichment.model` |
//! | `DONOW_AI_TIMEOUT_MS` | `enrichment.timeout_ms` |

use crate::enrich::http::{HttpEnrichmentProvider, DEFAULT_MODEL};
use crate::enrich::{Enricher, EnrichmentError, DEFAULT_ENRICHMENT_TIMEOUT};
use crate::logging::default_log_level;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("invalid value `{value}` for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error("config validation failed: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub enrichment: EnrichmentConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file path. The CLI refuses to start without one.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Absolute log directory. `None` leaves file logging off.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level().to_string(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Chat-completions URL. `None` disables the provider; the fallback
    /// still applies.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_ms: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            timeout_ms: DEFAULT_ENRICHMENT_TIMEOUT.as_millis() as u64,
        }
    }
}

impl EnrichmentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Builds the enricher described by this config.
    pub fn build_enricher(&self) -> Result<Enricher, EnrichmentError> {
        match self.endpoint.as_deref().map(str::trim) {
            Some(endpoint) if !endpoint.is_empty() => {
                let provider = HttpEnrichmentProvider::new(
                    endpoint,
                    self.api_key.clone(),
                    self.model.as_str(),
                )?;
                Ok(Enricher::new(Arc::new(provider), self.timeout()))
            }
            _ => Ok(Enricher::fallback_only()),
        }
    }
}

impl CoreConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from the process environment.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::default();
        config.database.path = value("DONOW_DB_PATH").map(PathBuf::from);
        if let Some(level) = value("DONOW_LOG_LEVEL") {
            config.logging.level = level;
        }
        config.logging.dir = value("DONOW_LOG_DIR").map(PathBuf::from);
        config.enrichment.endpoint = value("DONOW_AI_ENDPOINT");
        config.enrichment.api_key = value("DONOW_AI_API_KEY");
        if let Some(model) = value("DONOW_AI_MODEL") {
            config.enrichment.model = model;
        }
        if let Some(timeout) = value("DONOW_AI_TIMEOUT_MS") {
            config.enrichment.timeout_ms =
                timeout.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "DONOW_AI_TIMEOUT_MS",
                    value: timeout,
                })?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.enrichment.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "enrichment.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.enrichment.model.trim().is_empty() {
            return Err(ConfigError::Validation(
                "enrichment.model must not be empty".to_string(),
            ));
        }
        if let Some(dir) = self.logging.dir.as_ref() {
            if !dir.is_absolute() {
                return Err(ConfigError::Validation(format!(
                    "logging.dir must be an absolute path, got `{}`",
                    dir.display()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, CoreConfig};
    use std::collections::HashMap;
    use std::path::PathBuf;

    #[test]
    fn empty_sources_yield_defaults() {
        let from_toml = CoreConfig::from_toml_str("").unwrap();
        let from_env = CoreConfig::from_lookup(|_| None).unwrap();
        assert_eq!(from_toml, from_env);
        assert_eq!(from_toml.database.path, None);
        assert_eq!(from_toml.enrichment.model, "qwen-plus");
        assert_eq!(from_toml.enrichment.timeout_ms, 10_000);
    }

    #[test]
    fn toml_sections_override_defaults() {
        let config = CoreConfig::from_toml_str(
            r#"
            [database]
            path = "/tmp/donow.db"

            [enrichment]
            endpoint = "http://localhost:8080/v1/chat/completions"
            timeout_ms = 2500
            "#,
        )
        .unwrap();
        assert_eq!(config.database.path, Some(PathBuf::from("/tmp/donow.db")));
        assert_eq!(config.enrichment.timeout_ms, 2500);
        assert_eq!(config.enrichment.model, "qwen-plus");
    }

    #[test]
    fn env_lookup_reads_prefixed_variables() {
        let vars = HashMap::from([
            ("DONOW_AI_MODEL", "local-model"),
            ("DONOW_AI_TIMEOUT_MS", "750"),
            ("DONOW_LOG_LEVEL", "warn"),
            ("DONOW_DB_PATH", "  "),
        ]);
        let config =
            CoreConfig::from_lookup(|key| vars.get(key).map(|value| value.to_string())).unwrap();
        assert_eq!(config.enrichment.model, "local-model");
        assert_eq!(config.enrichment.timeout_ms, 750);
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.database.path, None);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = CoreConfig::from_lookup(|key| {
            (key == "DONOW_AI_TIMEOUT_MS").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = CoreConfig::from_toml_str("[logging]\ndir = \"relative/logs\"").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }
}
