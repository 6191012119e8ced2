use std::path::PathBuf;
use std::str::FromStr;

use crate::domains::export::types::{ExportError, ExportResult};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://customers.db?mode=rwc";
pub const DEFAULT_OUTPUT_DIR: &str = "app/output";
pub const DEFAULT_CRON: &str = "0 0 2 * * *";
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Process configuration, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub output_dir: PathBuf,
    pub cron_expression: String,
    pub scheduler_enabled: bool,
    pub bind_address: String,
    pub max_connections: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            cron_expression: DEFAULT_CRON.to_string(),
            scheduler_enabled: true,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl Config {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> ExportResult<Self> {
        if let Ok(path) = dotenv::dotenv() {
            log::debug!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> ExportResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            output_dir: get("EXPORT_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            cron_expression: get("BATCH_JOB_CRON").unwrap_or(defaults.cron_expression),
            scheduler_enabled: match get("BATCH_JOB_SCHEDULER_ENABLED") {
                Some(v) => parse_bool("BATCH_JOB_SCHEDULER_ENABLED", &v)?,
                None => defaults.scheduler_enabled,
            },
            bind_address: get("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            max_connections: match get("DB_MAX_CONNECTIONS") {
                Some(v) => parse_number("DB_MAX_CONNECTIONS", &v)?,
                None => defaults.max_connections,
            },
        };

        cron::Schedule::from_str(&config.cron_expression).map_err(|e| {
            ExportError::Configuration(format!(
                "BATCH_JOB_CRON '{}' is not a valid cron expression: {}",
                config.cron_expression, e
            ))
        })?;
        if config.max_connections == 0 {
            return Err(ExportError::Configuration(
                "DB_MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }

        Ok(config)
    }
}

fn parse_bool(key: &str, value: &str) -> ExportResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ExportError::Configuration(format!("{} must be a boolean, got '{}'", key, other))),
    }
}

fn parse_number(key: &str, value: &str) -> ExportResult<u32> {
    value
        .trim()
        .parse()
        .map_err(|_| ExportError::Configuration(format!("{} must be a positive integer, got '{}'", key, value)))
}
