//! TOML configuration.
//!
//! Every section is optional; missing keys fall back to the defaults below.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Maximum wire operations uploaded in one round trip.
pub const DEFAULT_CHUNK_SIZE: usize = 5000;

/// First sleep of the status polling loop.
pub const DEFAULT_POLL_BASE_SECS: u64 = 15;

/// Companion log that mirrors remote job status.
pub const DEFAULT_LEDGER_NAME: &str = "batchlog_table";

fn default_database_path() -> PathBuf {
    PathBuf::from("batchlog.db")
}

fn default_stream_page_size() -> usize {
    1000
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_ledger_name() -> String {
    DEFAULT_LEDGER_NAME.to_string()
}

fn default_poll_base_secs() -> u64 {
    DEFAULT_POLL_BASE_SECS
}

fn default_base_url() -> String {
    "https://adwords.google.com/api/adwords/cm/v201809/".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageSettings {
    /// SQLite file holding every operation log and ledger.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Rows fetched per keyset page while streaming a log.
    #[serde(default = "default_stream_page_size")]
    pub stream_page_size: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            stream_page_size: default_stream_page_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchSettings {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_ledger_name")]
    pub ledger_name: String,
    /// Starting value of the per-log minimum identifier. Temporary ids are
    /// allocated strictly below `min(min_id_floor, smallest observed id)`.
    #[serde(default)]
    pub min_id_floor: i64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            ledger_name: default_ledger_name(),
            min_id_floor: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollingSettings {
    #[serde(default = "default_poll_base_secs")]
    pub base_interval_secs: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            base_interval_secs: default_poll_base_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `compact` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub dispatch: DispatchSettings,
    #[serde(default)]
    pub polling: PollingSettings,
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Config {
    /// Loads and validates configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| AppError::Config(format!("Failed to read config file: {e}")))?;

        Self::from_toml_str(&content)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, AppError> {
        let config: Config = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config file: {e}")))?;

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.storage.stream_page_size == 0 {
            return Err(AppError::Config(
                "storage.stream_page_size must be greater than zero".into(),
            ));
        }

        if self.dispatch.chunk_size == 0 {
            return Err(AppError::Config(
                "dispatch.chunk_size must be greater than zero".into(),
            ));
        }

        if self.polling.base_interval_secs == 0 {
            return Err(AppError::Config(
                "polling.base_interval_secs must be greater than zero".into(),
            ));
        }

        crate::storage::database::validate_table_name(&self.dispatch.ledger_name)
            .map_err(|_| {
                AppError::Config(format!(
                    "dispatch.ledger_name '{}' is not a valid table name",
                    self.dispatch.ledger_name
                ))
            })?;

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(AppError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["compact", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(AppError::Config(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_formats.join(", ")
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::from_toml_str("").expect("empty config should parse");
        assert_eq!(config, Config::default());
        assert_eq!(config.dispatch.chunk_size, 5000);
        assert_eq!(config.dispatch.ledger_name, "batchlog_table");
        assert_eq!(config.dispatch.min_id_floor, 0);
        assert_eq!(config.polling.base_interval_secs, 15);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = Config::from_toml_str(
            r#"
            [dispatch]
            chunk_size = 250
            min_id_floor = -100

            [logging]
            format = "json"
            "#,
        )
        .expect("config should parse");

        assert_eq!(config.dispatch.chunk_size, 250);
        assert_eq!(config.dispatch.min_id_floor, -100);
        assert_eq!(config.dispatch.ledger_name, "batchlog_table");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("batch.toml");
        let mut file = std::fs::File::create(&path).expect("Failed to create file");
        writeln!(file, "[storage]\ndatabase_path = \"/tmp/ops.db\"").expect("write");

        let config = Config::from_file(&path).expect("config should load");
        assert_eq!(config.storage.database_path, PathBuf::from("/tmp/ops.db"));
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = Config::from_file("/nonexistent/batch.toml").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let err = Config::from_toml_str("[dispatch]\nchunk_size = 0").unwrap_err();
        assert!(matches!(err, AppError::Config(msg) if msg.contains("chunk_size")));
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let err = Config::from_toml_str("[polling]\nbase_interval_secs = 0").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn rejects_bad_ledger_name() {
        let err = Config::from_toml_str("[dispatch]\nledger_name = \"jobs; drop\"").unwrap_err();
        assert!(matches!(err, AppError::Config(msg) if msg.contains("ledger_name")));
    }

    #[test]
    fn rejects_unknown_log_format() {
        let err = Config::from_toml_str("[logging]\nformat = \"pretty\"").unwrap_err();
        assert!(matches!(err, AppError::Config(msg) if msg.contains("format")));
    }
}
