//! # Engine Configuration
//!
//! Tunables for the settlement engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     SETTLE_DATABASE_PATH=/var/lib/settle/settle.db                     │
//! │     SETTLE_GIFT_THRESHOLD=10                                           │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     settle.toml                                                        │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # settle.toml
//! database_path = "settle.db"
//! gift_threshold = 10
//! max_featured_products = 3
//! auto_complete_after_days = 14
//! max_retries = 5
//! initial_backoff_ms = 10
//! max_backoff_ms = 200
//! currency = "MYR"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use settle_core::{
    DEFAULT_AUTO_COMPLETE_DAYS, DEFAULT_CURRENCY, DEFAULT_GIFT_THRESHOLD, MAX_FEATURED_PRODUCTS,
};

use crate::error::DbError;

// =============================================================================
// Errors
// =============================================================================

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for DbError {
    fn from(err: ConfigError) -> Self {
        DbError::Config(err.to_string())
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Settlement engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// SQLite database file.
    pub database_path: PathBuf,

    /// Verified purchases per gift slot (T).
    pub gift_threshold: i64,

    /// Featured-product cap.
    pub max_featured_products: i64,

    /// Age in days after which open orders are auto-completed.
    pub auto_complete_after_days: i64,

    /// Attempts on busy/locked before giving up.
    pub max_retries: u32,

    /// First retry delay (milliseconds).
    pub initial_backoff_ms: u64,

    /// Retry delay ceiling (milliseconds).
    pub max_backoff_ms: u64,

    /// ISO currency recorded on orders.
    pub currency: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            database_path: PathBuf::from("settle.db"),
            gift_threshold: DEFAULT_GIFT_THRESHOLD,
            max_featured_products: MAX_FEATURED_PRODUCTS,
            auto_complete_after_days: DEFAULT_AUTO_COMPLETE_DAYS,
            max_retries: 5,
            initial_backoff_ms: 10,
            max_backoff_ms: 200,
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (if given and present)
    /// 3. Environment variables
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) if path.exists() => {
                info!(?path, "Loading engine config from file");
                Self::from_file(path)?
            }
            Some(path) => {
                debug!(?path, "Config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Reads a TOML file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Applies `SETTLE_*` overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("SETTLE_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database_path = PathBuf::from(path);
        }
        if let Some(value) = lookup("SETTLE_GIFT_THRESHOLD") {
            self.gift_threshold = parse_value("SETTLE_GIFT_THRESHOLD", &value)?;
        }
        if let Some(value) = lookup("SETTLE_MAX_FEATURED") {
            self.max_featured_products = parse_value("SETTLE_MAX_FEATURED", &value)?;
        }
        if let Some(value) = lookup("SETTLE_AUTO_COMPLETE_DAYS") {
            self.auto_complete_after_days = parse_value("SETTLE_AUTO_COMPLETE_DAYS", &value)?;
        }
        if let Some(value) = lookup("SETTLE_MAX_RETRIES") {
            self.max_retries = parse_value("SETTLE_MAX_RETRIES", &value)?;
        }
        if let Some(currency) = lookup("SETTLE_CURRENCY") {
            self.currency = currency.trim().to_uppercase();
        }
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gift_threshold <= 0 {
            return Err(ConfigError::Invalid(
                "gift_threshold must be greater than 0".into(),
            ));
        }
        if self.max_featured_products < 0 {
            return Err(ConfigError::Invalid(
                "max_featured_products cannot be negative".into(),
            ));
        }
        if self.auto_complete_after_days <= 0 {
            return Err(ConfigError::Invalid(
                "auto_complete_after_days must be greater than 0".into(),
            ));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid("max_retries must be at least 1".into()));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "initial_backoff_ms cannot exceed max_backoff_ms".into(),
            ));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(ConfigError::Invalid(format!(
                "currency must be a 3-letter ISO code, got '{}'",
                self.currency
            )));
        }
        Ok(())
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
