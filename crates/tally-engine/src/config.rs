//! # Engine Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TALLY_DB_PATH=/var/lib/tally/tally.db                              │
//! │     TALLY_OPERATION_TIMEOUT_MS=5000                                    │
//! │     TALLY_ENFORCE_CREDIT_LIMIT=true                                    │
//! │     TALLY_SALE_NUMBER_PREFIX=SHOP1                                     │
//! │     TALLY_HISTORY_PAGE_SIZE=50                                         │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/engine/engine.toml (Linux)                               │
//! │     ~/Library/Application Support/com.tally.engine/engine.toml (macOS) │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # engine.toml
//! [database]
//! path = "tally.db"
//! max_connections = 5
//! busy_timeout_ms = 5000
//!
//! [engine]
//! operation_timeout_ms = 10000
//! enforce_credit_limit = false
//! sale_number_prefix = "SALE"
//! history_page_size = 50
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use tally_db::DbConfig;

use crate::error::{EngineError, EngineResult};

// =============================================================================
// Sections
// =============================================================================

/// `[database]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("tally.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout() -> u64 {
    5_000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

/// `[engine]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Deadline for one engine operation, transaction included.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,

    /// Refuse credit sales that would exceed the customer's limit.
    #[serde(default)]
    pub enforce_credit_limit: bool,

    /// Prefix of generated sale numbers.
    #[serde(default = "default_sale_number_prefix")]
    pub sale_number_prefix: String,

    /// Rows fetched per page by movement history readers.
    #[serde(default = "default_history_page_size")]
    pub history_page_size: u32,
}

fn default_operation_timeout() -> u64 {
    10_000
}

fn default_sale_number_prefix() -> String {
    "SALE".to_string()
}

fn default_history_page_size() -> u32 {
    50
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            operation_timeout_ms: default_operation_timeout(),
            enforce_credit_limit: false,
            sale_number_prefix: default_sale_number_prefix(),
            history_page_size: default_history_page_size(),
        }
    }
}

// =============================================================================
// Engine Config
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub engine: EngineSettings,
}

impl EngineConfig {
    /// Loads configuration: defaults, then file, then environment.
    ///
    /// `config_path` overrides the platform default location. A missing
    /// file is not an error.
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Like [`load`](Self::load) but falls back to defaults on any error.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Writes the configuration as TOML.
    pub fn save(&self, config_path: Option<PathBuf>) -> EngineResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| EngineError::Config("no config directory available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(&path, toml::to_string_pretty(self)?)?;
        info!(?path, "Saved engine config");
        Ok(())
    }

    /// Checks value ranges.
    pub fn validate(&self) -> EngineResult<()> {
        if self.engine.operation_timeout_ms == 0 {
            return Err(EngineError::Config(
                "operation_timeout_ms must be greater than 0".into(),
            ));
        }

        if self.engine.history_page_size == 0 {
            return Err(EngineError::Config(
                "history_page_size must be greater than 0".into(),
            ));
        }

        let prefix = self.engine.sale_number_prefix.trim();
        if prefix.is_empty() || prefix.len() > 16 {
            return Err(EngineError::Config(
                "sale_number_prefix must be 1-16 characters".into(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(EngineError::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies `TALLY_*` overrides read through `var`.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(path) = var("TALLY_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(ms) = var("TALLY_OPERATION_TIMEOUT_MS") {
            match ms.parse::<u64>() {
                Ok(v) => self.engine.operation_timeout_ms = v,
                Err(_) => warn!(value = %ms, "Ignoring invalid TALLY_OPERATION_TIMEOUT_MS"),
            }
        }

        if let Some(flag) = var("TALLY_ENFORCE_CREDIT_LIMIT") {
            match flag.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.engine.enforce_credit_limit = true,
                "0" | "false" | "no" => self.engine.enforce_credit_limit = false,
                _ => warn!(value = %flag, "Ignoring invalid TALLY_ENFORCE_CREDIT_LIMIT"),
            }
        }

        if let Some(prefix) = var("TALLY_SALE_NUMBER_PREFIX") {
            self.engine.sale_number_prefix = prefix;
        }

        if let Some(size) = var("TALLY_HISTORY_PAGE_SIZE") {
            match size.parse::<u32>() {
                Ok(v) if v > 0 => self.engine.history_page_size = v,
                _ => warn!(value = %size, "Ignoring invalid TALLY_HISTORY_PAGE_SIZE"),
            }
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "tally", "engine")
            .map(|dirs| dirs.config_dir().join("engine.toml"))
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.engine.operation_timeout_ms)
    }

    /// Database settings as a pool configuration.
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(self.database.path.clone())
            .max_connections(self.database.max_connections)
            .busy_timeout(Duration::from_millis(self.database.busy_timeout_ms))
    }
}
