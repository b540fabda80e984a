//! Core configuration.
//!
//! # Responsibility
//! - Collect logging, store and undo settings from JSON or the environment.
//!
//! # Invariants
//! - Every field has a default; an empty JSON object is a valid config.
//! - `undo_limit = 0` means the undo log is unbounded.

use crate::logging::default_log_level;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const ENV_LOG_LEVEL: &str = "CANVAS_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "CANVAS_LOG_DIR";
pub const ENV_STORE_PATH: &str = "CANVAS_STORE_PATH";
pub const ENV_UNDO_LIMIT: &str = "CANVAS_UNDO_LIMIT";

const DEFAULT_UNDO_LIMIT: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub log_level: String,
    /// Absolute log directory; logging stays off when unset.
    pub log_dir: Option<PathBuf>,
    /// Record store file for `SqliteTransport`; in-memory when unset.
    pub store_path: Option<PathBuf>,
    pub undo_limit: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level().to_string(),
            log_dir: None,
            store_path: None,
            undo_limit: DEFAULT_UNDO_LIMIT,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Json(serde_json::Error),
    InvalidValue { name: &'static str, value: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(err) => write!(f, "invalid config json: {err}"),
            Self::InvalidValue { name, value } => write!(f, "invalid value `{value}` for {name}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Json(err) => Some(err),
            Self::InvalidValue { .. } => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl CoreConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads `CANVAS_*` variables over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(level) = non_empty(lookup(ENV_LOG_LEVEL)) {
            config.log_level = level;
        }
        config.log_dir = non_empty(lookup(ENV_LOG_DIR)).map(PathBuf::from);
        config.store_path = non_empty(lookup(ENV_STORE_PATH)).map(PathBuf::from);
        if let Some(limit) = non_empty(lookup(ENV_UNDO_LIMIT)) {
            config.undo_limit = limit.parse().map_err(|_| ConfigError::InvalidValue {
                name: ENV_UNDO_LIMIT,
                value: limit.clone(),
            })?;
        }
        Ok(config)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
