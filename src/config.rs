//! Config loading and defaults.
//!
//! The defaults are the whole protocol contract (`127.0.0.1:8080`, a
//! `default.chatjournal` in the working directory), so the binary works with
//! no configuration at all. A `parlor.toml` next to the journal (or an
//! explicit `--config`) can override any of it.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::Limits;

pub const DEFAULT_CONFIG_FILE: &str = "parlor.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    pub journal_path: PathBuf,
    pub limits: Limits,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            journal_path: PathBuf::from("default.chatjournal"),
            limits: Limits::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load `parlor.toml` from the working directory when present, defaults
/// otherwise. A broken file is a warning, not a refusal to start.
pub fn load_or_default() -> Config {
    let path = Path::new(DEFAULT_CONFIG_FILE);
    if !path.exists() {
        return Config::default();
    }
    match load(path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("config load failed, using defaults: {e}");
            Config::default()
        }
    }
}
