//! Configuration for scopegraph
//!
//! Two layers live here:
//! - [`SessionConfig`]: how a session runs (history retention, worker
//!   threads, acquisition timeouts, instruments to connect on startup),
//!   stored as TOML.
//! - [`Preferences`]: a read-only tree of typed values used to seed the
//!   settings of newly connected instruments.
//!
//! # App Data Location
//!
//! - **Linux**: `~/.local/share/dev.scopegraph/`
//! - **macOS**: `~/Library/Application Support/dev.scopegraph/`
//! - **Windows**: `%APPDATA%\dev.scopegraph\`
//!
//! # Example
//!
//! ```ignore
//! use scopegraph::config::SessionConfig;
//!
//! let mut config = SessionConfig::load_or_default();
//! config.instruments.push("scope:sim_scope:sim:SIMSCOPE-4".into());
//! config.save_default()?;
//! ```

pub mod preferences;

pub use preferences::Preferences;

use crate::history::RetentionPolicy;
use crate::instrument::Capability;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Application identifier for data directories
pub const APP_ID: &str = "dev.scopegraph";

/// Session config filename inside the app data directory
pub const CONFIG_FILE: &str = "scopegraph.toml";

/// Directory for rolling log files inside the app data directory
pub const LOG_DIR: &str = "logs";

/// Errors from loading or saving configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Could not determine app data directory")]
    NoDataDir,
}

// ==================== App Data Directory ====================

/// The application data directory path, if the platform has one.
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf, ConfigError> {
    let dir = app_data_dir().ok_or(ConfigError::NoDataDir)?;
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|source| ConfigError::Io {
            path: dir.clone(),
            source,
        })?;
    }
    Ok(dir)
}

/// Path of the default session config file
pub fn default_config_path() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join(CONFIG_FILE))
}

// ==================== Session Config ====================

/// Runtime configuration of a [`Session`](crate::session::Session).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// History retention bounds
    pub history: RetentionPolicy,

    /// Worker threads for graph evaluation (1 = evaluate inline)
    pub evaluation_threads: usize,

    /// Per-acquisition timeout in milliseconds
    pub acquisition_timeout_ms: u64,

    /// How often a blocked acquisition checks for abort, in milliseconds
    pub abort_poll_ms: u64,

    /// Back-off after a failed acquisition before re-arming, in milliseconds
    pub retry_backoff_ms: u64,

    /// Capabilities whose instruments trigger together and share an epoch.
    /// Acquiring instruments outside the group form epochs on their own.
    pub trigger_group: Vec<Capability>,

    /// Connection strings (`nick:driver:transport:path`) opened on startup
    pub instruments: Vec<String>,

    /// Also write logs to a daily file in the app data directory
    pub log_to_file: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history: RetentionPolicy::default(),
            evaluation_threads: std::thread::available_parallelism()
                .map(|n| n.get().min(4))
                .unwrap_or(1),
            acquisition_timeout_ms: 1000,
            abort_poll_ms: 10,
            retry_backoff_ms: 50,
            trigger_group: vec![Capability::Oscilloscope],
            instruments: Vec::new(),
            log_to_file: false,
        }
    }
}

impl SessionConfig {
    pub fn acquisition_timeout(&self) -> Duration {
        Duration::from_millis(self.acquisition_timeout_ms)
    }

    pub fn abort_poll_interval(&self) -> Duration {
        Duration::from_millis(self.abort_poll_ms.max(1))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Whether instruments with this capability join the shared trigger group.
    pub fn in_trigger_group(&self, capability: Capability) -> bool {
        self.trigger_group.contains(&capability)
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Load from the default location, returning defaults on any error
    pub fn load_or_default() -> Self {
        let Some(path) = default_config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load session config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save to a file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!("Saved session config to {:?}", path);
        Ok(())
    }

    /// Save to the default location
    pub fn save_default(&self) -> Result<PathBuf, ConfigError> {
        let path = ensure_app_data_dir()?.join(CONFIG_FILE);
        self.save(&path)?;
        Ok(path)
    }
}
