//! TOML configuration for the node binary.
//!
//! ```toml
//! [forks]
//! active_view_window = 100
//! pending_window_multiple = 4
//! pending_max_age_ms = 60000
//!
//! [runner]
//! channel_capacity = 10000
//! cleanup_interval_ms = 5000
//!
//! [genesis]
//! payload = "genesis"
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Every section and field is optional.

use forks_bft::ForksConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Top-level node configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunnerConfig {
    /// Forks core parameters
    #[serde(default)]
    pub forks: ForksSection,

    /// Event loop parameters
    #[serde(default)]
    pub runner: RunnerSection,

    /// Trusted root block
    #[serde(default)]
    pub genesis: GenesisSection,

    /// Log output
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Forks core parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ForksSection {
    /// Views above the finalized view that are considered active
    #[serde(default = "default_active_view_window")]
    pub active_view_window: u64,

    /// Pending buffer capacity as a multiple of the active window
    #[serde(default = "default_pending_window_multiple")]
    pub pending_window_multiple: usize,

    /// Age after which a pending block is dropped
    #[serde(default = "default_pending_max_age_ms")]
    pub pending_max_age_ms: u64,
}

impl Default for ForksSection {
    fn default() -> Self {
        Self {
            active_view_window: default_active_view_window(),
            pending_window_multiple: default_pending_window_multiple(),
            pending_max_age_ms: default_pending_max_age_ms(),
        }
    }
}

fn default_active_view_window() -> u64 {
    100
}

fn default_pending_window_multiple() -> usize {
    4
}

fn default_pending_max_age_ms() -> u64 {
    60_000
}

/// Event loop parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerSection {
    /// Capacity of the inbound event channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Interval between cleanup ticks
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
        }
    }
}

fn default_channel_capacity() -> usize {
    10_000
}

fn default_cleanup_interval_ms() -> u64 {
    5_000
}

/// Trusted root block.
#[derive(Debug, Clone, Deserialize)]
pub struct GenesisSection {
    /// View of the root block
    #[serde(default)]
    pub view: u64,

    /// Proposer recorded on the root block
    #[serde(default)]
    pub proposer: u64,

    /// Root block payload (UTF-8)
    #[serde(default = "default_genesis_payload")]
    pub payload: String,
}

impl Default for GenesisSection {
    fn default() -> Self {
        Self {
            view: 0,
            proposer: 0,
            payload: default_genesis_payload(),
        }
    }
}

fn default_genesis_payload() -> String {
    "genesis".to_string()
}

/// Log output.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl RunnerConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Forks core configuration derived from the `[forks]` section.
    pub fn forks_config(&self) -> ForksConfig {
        ForksConfig::default()
            .with_active_view_window(self.forks.active_view_window)
            .with_pending_window_multiple(self.forks.pending_window_multiple)
            .with_pending_max_age(Duration::from_millis(self.forks.pending_max_age_ms))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.runner.cleanup_interval_ms)
    }
}
