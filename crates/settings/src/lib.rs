//! RelayNet Settings
//!
//! Configuration for relayer simulations and agents.
//!
//! ## Features
//!
//! - Ledger endpoints and allocator parameters
//! - Simulation, bridge and relayer behaviour
//! - JSON file storage with per-field defaults
//! - `RELAYNET_*` environment overrides
//!
//! ## Usage
//!
//! ```no_run
//! use relaynet_settings::Settings;
//!
//! let mut settings = Settings::load_or_default()?;
//! settings.apply_env_overrides()?;
//! settings.allocator.relayers_per_window = 3;
//! settings.save()?;
//! # Ok::<(), relaynet_settings::SettingsError>(())
//! ```

mod config;

pub use config::{
    AllocatorSettings, BridgeSettings, FailurePolicy, NetworkSettings, RelayerSettings, Settings,
    SimulationSettings,
};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    ReadError(std::io::Error),

    #[error("Failed to write settings: {0}")]
    WriteError(std::io::Error),

    #[error("Failed to parse settings: {0}")]
    ParseError(serde_json::Error),

    #[error("Failed to create config directory: {0}")]
    CreateDirError(std::io::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidOverride { key: String, value: String },

    #[error("Invalid settings: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Per-user configuration directory (`$HOME/.relaynet`)
pub fn default_config_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".relaynet")
}

/// Get the default settings file path
pub fn default_settings_path() -> PathBuf {
    default_config_dir().join("settings.json")
}
