//! RelayNet Logging
//!
//! Shared `tracing` subscriber setup for every RelayNet binary. `RUST_LOG`
//! always wins over the level passed in.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt as fmt_layer, EnvFilter};

/// Log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Filter directive: the level for everything, RelayNet crates one step
    /// more verbose at `info`
    pub fn directive(&self) -> String {
        match self {
            LogLevel::Info => "info,relaynet=debug".to_string(),
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

fn filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()))
}

/// Install the global subscriber, failing if one is already set
pub fn try_init(level: LogLevel) -> Result<(), String> {
    tracing_subscriber::registry()
        .with(fmt_layer::layer().with_target(true))
        .with(filter(level))
        .try_init()
        .map_err(|e| e.to_string())
}

/// Install the global subscriber; a second call is a no-op
pub fn init(level: LogLevel) {
    let _ = try_init(level);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_levels() {
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_default_directive() {
        assert_eq!(LogLevel::default().directive(), "info,relaynet=debug");
        assert_eq!(LogLevel::Error.directive(), "error");
    }

    #[test]
    fn test_serde_lowercase() {
        assert_eq!(serde_json::to_string(&LogLevel::Trace).unwrap(), "\"trace\"");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(LogLevel::Warn);
        init(LogLevel::Warn);
        assert!(try_init(LogLevel::Warn).is_err());
    }
}
