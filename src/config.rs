//! Configuration - `config.toml` with defaults for every field.
//!
//! Looked up at `$WARMTEX_CONFIG`, else `<config_dir>/warmtex/config.toml`.
//! A missing file is not an error.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, WarmtexError};

/// Default control-plane port.
pub const DEFAULT_PORT: u16 = 59603;

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "WARMTEX_CONFIG";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Loopback port of the control server
    pub port: u16,

    /// Engine executable, looked up on PATH unless it contains a separator
    pub engine: String,

    /// How long the client waits for a freshly spawned server to acknowledge
    pub launch_timeout_ms: u64,

    /// `tracing` filter directive used when RUST_LOG is unset
    pub log_filter: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            engine: "lualatex".to_string(),
            launch_timeout_ms: 1000,
            log_filter: None,
        }
    }
}

impl Config {
    /// Load from an explicit path, or from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => default_path(),
        };

        match path {
            Some(p) if p.exists() => Self::from_file(&p),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::parse(&text).map_err(|message| WarmtexError::Config {
            path: path.to_path_buf(),
            message,
        })?;
        debug!(path = %path.display(), ?config, "loaded config");
        Ok(config)
    }

    fn parse(text: &str) -> std::result::Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_millis(self.launch_timeout_ms)
    }
}

/// `$WARMTEX_CONFIG`, else `<config_dir>/warmtex/config.toml`.
pub fn default_path() -> Option<PathBuf> {
    if let Some(p) = std::env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(p));
    }
    dirs::config_dir().map(|d| d.join("warmtex").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(Config::parse("").unwrap(), Config::default());
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = Config::parse("port = 4000\nengine = \"pdflatex\"\n").unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.engine, "pdflatex");
        assert_eq!(config.launch_timeout(), Duration::from_secs(1));
        assert!(config.log_filter.is_none());
    }

    #[test]
    fn test_malformed_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "port = \"not a number\"").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, WarmtexError::Config { .. }), "got {:?}", err);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("nope.toml"))).unwrap();
        assert_eq!(config, Config::default());
    }
}
