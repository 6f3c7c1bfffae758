//! Engine configuration loaded from TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(String),

    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
}

/// Engine policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Whether availability monitoring is offered to callers.
    /// When false, `availability()` fails with `NotSupported`.
    #[serde(default = "default_true")]
    pub availability: bool,
    /// Per-direction message buffer depth for in-process channels.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            availability: true,
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Identity of this endpoint on the receiving side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Friendly name advertised for local display surfaces.
    #[serde(default = "default_name")]
    pub name: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
        }
    }
}

impl Config {
    /// Load configuration from the given path, or defaults when the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("no config file found, using defaults");
            return Ok(Self::default());
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Default config file location (`<config dir>/castlink/config.toml`).
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("castlink").join("config.toml"))
    }
}

fn default_true() -> bool {
    true
}

fn default_channel_capacity() -> usize {
    64
}

fn default_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "castlink".to_string())
}
