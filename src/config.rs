//! Configuration for the gaze agent.
//!
//! Two files are involved: the agent [`Config`], stored under the user's
//! config directory, and the [`CheckConfig`] listing the fixation
//! parameters and target regions, which lives next to the experiment and
//! can be reloaded while the agent runs.

use crate::core::fixation::FixationConfig;
use crate::core::regions::CheckRegion;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;

/// Main configuration for the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tracker server address (`host:port`)
    pub tracker_address: String,

    /// How much gaze history to keep in memory
    #[serde(rename = "retention_secs", with = "duration_secs")]
    pub retention: Duration,

    /// HTTP bind address
    pub bind_address: String,

    /// HTTP port
    pub port: u16,

    /// Region check configuration file
    pub check_config_path: PathBuf,

    /// Append-only record log
    pub log_path: PathBuf,

    /// Heat-map brush image
    pub brush_path: PathBuf,

    /// Directory served as static pages
    pub static_dir: PathBuf,

    /// Window used by region checks when the request gives none
    #[serde(rename = "default_window_ms", with = "duration_millis")]
    pub default_window: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tracker_address: "localhost:6555".to_string(),
            retention: Duration::from_secs(30),
            bind_address: "127.0.0.1".to_string(),
            port: 8888,
            check_config_path: PathBuf::from("config.json"),
            log_path: PathBuf::from("log.json"),
            brush_path: PathBuf::from("heatmap_brush.png"),
            static_dir: PathBuf::from("static"),
            default_window: Duration::from_millis(10_000),
        }
    }
}

impl Config {
    /// Load configuration from the default location, or defaults if the
    /// file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::config_path())
    }

    /// Load configuration from `path`, or defaults if it does not exist.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(ConfigError::Parse)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(Self::config_path())
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gaze-agent")
            .join("config.json")
    }
}

/// Fixation parameters and target regions for the check endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckConfig {
    #[serde(default)]
    pub fixation: FixationConfig,
    #[serde(default)]
    pub targets: Vec<CheckRegion>,
}

impl CheckConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(ConfigError::Parse)
    }
}

/// Check configuration shared with request handlers and swapped on reload.
pub type SharedCheckConfig = Arc<RwLock<CheckConfig>>;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Serde support for Duration as whole seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde support for Duration as whole milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
