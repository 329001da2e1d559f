//! Configuration for the EMG recorder.

use crate::collector::CollectorConfig;
use crate::core::{EnergyDivisor, LogFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Directory name used under the platform config/data locations.
const APP_DIR: &str = "emg-recorder";

/// Main configuration for the recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of samples buffered per window
    pub window_capacity: usize,

    /// Trailing samples averaged into each smoothed energy value
    pub smoothing_len: usize,

    /// How the trailing energy sum is normalized
    pub energy_divisor: EnergyDivisor,

    /// Record layout of the CSV logs
    pub log_format: LogFormat,

    /// Directory receiving one CSV log per connection
    pub output_dir: PathBuf,

    /// Directory for diagnostics
    pub data_path: PathBuf,

    /// How often buffered samples are flushed
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,

    /// How long to wait for the armband before giving up
    #[serde(with = "duration_ms")]
    pub acquisition_timeout: Duration,

    /// Consecutive failed flushes tolerated before the session is aborted
    pub max_consecutive_flush_failures: u32,

    /// Simulated armband settings
    pub armband: CollectorConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        Self {
            window_capacity: 250,
            smoothing_len: 60,
            energy_divisor: EnergyDivisor::Fixed,
            log_format: LogFormat::Legacy,
            output_dir: data_dir.join("logs"),
            data_path: data_dir,
            poll_interval: Duration::from_millis(250),
            acquisition_timeout: Duration::from_secs(10),
            max_consecutive_flush_failures: 3,
            armband: CollectorConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if it is absent.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.json")
    }

    /// Path of the persisted diagnostics counters.
    pub fn diagnostics_path(&self) -> PathBuf {
        self.data_path.join("diagnostics.json")
    }

    /// Reject settings the recorder cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_capacity == 0 {
            return Err(ConfigError::Invalid("window_capacity must be positive".into()));
        }
        if self.smoothing_len == 0 {
            return Err(ConfigError::Invalid("smoothing_len must be positive".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("poll_interval must be positive".into()));
        }
        if self.armband.sample_rate_hz == 0 {
            return Err(ConfigError::Invalid("armband.sample_rate_hz must be positive".into()));
        }
        Ok(())
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.output_dir)?;
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration, stored as milliseconds.
pub(crate) mod duration_ms {
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

/// Serde support for Option<Duration>, stored as milliseconds or null.
pub(crate) mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
