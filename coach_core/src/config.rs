//! Configuration file support for Coach.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/coach/config.toml`.

use crate::clock::SPEED_MULTIPLIER_RANGE;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub simulation: SimulationConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Session engine timing
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// How long an ended session lingers before the engine returns to idle
    #[serde(default = "default_idle_grace_seconds")]
    pub idle_grace_seconds: u32,

    /// Countdown notifications fire for the last N seconds of a timer
    #[serde(default = "default_countdown_cue_seconds")]
    pub countdown_cue_seconds: u32,

    /// Ticks between a countdown reaching zero and the automatic advance
    #[serde(default = "default_advance_grace_ticks")]
    pub advance_grace_ticks: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_grace_seconds: default_idle_grace_seconds(),
            countdown_cue_seconds: default_countdown_cue_seconds(),
            advance_grace_ticks: default_advance_grace_ticks(),
        }
    }
}

/// Accelerated, unattended runs for demos and testing
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SimulationConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_speed_multiplier")]
    pub speed_multiplier: f64,

    /// Countdown used in place of a manual rest
    #[serde(default = "default_synthetic_rest_seconds")]
    pub synthetic_rest_seconds: u32,

    /// Timer granted to reps and distance steps so they finish on their own
    #[serde(default = "default_synthetic_step_seconds")]
    pub synthetic_step_seconds: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            speed_multiplier: default_speed_multiplier(),
            synthetic_rest_seconds: default_synthetic_rest_seconds(),
            synthetic_step_seconds: default_synthetic_step_seconds(),
        }
    }
}

/// Completion report delivery
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DeliveryConfig {
    /// Whether this device is paired with a backend account
    #[serde(default = "default_paired")]
    pub paired: bool,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            paired: default_paired(),
            max_retries: default_max_retries(),
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local/share")))
        .unwrap_or_else(std::env::temp_dir);
    base.join("coach")
}

fn default_idle_grace_seconds() -> u32 {
    30
}

fn default_countdown_cue_seconds() -> u32 {
    3
}

fn default_advance_grace_ticks() -> u32 {
    1
}

fn default_speed_multiplier() -> f64 {
    20.0
}

fn default_synthetic_rest_seconds() -> u32 {
    3
}

fn default_synthetic_step_seconds() -> u32 {
    5
}

fn default_paired() -> bool {
    true
}

fn default_max_retries() -> u32 {
    5
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(std::env::temp_dir);
        base.join("coach").join("config.toml")
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !SPEED_MULTIPLIER_RANGE.contains(&self.simulation.speed_multiplier) {
            return Err(Error::Config(format!(
                "simulation.speed_multiplier must be within {:?}, got {}",
                SPEED_MULTIPLIER_RANGE, self.simulation.speed_multiplier
            )));
        }
        Ok(())
    }
}
