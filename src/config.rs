//! Static configuration
//!
//! Loaded once from TOML before the pipeline starts and never reloaded. Every
//! field has a default matching the reference hardware setup, so an empty or
//! partial file is valid.
//!
//! ```toml
//! device_path = "/dev/input/event7"
//! base_code = 3
//! exclusive_grab = true
//!
//! [reporter]
//! interval_ms = 100
//! display = "raw"
//!
//! [[axes]]
//! offset = 8
//! scale_positive = 1.0
//! scale_negative = 1.0
//! filter = { initial_estimate = 0.0, initial_uncertainty = 1.0, process_noise = 0.1, measurement_noise = 0.5 }
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::sensor::{
    AcquisitionSettings, AxisCalibration, AxisRecord, AxisStore, DisplayMode, KalmanEstimator,
    PipelineSettings, ReporterSettings, AXIS_COUNT,
};

pub const CONFIG_DIR: &str = "axisfilter";
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
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

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Starting state and noise constants of one Kalman estimator
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
#[serde(default)]
pub struct FilterConfig {
    pub initial_estimate: f32,
    pub initial_uncertainty: f32,
    pub process_noise: f32,
    pub measurement_noise: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            initial_estimate: 0.0,
            initial_uncertainty: 1.0,
            process_noise: 0.1,
            measurement_noise: 0.5,
        }
    }
}

impl FilterConfig {
    pub fn build(&self) -> KalmanEstimator {
        KalmanEstimator::new(
            self.initial_estimate,
            self.initial_uncertainty,
            self.process_noise,
            self.measurement_noise,
        )
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
#[serde(default)]
pub struct AxisConfig {
    pub offset: i32,
    pub scale_positive: f32,
    pub scale_negative: f32,
    pub filter: FilterConfig,
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self::with_offset(0)
    }
}

impl AxisConfig {
    pub fn with_offset(offset: i32) -> Self {
        Self {
            offset,
            scale_positive: 1.0,
            scale_negative: 1.0,
            filter: FilterConfig::default(),
        }
    }

    pub fn calibration(&self) -> AxisCalibration {
        AxisCalibration::new(self.offset, self.scale_positive, self.scale_negative)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ReporterConfig {
    pub interval_ms: u64,
    pub display: DisplayMode,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            display: DisplayMode::Raw,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub device_path: PathBuf,
    /// Event code of the first axis; axes use `base_code..base_code + 3`
    pub base_code: u16,
    pub exclusive_grab: bool,
    pub stats_interval_secs: u64,
    pub reporter: ReporterConfig,
    pub axes: [AxisConfig; AXIS_COUNT],
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_path: PathBuf::from("/dev/input/event7"),
            base_code: 3,
            exclusive_grab: true,
            stats_interval_secs: 10,
            reporter: ReporterConfig::default(),
            axes: [
                AxisConfig::with_offset(8),
                AxisConfig::with_offset(9),
                AxisConfig::with_offset(-91),
            ],
        }
    }
}

impl AppConfig {
    /// `<config_dir>/axisfilter/config.toml`, if a config directory exists.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Loads from `explicit` (which must exist), else from the default
    /// location when present, else falls back to built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            Some(path) => {
                debug!(
                    "No config file at {}, using built-in defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            None => {
                warn!("Could not determine config directory, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Writes this configuration, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        fs::write(path, self.to_toml()?).map_err(write_err)?;
        info!("Wrote configuration to {}", path.display());
        Ok(())
    }

    /// Rejects settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reporter.interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "reporter.interval_ms must be greater than zero".to_string(),
            ));
        }
        if u32::from(self.base_code) + AXIS_COUNT as u32 > u32::from(u16::MAX) + 1 {
            return Err(ConfigError::Invalid(format!(
                "base_code {} leaves no room for {} axes",
                self.base_code, AXIS_COUNT
            )));
        }
        for (idx, axis) in self.axes.iter().enumerate() {
            let filter = &axis.filter;
            let finite_non_negative = |x: f32| x.is_finite() && x >= 0.0;
            if !filter.initial_estimate.is_finite() {
                return Err(ConfigError::Invalid(format!(
                    "axes[{}].filter.initial_estimate must be finite",
                    idx
                )));
            }
            if !(filter.measurement_noise.is_finite() && filter.measurement_noise > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "axes[{}].filter.measurement_noise must be positive and finite",
                    idx
                )));
            }
            if !finite_non_negative(filter.process_noise)
                || !finite_non_negative(filter.initial_uncertainty)
            {
                return Err(ConfigError::Invalid(format!(
                    "axes[{}].filter noise and uncertainty must be non-negative and finite",
                    idx
                )));
            }
            if !axis.scale_positive.is_finite() || !axis.scale_negative.is_finite() {
                return Err(ConfigError::Invalid(format!(
                    "axes[{}] scale factors must be finite",
                    idx
                )));
            }
        }
        Ok(())
    }

    pub fn build_store(&self) -> AxisStore {
        let records = self
            .axes
            .map(|axis| AxisRecord::new(axis.calibration(), axis.filter.build()));
        AxisStore::new(self.base_code, records)
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            acquisition: AcquisitionSettings {
                base_code: self.base_code,
                exclusive: self.exclusive_grab,
                stats_interval_secs: i64::try_from(self.stats_interval_secs).unwrap_or(i64::MAX),
            },
            reporter: ReporterSettings {
                interval_ms: self.reporter.interval_ms,
                display: self.reporter.display,
            },
        }
    }
}
