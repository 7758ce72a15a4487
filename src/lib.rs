//! Calibrated, Kalman-smoothed readout of Linux input device axes.
//!
//! See [`sensor`] for the pipeline and [`lifecycle`] for shutdown handling.

pub mod config;
pub mod lifecycle;
pub mod sensor;

pub use config::{AppConfig, ConfigError};
pub use lifecycle::RunFlag;
