//! Sensor subsystem: acquisition, filtering and reporting
//!
//! Implements a two-stage pipeline around a shared axis store:
//!
//! 1. [`acquisition`] - blocking event reads, calibration and Kalman smoothing
//! 2. [`reporter`] - periodic snapshots of the smoothed values
//! 3. [`pipeline_handle`] - startup, shutdown and error propagation
//!
//! # Architecture
//!
//! ```text
//! Device ──► Acquisition ──► AxisStore ──► Reporter ──► Terminal
//!            (sole writer)    (RwLock)     (reader)
//! ```
//!
//! Both stages poll the same [`RunFlag`](crate::lifecycle::RunFlag); either
//! of them clearing it brings the whole pipeline down.

pub mod acquisition;
pub mod axis_store;
pub mod calibration;
pub mod event_source;
pub mod kalman;
pub mod pipeline_handle;
pub mod reporter;

pub use acquisition::{
    AcquisitionError, AcquisitionLoop, AcquisitionSettings, AcquisitionStats, LoopExit,
};
pub use axis_store::{
    AxisIndex, AxisReading, AxisRecord, AxisSnapshot, AxisStore, SharedAxisStore, AXIS_COUNT,
};
pub use calibration::AxisCalibration;
pub use event_source::{EvdevSource, EventSource, RawEvent, ReplaySource, SourceError};
pub use kalman::KalmanEstimator;
pub use pipeline_handle::{PipelineError, PipelineHandle, PipelineSettings, ShutdownReport};
pub use reporter::{
    format_line, DisplayMode, MemorySink, ReportSink, ReporterError, ReporterHandle,
    ReporterSettings, ReporterStats, TerminalSink,
};
