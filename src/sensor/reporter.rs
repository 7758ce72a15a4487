//! Reporter - periodic read-only view of the axis store
//!
//! Runs as a tokio task. On every tick it copies an [`AxisSnapshot`] under the
//! store's read lock, drops the lock and hands the copy to a [`ReportSink`].
//! The reporter never writes to the store and never blocks the acquisition
//! loop for longer than that copy.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{debug, error, info};

use super::axis_store::{AxisSnapshot, SharedAxisStore};
use crate::lifecycle::RunFlag;

/// Which values the terminal line shows
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// Calibrated values before smoothing
    #[default]
    Raw,
    /// Kalman estimates
    Smoothed,
    /// Calibrated value followed by the estimate in parentheses
    Both,
}

#[derive(Clone, Debug)]
pub struct ReporterSettings {
    pub interval_ms: u64,
    pub display: DisplayMode,
}

impl Default for ReporterSettings {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            display: DisplayMode::Raw,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReporterError {
    #[error("Failed to write report: {0}")]
    Write(#[from] io::Error),

    #[error("Reporter task failed: {0}")]
    Task(String),
}

/// Destination for snapshots
pub trait ReportSink: Send {
    fn emit(&mut self, snapshot: &AxisSnapshot) -> Result<(), ReporterError>;

    /// Called once after the last snapshot.
    fn finish(&mut self) -> Result<(), ReporterError> {
        Ok(())
    }
}

/// Renders the single status line, e.g. `Sensor 3: 1.000000   Sensor 4: ...`
pub fn format_line(snapshot: &AxisSnapshot, mode: DisplayMode) -> String {
    snapshot
        .readings
        .iter()
        .map(|reading| match mode {
            DisplayMode::Raw => format!("Sensor {}: {:<10.6}", reading.code, reading.raw),
            DisplayMode::Smoothed => format!("Sensor {}: {:<10.6}", reading.code, reading.smoothed),
            DisplayMode::Both => format!(
                "Sensor {}: {:<10.6} ({:<10.6})",
                reading.code, reading.raw, reading.smoothed
            ),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Overwrites one terminal line per tick
pub struct TerminalSink<W: Write + Send> {
    writer: W,
    mode: DisplayMode,
}

impl TerminalSink<io::Stdout> {
    pub fn stdout(mode: DisplayMode) -> Self {
        Self::new(io::stdout(), mode)
    }
}

impl<W: Write + Send> TerminalSink<W> {
    pub fn new(writer: W, mode: DisplayMode) -> Self {
        Self { writer, mode }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> ReportSink for TerminalSink<W> {
    fn emit(&mut self, snapshot: &AxisSnapshot) -> Result<(), ReporterError> {
        write!(self.writer, "{}\r", format_line(snapshot, self.mode))?;
        self.writer.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ReporterError> {
        writeln!(self.writer)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Keeps every snapshot; cloned handles share the same buffer
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    snapshots: Arc<Mutex<Vec<AxisSnapshot>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<AxisSnapshot> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ReportSink for MemorySink {
    fn emit(&mut self, snapshot: &AxisSnapshot) -> Result<(), ReporterError> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(*snapshot);
        Ok(())
    }
}

/// Counters returned when the reporter exits
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReporterStats {
    pub reports: u64,
}

pub struct ReporterHandle {
    task: JoinHandle<Result<ReporterStats, ReporterError>>,
}

impl ReporterHandle {
    /// Spawns the reporter on the current tokio runtime.
    pub fn spawn(
        store: SharedAxisStore,
        running: RunFlag,
        sink: Box<dyn ReportSink>,
        settings: ReporterSettings,
    ) -> Self {
        info!("Spawning reporter with settings: {:?}", settings);
        let task = tokio::spawn(async move {
            let result = run_reporter_loop(store, running.clone(), sink, settings).await;
            if let Err(e) = &result {
                error!("Reporter terminated with error: {}", e);
                running.stop();
            }
            result
        });
        Self { task }
    }

    /// Waits for the reporter to observe the cleared flag and exit.
    pub async fn join(self) -> Result<ReporterStats, ReporterError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(ReporterError::Task(e.to_string())),
        }
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

async fn run_reporter_loop(
    store: SharedAxisStore,
    running: RunFlag,
    mut sink: Box<dyn ReportSink>,
    settings: ReporterSettings,
) -> Result<ReporterStats, ReporterError> {
    let period = Duration::from_millis(settings.interval_ms.max(1));
    let mut interval_timer = tokio::time::interval(period);
    interval_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stats = ReporterStats::default();

    debug!("Entering reporter loop with {:?} cadence", period);
    loop {
        interval_timer.tick().await;
        if !running.is_running() {
            break;
        }

        let snapshot = store.read().await.snapshot();
        sink.emit(&snapshot)?;
        stats.reports += 1;
    }

    sink.finish()?;
    info!("Reporter stopped after {} reports", stats.reports);
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::axis_store::{AxisIndex, AxisReading, AxisRecord, AxisStore, AXIS_COUNT};
    use crate::sensor::calibration::AxisCalibration;
    use crate::sensor::kalman::KalmanEstimator;

    fn snapshot() -> AxisSnapshot {
        AxisSnapshot {
            readings: [
                AxisReading {
                    code: 3,
                    raw: 1.0,
                    smoothed: 0.5,
                },
                AxisReading {
                    code: 4,
                    raw: -2.25,
                    smoothed: -1.0,
                },
                AxisReading {
                    code: 5,
                    raw: 0.0,
                    smoothed: 0.0,
                },
            ],
            sequence: 3,
        }
    }

    fn shared_store() -> SharedAxisStore {
        let record = AxisRecord::new(
            AxisCalibration::default(),
            KalmanEstimator::new(0.0, 1.0, 0.1, 0.5),
        );
        AxisStore::new(3, [record; AXIS_COUNT]).into_shared()
    }

    #[test]
    fn raw_line_uses_fixed_width_columns() {
        assert_eq!(
            format_line(&snapshot(), DisplayMode::Raw),
            "Sensor 3: 1.000000   Sensor 4: -2.250000  Sensor 5: 0.000000  "
        );
    }

    #[test]
    fn smoothed_and_both_lines() {
        assert_eq!(
            format_line(&snapshot(), DisplayMode::Smoothed),
            "Sensor 3: 0.500000   Sensor 4: -1.000000  Sensor 5: 0.000000  "
        );
        assert!(format_line(&snapshot(), DisplayMode::Both)
            .starts_with("Sensor 3: 1.000000   (0.500000  )"));
    }

    #[test]
    fn terminal_sink_rewrites_line_in_place() {
        let mut sink = TerminalSink::new(Vec::new(), DisplayMode::Raw);
        sink.emit(&snapshot()).unwrap();
        sink.emit(&snapshot()).unwrap();
        sink.finish().unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(output.matches('\r').count(), 2);
        assert!(output.ends_with("\r\n"));
        assert!(!output.trim_end().contains('\n'));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_within_one_interval_after_flag_clears() {
        let store = shared_store();
        let flag = RunFlag::new();
        let sink = MemorySink::new();
        let handle = ReporterHandle::spawn(
            store,
            flag.clone(),
            Box::new(sink.clone()),
            ReporterSettings::default(),
        );

        tokio::time::sleep(Duration::from_millis(450)).await;
        flag.stop();
        let stopped_at = tokio::time::Instant::now();

        let stats = handle.join().await.unwrap();
        assert!(tokio::time::Instant::now() - stopped_at <= Duration::from_millis(100));
        assert_eq!(stats.reports, 5);
        assert_eq!(sink.snapshots().len(), 5);
    }

    #[tokio::test]
    async fn never_observes_torn_axis_pairs() {
        let store = shared_store();
        let flag = RunFlag::new();
        let sink = MemorySink::new();
        let handle = ReporterHandle::spawn(
            store.clone(),
            flag.clone(),
            Box::new(sink.clone()),
            ReporterSettings {
                interval_ms: 1,
                display: DisplayMode::Raw,
            },
        );

        // Writer stores the same marker into raw and smoothed, one field at a time
        let writer = {
            let store = store.clone();
            let flag = flag.clone();
            std::thread::spawn(move || {
                for marker in 1..=20_000u32 {
                    let mut guard = store.blocking_write();
                    for axis in AxisIndex::all() {
                        let record = guard.record_mut(axis);
                        record.raw_value = marker as f32;
                        std::hint::black_box(&record.raw_value);
                        record.smoothed_value = marker as f32;
                    }
                    guard.mark_updated();
                }
                flag.stop();
            })
        };

        let stats = handle.join().await.unwrap();
        writer.join().unwrap();

        let snapshots = sink.snapshots();
        assert_eq!(snapshots.len() as u64, stats.reports);
        for snapshot in snapshots {
            for reading in snapshot.readings {
                assert_eq!(reading.raw, reading.smoothed, "torn read: {:?}", snapshot);
                assert_eq!(reading.raw, snapshot.sequence as f32);
            }
        }
    }

    struct FailingSink;

    impl ReportSink for FailingSink {
        fn emit(&mut self, _snapshot: &AxisSnapshot) -> Result<(), ReporterError> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed").into())
        }
    }

    #[tokio::test]
    async fn sink_failure_clears_running_flag() {
        let flag = RunFlag::new();
        let handle = ReporterHandle::spawn(
            shared_store(),
            flag.clone(),
            Box::new(FailingSink),
            ReporterSettings::default(),
        );

        assert!(matches!(handle.join().await, Err(ReporterError::Write(_))));
        assert!(!flag.is_running());
    }
}
