//! Acquisition Loop - sole writer of the axis store
//!
//! Pulls events from an [`EventSource`], drops those whose code falls outside
//! the configured axis window, runs the calibration transform and the Kalman
//! update for the rest and writes both results into the [`AxisStore`].
//!
//! The loop is a two-state machine:
//!
//! ```text
//! AcquisitionLoop<Idle> ──acquire()──► AcquisitionLoop<Acquiring> ──run()──► LoopExit
//!                                                               └─shutdown()─► source released
//! ```
//!
//! `run()` blocks on the source; it is meant for a dedicated OS thread, never
//! for an async task.
//!
//! [`AxisStore`]: super::axis_store::AxisStore

use chrono::Local;
use statum::{machine, state};
use tracing::{debug, error, info, trace};

use super::axis_store::{AxisIndex, SharedAxisStore, AXIS_COUNT};
use super::event_source::{EventSource, RawEvent, SourceError};
use crate::lifecycle::RunFlag;

#[derive(Clone, Debug)]
pub struct AcquisitionSettings {
    /// Event code mapped to axis 0
    pub base_code: u16,
    /// Whether to take exclusive access to the source before reading
    pub exclusive: bool,
    /// Window for the periodic throughput log line
    pub stats_interval_secs: i64,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            base_code: 3,
            exclusive: true,
            stats_interval_secs: 10,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("Failed to acquire event source: {0}")]
    Acquire(#[source] SourceError),

    #[error("Event source read failed: {0}")]
    Read(#[source] SourceError),

    #[error("Failed to release event source: {0}")]
    Release(#[source] SourceError),
}

/// Why a successful `run()` returned
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopExit {
    /// The running flag was cleared by someone else
    Stopped,
    /// The source reported end-of-stream
    EndOfStream,
}

/// Event counters for the lifetime of the loop
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AcquisitionStats {
    pub accepted: u64,
    pub discarded: u64,
}

#[state]
#[derive(Debug, Clone)]
pub enum AcquisitionState {
    Idle,
    Acquiring,
}

#[machine]
#[derive(Debug)]
pub struct AcquisitionLoop<S: AcquisitionState> {
    // Owned exclusively by the loop while it runs
    source: Box<dyn EventSource>,

    store: SharedAxisStore,

    running: RunFlag,

    settings: AcquisitionSettings,

    stats: AcquisitionStats,
}

impl<S: AcquisitionState> AcquisitionLoop<S> {
    pub fn stats(&self) -> AcquisitionStats {
        self.stats
    }
}

impl AcquisitionLoop<Idle> {
    pub fn create(
        source: Box<dyn EventSource>,
        store: SharedAxisStore,
        running: RunFlag,
        settings: AcquisitionSettings,
    ) -> Self {
        debug!(
            "Creating acquisition loop for {} with settings: {:?}",
            source.describe(),
            settings
        );
        Self::new(source, store, running, settings, AcquisitionStats::default())
    }

    /// Takes exclusive access to the source (when configured) and arms the loop.
    pub fn acquire(mut self) -> Result<AcquisitionLoop<Acquiring>, AcquisitionError> {
        if self.settings.exclusive {
            self.source.acquire().map_err(AcquisitionError::Acquire)?;
        } else {
            info!("Reading {} without exclusive access", self.source.describe());
        }
        Ok(self.transition())
    }
}

impl AcquisitionLoop<Acquiring> {
    /// Runs until the flag clears, the stream ends or a read fails.
    ///
    /// The flag is only checked between reads. A source that blocks forever
    /// without yielding delays shutdown until its next event.
    /// On every exit path the running flag is cleared before returning.
    pub fn run(&mut self) -> Result<LoopExit, AcquisitionError> {
        info!(
            "Starting acquisition loop on {} (axis codes {}..{})",
            self.source.describe(),
            self.settings.base_code,
            u32::from(self.settings.base_code) + AXIS_COUNT as u32
        );

        let outcome = self.pump();
        self.running.stop();

        match &outcome {
            Ok(LoopExit::Stopped) => info!("Acquisition loop stopped by shutdown request"),
            Ok(LoopExit::EndOfStream) => info!("Event source reached end of stream"),
            Err(e) => error!("Acquisition loop terminated: {}", e),
        }
        info!(
            "Acquisition totals: {} accepted, {} discarded",
            self.stats.accepted, self.stats.discarded
        );
        outcome
    }

    fn pump(&mut self) -> Result<LoopExit, AcquisitionError> {
        let log_interval = chrono::Duration::seconds(self.settings.stats_interval_secs.max(1));
        let mut last_log_time = Local::now();
        let mut window = AcquisitionStats::default();

        while self.running.is_running() {
            let event = match self.source.next_event() {
                Ok(Some(event)) => event,
                Ok(None) => return Ok(LoopExit::EndOfStream),
                Err(e) => return Err(AcquisitionError::Read(e)),
            };

            // A shutdown request that arrived while blocked wins over the event
            if !self.running.is_running() {
                break;
            }

            if self.apply_event(event) {
                window.accepted += 1;
            } else {
                window.discarded += 1;
            }

            let now = Local::now();
            if now - last_log_time > log_interval {
                info!(
                    "Acquisition stats: {} accepted, {} discarded in last {} seconds",
                    window.accepted,
                    window.discarded,
                    log_interval.num_seconds()
                );
                window = AcquisitionStats::default();
                last_log_time = now;
            }
        }

        Ok(LoopExit::Stopped)
    }

    /// Folds one event into the store. Returns `false` if it was discarded.
    pub fn apply_event(&mut self, event: RawEvent) -> bool {
        let Some(axis) = AxisIndex::from_code(event.code, self.settings.base_code) else {
            trace!("Discarding event outside axis window: {:?}", event);
            self.stats.discarded += 1;
            return false;
        };

        let mut store = self.store.blocking_write();
        let record = store.record_mut(axis);
        let raw = record.calibration.apply(event.value);
        let smoothed = record.filter.update(raw);
        record.raw_value = raw;
        record.smoothed_value = smoothed;
        store.mark_updated();
        drop(store);

        trace!(
            "Axis {} <- {}: raw {:.4}, smoothed {:.4}",
            axis.get(),
            event.value,
            raw,
            smoothed
        );
        self.stats.accepted += 1;
        true
    }

    /// Gives up exclusive access and closes the source.
    pub fn shutdown(mut self) -> Result<AcquisitionStats, AcquisitionError> {
        let result = self.source.release().map_err(AcquisitionError::Release);
        debug!("Closing event source {}", self.source.describe());
        result.map(|()| self.stats)
    }
}
