//! Pipeline Handle - wiring and coordinated shutdown
//!
//! Starts the two long-running parts of the pipeline around one shared store
//! and one running flag:
//!
//! ```text
//! EventSource ─► AcquisitionLoop (OS thread) ─► AxisStore ◄─ Reporter (tokio task) ─► ReportSink
//!                         │                                        │
//!                         └──────────────── RunFlag ───────────────┘
//! ```
//!
//! Startup failures (acquire, thread spawn) are returned from [`PipelineHandle::spawn`]
//! after everything already started has been stopped again. [`PipelineHandle::wait`]
//! joins the reporter first, then the acquisition thread, and finally releases the
//! event source.

use std::thread;
use tracing::{debug, error, info, warn};

use super::acquisition::{
    AcquisitionError, AcquisitionLoop, AcquisitionSettings, AcquisitionStats, Acquiring, LoopExit,
};
use super::axis_store::{AxisSnapshot, AxisStore, SharedAxisStore};
use super::event_source::EventSource;
use super::reporter::{ReportSink, ReporterError, ReporterHandle, ReporterSettings};
use crate::lifecycle::RunFlag;

#[derive(Clone, Debug, Default)]
pub struct PipelineSettings {
    pub acquisition: AcquisitionSettings,
    pub reporter: ReporterSettings,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Acquisition error: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("Reporter error: {0}")]
    Reporter(#[from] ReporterError),

    #[error("Failed to start acquisition thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    #[error("Acquisition thread failed: {0}")]
    Join(String),
}

/// Summary of an orderly shutdown
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShutdownReport {
    pub exit: LoopExit,
    pub acquisition: AcquisitionStats,
    pub reports: u64,
    pub final_snapshot: AxisSnapshot,
}

type AcquisitionOutcome = (
    AcquisitionLoop<Acquiring>,
    Result<LoopExit, AcquisitionError>,
);

pub struct PipelineHandle {
    store: SharedAxisStore,
    running: RunFlag,
    reporter: ReporterHandle,
    acquisition: thread::JoinHandle<AcquisitionOutcome>,
}

impl PipelineHandle {
    /// Acquires the source and starts the reporter and the acquisition thread.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        store: AxisStore,
        source: Box<dyn EventSource>,
        sink: Box<dyn ReportSink>,
        running: RunFlag,
        settings: PipelineSettings,
    ) -> Result<Self, PipelineError> {
        info!("Initializing pipeline with settings: {:?}", settings);
        let store = store.into_shared();

        let acquisition = AcquisitionLoop::create(
            source,
            store.clone(),
            running.clone(),
            settings.acquisition,
        );
        let mut acquisition = acquisition.acquire().map_err(|e| {
            error!("{}", e);
            running.stop();
            e
        })?;
        debug!("Event source acquired");

        info!("Creating Reporter");
        let reporter =
            ReporterHandle::spawn(store.clone(), running.clone(), sink, settings.reporter);

        info!("Creating Acquisition thread");
        let stop_guard = running.stop_on_drop();
        let spawned = thread::Builder::new()
            .name("acquisition".to_string())
            .spawn(move || {
                // Clears the flag even if run() panics
                let _stop_guard = stop_guard;
                let outcome = acquisition.run();
                (acquisition, outcome)
            });
        let acquisition = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                // The closure and with it the acquired source are dropped here
                error!("Failed to spawn acquisition thread: {}", e);
                running.stop();
                reporter.abort();
                return Err(PipelineError::ThreadSpawn(e));
            }
        };

        info!("Pipeline started");
        Ok(Self {
            store,
            running,
            reporter,
            acquisition,
        })
    }

    /// Waits for both halves to finish and releases the event source.
    ///
    /// Returns once the running flag has been cleared (interrupt, end of
    /// stream, read failure or reporter failure) and everything is torn down.
    /// A read failure is returned as an error after the teardown completed.
    pub async fn wait(self) -> Result<ShutdownReport, PipelineError> {
        let reporter_result = self.reporter.join().await;
        // A reporter that died on its own must still bring the acquisition loop down
        self.running.stop();
        debug!("Reporter joined, waiting for acquisition thread");

        let acquisition = self.acquisition;
        let (acquisition, outcome) = match tokio::task::spawn_blocking(move || acquisition.join())
            .await
        {
            Ok(Ok(joined)) => joined,
            Ok(Err(_)) => {
                return Err(PipelineError::Join(
                    "acquisition thread panicked".to_string(),
                ))
            }
            Err(e) => return Err(PipelineError::Join(e.to_string())),
        };

        let released = acquisition.shutdown();
        let exit = match outcome {
            Ok(exit) => exit,
            Err(e) => {
                if let Err(release_err) = released {
                    warn!("{}", release_err);
                }
                return Err(e.into());
            }
        };
        let acquisition = released?;
        let reports = reporter_result?.reports;

        let final_snapshot = self.store.read().await.snapshot();
        info!(
            "Pipeline shut down ({:?}): {} events accepted, {} discarded, {} reports",
            exit, acquisition.accepted, acquisition.discarded, reports
        );

        Ok(ShutdownReport {
            exit,
            acquisition,
            reports,
            final_snapshot,
        })
    }
}
