//! Lifecycle Controller - process-wide running flag and interrupt handling
//!
//! The running flag is the only state touched when an interrupt arrives. The
//! watcher task below turns SIGINT/SIGTERM into a single atomic store; every
//! join, release and flush happens afterwards on regular threads that observe
//! the flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Shared on/off switch polled by the acquisition loop and the reporter
///
/// Starts in the running state. [`RunFlag::stop`] is a one-way transition;
/// there is no way back to running within the same flag.
#[derive(Clone, Debug)]
pub struct RunFlag {
    running: Arc<AtomicBool>,
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl RunFlag {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Lock-free and idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Returns a guard that clears the flag when dropped, including during unwinding.
    pub fn stop_on_drop(&self) -> StopGuard {
        StopGuard { flag: self.clone() }
    }
}

/// Clears its [`RunFlag`] on drop
#[derive(Debug)]
pub struct StopGuard {
    flag: RunFlag,
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        self.flag.stop();
    }
}

/// Which external request ended the run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterruptKind {
    Interrupt,
    Terminate,
}

/// Spawns a task that clears `flag` on the first SIGINT or SIGTERM.
///
/// The task exits after the first signal. Abort the returned handle once the
/// pipeline has finished on its own.
pub fn watch_interrupts(flag: RunFlag) -> JoinHandle<Option<InterruptKind>> {
    tokio::spawn(async move {
        let kind = wait_for_interrupt().await?;
        match kind {
            InterruptKind::Interrupt => info!("Received Ctrl+C, shutting down..."),
            InterruptKind::Terminate => info!("Received SIGTERM, shutting down..."),
        }
        flag.stop();
        Some(kind)
    })
}

async fn wait_for_interrupt() -> Option<InterruptKind> {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => Some(InterruptKind::Interrupt),
            Err(e) => {
                debug!("Ctrl+C handler unavailable: {}", e);
                std::future::pending::<Option<InterruptKind>>().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => stream.recv().await.map(|_| InterruptKind::Terminate),
            Err(e) => {
                debug!("SIGTERM handler unavailable: {}", e);
                std::future::pending::<Option<InterruptKind>>().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<InterruptKind>>();

    tokio::select! {
        kind = ctrl_c => kind,
        kind = terminate => kind,
    }
}
