//! Event sources feeding the acquisition loop
//!
//! The acquisition loop only sees the [`EventSource`] trait: a blocking stream
//! of `(code, value)` pairs with an exclusive acquire/release pair around it.
//!
//! - [`EvdevSource`] reads absolute-axis events from a Linux input device node
//! - [`ReplaySource`] replays a fixed list of events, e.g. from a text capture

use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use evdev::{Device, EventType};
use tracing::{debug, info, warn};

/// One discrete axis sample as delivered by the device
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawEvent {
    pub code: u16,
    pub value: i32,
}

impl RawEvent {
    pub fn new(code: u16, value: i32) -> Self {
        Self { code, value }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Failed to open event source {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to acquire exclusive access to {0}: {1}")]
    Grab(String, #[source] std::io::Error),

    #[error("Failed to release exclusive access to {0}: {1}")]
    Release(String, #[source] std::io::Error),

    #[error("Failed to read input event: {0}")]
    Read(#[source] std::io::Error),

    #[error("Invalid replay line {line}: {reason}")]
    Replay { line: usize, reason: String },
}

/// Blocking producer of raw axis events
///
/// `next_event` returns `Ok(None)` once the stream has ended. Implementations
/// must tolerate `release` being called without a prior `acquire`.
pub trait EventSource: Send + fmt::Debug {
    fn acquire(&mut self) -> Result<(), SourceError>;

    fn release(&mut self) -> Result<(), SourceError>;

    fn next_event(&mut self) -> Result<Option<RawEvent>, SourceError>;

    fn describe(&self) -> String;
}

/// Linux input device read through evdev
pub struct EvdevSource {
    path: PathBuf,
    device: Device,
    pending: VecDeque<RawEvent>,
    grabbed: bool,
}

impl EvdevSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        let device = Device::open(&path).map_err(|source| SourceError::Open {
            path: path.clone(),
            source,
        })?;
        info!(
            "Opened input device {} ({})",
            path.display(),
            device.name().unwrap_or("unnamed")
        );

        Ok(Self {
            path,
            device,
            pending: VecDeque::new(),
            grabbed: false,
        })
    }
}

impl EventSource for EvdevSource {
    fn acquire(&mut self) -> Result<(), SourceError> {
        self.device
            .grab()
            .map_err(|e| SourceError::Grab(self.path.display().to_string(), e))?;
        self.grabbed = true;
        info!("Exclusive access to {} acquired", self.path.display());
        Ok(())
    }

    fn release(&mut self) -> Result<(), SourceError> {
        if !self.grabbed {
            return Ok(());
        }
        self.grabbed = false;
        self.device
            .ungrab()
            .map_err(|e| SourceError::Release(self.path.display().to_string(), e))?;
        info!("Exclusive access to {} released", self.path.display());
        Ok(())
    }

    fn next_event(&mut self) -> Result<Option<RawEvent>, SourceError> {
        // A fetch can yield only SYN/KEY traffic, so keep reading until an axis event shows up
        while self.pending.is_empty() {
            let events = self.device.fetch_events().map_err(SourceError::Read)?;
            self.pending.extend(
                events
                    .filter(|ev| ev.event_type() == EventType::ABSOLUTE)
                    .map(|ev| RawEvent::new(ev.code(), ev.value())),
            );
        }
        Ok(self.pending.pop_front())
    }

    fn describe(&self) -> String {
        format!(
            "{} ({})",
            self.path.display(),
            self.device.name().unwrap_or("unnamed")
        )
    }
}

impl Drop for EvdevSource {
    fn drop(&mut self) {
        if self.grabbed {
            if let Err(e) = self.release() {
                warn!("{}", e);
            }
        }
    }
}

impl fmt::Debug for EvdevSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvdevSource")
            .field("path", &self.path)
            .field("pending", &self.pending.len())
            .field("grabbed", &self.grabbed)
            .finish()
    }
}

/// In-memory event sequence
///
/// Ends with end-of-stream unless a read failure is injected or looping is
/// enabled. Optional pacing sleeps before every event to mimic a live device.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    name: String,
    events: Vec<RawEvent>,
    position: usize,
    looping: bool,
    pacing: Option<Duration>,
    failure: Option<String>,
    grabbed: Arc<AtomicBool>,
}

impl ReplaySource {
    pub fn new(events: Vec<RawEvent>) -> Self {
        Self {
            name: "replay".to_string(),
            events,
            position: 0,
            looping: false,
            pacing: None,
            failure: None,
            grabbed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Parses a capture file with one `code value` pair per line.
    ///
    /// Blank lines and lines starting with `#` are skipped.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| SourceError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mut source = Self::parse(&content)?;
        source.name = path.display().to_string();
        info!(
            "Loaded {} replay events from {}",
            source.events.len(),
            path.display()
        );
        Ok(source)
    }

    pub fn parse(content: &str) -> Result<Self, SourceError> {
        let mut events = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let (Some(code), Some(value), None) = (fields.next(), fields.next(), fields.next())
            else {
                return Err(SourceError::Replay {
                    line: idx + 1,
                    reason: "expected `code value`".to_string(),
                });
            };
            let code = code.parse::<u16>().map_err(|e| SourceError::Replay {
                line: idx + 1,
                reason: format!("bad code {:?}: {}", code, e),
            })?;
            let value = value.parse::<i32>().map_err(|e| SourceError::Replay {
                line: idx + 1,
                reason: format!("bad value {:?}: {}", value, e),
            })?;
            events.push(RawEvent::new(code, value));
        }
        Ok(Self::new(events))
    }

    /// Restart from the first event instead of ending the stream.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = Some(pacing);
        self
    }

    /// Report a read failure once all events have been delivered.
    pub fn fail_after_events(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Observer for whether exclusive access is currently held.
    pub fn grab_state(&self) -> Arc<AtomicBool> {
        self.grabbed.clone()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl EventSource for ReplaySource {
    fn acquire(&mut self) -> Result<(), SourceError> {
        self.grabbed.store(true, Ordering::SeqCst);
        debug!("Replay source {} acquired", self.name);
        Ok(())
    }

    fn release(&mut self) -> Result<(), SourceError> {
        self.grabbed.store(false, Ordering::SeqCst);
        debug!("Replay source {} released", self.name);
        Ok(())
    }

    fn next_event(&mut self) -> Result<Option<RawEvent>, SourceError> {
        if let Some(pacing) = self.pacing {
            std::thread::sleep(pacing);
        }

        if self.position >= self.events.len() {
            if self.looping && !self.events.is_empty() {
                self.position = 0;
            } else if let Some(message) = &self.failure {
                return Err(SourceError::Read(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    message.clone(),
                )));
            } else {
                return Ok(None);
            }
        }

        let event = self.events[self.position];
        self.position += 1;
        Ok(Some(event))
    }

    fn describe(&self) -> String {
        format!("{} ({} events)", self.name, self.events.len())
    }
}
