// src/acquisition.rs
//
// Acquisition session: turns the byte stream of an open connection into a
// SampleSet and persists it.
//
// The loop reads one byte per call and runs until the capture window elapses,
// the cancel flag is raised, or the transport fails. Records completed before
// a transport failure are kept and saved like any other session.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{PersistenceError, SessionError};
use crate::io::serial::{ConnectionManager, FrameFormat, ParsedFrame, SentinelFramer};
use crate::io::{now_us, CaptureEvent, SessionSummary};
use crate::samples::SampleSet;

/// Records between progress notifications
const PROGRESS_EVERY: usize = 100;

// ============================================================================
// Types
// ============================================================================

/// Parameters for one acquisition session
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Capture window
    pub duration: Duration,
    pub format: FrameFormat,
    /// Directory the sample file is written to
    pub output_dir: PathBuf,
}

/// Why the read loop stopped
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// The capture window elapsed
    Elapsed,
    /// Stop was requested
    Cancelled,
    /// The link failed; carries the error text
    TransportError(String),
}

impl SessionEnd {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionEnd::Elapsed => "elapsed",
            SessionEnd::Cancelled => "cancelled",
            SessionEnd::TransportError(_) => "transport-error",
        }
    }
}

/// Everything a finished session produced.
/// The samples stay here even when saving fails so they can be saved again.
#[derive(Debug)]
pub struct SessionOutcome {
    pub samples: SampleSet,
    pub end: SessionEnd,
    pub malformed_frames: usize,
    /// Bytes of an unterminated frame dropped at the end
    pub discarded_bytes: usize,
    pub saved: Result<PathBuf, PersistenceError>,
    pub started_us: u64,
    pub finished_us: u64,
}

impl SessionOutcome {
    /// Write the samples into `dir` under a fresh timestamped name, replacing
    /// the previous persistence result.
    pub fn retry_save(&mut self, dir: &Path) -> Result<&Path, &PersistenceError> {
        self.saved = self.samples.save_in(dir, chrono::Local::now());
        match &self.saved {
            Ok(path) => Ok(path.as_path()),
            Err(e) => Err(e),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        let error = match (&self.end, &self.saved) {
            (SessionEnd::TransportError(msg), Err(e)) => Some(format!("{}; {}", msg, e)),
            (_, Err(e)) => Some(e.to_string()),
            (SessionEnd::TransportError(msg), _) => Some(msg.clone()),
            _ => None,
        };
        SessionSummary {
            reason: self.end.as_str().to_string(),
            records: self.samples.len(),
            malformed_frames: self.malformed_frames,
            saved_to: self.saved.as_ref().ok().cloned(),
            error,
            started_us: self.started_us,
            finished_us: self.finished_us,
        }
    }
}

/// Result of the read loop before persistence
#[derive(Debug)]
struct Capture {
    samples: SampleSet,
    end: SessionEnd,
    malformed_frames: usize,
    discarded_bytes: usize,
}

// ============================================================================
// Session
// ============================================================================

/// One sampling run over a borrowed connection
pub struct AcquisitionSession<'a> {
    conn: &'a mut ConnectionManager,
    config: SessionConfig,
    cancel: Arc<AtomicBool>,
}

impl<'a> AcquisitionSession<'a> {
    /// Prepare a session. Fails without touching the link when no port is open.
    pub fn new(
        conn: &'a mut ConnectionManager,
        config: SessionConfig,
        cancel: Arc<AtomicBool>,
    ) -> Result<Self, SessionError> {
        if !conn.is_connected() {
            tlog!("[acquisition] Not connected to any port. Please first connect to a port.");
            return Err(SessionError::NotConnected);
        }
        Ok(Self {
            conn,
            config,
            cancel,
        })
    }

    /// Sample until the window elapses, the session is cancelled or the link
    /// fails, then save the samples.
    pub fn run(mut self) -> SessionOutcome {
        let started_us = now_us();
        let port = self.conn.port().unwrap_or_default().to_string();
        self.conn.events().emit(CaptureEvent::SamplingStarted {
            port: port.clone(),
            duration_secs: self.config.duration.as_secs(),
        });
        tlog!(
            "[acquisition] Start sampling on {} for {:?}",
            port,
            self.config.duration
        );

        let capture = self.capture();

        tlog!(
            "[acquisition] End of sampling ({}): {} records, {} malformed frames",
            capture.end.as_str(),
            capture.samples.len(),
            capture.malformed_frames
        );

        let saved = capture
            .samples
            .save_in(&self.config.output_dir, chrono::Local::now());
        match &saved {
            Ok(path) => tlog!("[acquisition] Saved samples to {}", path.display()),
            Err(e) => tlog!("[acquisition] Failed to save samples: {}", e),
        }

        let outcome = SessionOutcome {
            samples: capture.samples,
            end: capture.end,
            malformed_frames: capture.malformed_frames,
            discarded_bytes: capture.discarded_bytes,
            saved,
            started_us,
            finished_us: now_us(),
        };
        self.conn
            .events()
            .emit(CaptureEvent::SamplingFinished(outcome.summary()));
        outcome
    }

    fn capture(&mut self) -> Capture {
        let mut framer = SentinelFramer::new(self.config.format.clone());
        let mut samples = SampleSet::new();
        let mut malformed_frames = 0;
        let start = Instant::now();

        let end = loop {
            if self.cancel.load(Ordering::Relaxed) {
                break SessionEnd::Cancelled;
            }
            if start.elapsed() >= self.config.duration {
                break SessionEnd::Elapsed;
            }

            let byte = match self.conn.read_byte() {
                Ok(Some(byte)) => byte,
                // Read timeout, nothing arrived
                Ok(None) => continue,
                Err(e) => {
                    tlog!("[acquisition] Error reading data: {}", e);
                    break SessionEnd::TransportError(e.to_string());
                }
            };

            match framer.push(byte) {
                Some(ParsedFrame::Record(record)) => {
                    samples.push(record);
                    if samples.len() % PROGRESS_EVERY == 0 {
                        self.conn.events().emit(CaptureEvent::Progress {
                            records: samples.len(),
                        });
                    }
                }
                Some(ParsedFrame::Malformed { bytes, reason }) => {
                    malformed_frames += 1;
                    tlog!(
                        "[acquisition] Skipping malformed frame {:?}: {}",
                        String::from_utf8_lossy(&bytes),
                        reason
                    );
                }
                None => {}
            }
        };

        let discarded_bytes = framer.flush().map(|rest| rest.len()).unwrap_or(0);
        if discarded_bytes > 0 {
            tlog!(
                "[acquisition] Discarding {} bytes of unterminated frame",
                discarded_bytes
            );
        }

        Capture {
            samples,
            end,
            malformed_frames,
            discarded_bytes,
        }
    }
}
