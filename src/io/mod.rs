// src/io/mod.rs
//
// Device I/O for the capture tool.
// Owns the serial connection lifecycle and the notifications it raises
// towards the controlling layer (console, CLI or a GUI front end).

pub mod serial;

use serde::Serialize;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

pub use serial::{ConnectionManager, ConnectionOpened, ConnectionState};

// ============================================================================
// Notifications
// ============================================================================

/// Notifications emitted towards the controlling layer
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum CaptureEvent {
    /// Result of an open attempt on `port`
    Status { port: String, success: bool },
    /// `port` was closed
    PortClosed { port: String },
    /// A sampling session started on `port`
    SamplingStarted { port: String, duration_secs: u64 },
    /// Periodic record count while sampling
    Progress { records: usize },
    /// A sampling session ended and its samples were (or failed to be) saved
    SamplingFinished(SessionSummary),
}

/// Serializable digest of a finished session
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionSummary {
    /// Why the session ended: "elapsed", "cancelled", "transport-error"
    pub reason: String,
    pub records: usize,
    pub malformed_frames: usize,
    /// File the samples were written to, if saving succeeded
    pub saved_to: Option<PathBuf>,
    /// Transport or persistence error text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_us: u64,
    pub finished_us: u64,
}

/// Cloneable handle for emitting [`CaptureEvent`]s.
/// Emitting never blocks; events are dropped once the receiver is gone.
#[derive(Clone, Debug, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<CaptureEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<CaptureEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that discards everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: CaptureEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// Create a connected sink/receiver pair
pub fn event_channel() -> (EventSink, mpsc::UnboundedReceiver<CaptureEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink::new(tx), rx)
}

/// Get current time in microseconds since UNIX epoch
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_sink_delivers_in_order() {
        let (sink, mut rx) = event_channel();
        sink.emit(CaptureEvent::Status {
            port: "COM4".to_string(),
            success: true,
        });
        sink.emit(CaptureEvent::PortClosed {
            port: "COM4".to_string(),
        });

        assert_eq!(
            rx.try_recv().unwrap(),
            CaptureEvent::Status {
                port: "COM4".to_string(),
                success: true
            }
        );
        assert!(matches!(rx.try_recv().unwrap(), CaptureEvent::PortClosed { .. }));
    }

    #[test]
    fn test_emit_after_receiver_dropped_is_silent() {
        let (sink, rx) = event_channel();
        drop(rx);
        sink.emit(CaptureEvent::Progress { records: 1 });
        EventSink::disabled().emit(CaptureEvent::Progress { records: 2 });
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(CaptureEvent::Status {
            port: "/dev/rfcomm0".to_string(),
            success: false,
        })
        .unwrap();
        assert_eq!(json["event"], "status");
        assert_eq!(json["port"], "/dev/rfcomm0");
        assert_eq!(json["success"], false);
    }
}
