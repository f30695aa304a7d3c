// src/error.rs
//
// Error types for each layer of the capture pipeline.
// Connection, transport, persistence and control failures are kept apart so
// callers can tell a retryable open failure from a lost link or a full disk.

use std::path::PathBuf;

use thiserror::Error;

/// Failure to establish a serial connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The port could not be opened (busy, missing, permission denied)
    #[error("Failed to open {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },
    /// A connection is already live; a second handle is never created
    #[error("Already connected to {port}")]
    AlreadyConnected { port: String },
}

/// Failure while pulling bytes from an open connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Not connected to any port")]
    NotConnected,
    /// The device went away (read returned end-of-stream)
    #[error("Port {port} disconnected")]
    Disconnected { port: String },
    #[error("Read error on {port}: {source}")]
    Io {
        port: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of a best-effort single-character write.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("Not connected to any port")]
    NotConnected,
    #[error("Could not write {ch:?} on port {port}: {source}")]
    Io {
        ch: char,
        port: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure writing or reading back a sample file.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed sample file at line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

/// Failure of an acquisition session before it could run.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Not connected to any port. Please first connect to a port.")]
    NotConnected,
}

/// Errors surfaced by the controller to the controlling layer.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Write(#[from] WriteError),
    /// A sampling session currently owns the connection
    #[error("A sampling session is running; stop it first")]
    Busy,
    /// Stop was requested but nothing is sampling
    #[error("No sampling session is running")]
    NotSampling,
    #[error("Worker task failed: {0}")]
    Worker(String),
}

pub type ControlResult<T> = Result<T, ControlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConnectionError::AlreadyConnected {
            port: "/dev/rfcomm0".to_string(),
        };
        assert_eq!(err.to_string(), "Already connected to /dev/rfcomm0");

        let err = TransportError::Io {
            port: "COM3".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe"),
        };
        assert!(err.to_string().contains("COM3"));
        assert!(err.to_string().contains("pipe"));
    }

    #[test]
    fn test_control_error_from() {
        let err: ControlError = SessionError::NotConnected.into();
        assert!(matches!(err, ControlError::Session(SessionError::NotConnected)));
        assert!(err.to_string().contains("first connect"));
    }

    #[test]
    fn test_errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ControlError>();
        assert_send_sync::<TransportError>();
        assert_send_sync::<PersistenceError>();
    }
}
