// src/io/serial/connection.rs
//
// Lifecycle of the single serial connection.
//
// The manager owns the link and the Connected/Disconnected state; callers can
// only observe the state through it. Exactly one manager exists per
// controller, and it holds at most one link, so a second open is refused
// rather than creating another live handle.

use std::sync::Arc;

use serde::Serialize;

use super::link::{LinkOpener, SerialLink};
use super::utils::LinkConfig;
use crate::error::{ConnectionError, TransportError, WriteError};
use crate::io::{CaptureEvent, EventSink};

/// Whether a port is currently open
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Successful open
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionOpened {
    pub port: String,
}

struct OpenLink {
    port: String,
    link: Box<dyn SerialLink>,
}

/// Owner of the one serial connection
pub struct ConnectionManager {
    opener: Arc<dyn LinkOpener>,
    config: LinkConfig,
    events: EventSink,
    open: Option<OpenLink>,
}

impl ConnectionManager {
    pub fn new(opener: Arc<dyn LinkOpener>, config: LinkConfig, events: EventSink) -> Self {
        Self {
            opener,
            config,
            events,
            open: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        if self.open.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.open.is_some()
    }

    /// Name of the open port, if any
    pub fn port(&self) -> Option<&str> {
        self.open.as_ref().map(|o| o.port.as_str())
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// Open `port`. Emits a status notification either way.
    /// Refused while another port is open; there is no automatic retry.
    pub fn open(&mut self, port: &str) -> Result<ConnectionOpened, ConnectionError> {
        if let Some(open) = &self.open {
            tlog!(
                "[serial] Refusing to open {} - already connected to {}",
                port,
                open.port
            );
            return Err(ConnectionError::AlreadyConnected {
                port: open.port.clone(),
            });
        }

        match self.opener.open(port, &self.config) {
            Ok(link) => {
                self.open = Some(OpenLink {
                    port: port.to_string(),
                    link,
                });
                tlog!(
                    "[serial] Successfully connected to port {} at {} baud ({})",
                    port,
                    self.config.baud_rate,
                    self.config.line_format()
                );
                self.events.emit(CaptureEvent::Status {
                    port: port.to_string(),
                    success: true,
                });
                Ok(ConnectionOpened {
                    port: port.to_string(),
                })
            }
            Err(source) => {
                tlog!("[serial] Error with port {}: {}", port, source);
                self.events.emit(CaptureEvent::Status {
                    port: port.to_string(),
                    success: false,
                });
                Err(ConnectionError::Open {
                    port: port.to_string(),
                    source,
                })
            }
        }
    }

    /// Close the port if one is open. Safe to call at any time.
    pub fn close(&mut self) {
        if let Some(open) = self.open.take() {
            // Dropping the link releases the OS handle
            drop(open.link);
            tlog!("[serial] Port {} closed", open.port);
            self.events.emit(CaptureEvent::PortClosed { port: open.port });
        }
    }

    /// Read one byte. `Ok(None)` means the read timed out without data.
    pub fn read_byte(&mut self) -> Result<Option<u8>, TransportError> {
        let open = self.open.as_mut().ok_or(TransportError::NotConnected)?;
        open.link.read_byte().map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                TransportError::Disconnected {
                    port: open.port.clone(),
                }
            } else {
                TransportError::Io {
                    port: open.port.clone(),
                    source: e,
                }
            }
        })
    }

    /// Send a single character, UTF-8 encoded. Failures are logged and
    /// returned but never change the connection state.
    pub fn write_char(&mut self, ch: char) -> Result<(), WriteError> {
        let open = match self.open.as_mut() {
            Some(open) => open,
            None => {
                tlog!("[serial] Could not write {:?} - not connected", ch);
                return Err(WriteError::NotConnected);
            }
        };

        let mut buf = [0u8; 4];
        match open.link.write_all(ch.encode_utf8(&mut buf).as_bytes()) {
            Ok(()) => {
                tlog!("[serial] Written {:?} on port {}", ch, open.port);
                Ok(())
            }
            Err(source) => {
                tlog!("[serial] Could not write {:?} on port {}: {}", ch, open.port, source);
                Err(WriteError::Io {
                    ch,
                    port: open.port.clone(),
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::event_channel;
    use crate::io::serial::link::testing::{ScriptedOpener, Step};
    use std::sync::atomic::Ordering;

    fn manager(opener: ScriptedOpener) -> (ConnectionManager, Arc<ScriptedOpener>) {
        let opener = Arc::new(opener);
        let conn = ConnectionManager::new(opener.clone(), LinkConfig::default(), EventSink::disabled());
        (conn, opener)
    }

    #[test]
    fn test_open_and_close_emit_notifications() {
        let (events, mut rx) = event_channel();
        let mut conn = ConnectionManager::new(
            Arc::new(ScriptedOpener::new(vec![])),
            LinkConfig::default(),
            events,
        );

        assert_eq!(conn.state(), ConnectionState::Disconnected);
        let opened = conn.open("/dev/rfcomm0").unwrap();
        assert_eq!(opened.port, "/dev/rfcomm0");
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.port(), Some("/dev/rfcomm0"));

        conn.close();
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        assert_eq!(
            rx.try_recv().unwrap(),
            CaptureEvent::Status {
                port: "/dev/rfcomm0".to_string(),
                success: true
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            CaptureEvent::PortClosed {
                port: "/dev/rfcomm0".to_string()
            }
        );
    }

    #[test]
    fn test_open_failure_stays_disconnected() {
        let (events, mut rx) = event_channel();
        let mut conn = ConnectionManager::new(
            Arc::new(ScriptedOpener::refusing()),
            LinkConfig::default(),
            events,
        );

        let err = conn.open("COM9").unwrap_err();
        assert!(matches!(err, ConnectionError::Open { ref port, .. } if port == "COM9"));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(
            rx.try_recv().unwrap(),
            CaptureEvent::Status {
                port: "COM9".to_string(),
                success: false
            }
        );
    }

    #[test]
    fn test_second_open_is_refused() {
        let (mut conn, opener) = manager(ScriptedOpener::new(vec![]));

        conn.open("COM3").unwrap();
        let err = conn.open("COM4").unwrap_err();

        assert!(matches!(err, ConnectionError::AlreadyConnected { ref port } if port == "COM3"));
        assert_eq!(conn.port(), Some("COM3"));
        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (events, mut rx) = event_channel();
        let mut conn = ConnectionManager::new(
            Arc::new(ScriptedOpener::new(vec![])),
            LinkConfig::default(),
            events,
        );

        conn.close();
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_reopen_after_close() {
        let (mut conn, opener) = manager(ScriptedOpener::new(vec![]));

        conn.open("COM3").unwrap();
        conn.close();
        conn.open("COM5").unwrap();
        assert_eq!(conn.port(), Some("COM5"));
        assert_eq!(opener.opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_read_requires_connection() {
        let (mut conn, opener) = manager(ScriptedOpener::new(vec![Step::Bytes(b"x".to_vec())]));

        assert!(matches!(conn.read_byte(), Err(TransportError::NotConnected)));
        assert_eq!(opener.reads(), 0);

        conn.open("COM3").unwrap();
        assert_eq!(conn.read_byte().unwrap(), Some(b'x'));
        assert_eq!(conn.read_byte().unwrap(), None);
    }

    #[test]
    fn test_read_errors_are_classified() {
        let (mut conn, _) = manager(ScriptedOpener::new(vec![
            Step::Fail(std::io::ErrorKind::BrokenPipe),
            Step::Eof,
        ]));
        conn.open("COM3").unwrap();

        assert!(matches!(conn.read_byte(), Err(TransportError::Io { .. })));
        assert!(matches!(conn.read_byte(), Err(TransportError::Disconnected { .. })));
        // Read failures alone never tear the connection down
        assert!(conn.is_connected());
    }

    #[test]
    fn test_write_char() {
        let (mut conn, opener) = manager(ScriptedOpener::new(vec![]));

        assert!(matches!(conn.write_char('S'), Err(WriteError::NotConnected)));

        conn.open("COM3").unwrap();
        conn.write_char('S').unwrap();
        conn.write_char('é').unwrap();
        assert_eq!(*opener.written.lock().unwrap(), "Sé".as_bytes());
    }

    #[test]
    fn test_write_failure_keeps_connection() {
        let (mut conn, _) = manager(ScriptedOpener {
            fail_writes: true,
            ..ScriptedOpener::default()
        });
        conn.open("COM3").unwrap();

        assert!(matches!(conn.write_char('S'), Err(WriteError::Io { ch: 'S', .. })));
        assert!(conn.is_connected());
    }
}
