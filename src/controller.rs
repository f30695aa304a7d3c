// src/controller.rs
//
// Single owner of the connection manager.
//
// Requests from the controlling layer (console, CLI, GUI) come through here.
// Blocking serial work runs on tokio's blocking pool: the manager is moved into
// the worker and handed back when it finishes, so no two operations ever touch
// the port at once. While a sampling session holds the manager, connect and
// send are answered with `Busy`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::{JoinError, JoinHandle};

use crate::acquisition::{AcquisitionSession, SessionConfig, SessionEnd, SessionOutcome};
use crate::error::{ControlError, ControlResult, SessionError};
use crate::io::serial::{LinkConfig, LinkOpener};
use crate::io::{CaptureEvent, ConnectionManager, ConnectionOpened, ConnectionState, EventSink};

type SessionResult = (ConnectionManager, Result<SessionOutcome, SessionError>);

struct RunningSession {
    port: String,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<SessionResult>,
}

pub struct Controller {
    opener: Arc<dyn LinkOpener>,
    link_config: LinkConfig,
    events: EventSink,
    /// `None` while a worker holds the manager
    conn: Option<ConnectionManager>,
    session: Option<RunningSession>,
}

impl Controller {
    pub fn new(opener: Arc<dyn LinkOpener>, link_config: LinkConfig, events: EventSink) -> Self {
        let conn = ConnectionManager::new(opener.clone(), link_config.clone(), events.clone());
        Self {
            opener,
            link_config,
            events,
            conn: Some(conn),
            session: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        if self.session.is_some() {
            return ConnectionState::Connected;
        }
        self.conn
            .as_ref()
            .map(ConnectionManager::state)
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn port(&self) -> Option<&str> {
        match &self.session {
            Some(running) => Some(running.port.as_str()),
            None => self.conn.as_ref().and_then(ConnectionManager::port),
        }
    }

    pub fn is_sampling(&self) -> bool {
        self.session.is_some()
    }

    // ========================================================================
    // Connection requests
    // ========================================================================

    /// Open `port`. Fails with `Busy` while sampling.
    pub async fn connect(&mut self, port: &str) -> ControlResult<ConnectionOpened> {
        self.reap_finished().await;
        let port = port.to_string();
        Ok(self.with_conn(move |conn| conn.open(&port)).await??)
    }

    /// Write one character to the device. Fails with `Busy` while sampling.
    pub async fn send(&mut self, ch: char) -> ControlResult<()> {
        self.reap_finished().await;
        Ok(self.with_conn(move |conn| conn.write_char(ch)).await??)
    }

    /// Stop any running session, then close the port.
    /// Returns the outcome of the stopped session so samples that failed to
    /// save can still be recovered.
    pub async fn disconnect(&mut self) -> Option<SessionOutcome> {
        let outcome = self.stop_if_sampling("disconnect").await;
        self.close_idle();
        outcome
    }

    /// Exit hook: cancel and await a running session, then close the port.
    /// Safe to call more than once.
    pub async fn shutdown(&mut self) -> Option<SessionOutcome> {
        tlog!("[controller] Killing the process");
        let outcome = self.stop_if_sampling("shutdown").await;
        self.close_idle();
        outcome
    }

    async fn stop_if_sampling(&mut self, during: &str) -> Option<SessionOutcome> {
        if self.session.is_none() {
            return None;
        }
        match self.stop_sampling().await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tlog!("[controller] Session ended with error during {}: {}", during, e);
                None
            }
        }
    }

    /// Close the port once no worker holds the manager
    fn close_idle(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            conn.close();
        }
    }

    // ========================================================================
    // Sampling
    // ========================================================================

    /// Start a session on the open port. Returns as soon as the worker is
    /// running; completion is reported by [`Controller::wait_sampling`] and a
    /// `SamplingFinished` event.
    pub async fn start_sampling(&mut self, config: SessionConfig) -> ControlResult<()> {
        self.reap_finished().await;
        let mut conn = self.idle_conn()?;
        let Some(port) = conn.port().map(str::to_string) else {
            self.conn = Some(conn);
            tlog!("[controller] Cannot start sampling without a connection");
            return Err(SessionError::NotConnected.into());
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let flag = cancel.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let outcome = AcquisitionSession::new(&mut conn, config, flag).map(AcquisitionSession::run);
            (conn, outcome)
        });

        self.session = Some(RunningSession {
            port,
            cancel,
            handle,
        });
        Ok(())
    }

    /// Request the running session to stop and wait for its outcome.
    pub async fn stop_sampling(&mut self) -> ControlResult<SessionOutcome> {
        let running = self.session.as_ref().ok_or(ControlError::NotSampling)?;
        tlog!("[controller] Stopping sampling on {}", running.port);
        running.cancel.store(true, Ordering::Relaxed);
        self.wait_sampling().await
    }

    /// Wait for the running session to end on its own.
    /// Cancel safe: dropping the future leaves the session running.
    pub async fn wait_sampling(&mut self) -> ControlResult<SessionOutcome> {
        let running = self.session.as_mut().ok_or(ControlError::NotSampling)?;
        let joined = (&mut running.handle).await;
        let port = running.port.clone();
        self.session = None;
        self.finish_session(&port, joined)
    }

    /// Collect the outcome of a session whose worker already finished.
    pub async fn reap_finished(&mut self) -> Option<ControlResult<SessionOutcome>> {
        let finished = self
            .session
            .as_ref()
            .map_or(false, |running| running.handle.is_finished());
        if !finished {
            return None;
        }
        Some(self.wait_sampling().await)
    }

    fn finish_session(
        &mut self,
        port: &str,
        joined: Result<SessionResult, JoinError>,
    ) -> ControlResult<SessionOutcome> {
        match joined {
            Ok((mut conn, outcome)) => {
                if let Ok(SessionOutcome {
                    end: SessionEnd::TransportError(msg),
                    ..
                }) = &outcome
                {
                    tlog!("[controller] Closing {} after transport error: {}", port, msg);
                    conn.close();
                }
                self.conn = Some(conn);
                Ok(outcome?)
            }
            Err(e) => {
                // The link went down with the worker
                tlog!("[controller] Sampling worker on {} failed: {}", port, e);
                self.conn = Some(self.fresh_manager());
                self.events.emit(CaptureEvent::PortClosed {
                    port: port.to_string(),
                });
                Err(ControlError::Worker(e.to_string()))
            }
        }
    }

    // ========================================================================
    // Worker plumbing
    // ========================================================================

    fn fresh_manager(&self) -> ConnectionManager {
        ConnectionManager::new(self.opener.clone(), self.link_config.clone(), self.events.clone())
    }

    /// Take the manager for exclusive use, or `Busy` if a session holds it
    fn idle_conn(&mut self) -> ControlResult<ConnectionManager> {
        if self.session.is_some() {
            return Err(ControlError::Busy);
        }
        Ok(self.conn.take().unwrap_or_else(|| self.fresh_manager()))
    }

    /// Run `f` against the manager on the blocking pool and put it back.
    async fn with_conn<R, F>(&mut self, f: F) -> ControlResult<R>
    where
        F: FnOnce(&mut ConnectionManager) -> R + Send + 'static,
        R: Send + 'static,
    {
        let mut conn = self.idle_conn()?;
        let joined = tokio::task::spawn_blocking(move || {
            let result = f(&mut conn);
            (conn, result)
        })
        .await;

        match joined {
            Ok((conn, result)) => {
                self.conn = Some(conn);
                Ok(result)
            }
            Err(e) => {
                tlog!("[controller] Connection worker failed: {}", e);
                self.conn = Some(self.fresh_manager());
                Err(ControlError::Worker(e.to_string()))
            }
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        // Let a detached worker wind down on its own
        if let Some(running) = &self.session {
            running.cancel.store(true, Ordering::Relaxed);
        }
    }
}
