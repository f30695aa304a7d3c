// src/io/serial/link.rs
//
// Byte-level access to an open serial port.
// The connection manager only talks to these traits; the system implementation
// wraps the serialport crate, tests substitute scripted links.

use std::io::{Read, Write};

use super::utils::LinkConfig;

/// An open, byte-oriented serial link
pub trait SerialLink: Send {
    /// Read a single byte.
    /// Returns `Ok(None)` when the read timeout expires without data and
    /// `ErrorKind::UnexpectedEof` when the device has gone away.
    fn read_byte(&mut self) -> std::io::Result<Option<u8>>;

    /// Write all of `data` and flush it to the device
    fn write_all(&mut self, data: &[u8]) -> std::io::Result<()>;
}

/// Opens serial links by port name
pub trait LinkOpener: Send + Sync {
    fn open(&self, port: &str, config: &LinkConfig) -> Result<Box<dyn SerialLink>, serialport::Error>;
}

// ============================================================================
// System implementation
// ============================================================================

/// Opens real ports through the serialport crate
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemOpener;

impl LinkOpener for SystemOpener {
    fn open(&self, port: &str, config: &LinkConfig) -> Result<Box<dyn SerialLink>, serialport::Error> {
        let port = config.port_builder(port).open()?;
        Ok(Box::new(PortLink { port }))
    }
}

/// serialport-backed link. Dropping it closes the port.
struct PortLink {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialLink for PortLink {
    fn read_byte(&mut self) -> std::io::Result<Option<u8>> {
        let mut buf = [0u8; 1];
        match self.port.read(&mut buf) {
            Ok(1) => Ok(Some(buf[0])),
            // EOF - port closed/disconnected
            Ok(_) => Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "serial port returned end of stream",
            )),
            // Timeout is expected for serial reads
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.port.write_all(data)?;
        self.port.flush()
    }
}

// ============================================================================
// Scripted links for tests
// ============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// One scripted read outcome
    #[derive(Clone, Debug)]
    pub enum Step {
        Bytes(Vec<u8>),
        Timeout,
        Fail(std::io::ErrorKind),
        Eof,
    }

    /// Link that replays a script, then times out forever
    pub struct ScriptedLink {
        steps: VecDeque<Step>,
        pending: VecDeque<u8>,
        reads: Arc<AtomicUsize>,
        written: Arc<Mutex<Vec<u8>>>,
        fail_writes: bool,
    }

    impl SerialLink for ScriptedLink {
        fn read_byte(&mut self) -> std::io::Result<Option<u8>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            loop {
                if let Some(byte) = self.pending.pop_front() {
                    return Ok(Some(byte));
                }
                match self.steps.pop_front() {
                    Some(Step::Bytes(bytes)) => self.pending.extend(bytes),
                    Some(Step::Fail(kind)) => {
                        return Err(std::io::Error::new(kind, "scripted failure"))
                    }
                    Some(Step::Eof) => {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "scripted end of stream",
                        ))
                    }
                    Some(Step::Timeout) | None => {
                        std::thread::sleep(Duration::from_millis(1));
                        return Ok(None);
                    }
                }
            }
        }

        fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
            if self.fail_writes {
                return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "write timed out"));
            }
            self.written.lock().unwrap().extend_from_slice(data);
            Ok(())
        }
    }

    /// Opener handing out [`ScriptedLink`]s that all replay the same script
    #[derive(Default)]
    pub struct ScriptedOpener {
        pub script: Vec<Step>,
        pub refuse: bool,
        pub fail_writes: bool,
        pub opens: AtomicUsize,
        pub reads: Arc<AtomicUsize>,
        pub written: Arc<Mutex<Vec<u8>>>,
    }

    impl ScriptedOpener {
        pub fn new(script: Vec<Step>) -> Self {
            Self {
                script,
                ..Self::default()
            }
        }

        /// Opener whose every open attempt fails
        pub fn refusing() -> Self {
            Self {
                refuse: true,
                ..Self::default()
            }
        }

        pub fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    impl LinkOpener for ScriptedOpener {
        fn open(&self, port: &str, _config: &LinkConfig) -> Result<Box<dyn SerialLink>, serialport::Error> {
            if self.refuse {
                return Err(serialport::Error::new(
                    serialport::ErrorKind::NoDevice,
                    format!("{} not found", port),
                ));
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedLink {
                steps: self.script.iter().cloned().collect(),
                pending: VecDeque::new(),
                reads: self.reads.clone(),
                written: self.written.clone(),
                fail_writes: self.fail_writes,
            }))
        }
    }
}
