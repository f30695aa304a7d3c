// src/io/serial/mod.rs
//
// Serial port driver for the accelerometer link.
//
// Features:
// - Single-connection lifecycle (open / close / read / write)
// - Sentinel framing of the accelerometer stream
// - Port discovery
// - Link abstraction so byte streams can be scripted without hardware

pub mod connection;
pub mod framer;
pub mod link;
pub mod ports;
pub(crate) mod utils;

pub use connection::{ConnectionManager, ConnectionOpened, ConnectionState};
pub use framer::{FrameFormat, MalformedReason, ParsedFrame, SentinelFramer};
pub use link::{LinkOpener, SerialLink, SystemOpener};
pub use ports::{list_serial_ports, SerialPortInfo};
pub use utils::{LinkConfig, Parity};
