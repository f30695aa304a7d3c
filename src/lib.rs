// src/lib.rs
//
// AccelCap: capture dual accelerometer samples streamed over a serial or
// Bluetooth (RFCOMM) link and save them as CSV.

#[macro_use]
pub mod logging;

pub mod acquisition;
pub mod cli;
pub mod controller;
pub mod error;
pub mod io;
pub mod samples;
pub mod settings;

use std::process::ExitCode;

use clap::Parser;

pub use acquisition::{AcquisitionSession, SessionConfig, SessionEnd, SessionOutcome};
pub use controller::Controller;
pub use io::serial::{FrameFormat, LinkConfig, LinkOpener, SerialLink, SystemOpener};
pub use io::{event_channel, CaptureEvent, ConnectionManager, ConnectionState, EventSink};
pub use samples::{load_csv, Record, SampleSet};

pub fn run() -> ExitCode {
    let cli = cli::Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tlog!("[main] Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(cli::execute(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tlog!("[main] {}", e);
            ExitCode::FAILURE
        }
    }
}
