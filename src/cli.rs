// src/cli.rs
//
// Command-line shell around the controller.
// `capture` runs one unattended session; `console` mirrors the controls of a
// capture window (port choice, connect/disconnect, start/stop, send, quit).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::acquisition::{SessionConfig, SessionOutcome};
use crate::controller::Controller;
use crate::error::ControlResult;
use crate::io::serial::{list_serial_ports, SystemOpener};
use crate::io::{event_channel, CaptureEvent};
use crate::settings::{self, AppSettings};

#[derive(Debug, Parser)]
#[command(
    name = "AccelCap",
    version,
    about = "Capture dual accelerometer samples from a serial or Bluetooth link"
)]
pub struct Cli {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long, global = true, value_name = "FILE")]
    pub settings: Option<PathBuf>,

    /// Print notifications as JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List available serial ports
    Ports,
    /// Connect, sample for one capture window and save the samples
    Capture(CaptureArgs),
    /// Show the settings file, or reset it to defaults
    Settings {
        #[arg(long)]
        reset: bool,
    },
    /// Interactive console (default)
    Console,
}

#[derive(Debug, Args)]
pub struct CaptureArgs {
    /// Port to open (defaults to `default_port` from the settings)
    #[arg(short, long)]
    pub port: Option<String>,

    /// Capture window in seconds
    #[arg(short, long, value_name = "SECS")]
    pub duration: Option<u64>,

    /// Directory for the CSV file
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    #[arg(short, long)]
    pub baud: Option<u32>,

    /// Character written to the device after connecting, before sampling
    #[arg(long, value_name = "CHAR")]
    pub send: Option<char>,
}

/// Run the parsed command line to completion.
pub async fn execute(cli: Cli) -> Result<(), String> {
    let path = match &cli.settings {
        Some(path) => path.clone(),
        None => settings::settings_path()?,
    };
    let app_settings = settings::load_settings(&path)?;

    if let Some(log_dir) = &app_settings.log_dir {
        if let Err(e) = crate::logging::init_file_logging(Path::new(log_dir)) {
            tlog!("[main] Failed to start file logging: {}", e);
        }
    }

    let result = match cli.command.unwrap_or(Command::Console) {
        Command::Ports => print_ports(cli.json),
        Command::Capture(args) => capture(args, app_settings, cli.json).await,
        Command::Settings { reset } => show_settings(&path, app_settings, reset, cli.json),
        Command::Console => console(app_settings, cli.json).await,
    };

    crate::logging::stop_file_logging();
    result
}

// ============================================================================
// Commands
// ============================================================================

fn print_ports(json: bool) -> Result<(), String> {
    let ports = list_serial_ports()?;
    if json {
        let text = serde_json::to_string(&ports).map_err(|e| e.to_string())?;
        println!("{}", text);
        return Ok(());
    }

    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in &ports {
        let detail = match (&port.manufacturer, &port.product) {
            (Some(m), Some(p)) => format!(" ({} {})", m, p),
            (Some(m), None) => format!(" ({})", m),
            (None, Some(p)) => format!(" ({})", p),
            (None, None) => String::new(),
        };
        println!("{}  [{}]{}", port.port_name, port.port_type, detail);
    }
    Ok(())
}

fn show_settings(path: &Path, current: AppSettings, reset: bool, json: bool) -> Result<(), String> {
    let shown = if reset {
        let defaults = AppSettings::default();
        settings::save_settings(path, &defaults)?;
        tlog!("[settings] Reset settings at {}", path.display());
        defaults
    } else {
        current
    };

    let text = serde_json::to_string_pretty(&shown)
        .map_err(|e| format!("Failed to serialize settings: {}", e))?;
    if !json {
        println!("# {}", path.display());
    }
    println!("{}", text);
    Ok(())
}

async fn capture(args: CaptureArgs, mut app_settings: AppSettings, json: bool) -> Result<(), String> {
    if let Some(baud) = args.baud {
        app_settings.baud_rate = baud;
    }
    if let Some(secs) = args.duration {
        app_settings.session_duration_secs = secs;
    }
    if let Some(dir) = &args.output_dir {
        app_settings.output_dir = dir.to_string_lossy().into_owned();
    }
    let port = args
        .port
        .or_else(|| app_settings.default_port.clone())
        .ok_or_else(|| "No port given; pass --port or set default_port".to_string())?;
    let config = session_config(&app_settings)?;

    let (events, rx) = event_channel();
    let printer = spawn_event_printer(rx, json);
    let mut ctl = Controller::new(Arc::new(SystemOpener), app_settings.link_config(), events);

    let result = run_capture(&mut ctl, &port, args.send, config).await;
    if let Some(outcome) = ctl.shutdown().await {
        report_outcome(Ok(outcome));
    }
    drop(ctl);
    let _ = printer.await;
    result
}

async fn run_capture(
    ctl: &mut Controller,
    port: &str,
    start_char: Option<char>,
    config: SessionConfig,
) -> Result<(), String> {
    ctl.connect(port).await.map_err(|e| e.to_string())?;

    if let Some(ch) = start_char {
        // Best effort, same as a write from the console
        if let Err(e) = ctl.send(ch).await {
            tlog!("[capture] {}", e);
        }
    }

    ctl.start_sampling(config).await.map_err(|e| e.to_string())?;

    let finished = tokio::select! {
        result = ctl.wait_sampling() => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let result = match finished {
        Some(result) => result,
        None => {
            tlog!("[capture] Interrupted, stopping sampling");
            ctl.stop_sampling().await
        }
    };

    let mut outcome = result.map_err(|e| e.to_string())?;
    persist_fallback(&mut outcome)
}

/// Retry a failed save into the temp directory so the samples are not lost.
fn persist_fallback(outcome: &mut SessionOutcome) -> Result<(), String> {
    if outcome.saved.is_ok() {
        return Ok(());
    }
    persist_fallback_in(outcome, &std::env::temp_dir())
}

fn persist_fallback_in(outcome: &mut SessionOutcome, fallback: &Path) -> Result<(), String> {
    let count = outcome.samples.len();
    match outcome.retry_save(fallback) {
        Ok(path) => {
            tlog!("[capture] Samples saved to fallback location {}", path.display());
            Ok(())
        }
        Err(e) => Err(format!("Failed to save {} samples: {}", count, e)),
    }
}

fn session_config(app_settings: &AppSettings) -> Result<SessionConfig, String> {
    Ok(SessionConfig {
        duration: app_settings.session_duration(),
        format: app_settings.frame_format()?,
        output_dir: PathBuf::from(&app_settings.output_dir),
    })
}

// ============================================================================
// Interactive console
// ============================================================================

const CONSOLE_HELP: &str = "\
Commands:
  ports             list serial ports
  port <name>       choose the port to connect to
  connect [name]    open the chosen port
  disconnect        stop sampling and close the port
  start [secs]      start sampling
  stop              stop sampling and save
  send <char>       write one character to the device
  status            show connection and sampling state
  help              show this help
  quit              exit";

async fn console(app_settings: AppSettings, json: bool) -> Result<(), String> {
    let (events, rx) = event_channel();
    let printer = spawn_event_printer(rx, json);
    let mut ctl = Controller::new(Arc::new(SystemOpener), app_settings.link_config(), events);
    let mut chosen = app_settings.default_port.clone();

    println!("{}", CONSOLE_HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => break,
        };
        let line = match line {
            Ok(Some(line)) => line,
            // stdin closed
            Ok(None) => break,
            Err(e) => {
                tlog!("[console] Failed to read input: {}", e);
                break;
            }
        };

        if let Some(result) = ctl.reap_finished().await {
            report_outcome(result);
        }

        let mut words = line.split_whitespace();
        let Some(cmd) = words.next() else {
            continue;
        };
        let arg = words.next();

        match cmd {
            "ports" => {
                if let Err(e) = print_ports(json) {
                    println!("{}", e);
                }
            }
            "port" => match arg {
                Some(name) => chosen = Some(name.to_string()),
                None => println!("Usage: port <name>"),
            },
            "connect" => {
                if let Some(name) = arg {
                    chosen = Some(name.to_string());
                }
                match &chosen {
                    Some(port) => {
                        if let Err(e) = ctl.connect(port).await {
                            println!("{}", e);
                        }
                    }
                    None => println!("No port chosen; use `port <name>` first"),
                }
            }
            "disconnect" => {
                if let Some(outcome) = ctl.disconnect().await {
                    report_outcome(Ok(outcome));
                }
            }
            "start" => {
                let mut session_settings = app_settings.clone();
                if let Some(secs) = arg {
                    match secs.parse() {
                        Ok(secs) => session_settings.session_duration_secs = secs,
                        Err(_) => {
                            println!("Invalid duration {:?}", secs);
                            continue;
                        }
                    }
                }
                let started = match session_config(&session_settings) {
                    Ok(config) => ctl.start_sampling(config).await.map_err(|e| e.to_string()),
                    Err(e) => Err(e),
                };
                if let Err(e) = started {
                    println!("{}", e);
                }
            }
            "stop" => report_outcome(ctl.stop_sampling().await),
            "send" => match arg.and_then(|a| a.chars().next()) {
                Some(ch) => {
                    if let Err(e) = ctl.send(ch).await {
                        println!("{}", e);
                    }
                }
                None => println!("Usage: send <char>"),
            },
            "status" => println!(
                "{:?} port={} sampling={}",
                ctl.state(),
                ctl.port().unwrap_or("-"),
                ctl.is_sampling()
            ),
            "help" => println!("{}", CONSOLE_HELP),
            "quit" | "exit" => break,
            other => println!("Unknown command {:?}; try `help`", other),
        }
    }

    if let Some(outcome) = ctl.shutdown().await {
        report_outcome(Ok(outcome));
    }
    drop(ctl);
    let _ = printer.await;
    Ok(())
}

fn report_outcome(result: ControlResult<SessionOutcome>) {
    match result {
        Ok(mut outcome) => {
            if let Err(e) = persist_fallback(&mut outcome) {
                println!("{}", e);
            }
        }
        Err(e) => println!("{}", e),
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// Print controller notifications until every sender is gone
fn spawn_event_printer(mut rx: mpsc::UnboundedReceiver<CaptureEvent>, json: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if json {
                match serde_json::to_string(&event) {
                    Ok(text) => println!("{}", text),
                    Err(e) => tlog!("[console] Failed to serialize event: {}", e),
                }
            } else {
                println!("{}", describe_event(&event));
            }
        }
    })
}

fn describe_event(event: &CaptureEvent) -> String {
    match event {
        CaptureEvent::Status { port, success: true } => format!("Connected to {}", port),
        CaptureEvent::Status { port, success: false } => format!("Could not connect to {}", port),
        CaptureEvent::PortClosed { port } => format!("Port {} closed", port),
        CaptureEvent::SamplingStarted {
            port,
            duration_secs,
        } => format!("Sampling on {} for {}", port, format_duration(*duration_secs)),
        CaptureEvent::Progress { records } => format!("{} records", records),
        CaptureEvent::SamplingFinished(summary) => {
            let mut text = format!(
                "Sampling {}: {} records, {} malformed frames",
                summary.reason, summary.records, summary.malformed_frames
            );
            if let Some(path) = &summary.saved_to {
                text.push_str(&format!(", saved to {}", path.display()));
            }
            if let Some(error) = &summary.error {
                text.push_str(&format!(" ({})", error));
            }
            text
        }
    }
}

fn format_duration(secs: u64) -> String {
    let d = Duration::from_secs(secs);
    let (m, s) = (d.as_secs() / 60, d.as_secs() % 60);
    if m == 0 {
        format!("{}s", s)
    } else if s == 0 {
        format!("{} min", m)
    } else {
        format!("{} min {}s", m, s)
    }
}
