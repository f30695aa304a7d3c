// src/settings.rs
//
// Persisted application settings (JSON in the platform config directory).
// Missing fields fall back to their defaults so older files keep loading.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::io::serial::{FrameFormat, LinkConfig, Parity};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppSettings {
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// Directory for log files; file logging is off when unset
    #[serde(default)]
    pub log_dir: Option<String>,
    /// Port to preselect in the console and `capture`
    #[serde(default)]
    pub default_port: Option<String>,

    // Serial link
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,

    // Acquisition
    #[serde(default = "default_session_duration_secs")]
    pub session_duration_secs: u64,
    #[serde(default = "default_terminator")]
    pub terminator: char,
    #[serde(default = "default_prefix_len")]
    pub prefix_len: usize,
    #[serde(default = "default_separator")]
    pub separator: char,
}

fn default_output_dir() -> String {
    dirs::document_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("AccelCap")
        .to_string_lossy()
        .to_string()
}
fn default_baud_rate() -> u32 {
    9600
}
fn default_read_timeout_ms() -> u64 {
    2000
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_session_duration_secs() -> u64 {
    18 * 60
}
fn default_terminator() -> char {
    'E'
}
fn default_prefix_len() -> usize {
    2
}
fn default_separator() -> char {
    ','
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            log_dir: None,
            default_port: None,
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
            data_bits: default_data_bits(),
            parity: Parity::default(),
            stop_bits: default_stop_bits(),
            session_duration_secs: default_session_duration_secs(),
            terminator: default_terminator(),
            prefix_len: default_prefix_len(),
            separator: default_separator(),
        }
    }
}

impl AppSettings {
    /// Serial parameters used when opening a port
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            parity: self.parity.clone(),
            stop_bits: self.stop_bits,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }

    /// Framing parameters for the acquisition parser.
    /// Terminator and separator must be single-byte (ASCII) characters.
    pub fn frame_format(&self) -> Result<FrameFormat, String> {
        let terminator = ascii_byte(self.terminator, "terminator")?;
        let separator = ascii_byte(self.separator, "separator")?;
        if terminator == separator {
            return Err("terminator and separator must differ".to_string());
        }
        Ok(FrameFormat {
            terminator,
            separator,
            prefix_len: self.prefix_len,
            ..FrameFormat::default()
        })
    }

    pub fn session_duration(&self) -> Duration {
        Duration::from_secs(self.session_duration_secs)
    }
}

fn ascii_byte(c: char, name: &str) -> Result<u8, String> {
    if c.is_ascii() {
        Ok(c as u8)
    } else {
        Err(format!("{} {:?} is not an ASCII character", name, c))
    }
}

/// Default location of the settings file, creating its directory if needed.
pub fn settings_path() -> Result<PathBuf, String> {
    let app_dir = dirs::config_dir()
        .ok_or_else(|| "Failed to get config dir".to_string())?
        .join("AccelCap");

    std::fs::create_dir_all(&app_dir)
        .map_err(|e| format!("Failed to create app config dir: {}", e))?;

    Ok(app_dir.join("settings.json"))
}

/// Load settings from `path`. On first run, writes the defaults there and
/// creates the output directory.
pub fn load_settings(path: &Path) -> Result<AppSettings, String> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read settings: {}", e))?;

        serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse settings: {}", e))
    } else {
        let settings = AppSettings::default();
        initialize_directories(&settings)?;
        save_settings(path, &settings)?;
        tlog!("[settings] Created default settings at {}", path.display());
        Ok(settings)
    }
}

fn initialize_directories(settings: &AppSettings) -> Result<(), String> {
    std::fs::create_dir_all(&settings.output_dir)
        .map_err(|e| format!("Failed to create output directory: {}", e))?;
    Ok(())
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create settings directory: {}", e))?;
    }

    let content = serde_json::to_string_pretty(settings)
        .map_err(|e| format!("Failed to serialize settings: {}", e))?;

    std::fs::write(path, content).map_err(|e| format!("Failed to write settings: {}", e))
}
