// src/io/serial/utils.rs
//
// Serial line parameters and their mapping onto the serialport crate.

use serde::{Deserialize, Serialize};
use serialport::{DataBits, Parity as SpParity, SerialPortBuilder, StopBits};
use std::time::Duration;

// ============================================================================
// Types
// ============================================================================

/// Parity setting for serial port configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Line parameters for one connection.
/// serialport has one timeout for both directions, so the read timeout also
/// bounds writes.
#[derive(Clone, Debug, PartialEq)]
pub struct LinkConfig {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
    pub read_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            read_timeout: Duration::from_secs(2),
        }
    }
}

impl LinkConfig {
    /// Short `8N1`-style description for log lines
    pub fn line_format(&self) -> String {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        };
        format!("{}{}{}", self.data_bits, parity, self.stop_bits)
    }

    /// Builder for opening `port` with these parameters
    pub fn port_builder(&self, port: &str) -> SerialPortBuilder {
        serialport::new(port, self.baud_rate)
            .data_bits(to_serialport_data_bits(self.data_bits))
            .stop_bits(to_serialport_stop_bits(self.stop_bits))
            .parity(to_serialport_parity(&self.parity))
            .timeout(self.read_timeout)
    }
}

// ============================================================================
// Conversion Functions
// ============================================================================

/// Convert our Parity enum to serialport crate's Parity type
pub fn to_serialport_parity(p: &Parity) -> SpParity {
    match p {
        Parity::None => SpParity::None,
        Parity::Odd => SpParity::Odd,
        Parity::Even => SpParity::Even,
    }
}

/// Convert data bits count to serialport crate's DataBits type
pub fn to_serialport_data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

/// Convert stop bits count to serialport crate's StopBits type
pub fn to_serialport_stop_bits(bits: u8) -> StopBits {
    match bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_link_is_9600_8n1() {
        let config = LinkConfig::default();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.read_timeout, Duration::from_secs(2));
        assert_eq!(config.line_format(), "8N1");
    }

    #[test]
    fn test_port_builder_carries_parameters() {
        let config = LinkConfig {
            baud_rate: 115200,
            data_bits: 7,
            parity: Parity::Even,
            stop_bits: 2,
            read_timeout: Duration::from_millis(250),
        };
        let builder = config.port_builder("/dev/ttyUSB0");
        assert_eq!(config.line_format(), "7E2");
        // SerialPortBuilder exposes no getters; its Debug output carries the fields
        let debug = format!("{:?}", builder);
        assert!(debug.contains("/dev/ttyUSB0"));
        assert!(debug.contains("115200"));
    }

    #[test]
    fn test_to_serialport_parity() {
        assert!(matches!(to_serialport_parity(&Parity::None), SpParity::None));
        assert!(matches!(to_serialport_parity(&Parity::Odd), SpParity::Odd));
        assert!(matches!(to_serialport_parity(&Parity::Even), SpParity::Even));
    }

    #[test]
    fn test_to_serialport_data_bits() {
        assert!(matches!(to_serialport_data_bits(5), DataBits::Five));
        assert!(matches!(to_serialport_data_bits(7), DataBits::Seven));
        assert!(matches!(to_serialport_data_bits(9), DataBits::Eight)); // default
    }

    #[test]
    fn test_to_serialport_stop_bits() {
        assert!(matches!(to_serialport_stop_bits(2), StopBits::Two));
        assert!(matches!(to_serialport_stop_bits(0), StopBits::One)); // default
    }
}
