// src/io/serial/ports.rs
//
// Serial port discovery.

use serde::Serialize;

/// Information about an available serial port
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SerialPortInfo {
    pub port_name: String,
    pub port_type: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

impl From<serialport::SerialPortInfo> for SerialPortInfo {
    fn from(p: serialport::SerialPortInfo) -> Self {
        let (port_type, manufacturer, product, serial_number, vid, pid) = match p.port_type {
            serialport::SerialPortType::UsbPort(info) => (
                "USB".to_string(),
                info.manufacturer,
                info.product,
                info.serial_number,
                Some(info.vid),
                Some(info.pid),
            ),
            serialport::SerialPortType::BluetoothPort => {
                ("Bluetooth".to_string(), None, None, None, None, None)
            }
            serialport::SerialPortType::PciPort => ("PCI".to_string(), None, None, None, None, None),
            serialport::SerialPortType::Unknown => {
                ("Unknown".to_string(), None, None, None, None, None)
            }
        };
        SerialPortInfo {
            port_name: p.port_name,
            port_type,
            manufacturer,
            product,
            serial_number,
            vid,
            pid,
        }
    }
}

/// List available serial ports. The list is a snapshot; ports come and go.
///
/// On macOS, filters out /dev/tty.* devices and only shows /dev/cu.* devices.
/// The tty (terminal) devices block on open waiting for carrier detect.
pub fn list_serial_ports() -> Result<Vec<SerialPortInfo>, String> {
    let ports =
        serialport::available_ports().map_err(|e| format!("Failed to enumerate ports: {}", e))?;

    Ok(ports
        .into_iter()
        .filter(|_p| {
            #[cfg(target_os = "macos")]
            {
                !_p.port_name.starts_with("/dev/tty.")
            }
            #[cfg(not(target_os = "macos"))]
            {
                true
            }
        })
        .map(SerialPortInfo::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usb_port_info_conversion() {
        let info = serialport::SerialPortInfo {
            port_name: "/dev/ttyACM0".to_string(),
            port_type: serialport::SerialPortType::UsbPort(serialport::UsbPortInfo {
                vid: 0x04b4,
                pid: 0xf232,
                serial_number: Some("0001".to_string()),
                manufacturer: Some("Cypress".to_string()),
                product: Some("KitProg".to_string()),
            }),
        };

        let converted = SerialPortInfo::from(info);
        assert_eq!(converted.port_type, "USB");
        assert_eq!(converted.vid, Some(0x04b4));
        assert_eq!(converted.manufacturer.as_deref(), Some("Cypress"));
    }

    #[test]
    fn test_bluetooth_port_info_conversion() {
        let info = serialport::SerialPortInfo {
            port_name: "/dev/rfcomm0".to_string(),
            port_type: serialport::SerialPortType::BluetoothPort,
        };

        let converted = SerialPortInfo::from(info);
        assert_eq!(converted.port_name, "/dev/rfcomm0");
        assert_eq!(converted.port_type, "Bluetooth");
        assert_eq!(converted.vid, None);
    }
}
