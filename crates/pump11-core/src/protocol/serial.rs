//! Serial port handling
//!
//! [`SerialLink`] is the line-oriented view of a serial connection the
//! protocol needs. [`SerialPortLink`] implements it on top of the `serialport`
//! crate; [`super::MockLink`] implements it for tests.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use super::ProtocolError;
use crate::config::ConnectionSettings;

/// Blocking, line-oriented access to a serial connection
pub trait SerialLink: Send {
    /// Drop any input received but not yet read
    fn clear_input(&mut self) -> Result<(), ProtocolError>;

    /// Write all bytes to the line
    fn write_all(&mut self, data: &[u8]) -> Result<(), ProtocolError>;

    /// Read up to and including the next `\n`.
    ///
    /// Returns whatever arrived before the read timeout, which may be an
    /// empty string when the device is silent.
    fn read_line(&mut self) -> Result<String, ProtocolError>;
}

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,
    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,
    /// USB product ID (if USB device)
    pub pid: Option<u16>,
    /// Product name (if available)
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, product) = match info.port_type {
            SerialPortType::UsbPort(usb) => (Some(usb.vid), Some(usb.pid), usb.product),
            _ => (None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            product,
        }
    }
}

/// Ports an Elite 11 shows up as when plugged in over USB
const PUMP_PORT_STEMS: [&str; 3] = ["ttyACM", "cu.usbmodem", "tty.usbmodem"];
/// USB-serial adapters and Windows ports, used for RS-232 daisy chains
const ADAPTER_PORT_STEMS: [&str; 2] = ["ttyUSB", "COM"];

/// Sort key for port names: likely pump ports first, then by stem and
/// numeric index, so COM10 follows COM9
fn port_sort_key(name: &str) -> (u8, String, usize) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    let stem = basename.trim_end_matches(|c: char| c.is_ascii_digit());
    let index = basename[stem.len()..].parse::<usize>().unwrap_or(0);
    let rank = if PUMP_PORT_STEMS.contains(&stem) {
        0
    } else if ADAPTER_PORT_STEMS.contains(&stem) {
        1
    } else {
        2
    };
    (rank, stem.to_string(), index)
}

/// List available serial ports in a stable order
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(PortInfo::from)
        .collect();
    ports.sort_by_key(|p| port_sort_key(&p.name));
    ports
}

/// Open and configure the port described by `settings`
pub fn open_port(settings: &ConnectionSettings) -> Result<Box<dyn SerialPort>, ProtocolError> {
    let mut port = serialport::new(&settings.port, settings.baud_rate)
        .timeout(Duration::from_millis(settings.timeout_ms))
        .open()
        .map_err(|e| match e.kind() {
            serialport::ErrorKind::NoDevice => ProtocolError::PortNotFound(settings.port.clone()),
            _ => ProtocolError::SerialError(format!("{}: {}", settings.port, e)),
        })?;
    configure_port(port.as_mut())?;
    Ok(port)
}

/// 8N1, no flow control
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.set_data_bits(serialport::DataBits::Eight)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_parity(serialport::Parity::None)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_stop_bits(serialport::StopBits::One)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_flow_control(serialport::FlowControl::None)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    Ok(())
}

/// [`SerialLink`] over a real serial port
pub struct SerialPortLink {
    port: Box<dyn SerialPort>,
}

impl SerialPortLink {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }

    /// Open the port described by `settings`
    pub fn open(settings: &ConnectionSettings) -> Result<Self, ProtocolError> {
        Ok(Self::new(open_port(settings)?))
    }
}

impl SerialLink for SerialPortLink {
    fn clear_input(&mut self) -> Result<(), ProtocolError> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| ProtocolError::SerialError(e.to_string()))
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<String, ProtocolError> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];

        loop {
            match self.port.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => {
                    line.push(byte[0]);
                    if byte[0] == b'\n' {
                        break;
                    }
                }
                // Silence on the line ends the read; the caller decides what an empty line means
                Err(ref e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                    break
                }
                Err(e) => return Err(ProtocolError::SerialError(e.to_string())),
            }
        }

        Ok(String::from_utf8_lossy(&line).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // Only checks that enumeration does not panic
        let _ = list_ports();
    }

    #[test]
    fn test_port_sorting() {
        let mut names = vec![
            "/dev/ttyUSB1",
            "COM10",
            "/dev/ttyACM1",
            "/dev/ttyS0",
            "COM9",
            "/dev/cu.usbmodem14201",
            "/dev/ttyACM10",
            "/dev/ttyACM0",
        ];
        names.sort_by_key(|n| port_sort_key(n));
        assert_eq!(
            names,
            vec![
                "/dev/cu.usbmodem14201",
                "/dev/ttyACM0",
                "/dev/ttyACM1",
                "/dev/ttyACM10",
                "COM9",
                "COM10",
                "/dev/ttyUSB1",
                "/dev/ttyS0",
            ]
        );
    }
}
