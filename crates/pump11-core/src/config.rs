//! Pump configuration
//!
//! Pumps are described in JSON, one object per pump. Pumps sharing a `port`
//! share one serial channel (daisy chain):
//!
//! ```json
//! {
//!   "connection": { "port": "/dev/ttyUSB0" },
//!   "address": 1,
//!   "name": "acid feed",
//!   "diameter": "14.43 mm",
//!   "syringe_volume": "10 ml"
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::protocol::{ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS, MAX_ADDRESS};

/// Serial connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Serial port name, also the identity pumps on a daisy chain share
    pub port: String,

    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Read timeout for one reply line in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl ConnectionSettings {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.port.trim().is_empty() {
            return Err(ProtocolError::Configuration(
                "serial port name is empty".to_string(),
            ));
        }
        if self.baud_rate == 0 {
            return Err(ProtocolError::Configuration(format!(
                "baud rate for {} must be positive",
                self.port
            )));
        }
        if self.timeout_ms == 0 {
            return Err(ProtocolError::Configuration(format!(
                "read timeout for {} must be positive",
                self.port
            )));
        }
        Ok(())
    }
}

/// Configuration of one pump
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpConfig {
    /// Serial connection the pump is on
    pub connection: ConnectionSettings,

    /// Pump address; autodetected from the prompt when absent
    #[serde(default)]
    pub address: Option<u8>,

    /// Display name; defaults to "Pump <port>:<address>"
    #[serde(default)]
    pub name: Option<String>,

    /// Syringe inner diameter with unit, e.g. "14.43 mm"
    pub diameter: Option<String>,

    /// Syringe volume with unit, e.g. "10 ml"
    pub syringe_volume: Option<String>,
}

impl PumpConfig {
    pub fn new(
        connection: ConnectionSettings,
        diameter: impl Into<String>,
        syringe_volume: impl Into<String>,
    ) -> Self {
        Self {
            connection,
            address: None,
            name: None,
            diameter: Some(diameter.into()),
            syringe_volume: Some(syringe_volume.into()),
        }
    }

    pub fn with_address(mut self, address: u8) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Parse and validate a JSON pump description
    pub fn from_json_str(json: &str) -> Result<Self, ProtocolError> {
        let config: PumpConfig = serde_json::from_str(json)
            .map_err(|e| ProtocolError::Configuration(format!("invalid pump config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON pump description from disk
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ProtocolError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    /// Check everything that can be checked without talking to the pump.
    ///
    /// Diameter and syringe volume have no defaults: a wrong syringe size
    /// silently doses the wrong volume.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        self.connection.validate()?;

        if let Some(address) = self.address {
            if address >= MAX_ADDRESS {
                return Err(ProtocolError::InvalidAddress(address));
            }
        }
        if self.diameter.as_deref().map_or(true, |d| d.trim().is_empty()) {
            return Err(ProtocolError::Configuration(
                "the syringe diameter must be given explicitly".to_string(),
            ));
        }
        if self
            .syringe_volume
            .as_deref()
            .map_or(true, |v| v.trim().is_empty())
        {
            return Err(ProtocolError::Configuration(
                "the syringe volume must be given explicitly".to_string(),
            ));
        }
        Ok(())
    }

    /// Display name for logs
    pub fn display_name(&self, address: u8) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("Pump {}:{}", self.connection.port, address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_json() {
        let config = PumpConfig::from_json_str(
            r#"{
                "connection": { "port": "COM4" },
                "diameter": "14.43 mm",
                "syringe_volume": "10 ml"
            }"#,
        )
        .unwrap();
        assert_eq!(config.connection.baud_rate, 115200);
        assert_eq!(config.connection.timeout_ms, 100);
        assert_eq!(config.address, None);
        assert_eq!(config.display_name(0), "Pump COM4:0");
    }

    #[test]
    fn test_missing_diameter() {
        let err = PumpConfig::from_json_str(
            r#"{ "connection": { "port": "COM4" }, "syringe_volume": "10 ml" }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("diameter"));
    }

    #[test]
    fn test_address_out_of_range() {
        let config = PumpConfig::new(ConnectionSettings::new("COM4"), "10 mm", "5 ml")
            .with_address(99);
        assert!(matches!(
            config.validate(),
            Err(ProtocolError::InvalidAddress(99))
        ));
    }

    #[test]
    fn test_bad_connection() {
        let mut settings = ConnectionSettings::new("");
        assert!(settings.validate().is_err());
        settings.port = "/dev/ttyUSB0".to_string();
        settings.baud_rate = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_named_pump() {
        let config = PumpConfig::new(ConnectionSettings::new("COM4"), "10 mm", "5 ml")
            .with_name("buffer");
        assert_eq!(config.display_name(2), "buffer");
    }
}
