//! Pump identification from the `metrics` report

use serde::{Deserialize, Serialize};

use crate::protocol::ProtocolError;

/// What the pump says about itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PumpInfo {
    /// e.g. "Pump 11"
    pub pump_type: String,
    /// e.g. "11 ELITE I/W Single"
    pub pump_description: String,
    /// Pump cannot withdraw
    pub infuse_only: bool,
}

impl PumpInfo {
    /// Parse the body lines of a `metrics` reply.
    ///
    /// Lines are "<label><padding><value>"; only the pump type, its
    /// description and the direction line are used.
    pub fn from_metrics<S: AsRef<str>>(lines: &[S]) -> Result<Self, ProtocolError> {
        let mut pump_type = None;
        let mut pump_description = None;
        let mut infuse_only = None;

        for line in lines.iter().map(|l| l.as_ref()) {
            if let Some(rest) = line.strip_prefix("Pump type string") {
                pump_description = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("Pump type") {
                pump_type = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("Direction") {
                infuse_only = Some(!rest.to_ascii_lowercase().contains("withdraw"));
            }
        }

        match (pump_type, pump_description, infuse_only) {
            (Some(pump_type), Some(pump_description), Some(infuse_only)) => Ok(Self {
                pump_type,
                pump_description,
                infuse_only,
            }),
            _ => Err(ProtocolError::MalformedReply(format!(
                "metrics report without pump type or direction ({} lines)",
                lines.len()
            ))),
        }
    }
}
