//! Protocol errors

use thiserror::Error;

use crate::units::UnitError;

/// Kind of rejection reported by the pump in a reply body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// "Command error"
    InvalidCommand,
    /// "Unknown command", usually a withdraw command sent to an infuse-only pump
    UnsupportedCommand,
    /// "Argument error"
    InvalidArgument,
    /// "Out of range"
    ArgumentOutOfRange,
}

impl RejectionKind {
    /// Marker text the pump puts in the reply body
    pub fn marker(&self) -> &'static str {
        match self {
            RejectionKind::InvalidCommand => "Command error",
            RejectionKind::UnsupportedCommand => "Unknown command",
            RejectionKind::InvalidArgument => "Argument error",
            RejectionKind::ArgumentOutOfRange => "Out of range",
        }
    }
}

/// Coarse failure class used by callers to decide what to do with an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad connection parameters or invalid address
    Configuration,
    /// Write/read failure or no response
    Transport,
    /// Address mismatch, malformed line, unknown status character
    ProtocolIntegrity,
    /// The pump refused the command or its argument
    DeviceRejection,
    /// The pump is stalled and needs operator acknowledgement
    Stalled,
    /// The operation is not supported by this pump
    Capability,
}

/// Errors that can occur while talking to a Protocol11 pump
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Invalid pump address {0}: must be in 0..99")]
    InvalidAddress(u8),

    #[error("Argument mismatch for command '{command}' (requires argument: {requires_argument})")]
    ArgumentMismatch {
        command: String,
        requires_argument: bool,
    },

    #[error("Pump session is not initialized")]
    NotInitialized,

    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("No response from pump at address {address}, check the pump address")]
    NoResponse { address: u8 },

    #[error("Serial channel '{0}' is no longer available")]
    ChannelClosed(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Malformed reply line: {0:?}")]
    MalformedReply(String),

    #[error("Unknown status character {0:?} in reply prompt")]
    UnknownStatus(char),

    #[error("Reply from address {actual} to a command for address {expected}")]
    AddressMismatch { expected: u8, actual: u8 },

    #[error("Pump {address} rejected '{command}' ({kind:?}): {reply}")]
    DeviceRejection {
        kind: RejectionKind,
        address: u8,
        command: String,
        reply: String,
    },

    #[error("Pump {address} stalled! Acknowledge on the pump display to clear the error")]
    Stalled { address: u8 },

    #[error("Unsupported by this pump: {0}")]
    Capability(String),

    #[error("Unit error: {0}")]
    Unit(#[from] UnitError),
}

impl ProtocolError {
    /// Category of this error in the failure taxonomy
    pub fn category(&self) -> ErrorCategory {
        match self {
            ProtocolError::Configuration(_)
            | ProtocolError::InvalidAddress(_)
            | ProtocolError::ArgumentMismatch { .. }
            | ProtocolError::NotInitialized
            | ProtocolError::PortNotFound(_)
            | ProtocolError::Unit(_) => ErrorCategory::Configuration,
            ProtocolError::SerialError(_)
            | ProtocolError::NoResponse { .. }
            | ProtocolError::ChannelClosed(_)
            | ProtocolError::IoError(_) => ErrorCategory::Transport,
            ProtocolError::MalformedReply(_)
            | ProtocolError::UnknownStatus(_)
            | ProtocolError::AddressMismatch { .. } => ErrorCategory::ProtocolIntegrity,
            ProtocolError::DeviceRejection { .. } => ErrorCategory::DeviceRejection,
            ProtocolError::Stalled { .. } => ErrorCategory::Stalled,
            ProtocolError::Capability(_) => ErrorCategory::Capability,
        }
    }

    /// Whether the session can keep being used after this error.
    ///
    /// Rejections and capability errors only refuse one request; everything
    /// else leaves the session unusable until someone intervenes.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self.category(),
            ErrorCategory::DeviceRejection | ErrorCategory::Capability
        )
    }

    /// Rejection kind, if this is a device rejection
    pub fn rejection_kind(&self) -> Option<RejectionKind> {
        match self {
            ProtocolError::DeviceRejection { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
