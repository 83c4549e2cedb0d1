//! Serial Protocol Communication
//!
//! Implements Protocol11, the half-duplex ASCII protocol of Elite 11 syringe
//! pumps.
//!
//! Every command is one line, `<2-digit address><code> <argument>\r\n`. Every
//! reply is a blank line, the command's body lines and a trailing prompt, each
//! prefixed with the pump address and a motion status character.

pub mod classify;
pub mod command_builder;
pub mod commands;
mod connection;
mod error;
mod mock;
mod registry;
mod reply;
pub mod serial;

pub use classify::{check_reply, classify, rejection_in};
pub use command_builder::{Command, CommandBuilder};
pub use commands::{CommandCatalog, CommandTemplate};
pub use connection::Channel;
pub use error::{ErrorCategory, ProtocolError, RejectionKind};
pub use mock::MockLink;
pub use registry::ChannelRegistry;
pub use reply::{parse_all, parse_line, MotionStatus, ParsedReplyLine, Reply};
pub use serial::{configure_port, list_ports, open_port, PortInfo, SerialLink, SerialPortLink};

/// Default baud rate for Elite 11 pumps
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default read timeout for one reply line in milliseconds.
/// Short on purpose: a silent line is how a missing pump shows up.
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Addresses are two decimal digits, `00` to `98`
pub const MAX_ADDRESS: u8 = 99;

/// Interval between status queries while waiting for motion to stop
pub const STATUS_POLL_INTERVAL_MS: u64 = 50;
