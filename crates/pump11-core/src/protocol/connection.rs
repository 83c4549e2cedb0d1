//! Channel management
//!
//! A [`Channel`] owns one serial link and runs command/reply cycles on it, one
//! at a time. All pumps daisy chained on the same cable talk through the same
//! channel; the address in each reply line tells them apart.

use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info};

use super::{
    classify::check_reply, parse_all, parse_line, Command, ProtocolError, Reply, SerialLink,
    SerialPortLink,
};
use crate::config::ConnectionSettings;

/// Exclusive access to one serial link
pub struct Channel {
    /// Port identity, e.g. "/dev/ttyUSB0"
    name: String,
    link: Mutex<Box<dyn SerialLink>>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").field("name", &self.name).finish()
    }
}

impl Channel {
    /// Wrap an already open link
    pub fn new(name: impl Into<String>, link: Box<dyn SerialLink>) -> Self {
        Self {
            name: name.into(),
            link: Mutex::new(link),
        }
    }

    /// Open the serial port described by `settings`
    pub fn open(settings: &ConnectionSettings) -> Result<Self, ProtocolError> {
        settings.validate()?;
        let link = SerialPortLink::open(settings)?;
        info!(
            port = %settings.port,
            baud_rate = settings.baud_rate,
            "opened serial channel"
        );
        Ok(Self::new(settings.port.clone(), Box::new(link)))
    }

    /// Port identity
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn SerialLink>> {
        // A caller that panicked mid-cycle may have left a reply unread;
        // every cycle clears the input first, so the link is still usable.
        self.link.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Send `command` and return the non-empty reply lines, trimmed.
    ///
    /// Reads exactly as many lines as the command produces. The first line is
    /// always dropped: the pump sometimes leaks prompt characters (e.g. `T*`)
    /// into what should be a blank line.
    pub fn write_and_read(&self, command: &Command) -> Result<Vec<String>, ProtocolError> {
        let bytes = command.compile()?;
        let mut link = self.lock();

        // No length prefix in this protocol: leftovers would shift every line
        link.clear_input()?;
        link.write_all(&bytes)?;
        debug!(port = %self.name, command = %command, "sent");

        let mut lines = Vec::with_capacity(command.template().reply_lines);
        for line_num in 0..command.lines_to_read() {
            let raw = link.read_line()?;
            debug!(port = %self.name, line = ?raw, "read");
            if line_num == 0 {
                continue;
            }
            let line = raw.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        drop(link);

        if lines.is_empty() {
            return Err(ProtocolError::NoResponse {
                address: command.address(),
            });
        }

        debug!(port = %self.name, reply = ?lines, "reply received");
        Ok(lines)
    }

    /// Send `command`, then parse and check the reply.
    ///
    /// Fails on foreign addresses, a stall anywhere in the reply, or a
    /// rejection marker in the last body.
    pub fn exchange(&self, command: &Command) -> Result<Reply, ProtocolError> {
        let lines = self.write_and_read(command)?;
        let reply = parse_all(&lines, command.address())?;
        check_reply(&reply, command)?;
        Ok(reply)
    }

    /// Find the address of the pump on this link from its unsolicited prompt.
    ///
    /// Only meaningful with a single pump on the cable; on a daisy chain the
    /// first pump answers.
    pub fn autodetect_address(&self) -> Result<u8, ProtocolError> {
        let mut link = self.lock();
        link.clear_input()?;
        link.write_all(b"\r\n")?;

        // Blank line, then the prompt
        let _ = link.read_line()?;
        let prompt = link.read_line()?;
        drop(link);

        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ProtocolError::Configuration(format!(
                "no pump answered on {} while autodetecting its address",
                self.name
            )));
        }

        let address = parse_line(prompt)?.address;
        debug!(port = %self.name, address, "address autodetected");
        Ok(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CommandCatalog, MockLink, MotionStatus};

    fn channel_with(link: &MockLink) -> Channel {
        Channel::new("mock", Box::new(link.clone()))
    }

    #[test]
    fn test_first_line_is_discarded() {
        let link = MockLink::new(|_| {
            vec![
                "00T*".to_string(),
                "00:11 ELITE I/W Single 3.0.4".to_string(),
                "00:".to_string(),
            ]
        });
        let channel = channel_with(&link);
        let cmd = Command::build(CommandCatalog::GET_VERSION, 0, "").unwrap();

        let lines = channel.write_and_read(&cmd).unwrap();
        assert_eq!(lines, vec!["00:11 ELITE I/W Single 3.0.4", "00:"]);
        assert_eq!(link.written(), vec!["00VER \r\n"]);
    }

    #[test]
    fn test_reads_only_expected_lines() {
        let link = MockLink::new(|_| {
            vec![
                String::new(),
                "00:".to_string(),
                "00:extra".to_string(),
            ]
        });
        let channel = channel_with(&link);
        let cmd = Command::build(CommandCatalog::STOP, 0, "").unwrap();
        assert_eq!(channel.write_and_read(&cmd).unwrap(), vec!["00:"]);
    }

    #[test]
    fn test_stale_input_is_cleared() {
        let link = MockLink::new(|_| vec![String::new(), "00:".to_string()]);
        link.push_input("00:leftover");
        let channel = channel_with(&link);
        let cmd = Command::build(CommandCatalog::EMPTY_MESSAGE, 0, "").unwrap();

        let reply = channel.exchange(&cmd).unwrap();
        assert_eq!(reply.status(), Some(MotionStatus::Idle));
        assert_eq!(link.clear_count(), 1);
    }

    #[test]
    fn test_no_response() {
        let link = MockLink::silent();
        let channel = channel_with(&link);
        let cmd = Command::build(CommandCatalog::GET_VERSION, 12, "").unwrap();
        assert!(matches!(
            channel.write_and_read(&cmd),
            Err(ProtocolError::NoResponse { address: 12 })
        ));
    }

    #[test]
    fn test_invalid_address_never_written() {
        let link = MockLink::silent();
        let channel = channel_with(&link);
        let cmd = Command::build(CommandCatalog::STOP, 99, "").unwrap();
        assert!(matches!(
            channel.write_and_read(&cmd),
            Err(ProtocolError::InvalidAddress(99))
        ));
        assert_eq!(link.write_count(), 0);
    }

    #[test]
    fn test_exchange_checks_address() {
        let link = MockLink::new(|_| vec![String::new(), "01:".to_string()]);
        let channel = channel_with(&link);
        let cmd = Command::build(CommandCatalog::STOP, 0, "").unwrap();
        assert!(matches!(
            channel.exchange(&cmd),
            Err(ProtocolError::AddressMismatch {
                expected: 0,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_write_failure_releases_channel() {
        let link = MockLink::new(|_| vec![String::new(), "00:".to_string()]);
        let channel = channel_with(&link);
        let cmd = Command::build(CommandCatalog::STOP, 0, "").unwrap();

        link.set_fail_on_write(true);
        assert!(channel.exchange(&cmd).is_err());
        link.set_fail_on_write(false);
        assert!(channel.exchange(&cmd).is_ok());
    }

    #[test]
    fn test_autodetect_address() {
        let link = MockLink::new(|_| vec![String::new(), "07:".to_string()]);
        let channel = channel_with(&link);
        assert_eq!(channel.autodetect_address().unwrap(), 7);
        assert_eq!(link.written(), vec!["\r\n"]);
    }

    #[test]
    fn test_autodetect_without_pump() {
        let channel = channel_with(&MockLink::silent());
        assert!(matches!(
            channel.autodetect_address(),
            Err(ProtocolError::Configuration(_))
        ));
    }
}
