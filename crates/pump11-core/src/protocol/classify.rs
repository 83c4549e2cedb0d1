//! Reply error classification
//!
//! The pump does not use status codes: errors come back as free text in the
//! last reply body, and a stall shows up as a `*` prompt.

use super::{Command, ProtocolError, RejectionKind, Reply};

const MARKERS: [RejectionKind; 4] = [
    RejectionKind::InvalidCommand,
    RejectionKind::UnsupportedCommand,
    RejectionKind::InvalidArgument,
    RejectionKind::ArgumentOutOfRange,
];

/// Find the rejection marker in a reply body, if any
pub fn rejection_in(body: &str) -> Option<RejectionKind> {
    MARKERS.into_iter().find(|kind| body.contains(kind.marker()))
}

/// Turn a reply body into a rejection error for `command`, or `Ok(())`
pub fn classify(last_body: &str, command: &Command) -> Result<(), ProtocolError> {
    match rejection_in(last_body) {
        Some(kind) => Err(ProtocolError::DeviceRejection {
            kind,
            address: command.address(),
            command: command.to_string(),
            reply: last_body.to_string(),
        }),
        None => Ok(()),
    }
}

/// Check a parsed reply for a stall, then for rejection markers.
///
/// A stall wins over any body text: it needs someone at the pump display, so
/// reporting the rejection instead would hide the real problem.
pub fn check_reply(reply: &Reply, command: &Command) -> Result<(), ProtocolError> {
    if reply.is_stalled() {
        return Err(ProtocolError::Stalled {
            address: command.address(),
        });
    }
    classify(reply.last_body(), command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{parse_all, CommandCatalog, ErrorCategory};

    fn irate(address: u8) -> Command {
        Command::build(CommandCatalog::SET_INFUSE_RATE, address, "500 m/m").unwrap()
    }

    #[test]
    fn test_markers() {
        assert_eq!(rejection_in("Command error"), Some(RejectionKind::InvalidCommand));
        assert_eq!(
            rejection_in("Unknown command"),
            Some(RejectionKind::UnsupportedCommand)
        );
        assert_eq!(rejection_in("Argument error"), Some(RejectionKind::InvalidArgument));
        assert_eq!(rejection_in("Out of range"), Some(RejectionKind::ArgumentOutOfRange));
        assert_eq!(rejection_in("0.5 ml/min"), None);
    }

    #[test]
    fn test_out_of_range_in_last_body() {
        let reply = parse_all(&["00:0.5 ml/min", "00:Out of range"], 0).unwrap();
        let err = check_reply(&reply, &irate(0)).unwrap_err();
        assert_eq!(err.rejection_kind(), Some(RejectionKind::ArgumentOutOfRange));
        assert_eq!(err.category(), ErrorCategory::DeviceRejection);
    }

    #[test]
    fn test_only_last_body_is_classified() {
        let reply = parse_all(&["00:Argument error", "00:"], 0).unwrap();
        assert!(check_reply(&reply, &irate(0)).is_ok());
    }

    #[test]
    fn test_stall_before_body() {
        let reply = parse_all(&["04*", "04:Command error"], 4).unwrap();
        let err = check_reply(&reply, &irate(4)).unwrap_err();
        assert!(matches!(err, ProtocolError::Stalled { address: 4 }));
    }

    #[test]
    fn test_clean_reply() {
        let reply = parse_all(&["01:"], 1).unwrap();
        assert!(check_reply(&reply, &irate(1)).is_ok());
    }
}
