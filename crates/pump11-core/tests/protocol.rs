use pretty_assertions::assert_eq;
use pump11_core::protocol::{
    parse_all, parse_line, Channel, Command, CommandCatalog, ErrorCategory, MockLink,
    MotionStatus, ProtocolError, RejectionKind,
};

fn channel_replying(lines: &'static [&'static str]) -> (Channel, MockLink) {
    let link = MockLink::new(move |_| lines.iter().map(|l| l.to_string()).collect());
    (Channel::new("mock", Box::new(link.clone())), link)
}

#[test]
fn test_compile_frames_command() {
    let cmd = Command::build(CommandCatalog::SET_INFUSE_RATE, 4, "0.5 m/m").unwrap();
    let bytes = cmd.compile().unwrap();
    assert_eq!(bytes, b"04irate 0.5 m/m\r\n".to_vec());
    assert!(bytes.ends_with(b"\r\n"));
}

#[test]
fn test_argument_mismatch_never_reaches_wire() {
    assert!(matches!(
        Command::build(CommandCatalog::STOP, 0, "now"),
        Err(ProtocolError::ArgumentMismatch { .. })
    ));
    assert!(matches!(
        Command::build(CommandCatalog::SET_DIAMETER, 0, ""),
        Err(ProtocolError::ArgumentMismatch { .. })
    ));
}

#[test]
fn test_address_out_of_range() {
    for address in [99u8, 100, 255] {
        let cmd = Command::build(CommandCatalog::GET_VERSION, address, "").unwrap();
        assert!(matches!(
            cmd.compile(),
            Err(ProtocolError::InvalidAddress(a)) if a == address
        ));
    }
}

#[test]
fn test_parse_reply_lines() {
    let line = parse_line("09>0.20 ml/min").unwrap();
    assert_eq!(line.address, 9);
    assert_eq!(line.status, MotionStatus::Infusing);
    assert_eq!(line.body, "0.20 ml/min");

    let line = parse_line("05T*done").unwrap();
    assert_eq!(line.address, 5);
    assert_eq!(line.status, MotionStatus::TargetReached);
    assert_eq!(line.body, "done");
}

#[test]
fn test_decoy_first_line() {
    let (channel, _link) = channel_replying(&["00T*", "00:14.4300 mm", "00:"]);
    let cmd = Command::build(CommandCatalog::GET_DIAMETER, 0, "").unwrap();

    let reply = channel.exchange(&cmd).unwrap();
    assert_eq!(reply.len(), 2);
    assert_eq!(reply.first_body(), "14.4300 mm");
    assert_eq!(reply.status(), Some(MotionStatus::Idle));
}

#[test]
fn test_foreign_address() {
    let lines = ["03:1 ml", "04:"];
    assert!(matches!(
        parse_all(&lines, 3),
        Err(ProtocolError::AddressMismatch {
            expected: 3,
            actual: 4
        })
    ));
}

#[test]
fn test_out_of_range_rejection() {
    let (channel, _link) = channel_replying(&["", "00:Out of range"]);
    let cmd = Command::build(CommandCatalog::SET_INFUSE_RATE, 0, "900 m/m").unwrap();

    let err = channel.exchange(&cmd).unwrap_err();
    assert_eq!(err.rejection_kind(), Some(RejectionKind::ArgumentOutOfRange));
    assert_eq!(err.category(), ErrorCategory::DeviceRejection);
    assert!(!err.is_fatal());
}

#[test]
fn test_stall_reported_before_rejection() {
    let (channel, _link) = channel_replying(&["", "00*Command error"]);
    let cmd = Command::build(CommandCatalog::INFUSE, 0, "").unwrap();

    let err = channel.exchange(&cmd).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Stalled);
}

#[test]
fn test_unknown_status_character() {
    let (channel, _link) = channel_replying(&["", "00?"]);
    let cmd = Command::build(CommandCatalog::STOP, 0, "").unwrap();
    assert!(matches!(
        channel.exchange(&cmd),
        Err(ProtocolError::UnknownStatus('?'))
    ));
}

#[test]
fn test_silent_pump_is_transport_failure() {
    let channel = Channel::new("mock", Box::new(MockLink::silent()));
    let cmd = Command::build(CommandCatalog::GET_VERSION, 0, "").unwrap();

    let err = channel.exchange(&cmd).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Transport);
    assert!(err.is_fatal());
}
