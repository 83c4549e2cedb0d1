//! Reply parsing
//!
//! Every line the pump sends back starts with its two-digit address followed
//! by a prompt character encoding the motion status, then the reply body:
//!
//! ```text
//! 09>0.20 ml/min      address 9, infusing, body "0.20 ml/min"
//! 05T*done            address 5, target reached (two-character prompt)
//! ```

use serde::{Deserialize, Serialize};

use super::ProtocolError;

/// Pump motion status, as encoded by the reply prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MotionStatus {
    /// `:`
    Idle,
    /// `>`
    Infusing,
    /// `<`
    Withdrawing,
    /// `T` followed by one more character
    TargetReached,
    /// `*`
    Stalled,
}

impl MotionStatus {
    /// Map a prompt character to a status
    pub fn from_prompt(c: char) -> Result<Self, ProtocolError> {
        match c {
            ':' => Ok(MotionStatus::Idle),
            '>' => Ok(MotionStatus::Infusing),
            '<' => Ok(MotionStatus::Withdrawing),
            'T' => Ok(MotionStatus::TargetReached),
            '*' => Ok(MotionStatus::Stalled),
            other => Err(ProtocolError::UnknownStatus(other)),
        }
    }

    pub fn prompt_char(&self) -> char {
        match self {
            MotionStatus::Idle => ':',
            MotionStatus::Infusing => '>',
            MotionStatus::Withdrawing => '<',
            MotionStatus::TargetReached => 'T',
            MotionStatus::Stalled => '*',
        }
    }

    /// Number of characters the prompt takes on the wire
    pub fn prompt_len(&self) -> usize {
        match self {
            MotionStatus::TargetReached => 2,
            _ => 1,
        }
    }

    pub fn is_moving(&self) -> bool {
        matches!(self, MotionStatus::Infusing | MotionStatus::Withdrawing)
    }
}

/// One reply line split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReplyLine {
    pub address: u8,
    pub status: MotionStatus,
    pub body: String,
}

/// Split a reply line into address, status and body
pub fn parse_line(line: &str) -> Result<ParsedReplyLine, ProtocolError> {
    // Byte offset of the third character; also rejects lines shorter than 3
    let status_at = line
        .char_indices()
        .nth(2)
        .map(|(i, _)| i)
        .ok_or_else(|| ProtocolError::MalformedReply(line.to_string()))?;

    let digits = &line[..status_at];
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::MalformedReply(line.to_string()));
    }
    let address = digits
        .parse::<u8>()
        .map_err(|_| ProtocolError::MalformedReply(line.to_string()))?;

    let mut rest = line[status_at..].chars();
    let prompt = rest
        .next()
        .ok_or_else(|| ProtocolError::MalformedReply(line.to_string()))?;
    let status = MotionStatus::from_prompt(prompt)?;

    // The second prompt character of "T*" is not part of the body
    for _ in 1..status.prompt_len() {
        rest.next();
    }

    Ok(ParsedReplyLine {
        address,
        status,
        body: rest.as_str().to_string(),
    })
}

/// A fully parsed reply, all lines from the same pump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    address: u8,
    lines: Vec<ParsedReplyLine>,
}

impl Reply {
    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn lines(&self) -> &[ParsedReplyLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn statuses(&self) -> impl Iterator<Item = MotionStatus> + '_ {
        self.lines.iter().map(|l| l.status)
    }

    pub fn bodies(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(|l| l.body.as_str())
    }

    /// Status from the trailing prompt
    pub fn status(&self) -> Option<MotionStatus> {
        self.lines.last().map(|l| l.status)
    }

    pub fn first_body(&self) -> &str {
        self.lines.first().map(|l| l.body.as_str()).unwrap_or("")
    }

    pub fn last_body(&self) -> &str {
        self.lines.last().map(|l| l.body.as_str()).unwrap_or("")
    }

    pub fn is_stalled(&self) -> bool {
        self.statuses().any(|s| s == MotionStatus::Stalled)
    }
}

/// Parse every line of a reply and check that they all come from `expected_address`.
///
/// A foreign address means two pumps share an address or the wiring is wrong;
/// it is reported as [`ProtocolError::AddressMismatch`].
pub fn parse_all<S: AsRef<str>>(lines: &[S], expected_address: u8) -> Result<Reply, ProtocolError> {
    let lines = lines
        .iter()
        .map(|l| parse_line(l.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(foreign) = lines.iter().find(|l| l.address != expected_address) {
        return Err(ProtocolError::AddressMismatch {
            expected: expected_address,
            actual: foreign.address,
        });
    }

    Ok(Reply {
        address: expected_address,
        lines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_infusing_line() {
        let line = parse_line("09>0.20 ml/min").unwrap();
        assert_eq!(
            line,
            ParsedReplyLine {
                address: 9,
                status: MotionStatus::Infusing,
                body: "0.20 ml/min".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_target_reached_line() {
        let line = parse_line("05T*done").unwrap();
        assert_eq!(
            line,
            ParsedReplyLine {
                address: 5,
                status: MotionStatus::TargetReached,
                body: "done".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_bare_prompts() {
        assert_eq!(parse_line("00:").unwrap().status, MotionStatus::Idle);
        assert_eq!(parse_line("00<").unwrap().status, MotionStatus::Withdrawing);
        assert_eq!(parse_line("00*").unwrap().status, MotionStatus::Stalled);

        let reached = parse_line("00T").unwrap();
        assert_eq!(reached.status, MotionStatus::TargetReached);
        assert_eq!(reached.body, "");
    }

    #[test]
    fn test_short_line_is_malformed() {
        assert!(matches!(parse_line("0:"), Err(ProtocolError::MalformedReply(_))));
        assert!(matches!(parse_line(""), Err(ProtocolError::MalformedReply(_))));
    }

    #[test]
    fn test_non_numeric_address_is_malformed() {
        assert!(matches!(
            parse_line("ab:hello"),
            Err(ProtocolError::MalformedReply(_))
        ));
    }

    #[test]
    fn test_signed_address_is_malformed() {
        for line in ["+5:", "-5:", " 5:", "5 :"] {
            assert!(
                matches!(parse_line(line), Err(ProtocolError::MalformedReply(_))),
                "{:?} parsed",
                line
            );
        }
    }

    #[test]
    fn test_unknown_status() {
        assert!(matches!(
            parse_line("01?body"),
            Err(ProtocolError::UnknownStatus('?'))
        ));
    }

    #[test]
    fn test_parse_all() {
        let reply = parse_all(&["02:11 ELITE I/W Single 3.0.4", "02:"], 2).unwrap();
        assert_eq!(reply.len(), 2);
        assert_eq!(reply.first_body(), "11 ELITE I/W Single 3.0.4");
        assert_eq!(reply.last_body(), "");
        assert_eq!(reply.status(), Some(MotionStatus::Idle));
        assert!(!reply.is_stalled());
    }

    #[test]
    fn test_parse_all_address_mismatch() {
        let err = parse_all(&["02:ok", "03:"], 2).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::AddressMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_stall_anywhere() {
        let reply = parse_all(&["01*", "01:"], 1).unwrap();
        assert!(reply.is_stalled());
    }
}
