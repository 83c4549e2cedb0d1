//! Protocol commands
//!
//! Defines the commands supported by Protocol11 pumps (Elite 11 command set).
//!
//! The pump must be in Quick Start mode, which is selected from its display.
//! Methods programmed onto the pump are deliberately not exposed: the same
//! result is obtained by sequencing these commands from the host.

use serde::Serialize;

use super::command_builder::Command;
use super::ProtocolError;

/// A pump command and the shape of its reply, without a target address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommandTemplate {
    /// Command code as sent on the wire (e.g. "irate")
    pub code: &'static str,
    /// Reply lines, not counting the leading blank line and the trailing prompt
    pub reply_lines: usize,
    /// Whether the command must carry an argument
    pub requires_argument: bool,
}

impl CommandTemplate {
    pub const fn new(code: &'static str, reply_lines: usize, requires_argument: bool) -> Self {
        Self {
            code,
            reply_lines,
            requires_argument,
        }
    }

    /// Bind this template to a pump address and argument
    pub fn to_pump(&self, address: u8, argument: &str) -> Result<Command, ProtocolError> {
        Command::build(*self, address, argument)
    }
}

/// Command table for Elite 11 pumps
pub struct CommandCatalog;

impl CommandCatalog {
    /// Empty line: the pump answers with its prompt only
    pub const EMPTY_MESSAGE: CommandTemplate = CommandTemplate::new(" ", 0, false);
    pub const GET_VERSION: CommandTemplate = CommandTemplate::new("VER", 1, false);

    // Start movement: previous direction, reverse, infuse, withdraw
    pub const RUN: CommandTemplate = CommandTemplate::new("run", 0, false);
    pub const REVERSE_RUN: CommandTemplate = CommandTemplate::new("rrun", 0, false);
    pub const INFUSE: CommandTemplate = CommandTemplate::new("irun", 0, false);
    pub const WITHDRAW: CommandTemplate = CommandTemplate::new("wrun", 0, false);

    pub const STOP: CommandTemplate = CommandTemplate::new("stp", 0, false);

    /// Force in percent
    pub const GET_FORCE: CommandTemplate = CommandTemplate::new("FORCE", 1, false);
    pub const SET_FORCE: CommandTemplate = CommandTemplate::new("FORCE", 1, true);

    /// Syringe diameter in mm
    pub const GET_DIAMETER: CommandTemplate = CommandTemplate::new("diameter", 1, false);
    pub const SET_DIAMETER: CommandTemplate = CommandTemplate::new("diameter", 1, true);

    /// Hardware description, one "Key    value" pair per line
    pub const METRICS: CommandTemplate = CommandTemplate::new("metrics", 20, false);
    pub const CURRENT_MOVING_RATE: CommandTemplate = CommandTemplate::new("crate", 1, false);

    // Ramps: iramp [{start rate} {start units} {end rate} {end units} {ramp time in seconds}]
    pub const GET_INFUSE_RAMP: CommandTemplate = CommandTemplate::new("iramp", 1, false);
    pub const SET_INFUSE_RAMP: CommandTemplate = CommandTemplate::new("iramp", 1, true);
    pub const GET_WITHDRAW_RAMP: CommandTemplate = CommandTemplate::new("wramp", 1, false);
    pub const SET_WITHDRAW_RAMP: CommandTemplate = CommandTemplate::new("wramp", 1, true);

    // Rates: irate [max | min | lim | {rate} {rate units}]
    pub const GET_INFUSE_RATE: CommandTemplate = CommandTemplate::new("irate", 1, false);
    pub const GET_INFUSE_RATE_LIMITS: CommandTemplate = CommandTemplate::new("irate lim", 1, false);
    pub const SET_INFUSE_RATE: CommandTemplate = CommandTemplate::new("irate", 1, true);
    pub const GET_WITHDRAW_RATE: CommandTemplate = CommandTemplate::new("wrate", 1, false);
    pub const GET_WITHDRAW_RATE_LIMITS: CommandTemplate =
        CommandTemplate::new("wrate lim", 1, false);
    pub const SET_WITHDRAW_RATE: CommandTemplate = CommandTemplate::new("wrate", 1, true);

    // Volumes
    pub const INFUSED_VOLUME: CommandTemplate = CommandTemplate::new("ivolume", 1, false);
    pub const WITHDRAWN_VOLUME: CommandTemplate = CommandTemplate::new("wvolume", 1, false);
    pub const GET_SYRINGE_VOLUME: CommandTemplate = CommandTemplate::new("svolume", 1, false);
    pub const SET_SYRINGE_VOLUME: CommandTemplate = CommandTemplate::new("svolume", 1, true);
    pub const GET_TARGET_VOLUME: CommandTemplate = CommandTemplate::new("tvolume", 1, false);
    pub const SET_TARGET_VOLUME: CommandTemplate = CommandTemplate::new("tvolume", 1, true);

    // Counter clears
    pub const CLEAR_INFUSED_VOLUME: CommandTemplate = CommandTemplate::new("civolume", 0, false);
    pub const CLEAR_WITHDRAWN_VOLUME: CommandTemplate = CommandTemplate::new("cwvolume", 0, false);
    pub const CLEAR_INFUSED_WITHDRAWN_VOLUME: CommandTemplate =
        CommandTemplate::new("cvolume", 0, false);
    pub const CLEAR_TARGET_VOLUME: CommandTemplate = CommandTemplate::new("ctvolume", 0, false);

    /// Every template in the table
    pub fn all() -> &'static [CommandTemplate] {
        &[
            Self::EMPTY_MESSAGE,
            Self::GET_VERSION,
            Self::RUN,
            Self::REVERSE_RUN,
            Self::INFUSE,
            Self::WITHDRAW,
            Self::STOP,
            Self::GET_FORCE,
            Self::SET_FORCE,
            Self::GET_DIAMETER,
            Self::SET_DIAMETER,
            Self::METRICS,
            Self::CURRENT_MOVING_RATE,
            Self::GET_INFUSE_RAMP,
            Self::SET_INFUSE_RAMP,
            Self::GET_WITHDRAW_RAMP,
            Self::SET_WITHDRAW_RAMP,
            Self::GET_INFUSE_RATE,
            Self::GET_INFUSE_RATE_LIMITS,
            Self::SET_INFUSE_RATE,
            Self::GET_WITHDRAW_RATE,
            Self::GET_WITHDRAW_RATE_LIMITS,
            Self::SET_WITHDRAW_RATE,
            Self::INFUSED_VOLUME,
            Self::WITHDRAWN_VOLUME,
            Self::GET_SYRINGE_VOLUME,
            Self::SET_SYRINGE_VOLUME,
            Self::GET_TARGET_VOLUME,
            Self::SET_TARGET_VOLUME,
            Self::CLEAR_INFUSED_VOLUME,
            Self::CLEAR_WITHDRAWN_VOLUME,
            Self::CLEAR_INFUSED_WITHDRAWN_VOLUME,
            Self::CLEAR_TARGET_VOLUME,
        ]
    }

    /// Templates that only make sense on withdraw-capable pumps
    pub fn needs_withdraw(template: &CommandTemplate) -> bool {
        matches!(
            template.code,
            "wrun" | "wrate" | "wrate lim" | "wramp" | "wvolume" | "cwvolume" | "cvolume"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_getters_and_setters_share_code() {
        assert_eq!(CommandCatalog::GET_DIAMETER.code, CommandCatalog::SET_DIAMETER.code);
        assert!(!CommandCatalog::GET_DIAMETER.requires_argument);
        assert!(CommandCatalog::SET_DIAMETER.requires_argument);
    }

    #[test]
    fn test_motion_commands_have_no_reply_body() {
        for t in [
            CommandCatalog::RUN,
            CommandCatalog::REVERSE_RUN,
            CommandCatalog::INFUSE,
            CommandCatalog::WITHDRAW,
            CommandCatalog::STOP,
        ] {
            assert_eq!(t.reply_lines, 0, "{}", t.code);
            assert!(!t.requires_argument);
        }
    }

    #[test]
    fn test_table_codes_are_unique_per_argument_mode() {
        let all = CommandCatalog::all();
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert!(
                    a.code != b.code || a.requires_argument != b.requires_argument,
                    "duplicate template {}",
                    a.code
                );
            }
        }
    }

    #[test]
    fn test_withdraw_commands() {
        assert!(CommandCatalog::needs_withdraw(&CommandCatalog::WITHDRAW));
        assert!(CommandCatalog::needs_withdraw(&CommandCatalog::SET_WITHDRAW_RATE));
        assert!(!CommandCatalog::needs_withdraw(&CommandCatalog::INFUSE));
        assert!(!CommandCatalog::needs_withdraw(&CommandCatalog::CLEAR_INFUSED_VOLUME));
    }
}
