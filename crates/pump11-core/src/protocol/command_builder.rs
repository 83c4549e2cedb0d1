//! Command Builder
//!
//! Binds a [`CommandTemplate`] to a pump address and argument, and compiles the
//! result into the ASCII line sent on the wire:
//!
//! ```text
//! <2-digit address><code> <argument>\r\n
//! ```
//!
//! e.g. `00irate 0.5 m/m\r\n`. Building and compiling never touch the port.

use std::fmt;

use super::{CommandTemplate, ProtocolError, MAX_ADDRESS};

/// A command bound to a target pump, ready to be compiled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    template: CommandTemplate,
    address: u8,
    argument: String,
}

impl Command {
    /// Bind `template` to `address` with `argument`.
    ///
    /// An argument must be given if and only if the template requires one.
    pub fn build(
        template: CommandTemplate,
        address: u8,
        argument: &str,
    ) -> Result<Self, ProtocolError> {
        if template.requires_argument == argument.is_empty() {
            return Err(ProtocolError::ArgumentMismatch {
                command: template.code.to_string(),
                requires_argument: template.requires_argument,
            });
        }

        Ok(Self {
            template,
            address,
            argument: argument.to_string(),
        })
    }

    pub fn template(&self) -> &CommandTemplate {
        &self.template
    }

    pub fn code(&self) -> &'static str {
        self.template.code
    }

    /// Target pump address
    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn argument(&self) -> &str {
        &self.argument
    }

    /// Reply lines to read, including the leading blank line and the prompt
    pub fn lines_to_read(&self) -> usize {
        self.template.reply_lines + 2
    }

    /// Compile to the bytes written on the serial line
    pub fn compile(&self) -> Result<Vec<u8>, ProtocolError> {
        if self.address >= MAX_ADDRESS {
            return Err(ProtocolError::InvalidAddress(self.address));
        }

        Ok(format!(
            "{:02}{} {}\r\n",
            self.address, self.template.code, self.argument
        )
        .into_bytes())
    }
}

/// Builds commands addressed to one pump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandBuilder {
    address: u8,
}

impl CommandBuilder {
    pub fn new(address: u8) -> Self {
        Self { address }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Build a command without an argument
    pub fn command(&self, template: CommandTemplate) -> Result<Command, ProtocolError> {
        Command::build(template, self.address, "")
    }

    /// Build a command carrying `argument`
    pub fn command_with(
        &self,
        template: CommandTemplate,
        argument: &str,
    ) -> Result<Command, ProtocolError> {
        Command::build(template, self.address, argument)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.argument.is_empty() {
            write!(f, "{:02}{}", self.address, self.template.code)
        } else {
            write!(
                f,
                "{:02}{} {}",
                self.address, self.template.code, self.argument
            )
        }
    }
}
