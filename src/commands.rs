//! One-shot device commands.
//!
//! Each command validates its input, performs exactly one transaction through
//! the session's exclusive access gate and reports the result once. Nothing
//! is retried here; retry policy belongs to whoever sent the request.
//!
//! Requests from outside arrive as a [`CommandRequest`]: an endpoint name
//! (`tare`, `commit`, `reset`, `factory-reset`, `multi-reference`,
//! `led-color`) plus an optional payload. [`CommandDispatcher::dispatch`]
//! routes them through a fixed table.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::error::{ImuError, Result};
use crate::hardware::driver::{DeviceCommand, LedColor};
use crate::session::DeviceSession;

/// Command endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Zero the orientation at the current pose
    Tare,
    /// Persist settings to non-volatile memory
    Commit,
    /// Soft-reset the device
    Reset,
    /// Restore factory settings
    FactoryReset,
    /// Switch to multi-reference vector mode
    MultiReference,
    /// Set the indicator LED
    LedColor,
}

impl CommandKind {
    /// Every endpoint, in the order they are listed to users.
    pub const ALL: [CommandKind; 6] = [
        CommandKind::Tare,
        CommandKind::Commit,
        CommandKind::Reset,
        CommandKind::FactoryReset,
        CommandKind::MultiReference,
        CommandKind::LedColor,
    ];

    /// Endpoint name.
    pub fn endpoint(self) -> &'static str {
        match self {
            CommandKind::Tare => "tare",
            CommandKind::Commit => "commit",
            CommandKind::Reset => "reset",
            CommandKind::FactoryReset => "factory-reset",
            CommandKind::MultiReference => "multi-reference",
            CommandKind::LedColor => "led-color",
        }
    }
}

impl FromStr for CommandKind {
    type Err = ImuError;

    fn from_str(name: &str) -> Result<Self> {
        CommandKind::ALL
            .into_iter()
            .find(|kind| kind.endpoint() == name)
            .ok_or_else(|| ImuError::invalid(format!("unknown command '{}'", name)))
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.endpoint())
    }
}

/// Command-specific request body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandPayload {
    /// No arguments
    Empty,
    /// Color for [`CommandKind::LedColor`]
    LedColor(LedColor),
}

/// An external command request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandRequest {
    /// Endpoint the request targets
    pub kind: CommandKind,
    /// Arguments, checked against `kind` at dispatch
    pub payload: CommandPayload,
}

impl CommandRequest {
    /// Request with no payload.
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            payload: CommandPayload::Empty,
        }
    }

    /// `led-color` request.
    pub fn led_color(color: LedColor) -> Self {
        Self {
            kind: CommandKind::LedColor,
            payload: CommandPayload::LedColor(color),
        }
    }

    /// Check that the payload matches the endpoint and is well formed.
    ///
    /// # Errors
    /// Returns [`ImuError::InvalidConfiguration`] for a missing, unexpected or
    /// invalid payload.
    pub fn to_device_command(&self) -> Result<DeviceCommand> {
        match (self.kind, self.payload) {
            (CommandKind::LedColor, CommandPayload::LedColor(color)) => {
                color.validate()?;
                Ok(DeviceCommand::SetLedColor(color))
            }
            (CommandKind::LedColor, CommandPayload::Empty) => {
                Err(ImuError::invalid("led-color requires a color payload"))
            }
            (kind, CommandPayload::LedColor(_)) => Err(ImuError::invalid(format!(
                "{} does not take a payload",
                kind
            ))),
            (CommandKind::Tare, CommandPayload::Empty) => Ok(DeviceCommand::Tare),
            (CommandKind::Commit, CommandPayload::Empty) => Ok(DeviceCommand::Commit),
            (CommandKind::Reset, CommandPayload::Empty) => Ok(DeviceCommand::Reset),
            (CommandKind::FactoryReset, CommandPayload::Empty) => Ok(DeviceCommand::FactoryReset),
            (CommandKind::MultiReference, CommandPayload::Empty) => {
                Ok(DeviceCommand::MultiReference)
            }
        }
    }
}

impl FromStr for CommandRequest {
    type Err = ImuError;

    /// Parse a text request such as `tare` or `led-color 1 0 0`.
    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim();
        let (name, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let kind: CommandKind = name.parse()?;
        let rest = rest.trim();

        match kind {
            CommandKind::LedColor => Ok(CommandRequest::led_color(rest.parse()?)),
            _ if rest.is_empty() => Ok(CommandRequest::new(kind)),
            _ => Err(ImuError::invalid(format!(
                "{} does not take arguments (got '{}')",
                kind, rest
            ))),
        }
    }
}

// =============================================================================
// CommandDispatcher
// =============================================================================

/// Issues one-shot commands against a shared session.
#[derive(Clone)]
pub struct CommandDispatcher {
    session: Arc<DeviceSession>,
}

impl CommandDispatcher {
    /// Create a dispatcher for `session`.
    pub fn new(session: Arc<DeviceSession>) -> Self {
        Self { session }
    }

    /// Route a request to its handler.
    ///
    /// # Errors
    /// - [`ImuError::InvalidConfiguration`] for a malformed payload
    /// - [`ImuError::NotOpen`] if the session is closed
    /// - [`ImuError::Io`] if the device rejected the command
    pub async fn dispatch(&self, request: CommandRequest) -> Result<()> {
        let command = request.to_device_command()?;
        self.execute(command).await
    }

    /// Zero the orientation at the current pose.
    pub async fn tare(&self) -> Result<()> {
        self.execute(DeviceCommand::Tare).await
    }

    /// Persist the current settings.
    pub async fn commit(&self) -> Result<()> {
        self.execute(DeviceCommand::Commit).await
    }

    /// Soft-reset the device.
    pub async fn reset(&self) -> Result<()> {
        self.execute(DeviceCommand::Reset).await
    }

    /// Restore factory settings.
    pub async fn factory_reset(&self) -> Result<()> {
        self.execute(DeviceCommand::FactoryReset).await
    }

    /// Capture multi-reference vectors at the current orientation.
    pub async fn multi_reference(&self) -> Result<()> {
        self.execute(DeviceCommand::MultiReference).await
    }

    /// Set the indicator LED color.
    ///
    /// # Errors
    /// Returns [`ImuError::InvalidConfiguration`] before touching the device if
    /// any component is outside `[0, 1]`.
    pub async fn set_led_color(&self, color: LedColor) -> Result<()> {
        color.validate()?;
        self.execute(DeviceCommand::SetLedColor(color)).await
    }

    /// Run one command transaction on the blocking pool.
    #[instrument(skip(self), fields(port = %self.session.port()))]
    async fn execute(&self, command: DeviceCommand) -> Result<()> {
        let session = self.session.clone();
        let result = tokio::task::spawn_blocking(move || {
            session.with_exclusive_access(|driver, handle| driver.send_command(handle, &command))
        })
        .await?;

        match &result {
            Ok(()) => info!(command = %command, "Command completed"),
            Err(e) => warn!(command = %command, error = %e, "Command failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_names_round_trip() {
        for kind in CommandKind::ALL {
            assert_eq!(kind.endpoint().parse::<CommandKind>().unwrap(), kind);
        }
        assert!("factory_reset".parse::<CommandKind>().is_err());
    }

    #[test]
    fn parses_text_requests() {
        assert_eq!(
            "tare".parse::<CommandRequest>().unwrap(),
            CommandRequest::new(CommandKind::Tare)
        );
        assert_eq!(
            "  led-color 0 1 0.25 ".parse::<CommandRequest>().unwrap(),
            CommandRequest::led_color(LedColor::new(0.0, 1.0, 0.25))
        );
        assert!("tare now".parse::<CommandRequest>().is_err());
        assert!("led-color".parse::<CommandRequest>().is_err());
        assert!("led-color 3 0 0".parse::<CommandRequest>().is_err());
        assert!("explode".parse::<CommandRequest>().is_err());
    }

    #[test]
    fn payload_must_match_endpoint() {
        let wrong = CommandRequest {
            kind: CommandKind::Commit,
            payload: CommandPayload::LedColor(LedColor::new(0.0, 0.0, 0.0)),
        };
        assert!(matches!(
            wrong.to_device_command(),
            Err(ImuError::InvalidConfiguration(_))
        ));
        assert!(CommandRequest::new(CommandKind::LedColor)
            .to_device_command()
            .is_err());
        assert_eq!(
            CommandRequest::new(CommandKind::FactoryReset)
                .to_device_command()
                .unwrap(),
            DeviceCommand::FactoryReset
        );
    }
}
