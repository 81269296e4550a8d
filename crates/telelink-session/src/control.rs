use std::fmt;

use serde::{Deserialize, Serialize};

/// Config record value that asks a peripheral to run its setup routine.
pub const PERIPHERAL_SETUP: u8 = 1;
/// Config record value that asks a peripheral to reload its configuration.
pub const PERIPHERAL_RECONFIGURE: u8 = 3;

/// Command carried in the first payload byte of a control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    /// End the session and stop the receiving unit.
    Shutdown,
    /// (Re)start peripheral connections, then send each the setup record.
    ConnectPeripherals,
    /// Send the setup record to every connected peripheral.
    Setup,
    /// Send the reconfigure record to every connected peripheral.
    Reconfigure,
}

impl ControlCommand {
    pub const ALL: [ControlCommand; 4] = [
        Self::Shutdown,
        Self::ConnectPeripherals,
        Self::Setup,
        Self::Reconfigure,
    ];

    /// Wire code of the command.
    pub fn code(self) -> u8 {
        match self {
            Self::Shutdown => 0,
            Self::ConnectPeripherals => 1,
            Self::Setup => 2,
            Self::Reconfigure => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|cmd| cmd.code() == code)
    }

    /// Parse a control frame payload. Bytes after the command code are ignored.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        payload.first().copied().and_then(Self::from_code)
    }

    /// Control frame payload for this command.
    pub fn payload(self) -> [u8; 1] {
        [self.code()]
    }

    /// Value of the config record this command pushes to peripherals, if any.
    pub fn peripheral_config(self) -> Option<u8> {
        match self {
            Self::ConnectPeripherals | Self::Setup => Some(PERIPHERAL_SETUP),
            Self::Reconfigure => Some(PERIPHERAL_RECONFIGURE),
            Self::Shutdown => None,
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Shutdown => "shutdown",
            Self::ConnectPeripherals => "connect_peripherals",
            Self::Setup => "setup",
            Self::Reconfigure => "reconfigure",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip() {
        for cmd in ControlCommand::ALL {
            assert_eq!(ControlCommand::from_code(cmd.code()), Some(cmd));
            assert_eq!(ControlCommand::parse(&cmd.payload()), Some(cmd));
        }
        assert_eq!(ControlCommand::from_code(9), None);
        assert_eq!(ControlCommand::parse(&[]), None);
        assert_eq!(ControlCommand::parse(&[3, 0xAA]), Some(ControlCommand::Reconfigure));
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&ControlCommand::ConnectPeripherals).unwrap();
        assert_eq!(json, "\"connect_peripherals\"");
        let cmd: ControlCommand = serde_json::from_str("\"reconfigure\"").unwrap();
        assert_eq!(cmd, ControlCommand::Reconfigure);
    }
}
