use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::str::FromStr;
use thiserror::Error;

use self::Channel::*;

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum Channel {
    Channel1,
    Channel2,
    Channel3,
    Channel4,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel1, Channel2, Channel3, Channel4];

    /// Channel number as it appears on the board and on the wire.
    pub fn number(&self) -> u8 {
        match self {
            Channel1 => 1,
            Channel2 => 2,
            Channel3 => 3,
            Channel4 => 4,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Channel number must be between 1 and 4, got {0}")]
pub struct InvalidChannel(pub i64);

impl TryFrom<i64> for Channel {
    type Error = InvalidChannel;

    fn try_from(number: i64) -> Result<Self, Self::Error> {
        match number {
            1 => Ok(Channel1),
            2 => Ok(Channel2),
            3 => Ok(Channel3),
            4 => Ok(Channel4),
            invalid => Err(InvalidChannel(invalid)),
        }
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "R{}", self.number())
    }
}

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum RelayState {
    On,
    Off,
}

impl RelayState {
    pub fn is_on(&self) -> bool {
        *self == RelayState::On
    }

    pub fn toggled(&self) -> RelayState {
        match self {
            RelayState::On => RelayState::Off,
            RelayState::Off => RelayState::On,
        }
    }
}

impl From<bool> for RelayState {
    fn from(on: bool) -> Self {
        match on {
            true => RelayState::On,
            false => RelayState::Off,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid relay state '{0}'")]
pub struct InvalidRelayState(pub String);

impl FromStr for RelayState {
    type Err = InvalidRelayState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "on" => Ok(RelayState::On),
            "off" => Ok(RelayState::Off),
            _ => Err(InvalidRelayState(String::from(s))),
        }
    }
}

impl Display for RelayState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            RelayState::On => write!(f, "On"),
            RelayState::Off => write!(f, "Off"),
        }
    }
}
