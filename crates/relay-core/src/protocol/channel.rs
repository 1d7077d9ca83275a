//! Logical channel names on the shared bus.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use super::ProtocolError;

/// Largest `QUEUE` payload the bus is expected to carry, in characters.
pub const MAX_MESSAGE_LEN: usize = 2_500_000;

/// Length of a payload as the bus limit counts it (characters, not bytes).
pub fn message_len(value: &str) -> usize {
    value.chars().count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    /// Leader heartbeat timestamps.
    Lead,
    /// Identity and membership control messages.
    Roster,
    /// Relayed data payloads.
    Queue,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Lead, Channel::Roster, Channel::Queue];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Lead => "LEAD",
            Channel::Roster => "ROSTER",
            Channel::Queue => "QUEUE",
        }
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|channel| channel.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownChannel(s.to_string()))
    }
}
