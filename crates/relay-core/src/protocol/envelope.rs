//! Typed view of a single bus notification.
//!
//! A `(channel, value)` pair from the bus becomes exactly one
//! [`Notification`]; [`Notification::encode`] is the inverse used for
//! writes.

use super::{Channel, ControlMessage, ProtocolError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Leader liveness, milliseconds since Unix epoch on the leader's clock.
    Heartbeat(u64),
    /// Identity and membership control.
    Control(ControlMessage),
    /// Opaque relayed payload, passed through verbatim.
    Data(String),
}

impl Notification {
    /// Parse a value observed on `channel`.
    pub fn parse(channel: Channel, value: &str) -> Result<Self, ProtocolError> {
        match channel {
            Channel::Lead => value
                .parse::<u64>()
                .map(Self::Heartbeat)
                .map_err(|_| ProtocolError::InvalidHeartbeat(value.to_string())),
            Channel::Roster => ControlMessage::parse(value).map(Self::Control),
            Channel::Queue => Ok(Self::Data(value.to_string())),
        }
    }

    /// Channel and value to write for this notification.
    pub fn encode(&self) -> (Channel, String) {
        match self {
            Self::Heartbeat(timestamp) => (Channel::Lead, timestamp.to_string()),
            Self::Control(control) => (Channel::Roster, control.encode()),
            Self::Data(payload) => (Channel::Queue, payload.clone()),
        }
    }

    pub fn channel(&self) -> Channel {
        match self {
            Self::Heartbeat(_) => Channel::Lead,
            Self::Control(_) => Channel::Roster,
            Self::Data(_) => Channel::Queue,
        }
    }
}
