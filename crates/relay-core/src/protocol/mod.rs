//! Wire protocol for the shared bus.
//!
//! Three logical channels carry everything peers say to each other:
//! - `LEAD`: the leader's heartbeat timestamp
//! - `ROSTER`: control messages (announce, claim, leave, handoff)
//! - `QUEUE`: opaque payloads relayed from the leader's data source
//!
//! Values are parsed into typed [`Notification`]s once, at the bus
//! boundary. Nothing past this module inspects raw channel text.

pub mod channel;
pub mod control;
pub mod envelope;

pub use channel::{Channel, MAX_MESSAGE_LEN, message_len};
pub use control::ControlMessage;
pub use envelope::Notification;

use crate::peer_id::PeerIdError;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Invalid heartbeat: {0:?}")]
    InvalidHeartbeat(String),

    #[error("Invalid control message {value:?}: {source}")]
    InvalidControl {
        value: String,
        #[source]
        source: PeerIdError,
    },
}
