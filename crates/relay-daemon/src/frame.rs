//! Bus frames exchanged with the hub.
//!
//! One frame carries one bus write. Frames are JSON sent as binary
//! WebSocket messages (UTF-8 bytes).

use relay_core::Channel;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum frame size (32MB). A full-size `QUEUE` value fits with room for
/// JSON escaping.
pub const MAX_FRAME_SIZE: usize = 32 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Frame of {len} bytes exceeds max size of {limit}")]
    TooLarge { len: usize, limit: usize },

    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A single `(channel, value)` write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusFrame {
    pub channel: Channel,
    pub value: String,
}

impl BusFrame {
    pub fn new(channel: Channel, value: impl Into<String>) -> Self {
        Self {
            channel,
            value: value.into(),
        }
    }

    /// Serialize to UTF-8 JSON bytes for sending as a binary WebSocket frame.
    pub fn to_binary(&self) -> Result<Vec<u8>, FrameError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a frame, rejecting oversized input before decoding it.
    pub fn from_binary(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge {
                len: data.len(),
                limit: MAX_FRAME_SIZE,
            });
        }
        Ok(serde_json::from_slice(data)?)
    }
}
