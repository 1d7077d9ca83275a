//! relay-daemon library: the WebSocket bus and demo sources.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to access internal types.

pub mod client;
pub mod connection;
pub mod frame;
pub mod hub;
pub mod source;

// Re-export key types for convenience
pub use client::WsBus;
pub use connection::{ConnectionEvent, HubConnection};
pub use frame::{BusFrame, FrameError, MAX_FRAME_SIZE};
pub use hub::{BusHub, HANDSHAKE_TIMEOUT, HubEvent};
pub use source::{DataSource, SourceKind};
