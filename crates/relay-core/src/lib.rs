//! relay-core: leader election and message relay over a shared bus.
//!
//! Peers that share one external resource elect a single leader to drive
//! it, and every peer receives the leader's output. This crate provides:
//! - Identity negotiation with collision resolution
//! - Heartbeat-based leadership and timeout promotion
//! - Graceful leadership handoff
//! - Message fan-out from the leader's data source to all peers
//! - The `SharedBus` abstraction with an in-process implementation
//!
//! The protocol lives in [`election::Peer`], a sans-IO state machine.
//! [`Coordinator`] drives it from a tokio task.

pub mod bus;
pub mod config;
pub mod coordinator;
pub mod election;
pub mod peer_id;
pub mod protocol;
pub mod relay;

pub use bus::{BusError, Listener, ListenerSet, MemoryBus, MemoryEndpoint, SharedBus, Subscription};
pub use config::{ConfigError, CoordinatorConfig};
pub use coordinator::{Coordinator, CoordinatorHandle, Deliver, PeerHooks, PeerStatus};
pub use election::{Action, HeartbeatRecord, LeadershipState, Peer, Roster, Succession};
pub use peer_id::{PeerIdError, PeerIdentity};
pub use protocol::{Channel, ControlMessage, MAX_MESSAGE_LEN, Notification, ProtocolError};
pub use relay::RelayError;
