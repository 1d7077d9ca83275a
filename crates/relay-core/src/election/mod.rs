//! Per-peer coordination state machine.
//!
//! One [`Peer`] value holds everything a peer knows: its identity, its
//! role (and the roster when leading), the last observed heartbeat and
//! its armed timers. It is driven by exactly one input at a time:
//!
//! 1. [`Peer::start`] once, to negotiate identity and decide a role
//! 2. [`Peer::on_notification`] for every write another peer made
//! 3. [`Peer::on_timers`] whenever [`Peer::next_deadline`] passes
//! 4. [`Peer::on_source_message`] for every message the data source delivers
//! 5. [`Peer::shutdown`] once, on graceful termination
//!
//! Each call returns the [`Action`]s the caller must perform. Time is
//! passed in as milliseconds; the machine never reads a clock.
//!
//! The logic is split by concern:
//! - `identity`: identifier negotiation and collision resolution
//! - `leadership`: role decision, heartbeats, timeout promotion
//! - `roster`: follower tracking and graceful handoff
//! - [`crate::relay`]: message fan-out

mod identity;
mod leadership;
pub mod roster;
pub mod timers;

pub use roster::{Roster, RosterEntry};
pub use timers::{TimerKind, Timers};

use serde::Serialize;
use tracing::{trace, warn};

use crate::config::CoordinatorConfig;
use crate::peer_id::PeerIdentity;
use crate::protocol::{Channel, ControlMessage, Notification};

/// Externally visible leadership state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LeadershipState {
    /// Not started yet.
    Unknown,
    /// Announced, waiting to learn whether a leader exists.
    Candidate,
    /// Receiving relayed messages from a leader.
    Follower,
    /// Driving the data source.
    Leader,
}

/// Role with its role-specific data. The roster only exists while leading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Role {
    Unknown,
    /// Identifiers announced during the decision window, in arrival order.
    Candidate { contenders: Vec<PeerIdentity> },
    Follower,
    Leader(Roster),
}

impl Role {
    fn state(&self) -> LeadershipState {
        match self {
            Role::Unknown => LeadershipState::Unknown,
            Role::Candidate { .. } => LeadershipState::Candidate,
            Role::Follower => LeadershipState::Follower,
            Role::Leader(_) => LeadershipState::Leader,
        }
    }
}

/// How a peer came to lead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Succession {
    /// No heartbeat during the decision window.
    Fresh,
    /// Named first in a departing leader's handoff; carries the remaining
    /// followers in join order.
    Inherited(Vec<PeerIdentity>),
    /// Promoted after the leader went silent or a handoff stalled. The
    /// followers are unknown, so everyone is asked to re-announce.
    Recovered,
}

/// Last heartbeat seen from the leader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRecord {
    /// Timestamp the leader published.
    pub leader_timestamp: Option<u64>,
    /// Local time the heartbeat (or handoff) was observed.
    pub observed_at: Option<u64>,
}

/// Side effects requested by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Write to the shared bus.
    Publish(Notification),
    /// Invoke the data source's start operation for a new leadership term.
    StartSource { term: u64 },
    /// Hand a message to the local consumer.
    Deliver(String),
}

/// One peer's complete coordination state.
#[derive(Debug, Clone)]
pub struct Peer {
    pub(crate) identity: PeerIdentity,
    pub(crate) config: CoordinatorConfig,
    pub(crate) role: Role,
    pub(crate) heartbeat: HeartbeatRecord,
    pub(crate) timers: Timers,
    pub(crate) term: u64,
    pub(crate) terminated: bool,
    /// Identifier we re-announced while objecting to a duplicate.
    pub(crate) defended: Option<PeerIdentity>,
}

impl Peer {
    /// Create a peer with a freshly generated identity.
    pub fn new(config: CoordinatorConfig) -> Self {
        Self::with_identity(PeerIdentity::generate(), config)
    }

    /// Create a peer with a chosen identity.
    pub fn with_identity(identity: PeerIdentity, config: CoordinatorConfig) -> Self {
        Self {
            identity,
            config,
            role: Role::Unknown,
            heartbeat: HeartbeatRecord::default(),
            timers: Timers::new(),
            term: 0,
            terminated: false,
            defended: None,
        }
    }

    pub fn identity(&self) -> PeerIdentity {
        self.identity
    }

    pub fn state(&self) -> LeadershipState {
        self.role.state()
    }

    pub fn is_leader(&self) -> bool {
        matches!(self.role, Role::Leader(_))
    }

    /// The roster, present only while leading.
    pub fn roster(&self) -> Option<&Roster> {
        match &self.role {
            Role::Leader(roster) => Some(roster),
            _ => None,
        }
    }

    /// Number of leadership terms this peer has started.
    pub fn term(&self) -> u64 {
        self.term
    }

    pub fn heartbeat(&self) -> HeartbeatRecord {
        self.heartbeat
    }

    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// When the driver must next call [`on_timers`](Self::on_timers).
    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.next_deadline()
    }

    /// Begin participating: announce and decide a role.
    pub fn start(&mut self, now_ms: u64) -> Vec<Action> {
        let mut out = Vec::new();
        if self.terminated || self.role != Role::Unknown {
            return out;
        }
        self.decide_role(now_ms, &mut out);
        out
    }

    /// Handle a raw `(channel, value)` write observed on the bus.
    ///
    /// Malformed values are logged and dropped.
    pub fn on_notification(&mut self, channel: Channel, value: &str, now_ms: u64) -> Vec<Action> {
        match Notification::parse(channel, value) {
            Ok(notification) => self.handle(notification, now_ms),
            Err(e) => {
                warn!(%channel, error = %e, "Dropping malformed bus value");
                Vec::new()
            }
        }
    }

    /// Handle a parsed notification from another peer.
    pub fn handle(&mut self, notification: Notification, now_ms: u64) -> Vec<Action> {
        let mut out = Vec::new();
        if self.terminated || self.role == Role::Unknown {
            return out;
        }

        match notification {
            Notification::Heartbeat(timestamp) => self.on_heartbeat(timestamp, now_ms),
            Notification::Control(control) => {
                trace!(identity = %self.identity, kind = control.kind(), "Control message");
                match control {
                    ControlMessage::Announce(identity) => {
                        self.on_announce(identity, now_ms, &mut out)
                    }
                    ControlMessage::Reannounce => self.on_reannounce_request(now_ms),
                    ControlMessage::Claim(identity) => self.on_claim(identity, &mut out),
                    ControlMessage::Leave(identity) => self.on_leave(identity, &mut out),
                    ControlMessage::Handoff(successors) => {
                        self.on_handoff(successors, now_ms, &mut out)
                    }
                }
            }
            Notification::Data(payload) => self.on_data(payload, &mut out),
        }
        out
    }

    /// Fire every timer due at `now_ms`, earliest first.
    pub fn on_timers(&mut self, now_ms: u64) -> Vec<Action> {
        let mut out = Vec::new();
        if self.terminated {
            return out;
        }

        while let Some(kind) = self.timers.pop_expired(now_ms) {
            match kind {
                TimerKind::Heartbeat => self.on_heartbeat_tick(now_ms, &mut out),
                TimerKind::Decision => self.on_decision_timeout(now_ms, &mut out),
                TimerKind::Watchdog => self.check_leader_liveness(now_ms, &mut out),
                TimerKind::Reannounce => self.announce(&mut out),
                TimerKind::Fallback => self.on_fallback(now_ms, &mut out),
            }
        }
        out
    }
}
