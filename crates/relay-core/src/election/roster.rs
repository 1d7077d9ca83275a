//! Leader-side follower roster and graceful departure.
//!
//! The roster exists only while its owner leads. Followers never mutate
//! it; they only announce (join) and leave. When the leader terminates it
//! hands the roster, in join order, to the followers, and the first one
//! listed takes over.

use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::{Action, Peer, Role, Succession, TimerKind};
use crate::peer_id::PeerIdentity;
use crate::protocol::{ControlMessage, Notification};

/// A follower and its join-order rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterEntry {
    pub identity: PeerIdentity,
    pub rank: u64,
}

/// Followers known to a leader, ranked by join order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    ranks: HashMap<PeerIdentity, u64>,
    next_rank: u64,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Roster inherited through a handoff; ranks follow list order.
    pub fn seeded(followers: impl IntoIterator<Item = PeerIdentity>) -> Self {
        let mut roster = Self::new();
        for identity in followers {
            roster.admit(identity);
        }
        roster
    }

    /// Record a follower at the next rank. A follower already present
    /// keeps its original rank.
    ///
    /// Returns the follower's rank.
    pub fn admit(&mut self, identity: PeerIdentity) -> u64 {
        if let Some(rank) = self.ranks.get(&identity) {
            return *rank;
        }
        let rank = self.next_rank;
        self.next_rank += 1;
        self.ranks.insert(identity, rank);
        rank
    }

    /// Drop a follower. Returns its rank if it was present.
    pub fn remove(&mut self, identity: &PeerIdentity) -> Option<u64> {
        self.ranks.remove(identity)
    }

    pub fn contains(&self, identity: &PeerIdentity) -> bool {
        self.ranks.contains_key(identity)
    }

    pub fn rank_of(&self, identity: &PeerIdentity) -> Option<u64> {
        self.ranks.get(identity).copied()
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    /// Entries sorted by rank.
    pub fn entries(&self) -> Vec<RosterEntry> {
        let mut entries: Vec<RosterEntry> = self
            .ranks
            .iter()
            .map(|(identity, rank)| RosterEntry {
                identity: *identity,
                rank: *rank,
            })
            .collect();
        entries.sort_by_key(|entry| entry.rank);
        entries
    }

    /// Follower identities in join order.
    pub fn in_join_order(&self) -> Vec<PeerIdentity> {
        self.entries().into_iter().map(|entry| entry.identity).collect()
    }
}

impl Peer {
    /// A follower is leaving, or a peer gave up a contested identifier.
    pub(super) fn on_leave(&mut self, identity: PeerIdentity, out: &mut Vec<Action>) {
        if identity == self.identity {
            // Retracted by a peer that lost the collision; we still hold it
            if !self.is_leader() {
                debug!(identity = %self.identity, "Our identifier was retracted, announcing again");
                self.announce(out);
            }
            return;
        }
        self.forget(identity);
    }

    /// The leader departed and named its followers in join order.
    pub(super) fn on_handoff(
        &mut self,
        successors: Vec<PeerIdentity>,
        now_ms: u64,
        out: &mut Vec<Action>,
    ) {
        if self.is_leader() {
            warn!(
                identity = %self.identity,
                "Ignoring handoff from another leader"
            );
            return;
        }

        // The handoff is the departed leader's last sign of life
        self.heartbeat.observed_at = Some(now_ms);
        self.timers.cancel(TimerKind::Decision);
        self.role = Role::Follower;

        match successors.split_first() {
            Some((first, rest)) if *first == self.identity => {
                info!(identity = %self.identity, followers = rest.len(), "Taking over from departed leader");
                self.become_leader(Succession::Inherited(rest.to_vec()), now_ms, out);
            }
            Some((first, _)) => {
                debug!(successor = %first, "Awaiting successor heartbeat");
                self.arm_watchdog(now_ms);
            }
            None => {
                let delay = self.identity.jitter(self.config.jitter_modulus)
                    + self.config.renegotiate_backoff;
                debug!(delay_ms = delay.as_millis() as u64, "Empty handoff, renegotiating");
                self.timers
                    .arm(TimerKind::Fallback, now_ms + delay.as_millis() as u64);
            }
        }
    }

    /// Graceful termination.
    ///
    /// A leader with followers hands off to them, a follower announces its
    /// departure. After this the peer ignores every input.
    pub fn shutdown(&mut self, _now_ms: u64) -> Vec<Action> {
        let mut out = Vec::new();
        if self.terminated {
            return out;
        }

        match std::mem::replace(&mut self.role, Role::Follower) {
            Role::Leader(roster) => {
                let successors: Vec<PeerIdentity> = roster
                    .in_join_order()
                    .into_iter()
                    .filter(|identity| *identity != self.identity)
                    .collect();
                if successors.is_empty() {
                    debug!(identity = %self.identity, "Leader leaving with no followers");
                } else {
                    info!(identity = %self.identity, successor = %successors[0], "Handing off leadership");
                    out.push(Action::Publish(Notification::Control(
                        ControlMessage::Handoff(successors),
                    )));
                }
            }
            Role::Follower => {
                debug!(identity = %self.identity, "Follower leaving");
                out.push(Action::Publish(Notification::Control(ControlMessage::Leave(
                    self.identity,
                ))));
            }
            other => self.role = other,
        }

        self.timers.clear();
        self.terminated = true;
        out
    }
}
