//! Identifier negotiation.
//!
//! A peer announces its identifier on `ROSTER`. Anyone already holding the
//! same identifier objects with a claim, and the announcer regenerates and
//! announces again. Since the bus never echoes a write to its writer, any
//! announce of our own identifier came from someone else.

use tracing::{debug, warn};

use super::{Action, Peer, Role, TimerKind};
use crate::peer_id::PeerIdentity;
use crate::protocol::{ControlMessage, Notification};

impl Peer {
    /// Publish our identifier.
    pub(super) fn announce(&self, out: &mut Vec<Action>) {
        debug!(identity = %self.identity, "Announcing");
        out.push(Action::Publish(Notification::Control(ControlMessage::Announce(
            self.identity,
        ))));
    }

    pub(super) fn on_announce(&mut self, announced: PeerIdentity, now_ms: u64, out: &mut Vec<Action>) {
        if announced == self.identity {
            warn!(identity = %self.identity, "Another peer announced our identifier, objecting");
            out.push(Action::Publish(Notification::Control(ControlMessage::Claim(
                announced,
            ))));
            // Observers drop the identifier on the claim; this puts it back
            self.announce(out);
            self.defended = Some(announced);
            return;
        }

        match &mut self.role {
            Role::Leader(roster) => {
                let rank = roster.admit(announced);
                debug!(follower = %announced, rank, "Follower joined");
                // Answer right away so the newcomer does not wait a full interval
                self.publish_heartbeat(now_ms, out);
            }
            Role::Candidate { contenders } => {
                if !contenders.contains(&announced) {
                    contenders.push(announced);
                }
            }
            Role::Unknown | Role::Follower => {}
        }
    }

    /// Drop an identifier that no peer may hold any more.
    pub(super) fn forget(&mut self, identity: PeerIdentity) {
        match &mut self.role {
            Role::Leader(roster) => {
                if roster.remove(&identity).is_some() {
                    debug!(follower = %identity, remaining = roster.len(), "Dropped follower");
                }
            }
            Role::Candidate { contenders } => contenders.retain(|c| *c != identity),
            Role::Unknown | Role::Follower => {}
        }
    }

    /// Everyone was asked to announce again; leaders are the askers.
    pub(super) fn on_reannounce_request(&mut self, now_ms: u64) {
        if self.is_leader() {
            return;
        }
        let delay = self.identity.jitter(self.config.jitter_modulus).as_millis() as u64;
        debug!(identity = %self.identity, delay_ms = delay, "Re-announce requested");
        self.timers.arm(TimerKind::Reannounce, now_ms + delay);
    }

    pub(super) fn on_claim(&mut self, claimed: PeerIdentity, out: &mut Vec<Action>) {
        if claimed != self.identity {
            self.forget(claimed);
            return;
        }
        let previous = self.identity;
        self.identity = previous.regenerate();
        warn!(previous = %previous, identity = %self.identity, "Identifier collision, regenerated");

        // Both sides objected: retract our defence of the old identifier
        if self.defended.take() == Some(previous) {
            out.push(Action::Publish(Notification::Control(ControlMessage::Leave(
                previous,
            ))));
        }
        self.announce(out);
    }
}
