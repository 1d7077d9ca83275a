//! Leader decision and liveness.
//!
//! A starting peer announces itself and waits one decision timeout for a
//! heartbeat. Silence means nobody leads, so it takes over. A leader
//! publishes its clock every T; a follower that hears nothing for 2T
//! (plus a small identity-derived stagger) promotes itself.
//!
//! Duplicate leaders can still appear under delayed delivery. They are
//! tolerated: a leader ignores foreign heartbeats.

use tracing::{debug, info, warn};

use super::{Action, Peer, Role, Roster, Succession, TimerKind};
use crate::protocol::{ControlMessage, Notification};

impl Peer {
    pub(super) fn decide_role(&mut self, now_ms: u64, out: &mut Vec<Action>) {
        self.role = Role::Candidate {
            contenders: Vec::new(),
        };
        self.announce(out);
        self.timers
            .arm(TimerKind::Decision, now_ms + self.config.decision_ms());
        self.timers
            .arm(TimerKind::Heartbeat, now_ms + self.config.heartbeat_ms());
    }

    /// Take over the data source.
    pub(super) fn become_leader(&mut self, succession: Succession, now_ms: u64, out: &mut Vec<Action>) {
        if self.is_leader() {
            return;
        }

        for kind in [
            TimerKind::Decision,
            TimerKind::Watchdog,
            TimerKind::Fallback,
            TimerKind::Reannounce,
        ] {
            self.timers.cancel(kind);
        }

        let roster = match &succession {
            Succession::Inherited(followers) => Roster::seeded(
                followers
                    .iter()
                    .copied()
                    .filter(|identity| *identity != self.identity),
            ),
            Succession::Fresh => match &self.role {
                Role::Candidate { contenders } => Roster::seeded(contenders.iter().copied()),
                _ => Roster::new(),
            },
            Succession::Recovered => Roster::new(),
        };

        self.publish_heartbeat(now_ms, out);
        self.timers
            .arm(TimerKind::Heartbeat, now_ms + self.config.heartbeat_ms());

        let followers = roster.len();
        self.role = Role::Leader(roster);
        self.term += 1;

        if succession == Succession::Recovered {
            out.push(Action::Publish(Notification::Control(
                ControlMessage::Reannounce,
            )));
        }
        out.push(Action::StartSource { term: self.term });

        info!(
            identity = %self.identity,
            term = self.term,
            followers,
            succession = ?succession,
            "Became leader"
        );
    }

    pub(super) fn publish_heartbeat(&self, now_ms: u64, out: &mut Vec<Action>) {
        out.push(Action::Publish(Notification::Heartbeat(now_ms)));
    }

    pub(super) fn on_heartbeat(&mut self, timestamp: u64, now_ms: u64) {
        if self.is_leader() {
            debug!(identity = %self.identity, timestamp, "Heartbeat from another leader");
            return;
        }

        self.heartbeat.leader_timestamp = Some(timestamp);
        self.heartbeat.observed_at = Some(now_ms);
        self.timers.cancel(TimerKind::Decision);
        self.timers.cancel(TimerKind::Fallback);
        self.arm_watchdog(now_ms);

        if self.role != Role::Follower {
            info!(identity = %self.identity, from = ?self.state(), "Following leader");
            self.role = Role::Follower;
        }
    }

    pub(super) fn on_heartbeat_tick(&mut self, now_ms: u64, out: &mut Vec<Action>) {
        self.timers
            .arm(TimerKind::Heartbeat, now_ms + self.config.heartbeat_ms());

        match self.role {
            Role::Leader(_) => self.publish_heartbeat(now_ms, out),
            Role::Follower => self.check_leader_liveness(now_ms, out),
            Role::Unknown | Role::Candidate { .. } => {}
        }
    }

    pub(super) fn on_decision_timeout(&mut self, now_ms: u64, out: &mut Vec<Action>) {
        let Role::Candidate { contenders } = &self.role else {
            return;
        };

        match contenders.iter().max().copied() {
            Some(rival) if rival > self.identity => {
                // Contested window: the highest announcer leads, everyone
                // else listens for its heartbeat during another window
                debug!(identity = %self.identity, rival = %rival, "Decision contested, deferring");
                self.role = Role::Candidate {
                    contenders: Vec::new(),
                };
                self.announce(out);
                self.timers
                    .arm(TimerKind::Decision, now_ms + self.config.decision_ms());
            }
            _ => self.become_leader(Succession::Fresh, now_ms, out),
        }
    }

    /// Silence longer than this promotes a follower.
    pub(super) fn leader_timeout_ms(&self) -> u64 {
        2 * self.config.heartbeat_ms()
            + self.identity.jitter(self.config.watchdog_stagger).as_millis() as u64
    }

    pub(super) fn arm_watchdog(&mut self, now_ms: u64) {
        let at = now_ms + self.leader_timeout_ms() + 1;
        self.timers.arm(TimerKind::Watchdog, at);
    }

    pub(super) fn check_leader_liveness(&mut self, now_ms: u64, out: &mut Vec<Action>) {
        if self.role != Role::Follower {
            return;
        }
        let Some(observed_at) = self.heartbeat.observed_at else {
            self.arm_watchdog(now_ms);
            return;
        };

        let silent_for = now_ms.saturating_sub(observed_at);
        if silent_for > self.leader_timeout_ms() {
            warn!(identity = %self.identity, silent_for_ms = silent_for, "Leader silent, promoting");
            self.become_leader(Succession::Recovered, now_ms, out);
        }
    }

    pub(super) fn on_fallback(&mut self, now_ms: u64, out: &mut Vec<Action>) {
        if self.is_leader() {
            return;
        }
        info!(identity = %self.identity, "No leader after renegotiation window, promoting");
        self.become_leader(Succession::Recovered, now_ms, out);
    }
}
