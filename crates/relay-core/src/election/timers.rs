//! Named, cancellable timers kept in the peer's state record.
//!
//! Timers are plain deadlines in milliseconds. The driver asks for
//! [`Timers::next_deadline`], sleeps until then, and hands control back to
//! the peer, which pops expired timers one at a time.

use std::collections::HashMap;

/// Every timer a peer can have armed. At most one of each kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    /// Repeating every T: leaders publish, followers check liveness.
    Heartbeat,
    /// One-shot leadership decision after startup.
    Decision,
    /// Leader silence timeout (2T plus stagger since the last heartbeat).
    Watchdog,
    /// Jittered re-announce after a `Reannounce` request.
    Reannounce,
    /// Jittered self-promotion after an empty handoff.
    Fallback,
}

#[derive(Debug, Default, Clone)]
pub struct Timers {
    deadlines: HashMap<TimerKind, u64>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `kind` to fire at `at_ms`, replacing any earlier deadline.
    pub fn arm(&mut self, kind: TimerKind, at_ms: u64) {
        self.deadlines.insert(kind, at_ms);
    }

    /// Cancel `kind`. Returns true if it was armed.
    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        self.deadlines.remove(&kind).is_some()
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.deadlines.contains_key(&kind)
    }

    pub fn deadline(&self, kind: TimerKind) -> Option<u64> {
        self.deadlines.get(&kind).copied()
    }

    /// Earliest armed deadline.
    pub fn next_deadline(&self) -> Option<u64> {
        self.deadlines.values().copied().min()
    }

    /// Remove and return the earliest timer due at `now_ms`.
    ///
    /// Ties resolve in `TimerKind` order so expiry is deterministic.
    pub fn pop_expired(&mut self, now_ms: u64) -> Option<TimerKind> {
        let kind = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= now_ms)
            .min_by_key(|(kind, at)| (**at, **kind))
            .map(|(kind, _)| *kind)?;
        self.deadlines.remove(&kind);
        Some(kind)
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}
