//! Cluster simulation on a virtual clock.
//!
//! Drives several `Peer` state machines against an in-test bus with a
//! fixed delivery latency. Nothing sleeps: the simulation jumps from one
//! event (message arrival or timer deadline) to the next, so timing
//! assertions are exact.

use std::collections::{HashSet, VecDeque};

use relay_core::{
    Action, ControlMessage, CoordinatorConfig, LeadershipState, Notification, Peer, PeerIdentity,
};

const LATENCY_MS: u64 = 5;

/// A notification in flight to one peer.
struct InFlight {
    at: u64,
    to: usize,
    notification: Notification,
}

struct Cluster {
    peers: Vec<Option<Peer>>,
    delivered: Vec<Vec<String>>,
    sources_started: Vec<u64>,
    in_flight: VecDeque<InFlight>,
    now: u64,
}

impl Cluster {
    fn new(peers: Vec<Peer>) -> Self {
        let n = peers.len();
        Self {
            peers: peers.into_iter().map(Some).collect(),
            delivered: vec![Vec::new(); n],
            sources_started: vec![0; n],
            in_flight: VecDeque::new(),
            now: 0,
        }
    }

    fn with_identities(ids: &[u64]) -> Self {
        Self::new(
            ids.iter()
                .map(|id| Peer::with_identity(identity(*id), CoordinatorConfig::default()))
                .collect(),
        )
    }

    fn random(n: usize) -> Self {
        Self::new((0..n).map(|_| Peer::new(CoordinatorConfig::default())).collect())
    }

    fn start(&mut self, index: usize) {
        let now = self.now;
        if let Some(peer) = self.peers[index].as_mut() {
            let actions = peer.start(now);
            self.execute(index, actions);
        }
    }

    fn start_all(&mut self) {
        for index in 0..self.peers.len() {
            self.start(index);
        }
    }

    /// Graceful termination.
    fn shutdown(&mut self, index: usize) {
        let now = self.now;
        if let Some(mut peer) = self.peers[index].take() {
            let actions = peer.shutdown(now);
            self.execute(index, actions);
        }
    }

    /// Silent death: no handoff, no further heartbeats.
    fn crash(&mut self, index: usize) {
        self.peers[index] = None;
    }

    /// The leader's data source produced a message.
    fn source(&mut self, index: usize, message: &str) {
        if let Some(peer) = self.peers[index].as_mut() {
            let actions = peer.on_source_message(message.to_string());
            self.execute(index, actions);
        }
    }

    /// Deliver a notification to every live peer as if an outside writer sent it.
    fn inject(&mut self, notification: Notification) {
        for to in 0..self.peers.len() {
            self.in_flight.push_back(InFlight {
                at: self.now + LATENCY_MS,
                to,
                notification: notification.clone(),
            });
        }
    }

    fn execute(&mut self, from: usize, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Publish(notification) => {
                    // The bus never echoes a write to its writer
                    for to in (0..self.peers.len()).filter(|to| *to != from) {
                        self.in_flight.push_back(InFlight {
                            at: self.now + LATENCY_MS,
                            to,
                            notification: notification.clone(),
                        });
                    }
                }
                Action::StartSource { .. } => self.sources_started[from] += 1,
                Action::Deliver(message) => self.delivered[from].push(message),
            }
        }
    }

    fn next_timer(&self) -> Option<u64> {
        self.peers
            .iter()
            .flatten()
            .filter_map(|peer| peer.next_deadline())
            .min()
    }

    /// Process every event up to and including `until`.
    fn run_until(&mut self, until: u64) {
        loop {
            let next_message = self.in_flight.front().map(|m| m.at);
            let next = match (next_message, self.next_timer()) {
                (Some(a), Some(b)) => a.min(b),
                (Some(a), None) => a,
                (None, Some(b)) => b,
                (None, None) => break,
            };
            if next > until {
                break;
            }
            self.now = next;

            if next_message == Some(next) {
                if let Some(message) = self.in_flight.pop_front() {
                    let now = self.now;
                    if let Some(peer) = self.peers[message.to].as_mut() {
                        let actions = peer.handle(message.notification, now);
                        self.execute(message.to, actions);
                    }
                }
                continue;
            }

            for index in 0..self.peers.len() {
                let now = self.now;
                let due = self.peers[index]
                    .as_ref()
                    .and_then(|peer| peer.next_deadline())
                    .is_some_and(|at| at <= now);
                if due {
                    if let Some(peer) = self.peers[index].as_mut() {
                        let actions = peer.on_timers(now);
                        self.execute(index, actions);
                    }
                }
            }
        }
        self.now = until;
    }

    fn peer(&self, index: usize) -> &Peer {
        self.peers[index].as_ref().expect("peer is alive")
    }

    fn state(&self, index: usize) -> LeadershipState {
        self.peer(index).state()
    }

    fn leaders(&self) -> Vec<usize> {
        (0..self.peers.len())
            .filter(|index| {
                self.peers[*index]
                    .as_ref()
                    .is_some_and(|peer| peer.is_leader())
            })
            .collect()
    }

    fn live(&self) -> impl Iterator<Item = (usize, &Peer)> {
        self.peers
            .iter()
            .enumerate()
            .filter_map(|(index, peer)| peer.as_ref().map(|peer| (index, peer)))
    }

    fn assert_single_leader(&self) -> usize {
        let leaders = self.leaders();
        assert_eq!(leaders.len(), 1, "expected one leader, got {:?}", leaders);
        for (index, peer) in self.live() {
            if index != leaders[0] {
                assert_eq!(peer.state(), LeadershipState::Follower, "peer {}", index);
            }
        }
        leaders[0]
    }
}

fn identity(value: u64) -> PeerIdentity {
    PeerIdentity::new(value).unwrap()
}

// ============================================================================
// Election
// ============================================================================

#[test]
fn test_single_peer_leads_after_one_second() {
    let mut cluster = Cluster::random(1);
    cluster.start_all();

    cluster.run_until(999);
    assert_eq!(cluster.state(0), LeadershipState::Candidate);

    cluster.run_until(1000);
    assert_eq!(cluster.state(0), LeadershipState::Leader);
    assert!(cluster.peer(0).roster().unwrap().is_empty());
    assert_eq!(cluster.sources_started[0], 1);
}

#[test]
fn test_concurrent_start_elects_exactly_one_leader() {
    for n in [2, 3, 5, 8] {
        let mut cluster = Cluster::random(n);
        cluster.start_all();
        cluster.run_until(5_000);

        let leader = cluster.assert_single_leader();
        // The highest identifier wins a concurrent start
        let highest = cluster.live().map(|(_, peer)| peer.identity()).max();
        assert_eq!(Some(cluster.peer(leader).identity()), highest);
        let roster: HashSet<PeerIdentity> = cluster
            .peer(leader)
            .roster()
            .unwrap()
            .in_join_order()
            .into_iter()
            .collect();
        let followers: HashSet<PeerIdentity> = cluster
            .live()
            .filter(|(index, _)| *index != leader)
            .map(|(_, peer)| peer.identity())
            .collect();
        assert_eq!(roster, followers);

        cluster.run_until(15_000);
        assert_eq!(cluster.assert_single_leader(), leader);
    }
}

#[test]
fn test_fresh_leader_roster_follows_join_order() {
    let mut cluster = Cluster::with_identities(&[900, 300, 200]);
    cluster.start_all();
    cluster.run_until(5_000);

    assert_eq!(cluster.assert_single_leader(), 0);
    assert_eq!(
        cluster.peer(0).roster().unwrap().in_join_order(),
        vec![identity(300), identity(200)]
    );
}

#[test]
fn test_staggered_start_joins_existing_leader() {
    let mut cluster = Cluster::with_identities(&[500, 900, 100]);
    cluster.start(0);
    cluster.run_until(300);
    cluster.start(1);
    cluster.run_until(2_500);
    cluster.start(2);

    // The late peer hears the leader's immediate heartbeat reply
    cluster.run_until(2_500 + 2 * LATENCY_MS);
    assert_eq!(cluster.state(2), LeadershipState::Follower);

    cluster.run_until(10_000);
    let leader = cluster.assert_single_leader();
    assert_eq!(cluster.peer(leader).roster().unwrap().len(), 2);
}

#[test]
fn test_identities_unique_after_negotiation() {
    let mut cluster = Cluster::random(8);
    cluster.start_all();
    cluster.run_until(5_000);

    let ids: HashSet<PeerIdentity> = cluster.live().map(|(_, peer)| peer.identity()).collect();
    assert_eq!(ids.len(), 8);
}

#[test]
fn test_identity_collision_resolves() {
    let mut cluster = Cluster::with_identities(&[42, 42]);
    cluster.start_all();

    // Announces cross, both object, both regenerate
    cluster.run_until(2 * LATENCY_MS);
    let a = cluster.peer(0).identity();
    let b = cluster.peer(1).identity();
    assert_ne!(a, identity(42));
    assert_ne!(b, identity(42));
    assert_ne!(a, b);

    cluster.run_until(5_000);
    cluster.assert_single_leader();
    assert_ne!(cluster.peer(0).identity(), cluster.peer(1).identity());
}

#[test]
fn test_multi_way_collision_resolves() {
    let mut cluster = Cluster::with_identities(&[7, 7, 7, 7]);
    cluster.start_all();
    cluster.run_until(5_000);

    let ids: HashSet<PeerIdentity> = cluster.live().map(|(_, peer)| peer.identity()).collect();
    assert_eq!(ids.len(), 4);
    assert!(!ids.contains(&identity(7)));
    cluster.assert_single_leader();
}

// ============================================================================
// Liveness
// ============================================================================

#[test]
fn test_live_leader_is_never_replaced() {
    let mut cluster = Cluster::random(5);
    cluster.start_all();
    cluster.run_until(60_000);

    cluster.assert_single_leader();
    let terms: u64 = cluster.sources_started.iter().sum();
    assert_eq!(terms, 1, "no follower may self-promote while the leader lives");
}

#[test]
fn test_silent_leader_replaced_within_two_intervals() {
    let mut cluster = Cluster::with_identities(&[101, 202, 303]);
    cluster.start_all();
    cluster.run_until(5_000);
    assert_eq!(cluster.assert_single_leader(), 2);

    // The 5000ms heartbeat is already on the bus
    cluster.crash(2);
    let last_heartbeat_seen = 5_000 + LATENCY_MS;

    // 2T, plus the largest watchdog stagger, plus one delivery
    let bound = last_heartbeat_seen + 2_000 + 250 + LATENCY_MS;
    cluster.run_until(bound);
    let leader = cluster.assert_single_leader();
    // Smallest stagger promotes first
    assert_eq!(leader, 0);

    cluster.run_until(30_000);
    assert_eq!(cluster.assert_single_leader(), 0);
    assert_eq!(cluster.peer(0).roster().unwrap().len(), 1);
}

#[test]
fn test_no_promotion_before_two_intervals() {
    let mut cluster = Cluster::with_identities(&[101, 202, 303]);
    cluster.start_all();
    cluster.run_until(5_000);
    cluster.crash(2);

    cluster.run_until(5_000 + LATENCY_MS + 2_000);
    assert!(cluster.leaders().is_empty());
}

// ============================================================================
// Departure
// ============================================================================

#[test]
fn test_graceful_handoff_to_first_follower() {
    let mut cluster = Cluster::with_identities(&[303, 202, 101]);
    cluster.start(0);
    cluster.run_until(2_000);
    cluster.start(1);
    cluster.run_until(3_000);
    cluster.start(2);
    cluster.run_until(5_000);
    assert_eq!(
        cluster.peer(0).roster().unwrap().in_join_order(),
        vec![identity(202), identity(101)]
    );

    cluster.shutdown(0);

    // F1 takes over as soon as the handoff arrives, no timeout involved
    cluster.run_until(5_000 + LATENCY_MS);
    assert_eq!(cluster.state(1), LeadershipState::Leader);
    assert_eq!(cluster.peer(1).roster().unwrap().in_join_order(), vec![identity(101)]);
    assert_eq!(cluster.state(2), LeadershipState::Follower);

    // F2 recognizes F1 through its heartbeat
    cluster.run_until(5_000 + 2 * LATENCY_MS);
    assert_eq!(cluster.peer(2).heartbeat().observed_at, Some(5_000 + 2 * LATENCY_MS));

    cluster.run_until(30_000);
    assert_eq!(cluster.assert_single_leader(), 1);
    assert_eq!(cluster.sources_started[1], 1);
}

#[test]
fn test_graceful_handoff_after_identity_collision() {
    let mut cluster = Cluster::with_identities(&[42, 42, 10_000_000_000]);
    cluster.start_all();
    cluster.run_until(5_000);
    assert_eq!(cluster.assert_single_leader(), 2);

    // Only identifiers someone still holds are handed off
    let roster = cluster.peer(2).roster().unwrap().in_join_order();
    assert!(!roster.contains(&identity(42)));
    let mut expected = vec![cluster.peer(0).identity(), cluster.peer(1).identity()];
    let mut actual = roster.clone();
    expected.sort();
    actual.sort();
    assert_eq!(actual, expected);

    cluster.shutdown(2);
    cluster.run_until(5_000 + LATENCY_MS);
    let successor = cluster.assert_single_leader();
    assert_eq!(cluster.peer(successor).identity(), roster[0]);

    cluster.run_until(30_000);
    assert_eq!(cluster.assert_single_leader(), successor);
}

#[test]
fn test_lone_leader_departs_silently() {
    let mut cluster = Cluster::with_identities(&[10]);
    cluster.start_all();
    cluster.run_until(2_000);

    cluster.shutdown(0);
    assert!(cluster.in_flight.is_empty());
}

#[test]
fn test_follower_leave_updates_roster() {
    let mut cluster = Cluster::with_identities(&[300, 200, 100]);
    cluster.start_all();
    cluster.run_until(3_000);
    assert_eq!(cluster.peer(0).roster().unwrap().len(), 2);

    cluster.shutdown(1);
    cluster.run_until(3_000 + LATENCY_MS);
    assert_eq!(cluster.peer(0).roster().unwrap().in_join_order(), vec![identity(100)]);

    cluster.shutdown(0);
    cluster.run_until(3_000 + 2 * LATENCY_MS);
    assert_eq!(cluster.state(2), LeadershipState::Leader);
}

#[test]
fn test_empty_handoff_renegotiates() {
    let mut cluster = Cluster::with_identities(&[1234, 2345, 9999]);
    cluster.start_all();
    cluster.run_until(5_000);
    assert_eq!(cluster.assert_single_leader(), 2);

    cluster.crash(2);
    cluster.inject(Notification::Control(ControlMessage::Handoff(Vec::new())));

    // Jitter 234ms vs 345ms, plus 500ms backoff: 1234 promotes first
    cluster.run_until(5_000 + LATENCY_MS + 234 + 500);
    assert_eq!(cluster.state(0), LeadershipState::Leader);
    assert_eq!(cluster.state(1), LeadershipState::Follower);

    cluster.run_until(30_000);
    assert_eq!(cluster.assert_single_leader(), 0);
}

// ============================================================================
// Relay
// ============================================================================

#[test]
fn test_message_reaches_every_peer_once() {
    let mut cluster = Cluster::random(4);
    cluster.start_all();
    cluster.run_until(5_000);
    let leader = cluster.assert_single_leader();

    cluster.source(leader, "ping");
    // Local delivery is synchronous
    assert_eq!(cluster.delivered[leader], vec!["ping".to_string()]);
    for (index, _) in cluster.live().filter(|(index, _)| *index != leader) {
        assert!(cluster.delivered[index].is_empty());
    }

    cluster.run_until(10_000);
    for index in 0..4 {
        assert_eq!(cluster.delivered[index], vec!["ping".to_string()], "peer {}", index);
    }
}

#[test]
fn test_messages_keep_source_order() {
    let mut cluster = Cluster::random(3);
    cluster.start_all();
    cluster.run_until(5_000);
    let leader = cluster.assert_single_leader();

    let messages: Vec<String> = (0..20).map(|i| format!("m{}", i)).collect();
    for message in &messages {
        cluster.source(leader, message);
    }
    cluster.run_until(6_000);

    for index in 0..3 {
        assert_eq!(cluster.delivered[index], messages);
    }
}

#[test]
fn test_relay_continues_across_handoff() {
    let mut cluster = Cluster::with_identities(&[300, 200, 100]);
    cluster.start_all();
    cluster.run_until(3_000);

    cluster.source(0, "before");
    cluster.run_until(3_100);
    cluster.shutdown(0);
    cluster.run_until(3_200);

    let leader = cluster.assert_single_leader();
    cluster.source(leader, "after");
    cluster.run_until(4_000);

    for index in [1, 2] {
        assert_eq!(
            cluster.delivered[index],
            vec!["before".to_string(), "after".to_string()]
        );
    }
}
