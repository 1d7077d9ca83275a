//! Message fan-out between the data source, the bus and local consumers.
//!
//! The leader's source hands messages to [`Peer::on_source_message`]: they
//! are delivered locally right away and written to `QUEUE`. Every other
//! peer delivers what it observes on `QUEUE`. The bus never echoes, so
//! the leader sees each message exactly once.

use thiserror::Error;
use tracing::{trace, warn};

use crate::bus::{BusError, check_capacity};
use crate::election::{Action, Peer, Role};
use crate::protocol::Notification;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    /// Delivered locally but too large for the bus; followers never see it.
    #[error("Message of {len} characters exceeds channel capacity of {limit}")]
    ChannelCapacityExceeded { len: usize, limit: usize },

    #[error("Peer has stopped")]
    Stopped,

    #[error(transparent)]
    Bus(BusError),
}

impl From<BusError> for RelayError {
    fn from(error: BusError) -> Self {
        match error {
            BusError::CapacityExceeded { len, limit } => {
                RelayError::ChannelCapacityExceeded { len, limit }
            }
            other => RelayError::Bus(other),
        }
    }
}

/// Check a message against the relay limit.
pub fn check_message(message: &str, limit: usize) -> Result<(), RelayError> {
    check_capacity(message, limit)?;
    Ok(())
}

impl Peer {
    /// A message produced by the data source.
    ///
    /// Messages arriving after a demotion are still relayed: the source
    /// has no stop operation and its output is not lost.
    pub fn on_source_message(&mut self, message: String) -> Vec<Action> {
        if self.terminated {
            return Vec::new();
        }

        // Local delivery first so the leader's consumer runs before the write
        let mut out = vec![Action::Deliver(message.clone())];
        match check_message(&message, self.config.max_message_len) {
            Ok(()) => out.push(Action::Publish(Notification::Data(message))),
            Err(e) => warn!(identity = %self.identity, error = %e, "Not relaying oversized message"),
        }
        out
    }

    pub(crate) fn on_data(&mut self, payload: String, out: &mut Vec<Action>) {
        if let Role::Leader(_) = self.role {
            // Another leader's output; our own consumer is fed by our source
            trace!(identity = %self.identity, "Ignoring data from another leader");
            return;
        }
        out.push(Action::Deliver(payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinatorConfig;
    use crate::peer_id::PeerIdentity;

    fn peer(identity: u64, config: CoordinatorConfig) -> Peer {
        let mut peer = Peer::with_identity(PeerIdentity::new(identity).unwrap(), config);
        peer.start(0);
        peer
    }

    #[test]
    fn test_source_message_delivered_then_published() {
        let mut leader = peer(1, CoordinatorConfig::default());
        leader.on_timers(1000);

        let actions = leader.on_source_message("ping".into());
        assert_eq!(
            actions,
            vec![
                Action::Deliver("ping".into()),
                Action::Publish(Notification::Data("ping".into())),
            ]
        );
    }

    #[test]
    fn test_follower_delivers_queue_notifications() {
        let mut follower = peer(2, CoordinatorConfig::default());
        follower.handle(Notification::Heartbeat(10), 10);

        let actions = follower.handle(Notification::Data("ping".into()), 20);
        assert_eq!(actions, vec![Action::Deliver("ping".into())]);
    }

    #[test]
    fn test_leader_ignores_foreign_data() {
        let mut leader = peer(1, CoordinatorConfig::default());
        leader.on_timers(1000);
        assert!(leader.handle(Notification::Data("x".into()), 1100).is_empty());
    }

    #[test]
    fn test_oversized_message_only_delivered_locally() {
        let config = CoordinatorConfig {
            max_message_len: 4,
            ..CoordinatorConfig::default()
        };
        let mut leader = peer(1, config);
        leader.on_timers(1000);

        let actions = leader.on_source_message("hello".into());
        assert_eq!(actions, vec![Action::Deliver("hello".into())]);
    }

    #[test]
    fn test_check_message() {
        assert_eq!(check_message("abc", 3), Ok(()));
        assert_eq!(
            check_message("abcd", 3),
            Err(RelayError::ChannelCapacityExceeded { len: 4, limit: 3 })
        );
    }

    #[test]
    fn test_bus_errors_map_to_relay_errors() {
        assert_eq!(
            RelayError::from(BusError::CapacityExceeded { len: 9, limit: 8 }),
            RelayError::ChannelCapacityExceeded { len: 9, limit: 8 }
        );
        assert_eq!(
            RelayError::from(BusError::Disconnected),
            RelayError::Bus(BusError::Disconnected)
        );
    }

    #[test]
    fn test_stopped_peer_drops_source_messages() {
        let mut leader = peer(1, CoordinatorConfig::default());
        leader.on_timers(1000);
        leader.shutdown(1500);
        assert!(leader.on_source_message("late".into()).is_empty());
    }
}
