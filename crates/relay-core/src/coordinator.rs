//! The peer's single entry point.
//!
//! [`Coordinator::init`] wires a [`Peer`] state machine to a
//! [`SharedBus`] and to the caller's hooks, then drives it from one tokio
//! task. That task is the only place the state is touched; bus
//! notifications, source messages and timer expirations are handled one
//! at a time in arrival order.
//!
//! ```no_run
//! use relay_core::{Coordinator, CoordinatorConfig, MemoryBus, PeerHooks};
//!
//! # async fn example() {
//! let bus = MemoryBus::new();
//! let hooks = PeerHooks::new(
//!     |deliver| {
//!         tokio::spawn(async move {
//!             let _ = deliver.send("tick");
//!         });
//!     },
//!     |message| println!("{message}"),
//! );
//! let handle = Coordinator::new(bus.endpoint(), CoordinatorConfig::default()).init(hooks);
//! handle.shutdown().await.ok();
//! # }
//! ```

use serde::Serialize;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info};
use web_time::{SystemTime, UNIX_EPOCH};

use crate::bus::{Listener, SharedBus, Subscription};
use crate::config::CoordinatorConfig;
use crate::election::{Action, HeartbeatRecord, LeadershipState, Peer};
use crate::peer_id::PeerIdentity;
use crate::protocol::Channel;
use crate::relay::{RelayError, check_message};

type StartHook = Box<dyn FnMut(Deliver) + Send>;
type MessageHook = Box<dyn FnMut(&str) + Send>;

/// The caller-supplied data source and message consumer.
pub struct PeerHooks {
    start: StartHook,
    on_message: MessageHook,
}

impl PeerHooks {
    /// `start` runs once per leadership term, on the coordination task, so
    /// it must return promptly; spawn the long-running source work and feed
    /// it the [`Deliver`] handle. `on_message` runs for every message on
    /// every peer.
    pub fn new(
        start: impl FnMut(Deliver) + Send + 'static,
        on_message: impl FnMut(&str) + Send + 'static,
    ) -> Self {
        Self {
            start: Box::new(start),
            on_message: Box::new(on_message),
        }
    }
}

/// Delivery callback handed to the data source.
#[derive(Clone)]
pub struct Deliver {
    inbox: mpsc::UnboundedSender<Input>,
    limit: usize,
}

impl Deliver {
    /// Hand a message to the peer for local delivery and relay.
    ///
    /// Oversized messages are still delivered locally, but followers will
    /// not see them; that case returns
    /// [`RelayError::ChannelCapacityExceeded`].
    pub fn send(&self, message: impl Into<String>) -> Result<(), RelayError> {
        let message = message.into();
        let checked = check_message(&message, self.limit);
        self.inbox
            .send(Input::Source(message))
            .map_err(|_| RelayError::Stopped)?;
        checked
    }

    /// True once the peer has terminated.
    pub fn is_closed(&self) -> bool {
        self.inbox.is_closed()
    }
}

/// Inputs serialized through the dispatch loop.
#[derive(Debug)]
enum Input {
    Bus { channel: Channel, value: String },
    Source(String),
}

enum Control {
    Shutdown(oneshot::Sender<()>),
}

/// Snapshot of a peer, published after every dispatch step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerStatus {
    pub identity: PeerIdentity,
    pub state: LeadershipState,
    /// Leadership terms started so far.
    pub term: u64,
    /// Roster size; zero unless leading.
    pub followers: usize,
    pub last_heartbeat: HeartbeatRecord,
    /// False once the peer has terminated.
    pub running: bool,
}

impl PeerStatus {
    fn of(peer: &Peer) -> Self {
        Self {
            identity: peer.identity(),
            state: peer.state(),
            term: peer.term(),
            followers: peer.roster().map(|roster| roster.len()).unwrap_or(0),
            last_heartbeat: peer.heartbeat(),
            running: !peer.is_terminated(),
        }
    }
}

/// Millisecond clock anchored to wall-clock time at init.
///
/// Offsets come from tokio's `Instant`, so paused-time tests move it.
struct Clock {
    origin: Instant,
    epoch_ms: u64,
}

impl Clock {
    fn new() -> Self {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            origin: Instant::now(),
            epoch_ms,
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch_ms + self.origin.elapsed().as_millis() as u64
    }

    fn instant_at(&self, at_ms: u64) -> Instant {
        self.origin + Duration::from_millis(at_ms.saturating_sub(self.epoch_ms))
    }
}

/// Builder for one peer.
pub struct Coordinator {
    bus: Box<dyn SharedBus>,
    config: CoordinatorConfig,
    identity: Option<PeerIdentity>,
}

impl Coordinator {
    pub fn new(bus: impl SharedBus + 'static, config: CoordinatorConfig) -> Self {
        Self {
            bus: Box::new(bus),
            config,
            identity: None,
        }
    }

    /// Use a fixed identifier instead of a random one.
    pub fn with_identity(mut self, identity: PeerIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Start participating. Must be called from within a tokio runtime.
    pub fn init(self, hooks: PeerHooks) -> CoordinatorHandle {
        let peer = match self.identity {
            Some(identity) => Peer::with_identity(identity, self.config.clone()),
            None => Peer::new(self.config.clone()),
        };

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(PeerStatus::of(&peer));

        // Subscribe before starting so no heartbeat slips past
        let bus_tx = inbox_tx.clone();
        let listener: Listener = Arc::new(move |channel: Channel, value: &str| {
            let _ = bus_tx.send(Input::Bus {
                channel,
                value: value.to_string(),
            });
        });
        let subscription = self.bus.subscribe(listener);

        let dispatcher = Dispatcher {
            peer,
            bus: self.bus,
            _subscription: subscription,
            hooks,
            deliver: Deliver {
                inbox: inbox_tx,
                limit: self.config.max_message_len,
            },
            clock: Clock::new(),
            status: status_tx,
        };
        let task = tokio::spawn(dispatcher.run(inbox_rx, control_rx));

        CoordinatorHandle {
            control: control_tx,
            status: status_rx,
            task,
        }
    }
}

/// Owns the peer state; runs on its own task.
struct Dispatcher {
    peer: Peer,
    bus: Box<dyn SharedBus>,
    _subscription: Subscription,
    hooks: PeerHooks,
    deliver: Deliver,
    clock: Clock,
    status: watch::Sender<PeerStatus>,
}

impl Dispatcher {
    async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<Input>,
        mut control: mpsc::UnboundedReceiver<Control>,
    ) {
        info!(identity = %self.peer.identity(), "Peer starting");
        let actions = self.peer.start(self.clock.now_ms());
        self.execute(actions);
        self.publish_status();

        loop {
            let deadline = self
                .peer
                .next_deadline()
                .map(|at_ms| self.clock.instant_at(at_ms));
            let timer = async move {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => pending::<()>().await,
                }
            };

            tokio::select! {
                request = control.recv() => {
                    let ack = match request {
                        Some(Control::Shutdown(ack)) => Some(ack),
                        // Handle dropped
                        None => None,
                    };
                    self.shutdown();
                    if let Some(ack) = ack {
                        let _ = ack.send(());
                    }
                    break;
                }

                Some(input) = inbox.recv() => {
                    let now_ms = self.clock.now_ms();
                    let actions = match input {
                        Input::Bus { channel, value } => {
                            self.peer.on_notification(channel, &value, now_ms)
                        }
                        Input::Source(message) => self.peer.on_source_message(message),
                    };
                    self.execute(actions);
                }

                _ = timer => {
                    let actions = self.peer.on_timers(self.clock.now_ms());
                    self.execute(actions);
                }
            }

            self.publish_status();
        }

        info!(identity = %self.peer.identity(), "Peer stopped");
    }

    fn shutdown(&mut self) {
        let actions = self.peer.shutdown(self.clock.now_ms());
        self.execute(actions);
        self.publish_status();
    }

    fn execute(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Publish(notification) => {
                    let (channel, value) = notification.encode();
                    if let Err(e) = self.bus.write(channel, &value) {
                        error!(%channel, error = %e, "Bus write failed");
                    }
                }
                Action::StartSource { term } => {
                    debug!(identity = %self.peer.identity(), term, "Starting data source");
                    (self.hooks.start)(self.deliver.clone());
                }
                Action::Deliver(message) => (self.hooks.on_message)(&message),
            }
        }
    }

    fn publish_status(&self) {
        let next = PeerStatus::of(&self.peer);
        self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

/// Handle to a running peer.
///
/// Dropping the handle shuts the peer down gracefully.
pub struct CoordinatorHandle {
    control: mpsc::UnboundedSender<Control>,
    status: watch::Receiver<PeerStatus>,
    task: JoinHandle<()>,
}

impl CoordinatorHandle {
    /// Latest status snapshot.
    pub fn status(&self) -> PeerStatus {
        self.status.borrow().clone()
    }

    /// Subscribe to status changes.
    pub fn watch(&self) -> watch::Receiver<PeerStatus> {
        self.status.clone()
    }

    /// Wait until the status satisfies `predicate`.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&PeerStatus) -> bool,
    ) -> Result<PeerStatus, RelayError> {
        let mut status = self.status.clone();
        let result = status
            .wait_for(|current| predicate(current))
            .await
            .map(|current| current.clone());
        result.map_err(|_| RelayError::Stopped)
    }

    /// Graceful termination: hand off or leave, then stop the task.
    pub async fn shutdown(self) -> Result<(), RelayError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.control
            .send(Control::Shutdown(ack_tx))
            .map_err(|_| RelayError::Stopped)?;
        ack_rx.await.map_err(|_| RelayError::Stopped)?;
        self.task.await.map_err(|_| RelayError::Stopped)
    }

    /// Stop without handing off, as if the process crashed.
    pub fn abort(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
