//! Shared Bus abstraction.
//!
//! The bus is a broadcast-only key/notification store: a write persists a
//! value under a channel and notifies every *other* peer. A peer never
//! hears its own writes.
//!
//! Implementations:
//! - [`MemoryBus`]: in-process fan-out, used by tests and single-process
//!   deployments
//! - WebSocket hub client (in `relay-daemon`)

use crate::protocol::{Channel, MAX_MESSAGE_LEN, message_len};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("Value of {len} characters exceeds bus capacity of {limit}")]
    CapacityExceeded { len: usize, limit: usize },

    #[error("Bus disconnected")]
    Disconnected,

    #[error("Bus error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, BusError>;

/// Callback invoked with `(channel, value)` for every write by another peer.
pub type Listener = Arc<dyn Fn(Channel, &str) + Send + Sync>;

/// The bus as seen by one peer.
pub trait SharedBus: Send + Sync {
    /// Persist `value` under `channel` and notify the other peers.
    ///
    /// Fire-and-forget: success means the write was accepted, not that
    /// anyone received it.
    fn write(&self, channel: Channel, value: &str) -> Result<()>;

    /// Register a listener for writes made by other peers.
    fn subscribe(&self, listener: Listener) -> Subscription;
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving
/// notifications, drop it to unsubscribe.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// Thread-safe listener registry shared by bus implementations.
///
/// Wrap in `Arc` to enable subscriptions.
#[derive(Default)]
pub struct ListenerSet {
    listeners: RwLock<Vec<(usize, Listener)>>,
    next_id: AtomicUsize,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener. Returns `Subscription` that removes it on drop.
    pub fn subscribe(self: &Arc<Self>, listener: Listener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, listener));

        let set: Weak<Self> = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(set) = set.upgrade() {
                set.unsubscribe(id);
            }
        })
    }

    fn unsubscribe(&self, id: usize) {
        // emit releases its read lock before calling listeners, so this
        // never waits on ourselves
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(i, _)| *i != id);
    }

    /// Invoke every listener with the notification.
    pub fn emit(&self, channel: Channel, value: &str) {
        // Clone the list so a listener may subscribe without deadlocking
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener(channel, value);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reject values the bus cannot carry.
pub fn check_capacity(value: &str, limit: usize) -> Result<()> {
    let len = message_len(value);
    if len > limit {
        return Err(BusError::CapacityExceeded { len, limit });
    }
    Ok(())
}

struct MemoryHub {
    endpoints: RwLock<Vec<(usize, Arc<ListenerSet>)>>,
    values: RwLock<HashMap<Channel, String>>,
    next_endpoint: AtomicUsize,
    capacity: usize,
}

/// In-process shared bus.
///
/// Every [`MemoryEndpoint`] is one peer. Writes are delivered
/// synchronously, in write order, to the listeners of all other
/// endpoints, so per-writer FIFO ordering holds.
#[derive(Clone)]
pub struct MemoryBus {
    hub: Arc<MemoryHub>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::with_capacity(MAX_MESSAGE_LEN)
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bus that rejects values longer than `capacity` characters.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            hub: Arc::new(MemoryHub {
                endpoints: RwLock::new(Vec::new()),
                values: RwLock::new(HashMap::new()),
                next_endpoint: AtomicUsize::new(0),
                capacity,
            }),
        }
    }

    /// Attach a new peer to the bus.
    pub fn endpoint(&self) -> MemoryEndpoint {
        let id = self.hub.next_endpoint.fetch_add(1, Ordering::Relaxed);
        let listeners = Arc::new(ListenerSet::new());
        self.hub
            .endpoints
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::clone(&listeners)));
        MemoryEndpoint {
            hub: Arc::clone(&self.hub),
            id,
            listeners,
        }
    }

    /// Current value stored under `channel`.
    pub fn value(&self, channel: Channel) -> Option<String> {
        self.hub
            .values
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&channel)
            .cloned()
    }

    /// Number of attached endpoints.
    pub fn endpoint_count(&self) -> usize {
        self.hub
            .endpoints
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

/// One peer's attachment to a [`MemoryBus`].
///
/// Dropping the endpoint detaches it: it stops receiving notifications,
/// which is how tests model a crashed peer.
pub struct MemoryEndpoint {
    hub: Arc<MemoryHub>,
    id: usize,
    listeners: Arc<ListenerSet>,
}

impl SharedBus for MemoryEndpoint {
    fn write(&self, channel: Channel, value: &str) -> Result<()> {
        check_capacity(value, self.hub.capacity)?;

        self.hub
            .values
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(channel, value.to_string());

        let others: Vec<Arc<ListenerSet>> = self
            .hub
            .endpoints
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(id, _)| *id != self.id)
            .map(|(_, listeners)| Arc::clone(listeners))
            .collect();

        for listeners in others {
            listeners.emit(channel, value);
        }
        Ok(())
    }

    fn subscribe(&self, listener: Listener) -> Subscription {
        self.listeners.subscribe(listener)
    }
}

impl Drop for MemoryEndpoint {
    fn drop(&mut self) {
        self.hub
            .endpoints
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(id, _)| *id != self.id);
    }
}
