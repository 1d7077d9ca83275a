//! The bus hub.
//!
//! Every peer connects here. A frame written by one connection is relayed
//! to every other connection and never back to its writer, which is the
//! Shared Bus contract the coordinator relies on. Frames from one
//! connection are relayed in the order they were read.
//!
//! Handshakes run on their own tasks and every connection has its own
//! write queue, so the relay loop never waits on a single peer.

use crate::connection::{ConnectionEvent, HubConnection};
use crate::frame::BusFrame;
use anyhow::Result;
use relay_core::Channel;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{WebSocketStream, accept_async};
use tracing::{debug, error, info, warn};

/// How long a new connection may take to complete the WebSocket upgrade.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type Upgraded = (WebSocketStream<TcpStream>, SocketAddr);

/// Event emitted by the hub.
#[derive(Debug)]
pub enum HubEvent {
    /// A connection wrote a frame; it has not been relayed yet.
    Frame { conn_id: String, frame: BusFrame },
    /// A connection went away.
    Disconnected { conn_id: String },
}

/// WebSocket hub relaying bus frames between peers.
pub struct BusHub {
    connections: HashMap<String, HubConnection>,
    /// Last value written to each channel
    values: HashMap<Channel, String>,
    next_conn_id: u64,
    handshake_timeout: Duration,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    event_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    upgrade_tx: mpsc::UnboundedSender<Upgraded>,
    upgrade_rx: mpsc::UnboundedReceiver<Upgraded>,
}

impl Default for BusHub {
    fn default() -> Self {
        Self::new()
    }
}

impl BusHub {
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (upgrade_tx, upgrade_rx) = mpsc::unbounded_channel();

        Self {
            connections: HashMap::new(),
            values: HashMap::new(),
            next_conn_id: 1,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            event_tx,
            event_rx,
            upgrade_tx,
            upgrade_rx,
        }
    }

    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    /// Bind to an address and return the TCP listener.
    pub async fn bind(listen_addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(listen_addr).await?;
        info!("Bus hub listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Upgrade an incoming TCP connection on its own task.
    ///
    /// `serve` registers the stream once the upgrade completes.
    pub fn accept_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let upgrade_tx = self.upgrade_tx.clone();
        let limit = self.handshake_timeout;

        tokio::spawn(async move {
            match timeout(limit, accept_async(stream)).await {
                Ok(Ok(ws_stream)) => {
                    let _ = upgrade_tx.send((ws_stream, addr));
                }
                Ok(Err(e)) => {
                    // Health checks connect and close without a WebSocket handshake
                    let err_str = e.to_string();
                    if err_str.contains("Handshake not finished")
                        || err_str.contains("Connection reset")
                        || err_str.contains("unexpected EOF")
                    {
                        debug!("Connection closed before handshake from {}", addr);
                    } else {
                        error!("WebSocket upgrade failed for {}: {}", addr, e);
                    }
                }
                Err(_) => {
                    warn!("Handshake from {} timed out after {:?}", addr, limit);
                }
            }
        });
    }

    /// Start relaying for an upgraded connection.
    pub fn register(&mut self, ws_stream: WebSocketStream<TcpStream>, addr: SocketAddr) -> String {
        let conn_id = format!("conn-{}", self.next_conn_id);
        self.next_conn_id += 1;

        info!("New connection from {} (conn_id: {})", addr, conn_id);

        let conn = HubConnection::new(conn_id.clone(), ws_stream, self.event_tx.clone());
        self.connections.insert(conn_id.clone(), conn);
        conn_id
    }

    /// Wait for the next hub event.
    ///
    /// Closed connections are removed before the event is returned.
    pub async fn poll_event(&mut self) -> Option<HubEvent> {
        let event = self.event_rx.recv().await?;
        Some(self.on_connection_event(event))
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) -> HubEvent {
        match event {
            ConnectionEvent::Frame { conn_id, frame } => HubEvent::Frame { conn_id, frame },
            ConnectionEvent::Closed { conn_id } => {
                if self.connections.remove(&conn_id).is_some() {
                    info!("Connection closed: {}", conn_id);
                }
                HubEvent::Disconnected { conn_id }
            }
        }
    }

    /// Persist a frame and relay it to every connection except its writer.
    pub fn relay(&mut self, conn_id: &str, frame: &BusFrame) {
        self.values.insert(frame.channel, frame.value.clone());

        let data = match frame.to_binary() {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to encode frame from {}: {}", conn_id, e);
                return;
            }
        };
        self.broadcast_except(&data, conn_id);
        debug!(
            "Relayed {} frame from {} to {} connection(s)",
            frame.channel,
            conn_id,
            self.connections.len().saturating_sub(1)
        );
    }

    /// Queue data for all connections except one.
    pub fn broadcast_except(&self, data: &[u8], exclude_conn_id: &str) {
        for (conn_id, conn) in &self.connections {
            if conn_id == exclude_conn_id {
                continue;
            }
            if let Err(e) = conn.send(data) {
                warn!("Failed to relay to {}: {}", conn_id, e);
            }
        }
    }

    /// Last value written to `channel`.
    pub fn value(&self, channel: Channel) -> Option<&str> {
        self.values.get(&channel).map(String::as_str)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Close every connection.
    pub fn close_all(&mut self) {
        for (_, mut conn) in self.connections.drain() {
            conn.close();
        }
    }

    /// Accept connections and relay frames until `shutdown` completes.
    pub async fn serve(mut self, listener: TcpListener, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            self.accept_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }

                Some((ws_stream, addr)) = self.upgrade_rx.recv() => {
                    self.register(ws_stream, addr);
                }

                Some(event) = self.event_rx.recv() => {
                    match self.on_connection_event(event) {
                        HubEvent::Frame { conn_id, frame } => {
                            self.relay(&conn_id, &frame);
                        }
                        HubEvent::Disconnected { conn_id } => {
                            debug!("{} connection(s) remain after {} left", self.connection_count(), conn_id);
                        }
                    }
                }

                _ = &mut shutdown => {
                    info!("Hub shutting down");
                    break;
                }
            }
        }

        self.close_all();
    }
}
