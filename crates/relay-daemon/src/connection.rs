//! One peer's connection to the hub.
//!
//! Wraps a WebSocket stream split in two tasks: a read task forwards
//! validated frames to the hub's event channel, and a write task drains
//! this connection's outgoing queue. A slow peer only backs up its own
//! queue.

use crate::frame::BusFrame;
use anyhow::{Result, anyhow};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, error, warn};

/// Event emitted by a connection.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A peer wrote to the bus
    Frame { conn_id: String, frame: BusFrame },
    /// Connection was closed
    Closed { conn_id: String },
}

type WsSink = futures::stream::SplitSink<WebSocketStream<TcpStream>, Message>;

/// A single WebSocket connection accepted by the hub.
pub struct HubConnection {
    /// Connection ID assigned by the hub (e.g., "conn-1")
    pub conn_id: String,
    outgoing: Option<mpsc::UnboundedSender<Vec<u8>>>,
    read_task: Option<JoinHandle<()>>,
}

impl HubConnection {
    /// Spawns the read and write tasks.
    pub fn new(
        conn_id: String,
        ws_stream: WebSocketStream<TcpStream>,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        let (write, read) = ws_stream.split();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::write_loop(conn_id.clone(), write, outgoing_rx));

        let read_conn_id = conn_id.clone();
        let read_task = tokio::spawn(async move {
            Self::read_loop(read_conn_id, read, event_tx).await;
        });

        Self {
            conn_id,
            outgoing: Some(outgoing),
            read_task: Some(read_task),
        }
    }

    async fn write_loop(
        conn_id: String,
        mut write: WsSink,
        mut outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
    ) {
        while let Some(data) = outgoing.recv().await {
            if let Err(e) = write.send(Message::Binary(data.into())).await {
                debug!("Writer for {} stopped: {}", conn_id, e);
                return;
            }
        }
        // Connection closed by the hub and queue drained
        let _ = write.send(Message::Close(None)).await;
    }

    async fn read_loop(
        conn_id: String,
        mut read: futures::stream::SplitStream<WebSocketStream<TcpStream>>,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) {
        loop {
            match read.next().await {
                Some(Ok(msg)) => {
                    let data = match msg {
                        Message::Binary(data) => data.to_vec(),
                        Message::Text(text) => text.into_bytes(),
                        Message::Ping(_) | Message::Pong(_) => continue,
                        Message::Close(_) => {
                            debug!("Received close frame from {}", conn_id);
                            break;
                        }
                        Message::Frame(_) => continue,
                    };

                    match BusFrame::from_binary(&data) {
                        Ok(frame) => {
                            let _ = event_tx.send(ConnectionEvent::Frame {
                                conn_id: conn_id.clone(),
                                frame,
                            });
                        }
                        Err(e) => {
                            warn!("Dropping frame from {}: {}", conn_id, e);
                        }
                    }
                }
                Some(Err(e)) => {
                    match e {
                        WsError::ConnectionClosed | WsError::AlreadyClosed => {
                            debug!("Connection {} closed", conn_id);
                        }
                        _ => {
                            error!("WebSocket error on {}: {}", conn_id, e);
                        }
                    }
                    break;
                }
                None => {
                    debug!("Connection {} stream ended", conn_id);
                    break;
                }
            }
        }

        let _ = event_tx.send(ConnectionEvent::Closed {
            conn_id: conn_id.clone(),
        });
    }

    /// Queue a frame for the peer. Never waits on the network.
    pub fn send(&self, data: &[u8]) -> Result<()> {
        let outgoing = self
            .outgoing
            .as_ref()
            .ok_or_else(|| anyhow!("Connection {} is closed", self.conn_id))?;
        outgoing
            .send(data.to_vec())
            .map_err(|_| anyhow!("Writer for {} has stopped", self.conn_id))
    }

    /// Close the connection gracefully once queued frames are sent.
    pub fn close(&mut self) {
        self.outgoing = None;

        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}

impl Drop for HubConnection {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}
