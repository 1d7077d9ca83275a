//! `SharedBus` over a hub connection.
//!
//! Writes are queued to a writer task and return immediately; a reader
//! task hands every frame the hub relays to the subscribed listeners.
//! The hub never echoes a frame to its writer, so neither does this bus.

use crate::frame::BusFrame;
use anyhow::Result;
use futures::{SinkExt, StreamExt};
use relay_core::bus::{self, BusError, ListenerSet, Listener, SharedBus, Subscription, check_capacity};
use relay_core::{Channel, MAX_MESSAGE_LEN};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A peer's connection to the bus hub.
pub struct WsBus {
    outgoing: mpsc::UnboundedSender<BusFrame>,
    listeners: Arc<ListenerSet>,
    /// Closed when the writer task exits
    writer_alive: watch::Receiver<()>,
    read_task: Option<JoinHandle<()>>,
    capacity: usize,
}

impl WsBus {
    /// Connect to a hub, e.g. `ws://127.0.0.1:9470`.
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(url).await?;
        info!("Connected to hub at {}", url);

        let (write, read) = ws_stream.split();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (alive_tx, writer_alive) = watch::channel(());
        let listeners = Arc::new(ListenerSet::new());

        tokio::spawn(Self::write_loop(write, outgoing_rx, alive_tx));

        let read_listeners = Arc::clone(&listeners);
        let read_url = url.to_string();
        let read_task = tokio::spawn(async move {
            Self::read_loop(read_url, read, read_listeners).await;
        });

        Ok(Self {
            outgoing,
            listeners,
            writer_alive,
            read_task: Some(read_task),
            capacity: MAX_MESSAGE_LEN,
        })
    }

    /// Reject values longer than `capacity` characters.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Completes once the writer task has exited: after the bus is dropped
    /// and every queued frame has been sent, or when the hub goes away.
    pub fn flushed(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut alive = self.writer_alive.clone();
        async move { while alive.changed().await.is_ok() {} }
    }

    async fn write_loop(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut outgoing: mpsc::UnboundedReceiver<BusFrame>,
        _alive: watch::Sender<()>,
    ) {
        while let Some(frame) = outgoing.recv().await {
            let data = match frame.to_binary() {
                Ok(data) => data,
                Err(e) => {
                    error!("Failed to encode {} frame: {}", frame.channel, e);
                    continue;
                }
            };
            if let Err(e) = write.send(Message::Binary(data.into())).await {
                error!("Failed to send {} frame to hub: {}", frame.channel, e);
                return;
            }
        }

        // Bus dropped and queue drained
        let _ = write.send(Message::Close(None)).await;
        debug!("Hub writer finished");
    }

    async fn read_loop(
        url: String,
        mut read: futures::stream::SplitStream<WsStream>,
        listeners: Arc<ListenerSet>,
    ) {
        loop {
            match read.next().await {
                Some(Ok(msg)) => {
                    let data = match msg {
                        Message::Binary(data) => data.to_vec(),
                        Message::Text(text) => text.into_bytes(),
                        Message::Ping(_) | Message::Pong(_) => continue,
                        Message::Close(_) => {
                            debug!("Received close frame from {}", url);
                            break;
                        }
                        Message::Frame(_) => continue,
                    };

                    match BusFrame::from_binary(&data) {
                        Ok(frame) => listeners.emit(frame.channel, &frame.value),
                        Err(e) => warn!("Dropping frame from {}: {}", url, e),
                    }
                }
                Some(Err(e)) => {
                    match e {
                        WsError::ConnectionClosed | WsError::AlreadyClosed => {
                            debug!("Hub connection {} closed", url);
                        }
                        _ => {
                            error!("WebSocket error on {}: {}", url, e);
                        }
                    }
                    break;
                }
                None => {
                    debug!("Hub connection {} stream ended", url);
                    break;
                }
            }
        }
        warn!("Lost connection to hub at {}", url);
    }
}

impl SharedBus for WsBus {
    fn write(&self, channel: Channel, value: &str) -> bus::Result<()> {
        check_capacity(value, self.capacity)?;
        self.outgoing
            .send(BusFrame::new(channel, value))
            .map_err(|_| BusError::Disconnected)
    }

    fn subscribe(&self, listener: Listener) -> Subscription {
        self.listeners.subscribe(listener)
    }
}

impl Drop for WsBus {
    fn drop(&mut self) {
        // The writer drains on its own once `outgoing` closes
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}
