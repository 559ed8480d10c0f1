//! Persistent WebSocket connection to the message broker.
//!
//! [`Transport`] owns exactly one connection at a time. Calling
//! [`Transport::connect`] spawns a long-lived task that connects, runs
//! the session (pings, outbound writes, inbound delivery) and
//! reconnects with a fixed delay whenever the connection drops, until
//! [`Transport::shutdown`] is called.
//!
//! Inbound envelopes are handed to every registered
//! [`EnvelopeHandler`] in arrival order. Lifecycle changes are broadcast
//! as [`TransportEvent`]s.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::envelope::{commands, Envelope};
use crate::error::QueueError;
use crate::events::TransportEvent;
use crate::reconnect::{reconnect_loop, ReconnectConfig};

/// Broadcast channel capacity for lifecycle events.
const EVENT_CHANNEL_CAPACITY: usize = 64;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Receives every inbound envelope, in arrival order.
#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    async fn on_envelope(&self, envelope: &Envelope);

    /// Called once the connection identified by `generation` is gone.
    async fn on_disconnect(&self, _generation: u64) {}
}

/// Outbound half of the transport, as seen by the correlator.
pub trait EnvelopeSink: Send + Sync {
    /// Queue an envelope for writing. Fails only when not connected.
    fn send(&self, envelope: Envelope) -> Result<(), QueueError>;

    /// Generation of the current (or most recent) connection.
    fn generation(&self) -> u64;
}

/// Shared handle to the broker connection. Cheap to clone.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

struct Inner {
    url: String,
    config: ReconnectConfig,
    /// Writer channel of the live session, `None` while disconnected.
    outbound: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    generation: AtomicU64,
    connected: watch::Sender<bool>,
    handlers: RwLock<Vec<Arc<dyn EnvelopeHandler>>>,
    event_tx: broadcast::Sender<TransportEvent>,
    started: AtomicBool,
    cancel: CancellationToken,
}

impl Transport {
    /// Create a transport for `url` (e.g. `wss://broker/ws`). Nothing is
    /// opened until [`connect`](Self::connect) is called.
    pub fn new(url: impl Into<String>, config: ReconnectConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (connected, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                config,
                outbound: Mutex::new(None),
                generation: AtomicU64::new(0),
                connected,
                handlers: RwLock::new(Vec::new()),
                event_tx,
                started: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Start the connection task (once) and wait until connected.
    ///
    /// Calling this again while connected returns immediately.
    pub async fn connect(&self) -> Result<(), QueueError> {
        if !self.inner.started.swap(true, Ordering::SeqCst) {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                tracing::info!(url = %inner.url, "Starting broker connection task");
                run_connection_loop(&inner).await;
                tracing::info!("Broker connection task exited");
            });
        }
        self.wait_connected().await
    }

    /// Wait until a connection is live. Fails if the transport is shut
    /// down first.
    pub async fn wait_connected(&self) -> Result<(), QueueError> {
        let mut rx = self.inner.connected.subscribe();
        tokio::select! {
            _ = self.inner.cancel.cancelled() => Err(QueueError::ConnectionClosed),
            result = rx.wait_for(|connected| *connected) => result
                .map(|_| ())
                .map_err(|_| QueueError::ConnectionClosed),
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    /// Register a handler for inbound envelopes.
    pub async fn on_message(&self, handler: Arc<dyn EnvelopeHandler>) {
        self.inner.handlers.write().await.push(handler);
    }

    /// Subscribe to connection lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Token cancelled when the transport shuts down.
    pub fn cancellation(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Close the connection and stop reconnecting. Pending correlated
    /// calls are rejected by the session teardown.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down broker transport");
        self.inner.cancel.cancel();
    }
}

impl EnvelopeSink for Transport {
    fn send(&self, envelope: Envelope) -> Result<(), QueueError> {
        match self.inner.outbound().as_ref() {
            Some(tx) => tx.send(envelope).map_err(|_| QueueError::NotConnected),
            None => Err(QueueError::NotConnected),
        }
    }

    fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }
}

impl Inner {
    fn outbound(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Envelope>>> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drive one connected session until the socket drops or the
    /// transport is cancelled.
    async fn run_session(&self, ws: WsStream) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, mut rx) = mpsc::unbounded_channel();
        *self.outbound() = Some(tx);
        self.connected.send_replace(true);
        let _ = self.event_tx.send(TransportEvent::Connected { generation });
        tracing::info!(generation, url = %self.url, "Connected to message broker");

        let (mut sink, mut stream) = ws.split();
        let mut ping = tokio::time::interval(self.config.ping_interval);
        // The first tick fires immediately; pings start one interval in.
        ping.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                _ = ping.tick() => {
                    if let Err(e) = write_envelope(&mut sink, Envelope::ping(), usize::MAX).await {
                        tracing::error!(generation, error = %e, "Failed to send ping");
                        break;
                    }
                }
                Some(envelope) = rx.recv() => {
                    let command = envelope.command.clone();
                    if let Err(e) = write_envelope(&mut sink, envelope, self.config.max_chunk_bytes).await {
                        tracing::error!(generation, command = %command, error = %e, "Failed to write envelope");
                        break;
                    }
                }
                msg = stream.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.deliver(&text, generation).await;
                        }
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                            // Handled automatically by tungstenite.
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(generation, ?frame, "Broker closed the connection");
                            break;
                        }
                        Some(Ok(_)) => {
                            tracing::trace!(generation, "Ignoring non-text frame");
                        }
                        Some(Err(e)) => {
                            tracing::error!(generation, error = %e, "WebSocket receive error");
                            break;
                        }
                        None => {
                            tracing::info!(generation, "WebSocket stream exhausted");
                            break;
                        }
                    }
                }
            }
        }

        // Stop accepting writes before handlers learn about the drop, so
        // a call racing the teardown fails fast instead of hanging.
        *self.outbound() = None;
        self.connected.send_replace(false);
        let _ = self.event_tx.send(TransportEvent::Disconnected { generation });
        tracing::warn!(generation, "Disconnected from message broker");

        for handler in self.handlers.read().await.iter() {
            handler.on_disconnect(generation).await;
        }
    }

    /// Parse an inbound text frame and hand it to every handler.
    async fn deliver(&self, text: &str, generation: u64) {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(generation, error = %e, raw_message = %text, "Failed to parse envelope");
                return;
            }
        };

        if envelope.command == commands::PING && envelope.replyto.is_none() {
            tracing::trace!(generation, "Broker ping");
            return;
        }

        for handler in self.handlers.read().await.iter() {
            handler.on_envelope(&envelope).await;
        }
    }
}

/// Connect -> run session -> wait -> reconnect, until cancelled.
async fn run_connection_loop(inner: &Inner) {
    let mut socket = match open_socket(&inner.url).await {
        Ok(ws) => Some(ws),
        Err(e) => {
            tracing::warn!(error = %e, "Initial connection failed, entering reconnect loop");
            None
        }
    };

    loop {
        let ws = match socket.take() {
            Some(ws) => ws,
            None => match reconnect_loop(&inner.config, &inner.cancel, || open_socket(&inner.url)).await {
                Some(ws) => ws,
                None => return,
            },
        };

        inner.run_session(ws).await;

        if inner.cancel.is_cancelled() {
            return;
        }
        tracing::info!(
            delay_ms = inner.config.delay.as_millis() as u64,
            "Connection lost, scheduling reconnect",
        );
    }
}

async fn open_socket(url: &str) -> Result<WsStream, QueueError> {
    let (ws, _response) = connect_async(url)
        .await
        .map_err(|e| QueueError::Connection(format!("Failed to connect to {url}: {e}")))?;
    Ok(ws)
}

/// Serialize an envelope (chunking it if needed) and write it.
async fn write_envelope<S>(sink: &mut S, envelope: Envelope, max_chunk_bytes: usize) -> Result<(), QueueError>
where
    S: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    for chunk in envelope.split(max_chunk_bytes) {
        let json = chunk.to_json()?;
        sink.send(Message::Text(json))
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
    }
    Ok(())
}
