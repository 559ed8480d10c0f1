//! High-level broker client.
//!
//! [`QueueClient`] ties the [`Transport`] and the [`Correlator`]
//! together and adds the broker's session-level commands: `signin`,
//! `registerqueue`, `closequeue` and `queuemessage`. Registered queues
//! are remembered and registered again after every reconnect. Messages
//! delivered to a registered queue are routed to that queue's
//! subscriber.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rpaflow_core::Session;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::correlator::{Correlator, Reply};
use crate::envelope::{commands, ChunkBuffer, Envelope};
use crate::error::QueueError;
use crate::events::TransportEvent;
use crate::messages::{
    CloseQueueRequest, QueueMessage, RegisterQueueRequest, RegisterQueueResponse, SigninRequest,
    SigninResponse,
};
use crate::transport::{EnvelopeHandler, EnvelopeSink, Transport};

// ---------------------------------------------------------------------------
// Messaging seam
// ---------------------------------------------------------------------------

type DropHook = Box<dyn FnOnce(&str) + Send>;

/// A transient queue receiving messages addressed to it.
///
/// Dropping a queue that was not [`release`](Self::release)d runs its
/// drop hook, which the broker client uses to close the queue.
pub struct ReplyQueue {
    pub name: String,
    messages: mpsc::UnboundedReceiver<QueueMessage>,
    on_drop: Option<DropHook>,
}

impl ReplyQueue {
    pub fn new(name: impl Into<String>, messages: mpsc::UnboundedReceiver<QueueMessage>) -> Self {
        Self {
            name: name.into(),
            messages,
            on_drop: None,
        }
    }

    /// Run `hook` with the queue name if the queue is dropped unreleased.
    pub fn on_drop(mut self, hook: impl FnOnce(&str) + Send + 'static) -> Self {
        self.on_drop = Some(Box::new(hook));
        self
    }

    /// Next delivered message, or `None` once the client has shut down.
    pub async fn recv(&mut self) -> Option<QueueMessage> {
        self.messages.recv().await
    }

    /// Disarm the drop hook and return the name, for an explicit close.
    pub fn release(mut self) -> String {
        self.on_drop = None;
        std::mem::take(&mut self.name)
    }
}

impl Drop for ReplyQueue {
    fn drop(&mut self) {
        if let Some(hook) = self.on_drop.take() {
            hook(&self.name);
        }
    }
}

/// The queue operations the execution engine needs.
#[async_trait]
pub trait QueueMessaging: Send + Sync {
    /// Send a `queuemessage` envelope and wait for the broker to accept
    /// it. Does not wait for the addressed consumer.
    async fn send_message(&self, envelope: Envelope) -> Result<(), QueueError>;

    /// Register a broker-named queue and subscribe to it.
    async fn open_reply_queue(&self, session: &Session) -> Result<ReplyQueue, QueueError>;

    /// Unsubscribe from and close a queue opened by
    /// [`open_reply_queue`](Self::open_reply_queue).
    async fn close_reply_queue(&self, session: &Session, name: &str) -> Result<(), QueueError>;
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Routes `queuemessage` deliveries to per-queue subscribers.
struct QueueRouter {
    sink: Arc<dyn EnvelopeSink>,
    subscribers: RwLock<HashMap<String, mpsc::UnboundedSender<QueueMessage>>>,
    chunks: Mutex<HashMap<String, ChunkBuffer>>,
}

impl QueueRouter {
    fn new(sink: Arc<dyn EnvelopeSink>) -> Self {
        Self {
            sink,
            subscribers: RwLock::new(HashMap::new()),
            chunks: Mutex::new(HashMap::new()),
        }
    }

    async fn subscribe(&self, queuename: &str) -> mpsc::UnboundedReceiver<QueueMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().await.insert(queuename.to_string(), tx);
        rx
    }

    async fn unsubscribe(&self, queuename: &str) {
        self.subscribers.write().await.remove(queuename);
    }

    /// Drop every subscriber so their receivers observe the end.
    async fn clear(&self) {
        self.subscribers.write().await.clear();
        self.chunks.lock().await.clear();
    }

    async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Reassemble a possibly chunked delivery. `None` while incomplete.
    async fn assemble(&self, envelope: &Envelope) -> Option<String> {
        if !envelope.is_chunked() {
            return Some(envelope.data.clone());
        }
        let mut chunks = self.chunks.lock().await;
        let buffer = chunks
            .entry(envelope.id.clone())
            .or_insert_with(|| ChunkBuffer::new(envelope.chunk_count()));
        let data = buffer.insert(envelope.chunk_index(), &envelope.data)?;
        chunks.remove(&envelope.id);
        Some(data)
    }
}

#[async_trait]
impl EnvelopeHandler for QueueRouter {
    async fn on_envelope(&self, envelope: &Envelope) {
        // Replies belong to the correlator.
        if envelope.command != commands::QUEUE_MESSAGE || envelope.replyto.is_some() {
            return;
        }

        let Some(data) = self.assemble(envelope).await else {
            return;
        };

        if let Err(e) = self.sink.send(envelope.reply(commands::QUEUE_MESSAGE, "{}")) {
            tracing::warn!(id = %envelope.id, error = %e, "Failed to acknowledge queue message");
        }

        let message: QueueMessage = match serde_json::from_str(&data) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(id = %envelope.id, error = %e, "Malformed queue message");
                return;
            }
        };

        let subscribers = self.subscribers.read().await;
        match subscribers.get(&message.queuename) {
            Some(tx) => {
                tracing::debug!(queue = %message.queuename, "Routing queue message");
                if tx.send(message).is_err() {
                    tracing::debug!("Queue subscriber gone, message dropped");
                }
            }
            None => {
                tracing::debug!(queue = %message.queuename, "No subscriber for queue message");
            }
        }
    }

    /// Partial deliveries cannot complete on a new connection.
    async fn on_disconnect(&self, generation: u64) {
        let mut chunks = self.chunks.lock().await;
        if !chunks.is_empty() {
            tracing::debug!(generation, count = chunks.len(), "Discarding partial queue deliveries");
        }
        chunks.clear();
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Registration {
    queuename: String,
    jwt: String,
}

/// Session-level broker client. Cheap to clone.
#[derive(Clone)]
pub struct QueueClient {
    transport: Transport,
    correlator: Arc<Correlator>,
    router: Arc<QueueRouter>,
    registrations: Arc<Mutex<Vec<Registration>>>,
}

impl QueueClient {
    /// Wire a client onto `transport`. Handlers are installed here; call
    /// [`connect`](Self::connect) to open the connection.
    pub async fn new(transport: Transport) -> Self {
        let sink: Arc<dyn EnvelopeSink> = Arc::new(transport.clone());
        let correlator = Arc::new(Correlator::new(Arc::clone(&sink)));
        let router = Arc::new(QueueRouter::new(sink));

        transport.on_message(correlator.clone()).await;
        transport.on_message(router.clone()).await;

        let client = Self {
            transport,
            correlator,
            router,
            registrations: Arc::new(Mutex::new(Vec::new())),
        };
        client.spawn_lifecycle_task();
        client
    }

    pub async fn connect(&self) -> Result<(), QueueError> {
        self.transport.connect().await
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Send a raw command and wait for its reply.
    pub async fn call(&self, command: &str, data: impl Into<String>) -> Result<Reply, QueueError> {
        self.correlator.call(command, data).await
    }

    /// Send a typed request and parse the typed reply.
    pub async fn request<Req, Resp>(&self, command: &str, payload: &Req) -> Result<Resp, QueueError>
    where
        Req: Serialize + ?Sized + Sync,
        Resp: DeserializeOwned,
    {
        self.correlator.call_json(command, payload).await?.parse()
    }

    /// Authenticate with the broker.
    pub async fn signin(&self, username: &str, password: &str) -> Result<Session, QueueError> {
        let response: SigninResponse = self
            .request(commands::SIGNIN, &SigninRequest { username, password })
            .await?;

        let name = if response.user.username.is_empty() {
            username.to_string()
        } else {
            response.user.username
        };
        tracing::info!(user_id = %response.user.id, username = %name, "Signed in to message broker");
        Ok(Session::new(response.user.id, name, response.jwt))
    }

    /// Register a queue (broker-named when `queuename` is `None`) and
    /// remember it for re-registration after reconnects. Returns the
    /// effective queue name.
    pub async fn register_queue(
        &self,
        queuename: Option<&str>,
        session: &Session,
    ) -> Result<String, QueueError> {
        let name = register(&self.correlator, queuename, &session.jwt).await?;

        let mut registrations = self.registrations.lock().await;
        if !registrations.iter().any(|r| r.queuename == name) {
            registrations.push(Registration {
                queuename: name.clone(),
                jwt: session.jwt.clone(),
            });
        }
        Ok(name)
    }

    pub async fn close_queue(&self, queuename: &str, session: &Session) -> Result<(), QueueError> {
        self.registrations
            .lock()
            .await
            .retain(|r| r.queuename != queuename);
        self.router.unsubscribe(queuename).await;

        let request = CloseQueueRequest {
            queuename,
            jwt: &session.jwt,
        };
        self.correlator.call_json(commands::CLOSE_QUEUE, &request).await?;
        tracing::debug!(queue = %queuename, "Closed queue");
        Ok(())
    }

    /// Receive messages delivered to an already registered queue.
    pub async fn subscribe_queue(&self, queuename: &str) -> mpsc::UnboundedReceiver<QueueMessage> {
        self.router.subscribe(queuename).await
    }

    /// Names of the queues re-registered after a reconnect.
    pub async fn registered_queues(&self) -> Vec<String> {
        self.registrations
            .lock()
            .await
            .iter()
            .map(|r| r.queuename.clone())
            .collect()
    }

    /// Number of queues with a live subscriber.
    pub async fn subscription_count(&self) -> usize {
        self.router.subscriber_count().await
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
        self.transport.subscribe()
    }

    /// Close the connection. Pending calls are rejected and queue
    /// subscribers observe end-of-stream.
    pub fn shutdown(&self) {
        self.transport.shutdown();
    }

    /// Re-register queues after each reconnect; drop subscribers on
    /// shutdown.
    fn spawn_lifecycle_task(&self) {
        let mut events = self.transport.subscribe();
        let cancel: CancellationToken = self.transport.cancellation();
        let correlator = Arc::clone(&self.correlator);
        let router = Arc::clone(&self.router);
        let registrations = Arc::clone(&self.registrations);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        router.clear().await;
                        break;
                    }
                    event = events.recv() => match event {
                        Ok(TransportEvent::Connected { generation }) if generation > 1 => {
                            let snapshot = registrations.lock().await.clone();
                            for registration in snapshot {
                                match register(&correlator, Some(registration.queuename.as_str()), &registration.jwt).await {
                                    Ok(name) => {
                                        tracing::info!(generation, queue = %name, "Re-registered queue");
                                    }
                                    Err(e) => {
                                        tracing::error!(
                                            generation,
                                            queue = %registration.queuename,
                                            error = %e,
                                            "Failed to re-register queue",
                                        );
                                    }
                                }
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Lifecycle task lagged behind transport events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });
    }
}

async fn register(
    correlator: &Correlator,
    queuename: Option<&str>,
    jwt: &str,
) -> Result<String, QueueError> {
    let request = RegisterQueueRequest { queuename, jwt };
    let response: RegisterQueueResponse = correlator
        .call_json(commands::REGISTER_QUEUE, &request)
        .await?
        .parse()?;
    tracing::debug!(queue = %response.queuename, "Registered queue");
    Ok(response.queuename)
}

#[async_trait]
impl QueueMessaging for QueueClient {
    async fn send_message(&self, envelope: Envelope) -> Result<(), QueueError> {
        self.correlator.call_envelope(envelope).await.map(|_| ())
    }

    async fn open_reply_queue(&self, session: &Session) -> Result<ReplyQueue, QueueError> {
        let name = self.register_queue(None, session).await?;
        let messages = self.router.subscribe(&name).await;

        let client = self.clone();
        let session = session.clone();
        Ok(ReplyQueue::new(name, messages).on_drop(move |name| {
            let name = name.to_string();
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                tracing::warn!(queue = %name, "No runtime to close abandoned reply queue");
                return;
            };
            runtime.spawn(async move {
                if let Err(e) = client.close_queue(&name, &session).await {
                    tracing::warn!(queue = %name, error = %e, "Failed to close abandoned reply queue");
                }
            });
        }))
    }

    async fn close_reply_queue(&self, session: &Session, name: &str) -> Result<(), QueueError> {
        self.close_queue(name, session).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use serde_json::json;

    use super::*;

    struct RecordingSink {
        sent: std::sync::Mutex<Vec<Envelope>>,
        generation: AtomicU64,
    }

    impl EnvelopeSink for RecordingSink {
        fn send(&self, envelope: Envelope) -> Result<(), QueueError> {
            self.sent.lock().unwrap().push(envelope);
            Ok(())
        }

        fn generation(&self) -> u64 {
            self.generation.load(Ordering::SeqCst)
        }
    }

    fn router() -> (Arc<RecordingSink>, QueueRouter) {
        let sink = Arc::new(RecordingSink {
            sent: std::sync::Mutex::new(Vec::new()),
            generation: AtomicU64::new(1),
        });
        (sink.clone(), QueueRouter::new(sink))
    }

    fn delivery(queuename: &str, data: serde_json::Value) -> Envelope {
        let msg = QueueMessage::new(queuename, data);
        Envelope::new(commands::QUEUE_MESSAGE, serde_json::to_string(&msg).unwrap())
    }

    #[tokio::test]
    async fn delivery_is_routed_by_queue_name_and_acknowledged() {
        let (sink, router) = router();
        let mut rx = router.subscribe("reply-1").await;

        let env = delivery("reply-1", json!({"command": "invokesuccess"}));
        router.on_envelope(&env).await;

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.data["command"], "invokesuccess");

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].replyto.as_deref(), Some(env.id.as_str()));
    }

    #[tokio::test]
    async fn replies_are_left_to_the_correlator() {
        let (sink, router) = router();
        let mut rx = router.subscribe("q").await;

        let reply = delivery("q", json!({})).reply(commands::QUEUE_MESSAGE, "{}");
        router.on_envelope(&reply).await;

        assert!(rx.try_recv().is_err());
        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn chunked_delivery_is_reassembled() {
        let (_sink, router) = router();
        let mut rx = router.subscribe("q").await;

        let env = delivery("q", json!({"payload": "x".repeat(64)}));
        let parts = env.split(16);
        assert!(parts.len() > 1);
        for part in parts.iter().rev() {
            router.on_envelope(part).await;
        }

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.data["payload"].as_str().unwrap().len(), 64);
    }

    #[tokio::test]
    async fn disconnect_discards_partial_deliveries() {
        let (_sink, router) = router();
        let mut rx = router.subscribe("q").await;

        let env = delivery("q", json!({"payload": "x".repeat(64)}));
        let parts = env.split(16);
        router.on_envelope(&parts[0]).await;
        assert_eq!(router.chunks.lock().await.len(), 1);

        router.on_disconnect(1).await;
        assert!(router.chunks.lock().await.is_empty());

        // The rest of the old delivery can no longer complete it.
        for part in &parts[1..] {
            router.on_envelope(part).await;
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn reply_queue_hook_runs_only_when_dropped_unreleased() {
        let closed = Arc::new(std::sync::Mutex::new(Vec::new()));

        let record = |closed: &Arc<std::sync::Mutex<Vec<String>>>| {
            let closed = Arc::clone(closed);
            move |name: &str| closed.lock().unwrap().push(name.to_string())
        };

        let (_tx, rx) = mpsc::unbounded_channel();
        drop(ReplyQueue::new("abandoned", rx).on_drop(record(&closed)));

        let (_tx, rx) = mpsc::unbounded_channel();
        let name = ReplyQueue::new("released", rx).on_drop(record(&closed)).release();

        assert_eq!(name, "released");
        assert_eq!(*closed.lock().unwrap(), vec!["abandoned".to_string()]);
    }

    #[tokio::test]
    async fn clear_ends_subscriber_streams() {
        let (_sink, router) = router();
        let mut rx = router.subscribe("q").await;
        router.clear().await;
        assert!(rx.recv().await.is_none());
    }
}
