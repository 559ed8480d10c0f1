//! Request/reply matching over the transport.
//!
//! Every outbound command gets a fresh envelope id and an entry in the
//! pending table. An inbound envelope whose `replyto` names a pending id
//! resolves that call; chunked replies are buffered per `replyto` until
//! every fragment has arrived. When a connection generation drops, every
//! call issued on it is rejected with [`QueueError::ConnectionClosed`].
//! Nothing is resubmitted automatically. A call whose future is dropped
//! before its reply arrives releases its table entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::envelope::{ChunkBuffer, Envelope};
use crate::error::QueueError;
use crate::messages::remote_error;
use crate::transport::{EnvelopeHandler, EnvelopeSink};

/// A (reassembled) reply to a correlated call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub command: String,
    pub data: String,
}

impl Reply {
    /// The remote failure message, if this reply is an error.
    pub fn remote_error(&self) -> Option<String> {
        remote_error(&self.command, &self.data)
    }

    /// Deserialize the reply payload.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, QueueError> {
        serde_json::from_str(&self.data).map_err(|e| {
            QueueError::Protocol(format!("Unexpected '{}' reply payload: {e}", self.command))
        })
    }
}

struct PendingCall {
    generation: u64,
    tx: oneshot::Sender<Result<Reply, QueueError>>,
}

/// Removes a call's pending entry and partial chunks when the call
/// finishes or is abandoned.
struct PendingGuard<'a> {
    correlator: &'a Correlator,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.correlator.pending().remove(self.id).is_some() {
            tracing::debug!(id = %self.id, "Abandoned call released");
        }
        self.correlator.chunks().remove(self.id);
    }
}

/// Both tables are only locked briefly and never across an `.await`.
pub struct Correlator {
    sink: Arc<dyn EnvelopeSink>,
    pending: Mutex<HashMap<String, PendingCall>>,
    chunks: Mutex<HashMap<String, ChunkBuffer>>,
}

impl Correlator {
    pub fn new(sink: Arc<dyn EnvelopeSink>) -> Self {
        Self {
            sink,
            pending: Mutex::new(HashMap::new()),
            chunks: Mutex::new(HashMap::new()),
        }
    }

    /// Send `command` with a raw `data` payload and wait for its reply.
    pub async fn call(&self, command: &str, data: impl Into<String>) -> Result<Reply, QueueError> {
        self.call_envelope(Envelope::new(command, data)).await
    }

    /// Send `command` with `payload` serialized as JSON and wait for its
    /// reply.
    pub async fn call_json<T: Serialize + ?Sized>(
        &self,
        command: &str,
        payload: &T,
    ) -> Result<Reply, QueueError> {
        self.call_envelope(Envelope::with_payload(command, payload)?).await
    }

    /// Send a prepared envelope and wait for the envelope replying to its
    /// id. Error replies resolve as [`QueueError::Remote`].
    pub async fn call_envelope(&self, envelope: Envelope) -> Result<Reply, QueueError> {
        let id = envelope.id.clone();
        let command = envelope.command.clone();
        let (tx, rx) = oneshot::channel();

        // Register before sending so a fast reply cannot miss the entry.
        self.pending().insert(
            id.clone(),
            PendingCall {
                generation: self.sink.generation(),
                tx,
            },
        );
        let _guard = PendingGuard {
            correlator: self,
            id: &id,
        };

        self.sink.send(envelope)?;
        tracing::debug!(id = %id, command = %command, "Awaiting reply");

        let reply = rx.await.map_err(|_| QueueError::ConnectionClosed)??;
        if let Some(message) = reply.remote_error() {
            tracing::warn!(id = %id, command = %command, error = %message, "Remote error reply");
            return Err(QueueError::Remote(message));
        }
        Ok(reply)
    }

    /// Number of calls still waiting for a reply.
    pub async fn pending_count(&self) -> usize {
        self.pending().len()
    }

    /// Reject every pending call issued on `generation` or earlier.
    pub async fn reject_generation(&self, generation: u64) {
        let mut pending = self.pending();
        let stale: Vec<String> = pending
            .iter()
            .filter(|(_, call)| call.generation <= generation)
            .map(|(id, _)| id.clone())
            .collect();

        if !stale.is_empty() {
            tracing::warn!(generation, count = stale.len(), "Rejecting pending calls on closed connection");
        }
        for id in stale {
            if let Some(call) = pending.remove(&id) {
                let _ = call.tx.send(Err(QueueError::ConnectionClosed));
            }
        }
        drop(pending);

        self.chunks().clear();
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, PendingCall>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn chunks(&self) -> MutexGuard<'_, HashMap<String, ChunkBuffer>> {
        self.chunks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn resolve(&self, envelope: &Envelope) {
        let Some(replyto) = envelope.replyto.as_deref() else {
            return;
        };

        let mut pending = self.pending();
        if !pending.contains_key(replyto) {
            tracing::trace!(replyto, command = %envelope.command, "Dropping unmatched reply");
            return;
        }

        let data = if envelope.is_chunked() {
            let mut chunks = self.chunks();
            let buffer = chunks
                .entry(replyto.to_string())
                .or_insert_with(|| ChunkBuffer::new(envelope.chunk_count()));
            match buffer.insert(envelope.chunk_index(), &envelope.data) {
                Some(data) => {
                    chunks.remove(replyto);
                    data
                }
                None => return,
            }
        } else {
            envelope.data.clone()
        };

        if let Some(call) = pending.remove(replyto) {
            let reply = Reply {
                command: envelope.command.clone(),
                data,
            };
            // The caller may have given up; nothing to do then.
            let _ = call.tx.send(Ok(reply));
        }
    }
}

#[async_trait]
impl EnvelopeHandler for Correlator {
    async fn on_envelope(&self, envelope: &Envelope) {
        self.resolve(envelope).await;
    }

    async fn on_disconnect(&self, generation: u64) {
        self.reject_generation(generation).await;
    }
}
