//! Message-broker client library.
//!
//! Provides the wire [`Envelope`](envelope::Envelope), a persistent
//! WebSocket [`Transport`](transport::Transport) with liveness pings and
//! fixed-delay reconnection, the request/reply
//! [`Correlator`](correlator::Correlator), and the high-level
//! [`QueueClient`](client::QueueClient) that signs in, registers queues
//! and routes queue messages to subscribers.

pub mod client;
pub mod correlator;
pub mod envelope;
pub mod error;
pub mod events;
pub mod messages;
pub mod reconnect;
pub mod transport;

pub use client::{QueueClient, QueueMessaging, ReplyQueue};
pub use correlator::{Correlator, Reply};
pub use envelope::Envelope;
pub use error::QueueError;
pub use events::TransportEvent;
pub use messages::QueueMessage;
pub use transport::{EnvelopeHandler, EnvelopeSink, Transport};
