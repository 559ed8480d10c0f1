//! Connection lifecycle events published by the transport.

use serde::Serialize;

/// A change in the state of the broker connection.
///
/// `generation` increments with every successful connection, so
/// subscribers can tell a reconnect apart from the first connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransportEvent {
    /// The WebSocket connection was established.
    Connected { generation: u64 },

    /// The WebSocket connection was lost or shut down.
    Disconnected { generation: u64 },
}
