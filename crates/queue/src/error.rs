/// Errors surfaced by the transport, correlator and client layers.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// No live connection to write to.
    #[error("Not connected to the message broker")]
    NotConnected,

    /// The connection dropped (or was shut down) before a reply arrived.
    #[error("Connection closed before a reply was received")]
    ConnectionClosed,

    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The broker or a remote peer answered with an error envelope.
    #[error("Remote error: {0}")]
    Remote(String),

    /// A reply arrived that does not match the expected shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
