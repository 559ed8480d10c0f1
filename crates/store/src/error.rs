use rpaflow_queue::QueueError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The broker round-trip failed (not connected, connection closed,
    /// malformed reply).
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// The entity store rejected the command.
    #[error("Entity store error: {0}")]
    Remote(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{collection} document {id} not found")]
    NotFound { collection: String, id: String },

    /// A document handed to the store is not a JSON object or lacks `_id`.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
}

impl StoreError {
    /// Map a broker error, surfacing remote failures as store failures.
    pub(crate) fn from_queue(err: QueueError) -> Self {
        match err {
            QueueError::Remote(message) => Self::Remote(message),
            other => Self::Queue(other),
        }
    }
}
