use rpaflow_core::{CoreError, ExecutionStatus};
use rpaflow_queue::QueueError;
use rpaflow_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The configured worker principal could not be resolved.
    #[error("Worker resolution failed: {0}")]
    Resolution(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Transport failure, including connection loss and remote errors
    /// on queue commands.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// The worker reported a failure status for a synchronous execution.
    #[error("Execution {status}: {message}")]
    ExecutionFailed {
        status: ExecutionStatus,
        message: String,
    },

    #[error("Credential error: {0}")]
    Credential(#[from] jsonwebtoken::errors::Error),

    #[error("Workflow {0} not found")]
    WorkflowNotFound(String),

    #[error(transparent)]
    InvalidTransition(#[from] CoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Invalid or missing engine configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}
