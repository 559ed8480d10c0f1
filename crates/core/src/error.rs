use crate::execution::ExecutionStatus;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    #[error("Status {0} is not a failure status")]
    NotAFailure(ExecutionStatus),
}
