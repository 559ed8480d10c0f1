//! Documents the engine reads from collections it does not own.

pub mod user;
pub mod worker_instance;
pub mod workflow;

pub use user::UserRecord;
pub use worker_instance::WorkerInstance;
pub use workflow::WorkflowDefinition;
