//! Entity-store access for the rpaflow engine.
//!
//! The store is an opaque document collection service reached through the
//! message broker. [`EntityStore`] is the narrow interface the engine
//! consumes; [`QueueEntityStore`] is the broker-backed implementation and
//! [`MemoryStore`] an in-process one used by tests and local runs.
//! Typed access per collection lives in [`repositories`].

pub mod error;
pub mod filter;
pub mod memory;
pub mod models;
pub mod queue_store;
pub mod repositories;
pub mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use queue_store::QueueEntityStore;
pub use store::{EntityStore, Query};

/// Collection names used by the engine.
pub mod collections {
    pub const EXECUTIONS: &str = "workflowinstances";
    pub const WORKER_INSTANCES: &str = "workerinstances";
    pub const SCHEDULED_EVENTS: &str = "scheduledevents";
    pub const WORKFLOWS: &str = "workflows";
    pub const USERS: &str = "users";
}
