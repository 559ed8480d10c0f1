//! Domain types shared by every rpaflow crate.
//!
//! This crate has zero internal dependencies so it can be used by the
//! queue, store and engine layers alike. It owns the execution status
//! state machine, the execution record itself, and the recurrence rule
//! evaluation used by scheduled events.

pub mod error;
pub mod execution;
pub mod recurrence;
pub mod schedule;
pub mod session;
pub mod types;

pub use error::CoreError;
pub use execution::{ExecutionRecord, ExecutionRequest, ExecutionStatus, WorkerIdentity};
pub use recurrence::{Frequency, RecurrenceRule};
pub use schedule::ScheduledEvent;
pub use session::Session;
pub use types::{DocId, Timestamp};
