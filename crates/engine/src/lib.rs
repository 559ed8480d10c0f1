//! Execution dispatch, reconciliation and recurrence triggering.
//!
//! - [`Dispatcher`] submits invoke commands to the worker and records
//!   each attempt as an [`ExecutionRecord`](rpaflow_core::ExecutionRecord).
//! - [`Reconciler`] periodically folds worker-reported status back into
//!   unfinished records and times out stale ones.
//! - [`RecurrenceTrigger`] fires scheduled events whose rule is due at
//!   the current minute, impersonating each event's creator.

pub mod clock;
pub mod config;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod periodic;
pub mod reconciler;
pub mod trigger;
pub mod worker_lookup;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use credentials::{CredentialIssuer, JwtIssuer};
pub use dispatcher::Dispatcher;
pub use error::{ConfigError, EngineError};
pub use reconciler::{Reconciler, SweepReport};
pub use trigger::{RecurrenceTrigger, TickReport};
pub use worker_lookup::{MemoizedWorkerLookup, StoreWorkerLookup, WorkerLookup};
