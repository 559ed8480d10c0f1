//! Typed access to the collections the engine reads and writes.
//!
//! Repositories are zero-sized structs with associated async functions
//! taking the store and the acting session.

pub mod execution_repo;
pub mod scheduled_event_repo;
pub mod user_repo;
pub mod worker_instance_repo;
pub mod workflow_repo;

pub use execution_repo::ExecutionRepo;
pub use scheduled_event_repo::ScheduledEventRepo;
pub use user_repo::UserRepo;
pub use worker_instance_repo::WorkerInstanceRepo;
pub use workflow_repo::WorkflowRepo;

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Decode every document, skipping (and logging) those that do not fit
/// `T`. One malformed document must not hide the rest of a collection.
fn decode_all<T: DeserializeOwned>(collection: &str, docs: Vec<Value>) -> Vec<T> {
    docs.into_iter()
        .filter_map(|doc| {
            let id = doc.get("_id").and_then(Value::as_str).unwrap_or("?").to_string();
            match serde_json::from_value(doc) {
                Ok(item) => Some(item),
                Err(e) => {
                    tracing::warn!(collection, id = %id, error = %e, "Skipping malformed document");
                    None
                }
            }
        })
        .collect()
}
