//! Worker-reported execution status.

use rpaflow_core::{DocId, ExecutionStatus, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The status document a worker maintains for one invocation, keyed by
/// the invoke envelope's correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerInstance {
    #[serde(rename = "_id")]
    pub id: DocId,
    pub correlation_id: String,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub has_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Map<String, Value>>,
    #[serde(rename = "_created")]
    pub created: Timestamp,
    #[serde(rename = "_modified")]
    pub modified: Timestamp,
}

impl WorkerInstance {
    /// Status implied by the instance flags. Errors win over completion.
    pub fn status(&self) -> ExecutionStatus {
        if self.has_error {
            ExecutionStatus::Error
        } else if self.is_completed {
            ExecutionStatus::InvokeCompleted
        } else {
            ExecutionStatus::InvokeSuccess
        }
    }
}
