use rpaflow_core::DocId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A user-facing workflow that scheduled events bind to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    #[serde(rename = "_id")]
    pub id: DocId,
    #[serde(default)]
    pub name: String,
    /// Worker-side workflow invoked for this definition.
    pub template_id: String,
    #[serde(default)]
    pub default_arguments: Map<String, Value>,
    /// Run time limit in milliseconds; the engine default applies when
    /// absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<i64>,
}
