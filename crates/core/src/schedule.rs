use serde::{Deserialize, Serialize};

use crate::recurrence::RecurrenceRule;
use crate::types::{DocId, Timestamp};

/// `_type` discriminator for scheduled events in the entity store.
pub const SCHEDULED_EVENT_KIND: &str = "scheduledevent";

fn default_kind() -> String {
    SCHEDULED_EVENT_KIND.to_string()
}

/// A workflow bound to a recurrence rule, owned by the user who created it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledEvent {
    #[serde(rename = "_id")]
    pub id: DocId,
    #[serde(rename = "_type", default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    pub workflow_id: String,
    /// User id of the creator; executions run impersonating this user.
    #[serde(rename = "_createdbyid")]
    pub created_by: DocId,
    #[serde(rename = "_createdby", default)]
    pub created_by_name: String,
    pub rrule: RecurrenceRule,
}

impl ScheduledEvent {
    pub fn is_due_at(&self, at: Timestamp) -> bool {
        self.rrule.is_due_at(at)
    }
}
