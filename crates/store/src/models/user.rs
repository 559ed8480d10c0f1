use rpaflow_core::DocId;
use serde::{Deserialize, Serialize};

/// A broker user, as stored in the `users` collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(rename = "_id")]
    pub id: DocId,
    #[serde(default)]
    pub name: String,
    pub username: String,
}
