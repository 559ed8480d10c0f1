use serde::{Deserialize, Serialize};

use crate::types::DocId;

/// An authenticated identity as seen by the broker.
///
/// The `jwt` is attached to every entity-store and queue command issued
/// on behalf of this identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: DocId,
    pub username: String,
    pub jwt: String,
}

impl Session {
    pub fn new(user_id: impl Into<DocId>, username: impl Into<String>, jwt: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            jwt: jwt.into(),
        }
    }
}
