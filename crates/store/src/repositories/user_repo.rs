//! Repository for the `users` collection.

use rpaflow_core::Session;
use serde_json::json;

use super::decode_all;
use crate::collections::USERS;
use crate::error::StoreError;
use crate::models::UserRecord;
use crate::store::{EntityStore, Query};

pub struct UserRepo;

impl UserRepo {
    pub async fn find_by_username(
        store: &dyn EntityStore,
        session: &Session,
        username: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        let query = Query::new(USERS, json!({"username": username}))
            .project(json!({"name": 1, "username": 1}))
            .top(1);
        let docs = store.query(session, query).await?;
        Ok(decode_all(USERS, docs).into_iter().next())
    }
}
