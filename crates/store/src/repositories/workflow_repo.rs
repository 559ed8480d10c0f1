//! Repository for the `workflows` collection.

use rpaflow_core::Session;
use serde_json::json;

use super::decode_all;
use crate::collections::WORKFLOWS;
use crate::error::StoreError;
use crate::models::WorkflowDefinition;
use crate::store::{EntityStore, Query};

pub struct WorkflowRepo;

impl WorkflowRepo {
    pub async fn find_by_id(
        store: &dyn EntityStore,
        session: &Session,
        id: &str,
    ) -> Result<Option<WorkflowDefinition>, StoreError> {
        let query = Query::new(WORKFLOWS, json!({"_id": id})).top(1);
        let docs = store.query(session, query).await?;
        Ok(decode_all(WORKFLOWS, docs).into_iter().next())
    }
}
