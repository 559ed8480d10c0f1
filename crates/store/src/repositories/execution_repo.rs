//! Repository for the `workflowinstances` collection.

use rpaflow_core::execution::EXECUTION_KIND;
use rpaflow_core::{ExecutionRecord, Session};
use serde_json::json;

use super::decode_all;
use crate::collections::EXECUTIONS;
use crate::error::StoreError;
use crate::store::{EntityStore, Query};

/// Persistence for [`ExecutionRecord`]s.
pub struct ExecutionRepo;

impl ExecutionRepo {
    /// Insert a new record, returning it as stored.
    pub async fn insert(
        store: &dyn EntityStore,
        session: &Session,
        record: &ExecutionRecord,
    ) -> Result<ExecutionRecord, StoreError> {
        let stored = store
            .insert_one(session, EXECUTIONS, serde_json::to_value(record)?)
            .await?;
        Ok(serde_json::from_value(stored)?)
    }

    /// Upsert a record by id.
    pub async fn save(
        store: &dyn EntityStore,
        session: &Session,
        record: &ExecutionRecord,
    ) -> Result<(), StoreError> {
        store
            .update_one(session, EXECUTIONS, serde_json::to_value(record)?)
            .await?;
        Ok(())
    }

    /// Every managed record without a `finishedAt`, oldest first.
    pub async fn list_unfinished(
        store: &dyn EntityStore,
        session: &Session,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let query = Query::new(EXECUTIONS, json!({"_type": EXECUTION_KIND, "finishedAt": null}))
            .order_by(json!({"startedAt": 1}));
        let docs = store.query(session, query).await?;
        Ok(decode_all(EXECUTIONS, docs))
    }

    pub async fn find_by_id(
        store: &dyn EntityStore,
        session: &Session,
        id: &str,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        let query = Query::new(EXECUTIONS, json!({"_id": id})).top(1);
        let docs = store.query(session, query).await?;
        Ok(decode_all(EXECUTIONS, docs).into_iter().next())
    }

    pub async fn find_by_correlation_id(
        store: &dyn EntityStore,
        session: &Session,
        correlation_id: &str,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        let query = Query::new(
            EXECUTIONS,
            json!({"_type": EXECUTION_KIND, "correlationId": correlation_id}),
        )
        .top(1);
        let docs = store.query(session, query).await?;
        Ok(decode_all(EXECUTIONS, docs).into_iter().next())
    }
}
