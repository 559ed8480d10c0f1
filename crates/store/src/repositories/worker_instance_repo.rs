//! Repository for the `workerinstances` collection.

use rpaflow_core::Session;
use serde_json::json;

use super::decode_all;
use crate::collections::WORKER_INSTANCES;
use crate::error::StoreError;
use crate::models::WorkerInstance;
use crate::store::{EntityStore, Query};

/// Read access to worker-reported status documents.
pub struct WorkerInstanceRepo;

impl WorkerInstanceRepo {
    /// Every instance whose correlation id is in `correlation_ids`.
    ///
    /// Issues one `$in` query per `batch_size` ids, so fewer ids than the
    /// batch size means a single query.
    pub async fn find_by_correlation_ids(
        store: &dyn EntityStore,
        session: &Session,
        correlation_ids: &[String],
        batch_size: usize,
    ) -> Result<Vec<WorkerInstance>, StoreError> {
        let mut instances = Vec::new();
        for batch in correlation_ids.chunks(batch_size.max(1)) {
            let query = Query::new(WORKER_INSTANCES, json!({"correlationId": {"$in": batch}}));
            let docs = store.query(session, query).await?;
            tracing::debug!(requested = batch.len(), found = docs.len(), "Worker instance batch");
            instances.extend(decode_all::<WorkerInstance>(WORKER_INSTANCES, docs));
        }
        Ok(instances)
    }
}
