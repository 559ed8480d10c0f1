//! Repository for the `scheduledevents` collection.

use rpaflow_core::{ScheduledEvent, Session, Timestamp};
use serde_json::json;

use super::decode_all;
use crate::collections::SCHEDULED_EVENTS;
use crate::error::StoreError;
use crate::store::{EntityStore, Query};

pub struct ScheduledEventRepo;

impl ScheduledEventRepo {
    /// Events whose rule has no end, or ends at or after `at`.
    pub async fn list_active(
        store: &dyn EntityStore,
        session: &Session,
        at: Timestamp,
    ) -> Result<Vec<ScheduledEvent>, StoreError> {
        let filter = json!({"$or": [
            {"rrule.until": null},
            {"rrule.until": {"$gte": at}},
        ]});
        let docs = store.query(session, Query::new(SCHEDULED_EVENTS, filter)).await?;
        Ok(decode_all(SCHEDULED_EVENTS, docs))
    }

    pub async fn insert(
        store: &dyn EntityStore,
        session: &Session,
        event: &ScheduledEvent,
    ) -> Result<ScheduledEvent, StoreError> {
        let stored = store
            .insert_one(session, SCHEDULED_EVENTS, serde_json::to_value(event)?)
            .await?;
        Ok(serde_json::from_value(stored)?)
    }
}
