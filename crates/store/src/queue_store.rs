//! [`EntityStore`] over the message broker.
//!
//! Each operation is one correlated broker command (`query`,
//! `insertone`, `updateone`, `deleteone`) carrying the caller's JWT.

use async_trait::async_trait;
use rpaflow_core::Session;
use rpaflow_queue::envelope::commands;
use rpaflow_queue::QueueClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;
use crate::store::{EntityStore, Query};

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    collectionname: &'a str,
    query: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    projection: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    orderby: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    skip: Option<usize>,
    jwt: &'a str,
}

#[derive(Debug, Serialize)]
struct ItemRequest<'a> {
    collectionname: &'a str,
    item: &'a Value,
    jwt: &'a str,
}

#[derive(Debug, Serialize)]
struct DeleteRequest<'a> {
    collectionname: &'a str,
    id: &'a str,
    jwt: &'a str,
}

#[derive(Debug, Deserialize)]
struct ResultReply<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct DeleteReply {
    #[allow(dead_code)]
    id: Option<String>,
}

pub struct QueueEntityStore {
    client: QueueClient,
}

impl QueueEntityStore {
    pub fn new(client: QueueClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EntityStore for QueueEntityStore {
    async fn query(&self, session: &Session, query: Query) -> Result<Vec<Value>, StoreError> {
        let request = QueryRequest {
            collectionname: &query.collection,
            query: &query.filter,
            projection: query.projection.as_ref(),
            orderby: query.order_by.as_ref(),
            top: query.top,
            skip: query.skip,
            jwt: &session.jwt,
        };
        let reply: ResultReply<Vec<Value>> = self
            .client
            .request(commands::QUERY, &request)
            .await
            .map_err(StoreError::from_queue)?;
        tracing::trace!(collection = %query.collection, count = reply.result.len(), "Query returned");
        Ok(reply.result)
    }

    async fn insert_one(
        &self,
        session: &Session,
        collection: &str,
        item: Value,
    ) -> Result<Value, StoreError> {
        let request = ItemRequest {
            collectionname: collection,
            item: &item,
            jwt: &session.jwt,
        };
        let reply: ResultReply<Value> = self
            .client
            .request(commands::INSERT_ONE, &request)
            .await
            .map_err(StoreError::from_queue)?;
        Ok(reply.result)
    }

    async fn update_one(
        &self,
        session: &Session,
        collection: &str,
        item: Value,
    ) -> Result<Value, StoreError> {
        let request = ItemRequest {
            collectionname: collection,
            item: &item,
            jwt: &session.jwt,
        };
        let reply: ResultReply<Value> = self
            .client
            .request(commands::UPDATE_ONE, &request)
            .await
            .map_err(StoreError::from_queue)?;
        Ok(reply.result)
    }

    async fn delete_one(&self, session: &Session, collection: &str, id: &str) -> Result<(), StoreError> {
        let request = DeleteRequest {
            collectionname: collection,
            id,
            jwt: &session.jwt,
        };
        let _: DeleteReply = self
            .client
            .request(commands::DELETE_ONE, &request)
            .await
            .map_err(StoreError::from_queue)?;
        Ok(())
    }
}
