//! The entity-store interface.

use async_trait::async_trait;
use rpaflow_core::Session;
use serde_json::Value;

use crate::error::StoreError;

/// A collection query: filter plus optional projection, ordering and
/// pagination.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filter: Value,
    /// `{field: 1}` to include or `{field: 0}` to exclude fields.
    pub projection: Option<Value>,
    /// `{field: 1}` ascending, `{field: -1}` descending, in key order.
    pub order_by: Option<Value>,
    pub top: Option<usize>,
    pub skip: Option<usize>,
}

impl Query {
    pub fn new(collection: impl Into<String>, filter: Value) -> Self {
        Self {
            collection: collection.into(),
            filter,
            projection: None,
            order_by: None,
            top: None,
            skip: None,
        }
    }

    pub fn project(mut self, projection: Value) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn order_by(mut self, order_by: Value) -> Self {
        self.order_by = Some(order_by);
        self
    }

    pub fn top(mut self, top: usize) -> Self {
        self.top = Some(top);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }
}

/// Opaque document store. Every call is made on behalf of `session`.
///
/// `update_one` is an upsert keyed by the item's `_id`, so concurrent
/// writers race on last-write-wins but never corrupt a document.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn query(&self, session: &Session, query: Query) -> Result<Vec<Value>, StoreError>;

    async fn insert_one(
        &self,
        session: &Session,
        collection: &str,
        item: Value,
    ) -> Result<Value, StoreError>;

    async fn update_one(
        &self,
        session: &Session,
        collection: &str,
        item: Value,
    ) -> Result<Value, StoreError>;

    async fn delete_one(&self, session: &Session, collection: &str, id: &str) -> Result<(), StoreError>;
}
