//! In-process [`EntityStore`].
//!
//! Documents live in insertion order per collection behind a
//! `tokio::sync::RwLock`. Filters go through [`crate::filter`]; ordering,
//! pagination and projection follow the broker-backed store's semantics
//! closely enough for the engine's queries.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use rpaflow_core::Session;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::filter::{compare_values, lookup, matches};
use crate::store::{EntityStore, Query};

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every document in `collection`, in insertion order.
    pub async fn documents(&self, collection: &str) -> Vec<Value> {
        self.collections
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, Vec::len)
    }
}

fn document_id(item: &Value) -> Option<&str> {
    item.get("_id").and_then(Value::as_str)
}

fn into_object(item: Value) -> Result<Map<String, Value>, StoreError> {
    match item {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidDocument(format!("expected an object, got {other}"))),
    }
}

/// Compare two documents by an `{field: 1 | -1}` ordering document.
fn order(a: &Value, b: &Value, order_by: &Map<String, Value>) -> Ordering {
    for (field, direction) in order_by {
        let ord = match (lookup(a, field), lookup(b, field)) {
            (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        let ord = if direction.as_i64().unwrap_or(1) < 0 {
            ord.reverse()
        } else {
            ord
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Apply a top-level inclusion (`{f: 1}`) or exclusion (`{f: 0}`)
/// projection. `_id` is always kept.
fn project(doc: Value, projection: &Map<String, Value>) -> Value {
    let Value::Object(map) = doc else {
        return doc;
    };
    let include = projection
        .values()
        .any(|v| v.as_i64().is_some_and(|n| n != 0) || v.as_bool() == Some(true));

    let projected = map
        .into_iter()
        .filter(|(key, _)| {
            if key == "_id" {
                return true;
            }
            let listed = projection.contains_key(key);
            if include {
                listed
            } else {
                !listed
            }
        })
        .collect();
    Value::Object(projected)
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn query(&self, _session: &Session, query: Query) -> Result<Vec<Value>, StoreError> {
        let collections = self.collections.read().await;
        let mut docs: Vec<Value> = collections
            .get(&query.collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| matches(doc, &query.filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        drop(collections);

        if let Some(Value::Object(order_by)) = &query.order_by {
            docs.sort_by(|a, b| order(a, b, order_by));
        }

        let docs = docs
            .into_iter()
            .skip(query.skip.unwrap_or(0))
            .take(query.top.unwrap_or(usize::MAX));

        Ok(match &query.projection {
            Some(Value::Object(projection)) => docs.map(|d| project(d, projection)).collect(),
            _ => docs.collect(),
        })
    }

    async fn insert_one(
        &self,
        _session: &Session,
        collection: &str,
        item: Value,
    ) -> Result<Value, StoreError> {
        let mut map = into_object(item)?;
        if !map.get("_id").is_some_and(Value::is_string) {
            map.insert("_id".into(), Value::String(uuid::Uuid::new_v4().to_string()));
        }
        let item = Value::Object(map);

        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.iter().any(|d| document_id(d) == document_id(&item)) {
            return Err(StoreError::Remote(format!(
                "Duplicate _id in {collection}: {}",
                document_id(&item).unwrap_or_default()
            )));
        }
        docs.push(item.clone());
        Ok(item)
    }

    async fn update_one(
        &self,
        _session: &Session,
        collection: &str,
        item: Value,
    ) -> Result<Value, StoreError> {
        let id = document_id(&item)
            .ok_or_else(|| StoreError::InvalidDocument("update without _id".into()))?
            .to_string();
        into_object(item.clone())?;

        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        match docs.iter_mut().find(|d| document_id(d) == Some(id.as_str())) {
            Some(existing) => *existing = item.clone(),
            None => docs.push(item.clone()),
        }
        Ok(item)
    }

    async fn delete_one(&self, _session: &Session, collection: &str, id: &str) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        let before = docs.len();
        docs.retain(|d| document_id(d) != Some(id));
        if docs.len() == before {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn session() -> Session {
        Session::new("u1", "tester", "jwt")
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        for (id, n, kind) in [("a", 3, "x"), ("b", 1, "y"), ("c", 2, "x")] {
            store
                .insert_one(&session(), "items", json!({"_id": id, "n": n, "kind": kind}))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn insert_assigns_id_when_missing() {
        let store = MemoryStore::new();
        let item = store
            .insert_one(&session(), "items", json!({"name": "x"}))
            .await
            .unwrap();
        assert!(item["_id"].as_str().is_some_and(|id| !id.is_empty()));
        assert_eq!(store.count("items").await, 1);
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_id_and_non_objects() {
        let store = seeded().await;
        let dup = store.insert_one(&session(), "items", json!({"_id": "a"})).await;
        assert_matches!(dup, Err(StoreError::Remote(_)));

        let bad = store.insert_one(&session(), "items", json!([1, 2])).await;
        assert_matches!(bad, Err(StoreError::InvalidDocument(_)));
    }

    #[tokio::test]
    async fn update_is_an_upsert_by_id() {
        let store = seeded().await;
        store
            .update_one(&session(), "items", json!({"_id": "a", "n": 10}))
            .await
            .unwrap();
        store
            .update_one(&session(), "items", json!({"_id": "z", "n": 0}))
            .await
            .unwrap();

        let docs = store.documents("items").await;
        assert_eq!(docs.len(), 4);
        assert_eq!(docs[0], json!({"_id": "a", "n": 10}));
    }

    #[tokio::test]
    async fn query_filters_orders_and_paginates() {
        let store = seeded().await;
        let query = Query::new("items", json!({"kind": "x"})).order_by(json!({"n": 1}));
        let docs = store.query(&session(), query).await.unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d["_id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["c", "a"]);

        let query = Query::new("items", json!({}))
            .order_by(json!({"n": -1}))
            .skip(1)
            .top(1);
        let docs = store.query(&session(), query).await.unwrap();
        assert_eq!(docs, vec![json!({"_id": "c", "n": 2, "kind": "x"})]);
    }

    #[tokio::test]
    async fn query_applies_projection() {
        let store = seeded().await;
        let query = Query::new("items", json!({"_id": "b"})).project(json!({"n": 1}));
        let docs = store.query(&session(), query).await.unwrap();
        assert_eq!(docs, vec![json!({"_id": "b", "n": 1})]);

        let query = Query::new("items", json!({"_id": "b"})).project(json!({"n": 0}));
        let docs = store.query(&session(), query).await.unwrap();
        assert_eq!(docs, vec![json!({"_id": "b", "kind": "y"})]);
    }

    #[tokio::test]
    async fn query_unknown_collection_is_empty() {
        let store = MemoryStore::new();
        let docs = store
            .query(&session(), Query::new("nothing", json!({})))
            .await
            .unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn delete_missing_document_is_not_found() {
        let store = seeded().await;
        store.delete_one(&session(), "items", "a").await.unwrap();
        assert_eq!(store.count("items").await, 2);
        assert_matches!(
            store.delete_one(&session(), "items", "a").await,
            Err(StoreError::NotFound { .. })
        );
    }
}
