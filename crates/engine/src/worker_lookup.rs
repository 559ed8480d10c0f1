//! Resolution of the worker principal that receives invoke commands.
//!
//! [`MemoizedWorkerLookup`] caches the first successful resolution.
//! Failures are never cached, so the next dispatch tries again.

use std::sync::Arc;

use async_trait::async_trait;
use rpaflow_core::{Session, WorkerIdentity};
use rpaflow_store::repositories::UserRepo;
use rpaflow_store::EntityStore;
use tokio::sync::RwLock;

use crate::error::EngineError;

#[async_trait]
pub trait WorkerLookup: Send + Sync {
    async fn resolve(&self) -> Result<WorkerIdentity, EngineError>;
}

/// Looks the worker up by username in the `users` collection.
pub struct StoreWorkerLookup {
    store: Arc<dyn EntityStore>,
    session: Session,
    username: String,
}

impl StoreWorkerLookup {
    pub fn new(store: Arc<dyn EntityStore>, session: Session, username: impl Into<String>) -> Self {
        Self {
            store,
            session,
            username: username.into(),
        }
    }
}

#[async_trait]
impl WorkerLookup for StoreWorkerLookup {
    async fn resolve(&self) -> Result<WorkerIdentity, EngineError> {
        let user = UserRepo::find_by_username(self.store.as_ref(), &self.session, &self.username)
            .await
            .map_err(|e| {
                EngineError::Resolution(format!("lookup of '{}' failed: {e}", self.username))
            })?
            .ok_or_else(|| {
                EngineError::Resolution(format!("worker principal '{}' not found", self.username))
            })?;

        let name = if user.name.is_empty() {
            user.username
        } else {
            user.name
        };
        Ok(WorkerIdentity { id: user.id, name })
    }
}

/// Caches the identity returned by `inner` after the first success.
pub struct MemoizedWorkerLookup<L> {
    inner: L,
    cached: RwLock<Option<WorkerIdentity>>,
}

impl<L: WorkerLookup> MemoizedWorkerLookup<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            cached: RwLock::new(None),
        }
    }
}

#[async_trait]
impl<L: WorkerLookup> WorkerLookup for MemoizedWorkerLookup<L> {
    async fn resolve(&self) -> Result<WorkerIdentity, EngineError> {
        if let Some(identity) = self.cached.read().await.as_ref() {
            return Ok(identity.clone());
        }

        let identity = self.inner.resolve().await?;
        tracing::info!(worker_id = %identity.id, worker_name = %identity.name, "Resolved worker identity");
        *self.cached.write().await = Some(identity.clone());
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use assert_matches::assert_matches;
    use rpaflow_store::collections;
    use rpaflow_store::MemoryStore;
    use serde_json::json;

    use super::*;

    /// Fails the first `failures` calls, then succeeds.
    struct FlakyLookup {
        calls: AtomicU32,
        failures: u32,
    }

    #[async_trait]
    impl WorkerLookup for FlakyLookup {
        async fn resolve(&self) -> Result<WorkerIdentity, EngineError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(EngineError::Resolution("not yet".into()));
            }
            Ok(WorkerIdentity {
                id: "robot-1".into(),
                name: "Robot".into(),
            })
        }
    }

    #[tokio::test]
    async fn failure_is_not_cached_and_success_is() {
        let lookup = MemoizedWorkerLookup::new(FlakyLookup {
            calls: AtomicU32::new(0),
            failures: 1,
        });

        assert_matches!(lookup.resolve().await, Err(EngineError::Resolution(_)));
        assert_eq!(lookup.resolve().await.unwrap().id, "robot-1");
        assert_eq!(lookup.resolve().await.unwrap().id, "robot-1");
        assert_eq!(lookup.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn store_lookup_resolves_by_username() {
        let session = Session::new("svc", "service", "jwt");
        let store = Arc::new(MemoryStore::new());
        store
            .insert_one(
                &session,
                collections::USERS,
                json!({"_id": "robot-1", "name": "", "username": "robot"}),
            )
            .await
            .unwrap();

        let lookup = StoreWorkerLookup::new(store.clone(), session.clone(), "robot");
        let identity = lookup.resolve().await.unwrap();
        assert_eq!(identity, WorkerIdentity { id: "robot-1".into(), name: "robot".into() });

        let missing = StoreWorkerLookup::new(store, session, "ghost");
        assert_matches!(missing.resolve().await, Err(EngineError::Resolution(msg)) if msg.contains("ghost"));
    }
}
