//! Shared fixtures for engine tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rpaflow_core::{ExecutionRequest, Session, Timestamp};
use rpaflow_engine::{
    Clock, Dispatcher, EngineError, ManualClock, MemoizedWorkerLookup, StoreWorkerLookup,
    WorkerLookup,
};
use rpaflow_queue::{Envelope, QueueError, QueueMessage, QueueMessaging, ReplyQueue};
use rpaflow_store::{collections, EntityStore, MemoryStore, Query, StoreError};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

pub const ROBOT_ID: &str = "robot-1";
pub const REPLY_QUEUE: &str = "reply-q-1";

pub fn t0() -> Timestamp {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

pub fn service_session() -> Session {
    Session::new("svc-1", "engine", "service-jwt")
}

pub fn user_session() -> Session {
    Session::new("u-1", "ada", "user-jwt")
}

pub fn request(workflow_id: &str, template_id: &str, expiration: i64) -> ExecutionRequest {
    let mut arguments = Map::new();
    arguments.insert("invoice".into(), json!("INV-1"));
    ExecutionRequest {
        workflow_id: workflow_id.into(),
        template_id: template_id.into(),
        arguments,
        expiration,
    }
}

// ---------------------------------------------------------------------------
// Fake messaging
// ---------------------------------------------------------------------------

/// Records invoke envelopes and hands out a single controllable reply
/// queue.
#[derive(Default)]
pub struct FakeMessaging {
    pub sent: Mutex<Vec<Envelope>>,
    pub fail_send: AtomicBool,
    pub closed: Mutex<Vec<String>>,
    /// Reply queues dropped without an explicit close.
    pub abandoned: Arc<Mutex<Vec<String>>>,
    reply_tx: Mutex<Option<mpsc::UnboundedSender<QueueMessage>>>,
}

impl FakeMessaging {
    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().unwrap().clone()
    }

    /// Decoded `queuemessage` payloads of every sent envelope.
    pub fn sent_messages(&self) -> Vec<QueueMessage> {
        self.sent()
            .iter()
            .map(|env| serde_json::from_str(&env.data).unwrap())
            .collect()
    }

    /// Deliver a progress report to the open reply queue.
    pub fn report(&self, data: Value) {
        let tx = self.reply_tx.lock().unwrap();
        let tx = tx.as_ref().expect("no reply queue open");
        tx.send(QueueMessage::new(REPLY_QUEUE, data)).unwrap();
    }

    /// Tear down the reply channel as a shutdown would.
    pub fn drop_reply_queue(&self) {
        self.reply_tx.lock().unwrap().take();
    }

    /// Wait (yielding) until `n` envelopes were sent.
    pub async fn wait_for_sent(&self, n: usize) {
        while self.sent.lock().unwrap().len() < n {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl QueueMessaging for FakeMessaging {
    async fn send_message(&self, envelope: Envelope) -> Result<(), QueueError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(QueueError::NotConnected);
        }
        self.sent.lock().unwrap().push(envelope);
        Ok(())
    }

    async fn open_reply_queue(&self, _session: &Session) -> Result<ReplyQueue, QueueError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.reply_tx.lock().unwrap() = Some(tx);
        let abandoned = Arc::clone(&self.abandoned);
        Ok(ReplyQueue::new(REPLY_QUEUE, rx)
            .on_drop(move |name| abandoned.lock().unwrap().push(name.to_string())))
    }

    async fn close_reply_queue(&self, _session: &Session, name: &str) -> Result<(), QueueError> {
        self.closed.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Failing store
// ---------------------------------------------------------------------------

/// Wraps a [`MemoryStore`] and fails inserts on request.
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_inserts: AtomicBool,
    pub inserts: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_inserts: AtomicBool::new(false),
            inserts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EntityStore for FlakyStore {
    async fn query(&self, session: &Session, query: Query) -> Result<Vec<Value>, StoreError> {
        self.inner.query(session, query).await
    }

    async fn insert_one(&self, session: &Session, collection: &str, item: Value) -> Result<Value, StoreError> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Remote("write conflict".into()));
        }
        self.inner.insert_one(session, collection, item).await
    }

    async fn update_one(&self, session: &Session, collection: &str, item: Value) -> Result<Value, StoreError> {
        self.inner.update_one(session, collection, item).await
    }

    async fn delete_one(&self, session: &Session, collection: &str, id: &str) -> Result<(), StoreError> {
        self.inner.delete_one(session, collection, id).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<FlakyStore>,
    pub messaging: Arc<FakeMessaging>,
    pub clock: Arc<ManualClock>,
    pub dispatcher: Arc<Dispatcher>,
}

impl Harness {
    pub async fn new() -> Self {
        let store = Arc::new(FlakyStore::new());
        seed_robot(&store.inner).await;

        let messaging = Arc::new(FakeMessaging::default());
        let clock = Arc::new(ManualClock::new(t0()));
        let workers: Arc<dyn WorkerLookup> = Arc::new(MemoizedWorkerLookup::new(StoreWorkerLookup::new(
            store.clone(),
            service_session(),
            "robot",
        )));
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            messaging.clone(),
            workers,
            clock.clone(),
        ));

        Self {
            store,
            messaging,
            clock,
            dispatcher,
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub async fn executions(&self) -> Vec<Value> {
        self.store.inner.documents(collections::EXECUTIONS).await
    }

    /// Insert a worker instance document for `correlation_id`.
    pub async fn report_instance(
        &self,
        correlation_id: &str,
        is_completed: bool,
        has_error: bool,
        extra: Value,
    ) {
        let mut doc = json!({
            "_id": format!("inst-{correlation_id}"),
            "correlationId": correlation_id,
            "isCompleted": is_completed,
            "hasError": has_error,
            "_created": t0() + chrono::TimeDelta::seconds(2),
            "_modified": t0() + chrono::TimeDelta::seconds(40),
        });
        if let (Some(doc), Some(extra)) = (doc.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                doc.insert(k.clone(), v.clone());
            }
        }
        self.store
            .inner
            .update_one(&service_session(), collections::WORKER_INSTANCES, doc)
            .await
            .unwrap();
    }
}

pub async fn seed_robot(store: &MemoryStore) {
    store
        .insert_one(
            &service_session(),
            collections::USERS,
            json!({"_id": ROBOT_ID, "name": "Robot One", "username": "robot"}),
        )
        .await
        .unwrap();
}

/// Assert an engine result failed, returning the error.
pub fn expect_err<T: std::fmt::Debug>(result: Result<T, EngineError>) -> EngineError {
    match result {
        Ok(value) => panic!("expected an error, got {value:?}"),
        Err(e) => e,
    }
}
