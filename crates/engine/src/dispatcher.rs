//! Submission of workflow executions to the worker.
//!
//! Every submission resolves the worker principal, sends a `queuemessage`
//! addressed to the worker's queue carrying an `invoke` command, and
//! records the attempt as a `queued` [`ExecutionRecord`] whose
//! correlation id is the invoke envelope's id.
//!
//! [`Dispatcher::submit_async`] returns once the record is persisted and
//! the broker has accepted the invoke. Later progress is folded in by
//! the reconciler. [`Dispatcher::submit_sync`] additionally opens a
//! transient reply queue and waits for the worker to report a terminal
//! status on it. It has no timeout of its own; a caller that gives up by
//! dropping the future leaves the reply queue to its drop hook.

use std::str::FromStr;
use std::sync::Arc;

use rpaflow_core::{ExecutionRecord, ExecutionRequest, ExecutionStatus, Session, WorkerIdentity};
use rpaflow_queue::{Envelope, QueueError, QueueMessage, QueueMessaging, ReplyQueue};
use rpaflow_store::repositories::ExecutionRepo;
use rpaflow_store::EntityStore;
use serde_json::{json, Map, Value};

use crate::clock::Clock;
use crate::error::EngineError;
use crate::worker_lookup::WorkerLookup;

/// Command name of the payload asking a worker to run a workflow.
const INVOKE_COMMAND: &str = "invoke";

pub struct Dispatcher {
    store: Arc<dyn EntityStore>,
    messaging: Arc<dyn QueueMessaging>,
    workers: Arc<dyn WorkerLookup>,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn EntityStore>,
        messaging: Arc<dyn QueueMessaging>,
        workers: Arc<dyn WorkerLookup>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            messaging,
            workers,
            clock,
        }
    }

    /// Submit an execution without waiting for the worker.
    ///
    /// On a persistence or send failure the record is marked `error`,
    /// written once more on a best-effort basis, and the failure is
    /// returned.
    pub async fn submit_async(
        &self,
        session: &Session,
        request: ExecutionRequest,
    ) -> Result<ExecutionRecord, EngineError> {
        let worker = self.workers.resolve().await?;
        let (envelope, record) = self.prepare(session, &request, &worker, None)?;
        self.persist_and_send(session, record, envelope).await
    }

    /// Submit an execution and wait for the worker's terminal report.
    ///
    /// Resolves with the worker output on `invokecompleted` and fails with
    /// [`EngineError::ExecutionFailed`] on `invokefailed`, `error` or
    /// `timeout`. If the reply channel is torn down first the call fails
    /// with a connection error.
    pub async fn submit_sync(
        &self,
        session: &Session,
        request: ExecutionRequest,
    ) -> Result<Map<String, Value>, EngineError> {
        let worker = self.workers.resolve().await?;
        let mut replies = self.messaging.open_reply_queue(session).await?;

        let outcome = match self.prepare(session, &request, &worker, Some(&replies.name)) {
            Ok((envelope, record)) => match self.persist_and_send(session, record, envelope).await {
                Ok(record) => self.await_terminal(session, record, &mut replies).await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        let name = replies.release();
        self.close_reply_queue(session, &name).await;
        outcome
    }

    /// Build the invoke envelope and the matching `queued` record.
    fn prepare(
        &self,
        session: &Session,
        request: &ExecutionRequest,
        worker: &WorkerIdentity,
        replyto: Option<&str>,
    ) -> Result<(Envelope, ExecutionRecord), EngineError> {
        let payload = json!({
            "command": INVOKE_COMMAND,
            "workflowid": request.template_id,
            "data": request.arguments,
        });
        let mut message = QueueMessage::new(worker.id.clone(), payload).with_jwt(session.jwt.clone());
        if let Some(replyto) = replyto {
            message = message.with_replyto(replyto);
        }
        let envelope = message.into_envelope()?;

        let record = ExecutionRecord::queued(
            uuid::Uuid::new_v4().to_string(),
            envelope.id.clone(),
            request,
            worker,
            session,
            self.clock.now(),
        );
        Ok((envelope, record))
    }

    async fn persist_and_send(
        &self,
        session: &Session,
        record: ExecutionRecord,
        envelope: Envelope,
    ) -> Result<ExecutionRecord, EngineError> {
        let record = match ExecutionRepo::insert(self.store.as_ref(), session, &record).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::error!(
                    record_id = %record.id,
                    workflow_id = %record.workflow_id,
                    error = %e,
                    "Failed to persist execution record",
                );
                self.mark_error(session, record, &e.to_string()).await;
                return Err(e.into());
            }
        };

        if let Err(e) = self.messaging.send_message(envelope).await {
            tracing::error!(
                record_id = %record.id,
                correlation_id = %record.correlation_id,
                error = %e,
                "Failed to send invoke command",
            );
            self.mark_error(session, record, &e.to_string()).await;
            return Err(e.into());
        }

        tracing::info!(
            record_id = %record.id,
            correlation_id = %record.correlation_id,
            workflow_id = %record.workflow_id,
            template_id = %record.template_id,
            robot_id = %record.robot_id,
            "Execution submitted",
        );
        Ok(record)
    }

    /// Consume progress reports until a terminal one arrives.
    async fn await_terminal(
        &self,
        session: &Session,
        mut record: ExecutionRecord,
        replies: &mut ReplyQueue,
    ) -> Result<Map<String, Value>, EngineError> {
        loop {
            let Some(message) = replies.recv().await else {
                tracing::warn!(record_id = %record.id, "Reply queue closed before a terminal status");
                return Err(QueueError::ConnectionClosed.into());
            };

            let Some(status) = progress_status(&message.data) else {
                tracing::debug!(record_id = %record.id, data = %message.data, "Ignoring unrecognised progress message");
                continue;
            };
            let now = self.clock.now();

            match status {
                ExecutionStatus::Queued => continue,
                ExecutionStatus::InvokeSuccess => {
                    record.apply(status, now)?;
                    tracing::debug!(record_id = %record.id, "Worker started execution");
                }
                ExecutionStatus::InvokeCompleted => {
                    let output = message
                        .data
                        .get("data")
                        .and_then(Value::as_object)
                        .cloned()
                        .unwrap_or_default();
                    record.complete(Some(output.clone()), now)?;
                    self.save_best_effort(session, &record).await;
                    tracing::info!(record_id = %record.id, "Execution completed");
                    return Ok(output);
                }
                failure => {
                    let message = failure_message(&message.data, failure);
                    record.fail(failure, message.clone(), now)?;
                    self.save_best_effort(session, &record).await;
                    tracing::warn!(record_id = %record.id, status = %failure, error = %message, "Execution failed");
                    return Err(EngineError::ExecutionFailed {
                        status: failure,
                        message,
                    });
                }
            }
        }
    }

    async fn mark_error(&self, session: &Session, mut record: ExecutionRecord, message: &str) {
        if let Err(e) = record.fail(ExecutionStatus::Error, message, self.clock.now()) {
            tracing::error!(record_id = %record.id, error = %e, "Cannot mark execution as failed");
            return;
        }
        self.save_best_effort(session, &record).await;
    }

    async fn save_best_effort(&self, session: &Session, record: &ExecutionRecord) {
        if let Err(e) = ExecutionRepo::save(self.store.as_ref(), session, record).await {
            tracing::error!(record_id = %record.id, status = %record.status, error = %e, "Failed to save execution record");
        }
    }

    async fn close_reply_queue(&self, session: &Session, name: &str) {
        if let Err(e) = self.messaging.close_reply_queue(session, name).await {
            tracing::warn!(queue = %name, error = %e, "Failed to close reply queue");
        }
    }
}

/// The status a worker progress message reports, from its `command`.
fn progress_status(data: &Value) -> Option<ExecutionStatus> {
    data.get("command")
        .and_then(Value::as_str)
        .and_then(|command| ExecutionStatus::from_str(command).ok())
}

/// Failure reason from a progress message, or a generic one.
fn failure_message(data: &Value, status: ExecutionStatus) -> String {
    let from_payload = data
        .get("data")
        .and_then(|d| d.get("message").or_else(|| d.get("error")))
        .or_else(|| data.get("error"))
        .and_then(Value::as_str);
    match from_payload {
        Some(message) => message.to_string(),
        None => format!("Worker reported {status}"),
    }
}
