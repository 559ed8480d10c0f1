//! Minute-granular firing of scheduled events.
//!
//! Each tick truncates the clock to the minute, loads the scheduled
//! events whose rule has not ended, and submits one execution for every
//! event due at exactly that minute. Submissions run as the event's
//! creator through a short-lived impersonation credential. Missed minutes
//! are not caught up, and a minute already evaluated is never evaluated
//! again.

use std::sync::Arc;
use std::time::Duration;

use rpaflow_core::types::truncate_to_minute;
use rpaflow_core::{ExecutionRecord, ExecutionRequest, ScheduledEvent, Session, Timestamp};
use rpaflow_store::repositories::{ScheduledEventRepo, WorkflowRepo};
use rpaflow_store::EntityStore;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::credentials::CredentialIssuer;
use crate::dispatcher::Dispatcher;
use crate::error::EngineError;
use crate::periodic::{run_periodic, Alignment};

/// Outcome counts of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub minute: Timestamp,
    /// The minute had already been evaluated; nothing was done.
    pub repeated: bool,
    pub active: usize,
    pub due: usize,
    pub dispatched: usize,
    pub failed: usize,
}

impl TickReport {
    fn new(minute: Timestamp) -> Self {
        Self {
            minute,
            repeated: false,
            active: 0,
            due: 0,
            dispatched: 0,
            failed: 0,
        }
    }
}

pub struct RecurrenceTrigger {
    store: Arc<dyn EntityStore>,
    session: Session,
    dispatcher: Arc<Dispatcher>,
    issuer: Arc<dyn CredentialIssuer>,
    clock: Arc<dyn Clock>,
    default_expiration_ms: i64,
    last_minute: Mutex<Option<Timestamp>>,
}

impl RecurrenceTrigger {
    pub fn new(
        store: Arc<dyn EntityStore>,
        session: Session,
        dispatcher: Arc<Dispatcher>,
        issuer: Arc<dyn CredentialIssuer>,
        clock: Arc<dyn Clock>,
        default_expiration_ms: i64,
    ) -> Self {
        Self {
            store,
            session,
            dispatcher,
            issuer,
            clock,
            default_expiration_ms,
            last_minute: Mutex::new(None),
        }
    }

    /// Evaluate every active event against the current minute.
    pub async fn tick(&self) -> Result<TickReport, EngineError> {
        let minute = truncate_to_minute(self.clock.now());
        let mut report = TickReport::new(minute);

        {
            let mut last = self.last_minute.lock().await;
            if *last == Some(minute) {
                tracing::debug!(%minute, "Minute already evaluated, skipping tick");
                report.repeated = true;
                return Ok(report);
            }
            *last = Some(minute);
        }

        let events = ScheduledEventRepo::list_active(self.store.as_ref(), &self.session, minute).await?;
        report.active = events.len();

        for event in events.iter().filter(|e| e.is_due_at(minute)) {
            report.due += 1;
            match self.fire(event).await {
                Ok(record) => {
                    report.dispatched += 1;
                    tracing::info!(
                        event_id = %event.id,
                        event_name = %event.name,
                        workflow_id = %event.workflow_id,
                        record_id = %record.id,
                        "Scheduled event dispatched",
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        event_id = %event.id,
                        workflow_id = %event.workflow_id,
                        error = %e,
                        "Scheduled event dispatch failed",
                    );
                }
            }
        }

        tracing::debug!(
            %minute,
            active = report.active,
            due = report.due,
            dispatched = report.dispatched,
            failed = report.failed,
            "Recurrence tick complete",
        );
        Ok(report)
    }

    async fn fire(&self, event: &ScheduledEvent) -> Result<ExecutionRecord, EngineError> {
        let workflow = WorkflowRepo::find_by_id(self.store.as_ref(), &self.session, &event.workflow_id)
            .await?
            .ok_or_else(|| EngineError::WorkflowNotFound(event.workflow_id.clone()))?;

        let request = ExecutionRequest {
            workflow_id: workflow.id,
            template_id: workflow.template_id,
            arguments: workflow.default_arguments,
            expiration: workflow.expiration.unwrap_or(self.default_expiration_ms),
        };
        let session = self.issuer.impersonate(&event.created_by, &event.created_by_name)?;
        self.dispatcher.submit_async(&session, request).await
    }

    /// Tick every `period`, starting at the next minute boundary, until
    /// `cancel` fires.
    pub async fn run(self: Arc<Self>, period: Duration, cancel: CancellationToken) {
        let clock = Arc::clone(&self.clock);
        run_periodic("recurrence", period, Alignment::NextMinute, clock.as_ref(), cancel, || {
            let this = Arc::clone(&self);
            async move {
                if let Err(e) = this.tick().await {
                    tracing::error!(error = %e, "Recurrence tick failed");
                }
            }
        })
        .await;
    }
}
