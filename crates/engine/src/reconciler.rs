//! Periodic reconciliation of unfinished executions.
//!
//! Each sweep loads every unfinished execution record, looks up the
//! worker-reported instances for their correlation ids in batches, and
//! folds the reported state into each matched record. Records without a
//! matching instance are timed out once their expiration has elapsed;
//! the rest are left for the next sweep. Sweeps are idempotent: with
//! unchanged worker state a second sweep writes identical records.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rpaflow_core::{CoreError, ExecutionRecord, ExecutionStatus, Session};
use rpaflow_store::models::WorkerInstance;
use rpaflow_store::repositories::{ExecutionRepo, WorkerInstanceRepo};
use rpaflow_store::EntityStore;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::error::EngineError;
use crate::periodic::{run_periodic, Alignment};

/// Fallback error text for instances flagged as failed without a message.
const UNSPECIFIED_WORKER_ERROR: &str = "Worker reported an error";

/// Outcome counts of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Unfinished records found.
    pub pending: usize,
    /// Records with a worker instance, updated from it.
    pub matched: usize,
    pub timed_out: usize,
    /// Matched records whose update would break the status state machine.
    pub skipped: usize,
    /// Records whose write failed.
    pub failed: usize,
}

pub struct Reconciler {
    store: Arc<dyn EntityStore>,
    session: Session,
    clock: Arc<dyn Clock>,
    batch_size: usize,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn EntityStore>,
        session: Session,
        clock: Arc<dyn Clock>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            session,
            clock,
            batch_size,
        }
    }

    /// Run one reconciliation sweep.
    pub async fn sweep(&self) -> Result<SweepReport, EngineError> {
        let now = self.clock.now();
        let pending = ExecutionRepo::list_unfinished(self.store.as_ref(), &self.session).await?;
        let mut report = SweepReport {
            pending: pending.len(),
            ..SweepReport::default()
        };
        if pending.is_empty() {
            tracing::debug!("Reconcile sweep: no unfinished executions");
            return Ok(report);
        }

        let correlation_ids: Vec<String> = pending.iter().map(|r| r.correlation_id.clone()).collect();
        let instances = WorkerInstanceRepo::find_by_correlation_ids(
            self.store.as_ref(),
            &self.session,
            &correlation_ids,
            self.batch_size,
        )
        .await?;
        let by_correlation: HashMap<&str, &WorkerInstance> = instances
            .iter()
            .map(|i| (i.correlation_id.as_str(), i))
            .collect();

        for record in pending {
            let updated = match by_correlation.get(record.correlation_id.as_str()) {
                Some(instance) => match apply_instance(record.clone(), instance) {
                    Ok(updated) => {
                        report.matched += 1;
                        updated
                    }
                    Err(e) => {
                        tracing::warn!(record_id = %record.id, error = %e, "Skipping invalid status update");
                        report.skipped += 1;
                        continue;
                    }
                },
                None if record.is_expired(now) => {
                    let mut expired = record;
                    let message = format!("Execution timed out after {} ms", expired.expiration);
                    if let Err(e) = expired.fail(ExecutionStatus::Timeout, message, now) {
                        tracing::warn!(record_id = %expired.id, error = %e, "Skipping invalid timeout");
                        report.skipped += 1;
                        continue;
                    }
                    tracing::info!(
                        record_id = %expired.id,
                        correlation_id = %expired.correlation_id,
                        "Execution timed out",
                    );
                    report.timed_out += 1;
                    expired
                }
                None => continue,
            };

            if let Err(e) = ExecutionRepo::save(self.store.as_ref(), &self.session, &updated).await {
                tracing::error!(record_id = %updated.id, error = %e, "Failed to save reconciled record");
                report.failed += 1;
            }
        }

        tracing::info!(
            pending = report.pending,
            matched = report.matched,
            timed_out = report.timed_out,
            skipped = report.skipped,
            failed = report.failed,
            "Reconcile sweep complete",
        );
        Ok(report)
    }

    /// Sweep every `period` until `cancel` fires. Sweep errors are logged.
    pub async fn run(self: Arc<Self>, period: Duration, cancel: CancellationToken) {
        let clock = Arc::clone(&self.clock);
        run_periodic("reconciler", period, Alignment::Immediate, clock.as_ref(), cancel, || {
            let this = Arc::clone(&self);
            async move {
                if let Err(e) = this.sweep().await {
                    tracing::error!(error = %e, "Reconcile sweep failed");
                }
            }
        })
        .await;
    }
}

/// Fold a worker instance's reported state into `record`.
fn apply_instance(
    mut record: ExecutionRecord,
    instance: &WorkerInstance,
) -> Result<ExecutionRecord, CoreError> {
    match instance.status() {
        ExecutionStatus::Error => {
            let message = instance
                .error_message
                .clone()
                .unwrap_or_else(|| UNSPECIFIED_WORKER_ERROR.to_string());
            record.fail(ExecutionStatus::Error, message, instance.modified)?;
        }
        ExecutionStatus::InvokeCompleted => {
            record.complete(instance.output.clone(), instance.modified)?;
        }
        status => record.apply(status, instance.created)?,
    }
    Ok(record)
}
