//! Execution records and their status state machine.
//!
//! An [`ExecutionRecord`] is created with status `queued` when a workflow
//! is submitted to a worker and moves monotonically towards one of the
//! terminal statuses:
//!
//! ```text
//! queued -> invokesuccess -> invokecompleted | invokefailed | error | timeout
//! queued -----------------> invokecompleted | invokefailed | error | timeout
//! ```
//!
//! Records are never deleted; terminal records are the audit trail.

use std::fmt;
use std::str::FromStr;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::session::Session;
use crate::types::{DocId, Timestamp};

/// `_type` discriminator for execution records in the entity store.
pub const EXECUTION_KIND: &str = "workflowinstance";

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of an execution, serialized exactly as the worker
/// reports it (`"invokesuccess"`, `"invokecompleted"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Queued,
    InvokeSuccess,
    InvokeCompleted,
    InvokeFailed,
    Error,
    Timeout,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InvokeSuccess => "invokesuccess",
            Self::InvokeCompleted => "invokecompleted",
            Self::InvokeFailed => "invokefailed",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }

    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::InvokeCompleted | Self::InvokeFailed | Self::Error | Self::Timeout
        )
    }

    /// Statuses that carry an error message.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::InvokeFailed | Self::Error | Self::Timeout)
    }

    /// Statuses reachable from `self`.
    pub fn valid_transitions(self) -> &'static [ExecutionStatus] {
        use ExecutionStatus::*;
        match self {
            Queued => &[InvokeSuccess, InvokeCompleted, InvokeFailed, Error, Timeout],
            InvokeSuccess => &[InvokeCompleted, InvokeFailed, Error, Timeout],
            InvokeCompleted | InvokeFailed | Error | Timeout => &[],
        }
    }

    pub fn can_transition(self, to: ExecutionStatus) -> bool {
        self.valid_transitions().contains(&to)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "invokesuccess" => Ok(Self::InvokeSuccess),
            "invokecompleted" => Ok(Self::InvokeCompleted),
            "invokefailed" => Ok(Self::InvokeFailed),
            "error" => Ok(Self::Error),
            "timeout" => Ok(Self::Timeout),
            other => Err(format!("Unknown execution status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Request / worker identity
// ---------------------------------------------------------------------------

/// What a caller asks the dispatcher to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub workflow_id: String,
    /// Worker-side workflow to invoke.
    pub template_id: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    /// Maximum run time in milliseconds before the record is timed out.
    pub expiration: i64,
}

/// The resolved worker principal whose queue receives invoke commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerIdentity {
    /// Queue name of the worker (its user id).
    pub id: DocId,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

fn default_kind() -> String {
    EXECUTION_KIND.to_string()
}

/// One attempt to run a workflow on a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    #[serde(rename = "_id")]
    pub id: DocId,
    #[serde(rename = "_type", default = "default_kind")]
    pub kind: String,
    /// Id of the outbound invoke envelope.
    pub correlation_id: String,
    pub workflow_id: String,
    pub template_id: String,
    pub robot_id: DocId,
    #[serde(default)]
    pub robot_name: String,
    pub user_id: DocId,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Map<String, Value>>,
    pub status: ExecutionStatus,
    pub started_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoked_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
    /// Milliseconds allowed between `started_at` and a terminal status.
    pub expiration: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionRecord {
    /// Build a fresh `queued` record for a submission.
    pub fn queued(
        id: impl Into<DocId>,
        correlation_id: impl Into<String>,
        request: &ExecutionRequest,
        worker: &WorkerIdentity,
        session: &Session,
        started_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            kind: default_kind(),
            correlation_id: correlation_id.into(),
            workflow_id: request.workflow_id.clone(),
            template_id: request.template_id.clone(),
            robot_id: worker.id.clone(),
            robot_name: worker.name.clone(),
            user_id: session.user_id.clone(),
            user_name: session.username.clone(),
            arguments: request.arguments.clone(),
            output: None,
            status: ExecutionStatus::Queued,
            started_at,
            invoked_at: None,
            finished_at: None,
            expiration: request.expiration,
            error: None,
        }
    }

    /// Move the record to `to`, stamping `at` as the invoked or finished
    /// time.
    ///
    /// Re-applying the current non-terminal status is accepted and leaves
    /// the record unchanged. `invoked_at` is only set once.
    pub fn apply(&mut self, to: ExecutionStatus, at: Timestamp) -> Result<(), CoreError> {
        if self.status == to && !to.is_terminal() {
            return Ok(());
        }
        if !self.status.can_transition(to) {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to,
            });
        }

        self.status = to;
        if to == ExecutionStatus::InvokeSuccess && self.invoked_at.is_none() {
            self.invoked_at = Some(at);
        }
        if to.is_terminal() {
            self.finished_at = Some(at);
        }
        Ok(())
    }

    /// Transition to `invokecompleted` and attach the worker output.
    pub fn complete(
        &mut self,
        output: Option<Map<String, Value>>,
        at: Timestamp,
    ) -> Result<(), CoreError> {
        self.apply(ExecutionStatus::InvokeCompleted, at)?;
        self.output = output;
        Ok(())
    }

    /// Transition to a failure status and record the reason.
    pub fn fail(
        &mut self,
        status: ExecutionStatus,
        message: impl Into<String>,
        at: Timestamp,
    ) -> Result<(), CoreError> {
        if !status.is_failure() {
            return Err(CoreError::NotAFailure(status));
        }
        self.apply(status, at)?;
        self.error = Some(message.into());
        Ok(())
    }

    /// Whether more than `expiration` milliseconds have elapsed since
    /// submission.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now - self.started_at > TimeDelta::milliseconds(self.expiration)
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}
