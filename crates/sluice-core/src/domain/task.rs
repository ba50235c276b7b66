//! Task record: the unit of stage work and its lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::errors::StoreError;
use super::ids::{DocumentId, TaskId};
use super::stage::Stage;
use super::state::TaskStatus;
use super::worker_identity::WorkerIdentity;

/// What a task works on. Workers only ever see documents through this reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub document_id: DocumentId,

    /// Stage-specific parameters (free-form).
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,
}

impl TaskPayload {
    pub fn new(document_id: DocumentId) -> Self {
        Self {
            document_id,
            params: serde_json::Value::Null,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

/// Result reported on `complete`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TaskResult {
    pub output: serde_json::Value,
    pub elapsed: Option<Duration>,
}

impl TaskResult {
    pub fn new(output: serde_json::Value) -> Self {
        Self {
            output,
            elapsed: None,
        }
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }
}

impl From<serde_json::Value> for TaskResult {
    fn from(output: serde_json::Value) -> Self {
        Self::new(output)
    }
}

/// Failure reported on `fail`.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskFailure {
    pub reason: String,
    pub elapsed: Option<Duration>,
}

impl TaskFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            elapsed: None,
        }
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }
}

impl From<&str> for TaskFailure {
    fn from(reason: &str) -> Self {
        Self::new(reason)
    }
}

impl From<String> for TaskFailure {
    fn from(reason: String) -> Self {
        Self::new(reason)
    }
}

/// Single source of truth for a task's state.
///
/// Both store backends apply transitions through these methods so the
/// ownership and terminal-state rules live in one place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub stage: Stage,
    pub payload: TaskPayload,
    pub status: TaskStatus,

    pub owner: Option<WorkerIdentity>,
    pub claimed_at: Option<DateTime<Utc>>,

    /// Lineage number: 1 for a fresh task, +1 for each explicit retry.
    pub attempt: u32,

    /// How many times this task has been claimed (a reap followed by a new
    /// claim counts twice).
    pub claims: u32,

    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub processing_ms: Option<u64>,

    pub dedup_key: Option<String>,
    pub retry_of: Option<TaskId>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: TaskId, stage: Stage, payload: TaskPayload, now: DateTime<Utc>) -> Self {
        Self {
            id,
            stage,
            payload,
            status: TaskStatus::Pending,
            owner: None,
            claimed_at: None,
            attempt: 1,
            claims: 0,
            result: None,
            error: None,
            processing_ms: None,
            dedup_key: None,
            retry_of: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    /// New pending task replacing this failed one.
    pub fn retry(&self, id: TaskId, now: DateTime<Utc>) -> Self {
        let mut next = Self::new(id, self.stage.clone(), self.payload.clone(), now);
        next.attempt = self.attempt + 1;
        next.retry_of = Some(self.id);
        next
    }

    /// Ownership check shared by `complete` and `fail`.
    ///
    /// A terminal task reports `AlreadyTerminal` regardless of the caller.
    pub fn verify_claim(&self, caller: &WorkerIdentity) -> Result<(), StoreError> {
        if self.status.is_terminal() {
            return Err(StoreError::AlreadyTerminal {
                task_id: self.id,
                status: self.status,
            });
        }
        if self.status != TaskStatus::Claimed || self.owner.as_ref() != Some(caller) {
            return Err(StoreError::ClaimMismatch {
                task_id: self.id,
                caller: caller.clone(),
                owner: self.owner.clone(),
            });
        }
        Ok(())
    }

    pub fn claim(&mut self, owner: WorkerIdentity, now: DateTime<Utc>) {
        self.status = TaskStatus::Claimed;
        self.owner = Some(owner);
        self.claimed_at = Some(now);
        self.claims += 1;
        self.updated_at = now;
    }

    /// Claimed strictly before `cutoff`.
    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Claimed && self.claimed_at.is_some_and(|at| at < cutoff)
    }

    /// Give an abandoned claim back to the pending pool.
    pub fn release(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Pending;
        self.owner = None;
        self.claimed_at = None;
        self.updated_at = now;
    }

    pub fn mark_done(&mut self, result: TaskResult, now: DateTime<Utc>) {
        self.status = TaskStatus::Done;
        self.result = Some(result.output);
        self.error = None;
        self.processing_ms = result.elapsed.map(duration_ms);
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, failure: TaskFailure, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.error = Some(failure.reason);
        self.processing_ms = failure.elapsed.map(duration_ms);
        self.updated_at = now;
    }
}

pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Outcome of an idempotent enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Created(TaskId),
    /// A task with the same dedup key already existed.
    Existing(TaskId),
}

impl Enqueued {
    pub fn task_id(self) -> TaskId {
        match self {
            Enqueued::Created(id) | Enqueued::Existing(id) => id,
        }
    }

    pub fn is_created(self) -> bool {
        matches!(self, Enqueued::Created(_))
    }
}

/// Status counts, the operator's view of a stuck or growing pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub pending: u64,
    pub claimed: u64,
    pub done: u64,
    pub failed: u64,
}

impl TaskCounts {
    pub fn add(&mut self, status: TaskStatus, n: u64) {
        match status {
            TaskStatus::Pending => self.pending += n,
            TaskStatus::Claimed => self.claimed += n,
            TaskStatus::Done => self.done += n,
            TaskStatus::Failed => self.failed += n,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.claimed + self.done + self.failed
    }
}
