//! Errors - エラー型と分類
//!
//! # 分類
//! - `StoreUnavailable`: 一時的なエラー（呼び出し側でバックオフ付きリトライ）
//! - `ClaimMismatch` / `AlreadyTerminal`: 契約違反（ログに出して呼び出し側へ返す）
//! - `HandlerError`: ステージ処理の失敗（`fail` でタスク状態に変換される）

use thiserror::Error;

use super::ids::{DocumentId, TaskId};
use super::state::TaskStatus;
use super::worker_identity::WorkerIdentity;

/// ErrorKind は運用上の分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retry with backoff.
    Transient,
    /// Programming-contract violation. Retrying cannot help.
    Contract,
    /// Anything else the backend reported.
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("task store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("task {task_id} is not claimed by {caller} (owner: {})", owner_label(.owner))]
    ClaimMismatch {
        task_id: TaskId,
        caller: WorkerIdentity,
        owner: Option<WorkerIdentity>,
    },

    #[error("task {task_id} is already {status}")]
    AlreadyTerminal { task_id: TaskId, status: TaskStatus },

    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("document {0} not found")]
    DocumentNotFound(DocumentId),

    #[error("task {task_id} cannot be retried while {status}")]
    NotRetryable { task_id: TaskId, status: TaskStatus },

    #[error("task store backend error: {0}")]
    Backend(String),
}

fn owner_label(owner: &Option<WorkerIdentity>) -> String {
    owner
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "none".to_string())
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::StoreUnavailable(_) => ErrorKind::Transient,
            StoreError::ClaimMismatch { .. }
            | StoreError::AlreadyTerminal { .. }
            | StoreError::NotRetryable { .. } => ErrorKind::Contract,
            StoreError::NotFound(_) | StoreError::DocumentNotFound(_) | StoreError::Backend(_) => {
                ErrorKind::Permanent
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Business-logic failure inside a stage handler. Recorded on the task, never
/// propagated as a worker fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<StoreError> for HandlerError {
    fn from(e: StoreError) -> Self {
        Self::new(e.to_string())
    }
}
