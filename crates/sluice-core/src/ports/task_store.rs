//! TaskStore port - リレーショナル DB が実装する正本（source of truth）
//!
//! TaskStore は以下を管理します：
//! - タスクの状態（pending / claimed / done / failed）
//! - claim の所有者とタイムスタンプ
//! - 重複排除キー、リトライの系譜
//!
//! # 設計原則
//! - claim / complete / fail / reap はそれぞれ単一のアトミック操作
//! - 複数タスクにまたがるトランザクションは不要
//! - ハンドラ実行中にロックを保持しない（claim の権威はここにある）

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{
    Enqueued, Stage, StoreError, Task, TaskCounts, TaskFailure, TaskId, TaskPayload, TaskResult,
    WorkerIdentity,
};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a `pending` task. Not idempotent.
    async fn enqueue(&self, stage: &Stage, payload: TaskPayload) -> Result<TaskId, StoreError>;

    /// Insert a `pending` task unless one with `dedup_key` already exists.
    async fn enqueue_unique(
        &self,
        stage: &Stage,
        payload: TaskPayload,
        dedup_key: &str,
    ) -> Result<Enqueued, StoreError>;

    /// Atomically claim the oldest pending task of `stage` (creation time,
    /// ties broken by id). `None` when nothing is pending.
    async fn claim(&self, stage: &Stage, worker: &WorkerIdentity)
    -> Result<Option<Task>, StoreError>;

    /// `claimed -> done`. Only the current owner may complete.
    async fn complete(
        &self,
        task_id: TaskId,
        worker: &WorkerIdentity,
        result: TaskResult,
    ) -> Result<(), StoreError>;

    /// `claimed -> failed`. Only the current owner may fail.
    async fn fail(
        &self,
        task_id: TaskId,
        worker: &WorkerIdentity,
        failure: TaskFailure,
    ) -> Result<(), StoreError>;

    /// Reset claims older than `stale_after` to `pending`. Returns how many.
    async fn reap(&self, stale_after: Duration) -> Result<u64, StoreError>;

    /// Enqueue a fresh task replacing a `failed` one (attempt + 1).
    async fn requeue_failed(&self, task_id: TaskId) -> Result<TaskId, StoreError>;

    async fn get(&self, task_id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Counts by status, for one stage or across all stages.
    async fn counts(&self, stage: Option<&Stage>) -> Result<TaskCounts, StoreError>;
}
