//! InMemoryStore - 開発・テスト用の Task Store / Document Store
//!
//! # 実装詳細
//! - すべての状態を 1 つの `tokio::sync::Mutex` の内側に置く
//! - claim / complete / fail / reap はロックを 1 回取って完結する（= アトミック）
//! - pending インデックスはステージごとの `BTreeSet<(created_at, TaskId)>`
//!   なので「作成順、同時刻なら ID 順」がそのまま取り出し順になる

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    Document, DocumentId, Enqueued, Stage, StoreError, Task, TaskCounts, TaskFailure, TaskId,
    TaskPayload, TaskResult, TaskStatus, WorkerIdentity,
};
use crate::ports::{Clock, DocumentStore, IdGenerator, SystemClock, TaskStore, UlidGenerator};

use super::{reap_cutoff, retry_key};

type PendingKey = (DateTime<Utc>, TaskId);

#[derive(Default)]
struct InMemoryState {
    /// All task records (single source of truth for tasks).
    records: HashMap<TaskId, Task>,

    /// Pending index per stage (TaskIds only).
    pending: HashMap<Stage, BTreeSet<PendingKey>>,

    dedup: HashMap<String, TaskId>,

    documents: HashMap<DocumentId, Document>,
    documents_by_ref: HashMap<String, DocumentId>,
}

impl InMemoryState {
    fn insert_pending(&mut self, task: Task) -> TaskId {
        let id = task.id;
        self.pending
            .entry(task.stage.clone())
            .or_default()
            .insert((task.created_at, id));
        if let Some(key) = &task.dedup_key {
            self.dedup.insert(key.clone(), id);
        }
        self.records.insert(id, task);
        id
    }

    fn pop_pending(&mut self, stage: &Stage) -> Option<TaskId> {
        let queue = self.pending.get_mut(stage)?;
        queue.pop_first().map(|(_, id)| id)
    }

    fn task_mut(&mut self, task_id: TaskId) -> Result<&mut Task, StoreError> {
        self.records
            .get_mut(&task_id)
            .ok_or(StoreError::NotFound(task_id))
    }
}

/// In-memory store implementation.
pub struct InMemoryStore {
    state: Arc<Mutex<InMemoryState>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    available: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let ids = Arc::new(UlidGenerator::new(clock.clone()));
        Self {
            state: Arc::new(Mutex::new(InMemoryState::default())),
            clock,
            ids,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: while unavailable every call fails with
    /// `StoreUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::StoreUnavailable(
                "in-memory store marked unavailable".to_string(),
            ))
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn enqueue(&self, stage: &Stage, payload: TaskPayload) -> Result<TaskId, StoreError> {
        self.check_available()?;
        let task = Task::new(
            self.ids.generate_task_id(),
            stage.clone(),
            payload,
            self.clock.now(),
        );
        let mut state = self.state.lock().await;
        Ok(state.insert_pending(task))
    }

    async fn enqueue_unique(
        &self,
        stage: &Stage,
        payload: TaskPayload,
        dedup_key: &str,
    ) -> Result<Enqueued, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        if let Some(existing) = state.dedup.get(dedup_key) {
            return Ok(Enqueued::Existing(*existing));
        }
        let task = Task::new(
            self.ids.generate_task_id(),
            stage.clone(),
            payload,
            self.clock.now(),
        )
        .with_dedup_key(dedup_key);
        Ok(Enqueued::Created(state.insert_pending(task)))
    }

    async fn claim(
        &self,
        stage: &Stage,
        worker: &WorkerIdentity,
    ) -> Result<Option<Task>, StoreError> {
        self.check_available()?;
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        while let Some(task_id) = state.pop_pending(stage) {
            // Index entries can only point at pending tasks, but stay strict.
            if let Some(task) = state.records.get_mut(&task_id)
                && task.status == TaskStatus::Pending
            {
                task.claim(worker.clone(), now);
                return Ok(Some(task.clone()));
            }
        }
        Ok(None)
    }

    async fn complete(
        &self,
        task_id: TaskId,
        worker: &WorkerIdentity,
        result: TaskResult,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let task = state.task_mut(task_id)?;
        task.verify_claim(worker)?;
        task.mark_done(result, now);
        Ok(())
    }

    async fn fail(
        &self,
        task_id: TaskId,
        worker: &WorkerIdentity,
        failure: TaskFailure,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let task = state.task_mut(task_id)?;
        task.verify_claim(worker)?;
        task.mark_failed(failure, now);
        Ok(())
    }

    async fn reap(&self, stale_after: Duration) -> Result<u64, StoreError> {
        self.check_available()?;
        let now = self.clock.now();
        let Some(cutoff) = reap_cutoff(now, stale_after) else {
            return Ok(0);
        };
        let mut state = self.state.lock().await;

        let stale: Vec<TaskId> = state
            .records
            .values()
            .filter(|t| t.is_stale(cutoff))
            .map(|t| t.id)
            .collect();

        for task_id in &stale {
            if let Some(task) = state.records.get_mut(task_id) {
                task.release(now);
                let key = (task.created_at, task.id);
                let stage = task.stage.clone();
                state.pending.entry(stage).or_default().insert(key);
            }
        }
        Ok(stale.len() as u64)
    }

    async fn requeue_failed(&self, task_id: TaskId) -> Result<TaskId, StoreError> {
        self.check_available()?;
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let failed = state.task_mut(task_id)?;
        if failed.status != TaskStatus::Failed {
            return Err(StoreError::NotRetryable {
                task_id,
                status: failed.status,
            });
        }
        let next = failed
            .retry(self.ids.generate_task_id(), now)
            .with_dedup_key(retry_key(task_id));
        if let Some(existing) = state.dedup.get(&retry_key(task_id)) {
            return Ok(*existing);
        }
        Ok(state.insert_pending(next))
    }

    async fn get(&self, task_id: TaskId) -> Result<Option<Task>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state.records.get(&task_id).cloned())
    }

    async fn counts(&self, stage: Option<&Stage>) -> Result<TaskCounts, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut counts = TaskCounts::default();
        for task in state.records.values() {
            if stage.is_none_or(|s| *s == task.stage) {
                counts.add(task.status, 1);
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn register(&self, raw_ref: &str) -> Result<DocumentId, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        if let Some(id) = state.documents_by_ref.get(raw_ref) {
            return Ok(*id);
        }
        let id = self.ids.generate_document_id();
        state
            .documents
            .insert(id, Document::new(id, raw_ref, self.clock.now()));
        state.documents_by_ref.insert(raw_ref.to_string(), id);
        Ok(id)
    }

    async fn document(&self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state.documents.get(&id).cloned())
    }

    async fn set_extracted_text(&self, id: DocumentId, text: &str) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let doc = state
            .documents
            .get_mut(&id)
            .ok_or(StoreError::DocumentNotFound(id))?;
        doc.extracted_text = Some(text.to_string());
        Ok(())
    }

    async fn set_classification(
        &self,
        id: DocumentId,
        classification: serde_json::Value,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let doc = state
            .documents
            .get_mut(&id)
            .ok_or(StoreError::DocumentNotFound(id))?;
        doc.classification = Some(classification);
        Ok(())
    }
}
