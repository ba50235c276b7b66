//! StageQueue - Stage Queue Adapter
//!
//! 1 つのステージに束縛された Task Store のビューです。
//! ワーカーは自分のステージしか見ないので、claim / complete / fail の引数から
//! stage を取り除けます。後続ステージへの投入は `push_unique` を使います。

use std::sync::Arc;

use crate::domain::{
    Enqueued, Stage, StoreError, Task, TaskCounts, TaskFailure, TaskId, TaskPayload, TaskResult,
    WorkerIdentity,
};
use crate::ports::TaskStore;

#[derive(Clone)]
pub struct StageQueue {
    store: Arc<dyn TaskStore>,
    stage: Stage,
}

impl StageQueue {
    pub fn new(store: Arc<dyn TaskStore>, stage: Stage) -> Self {
        Self { store, stage }
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Same store, another stage.
    pub fn for_stage(&self, stage: Stage) -> Self {
        Self::new(self.store.clone(), stage)
    }

    pub async fn push(&self, payload: TaskPayload) -> Result<TaskId, StoreError> {
        self.store.enqueue(&self.stage, payload).await
    }

    pub async fn push_unique(
        &self,
        payload: TaskPayload,
        dedup_key: &str,
    ) -> Result<Enqueued, StoreError> {
        self.store
            .enqueue_unique(&self.stage, payload, dedup_key)
            .await
    }

    pub async fn claim(&self, worker: &WorkerIdentity) -> Result<Option<Task>, StoreError> {
        self.store.claim(&self.stage, worker).await
    }

    pub async fn complete(
        &self,
        task_id: TaskId,
        worker: &WorkerIdentity,
        result: TaskResult,
    ) -> Result<(), StoreError> {
        self.store.complete(task_id, worker, result).await
    }

    pub async fn fail(
        &self,
        task_id: TaskId,
        worker: &WorkerIdentity,
        failure: TaskFailure,
    ) -> Result<(), StoreError> {
        self.store.fail(task_id, worker, failure).await
    }

    pub async fn counts(&self) -> Result<TaskCounts, StoreError> {
        self.store.counts(Some(&self.stage)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DocumentId;
    use crate::impls::InMemoryStore;
    use serde_json::json;
    use ulid::Ulid;

    #[tokio::test]
    async fn queues_are_isolated_by_stage() {
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryStore::new());
        let extract = StageQueue::new(store.clone(), Stage::extract());
        let classify = extract.for_stage(Stage::classify());
        let worker = WorkerIdentity::new("classifier", 0);

        extract
            .push(TaskPayload::new(DocumentId::from_ulid(Ulid::new())))
            .await
            .unwrap();
        assert!(classify.claim(&worker).await.unwrap().is_none());

        let id = classify
            .push(TaskPayload::new(DocumentId::from_ulid(Ulid::new())))
            .await
            .unwrap();
        let task = classify.claim(&worker).await.unwrap().unwrap();
        assert_eq!(task.id, id);
        assert_eq!(task.stage, Stage::classify());

        classify
            .complete(id, &worker, json!({"category": "flood"}).into())
            .await
            .unwrap();

        assert_eq!(classify.counts().await.unwrap().done, 1);
        assert_eq!(extract.counts().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn push_unique_is_idempotent() {
        let queue = StageQueue::new(Arc::new(InMemoryStore::new()), Stage::classify());
        let payload = TaskPayload::new(DocumentId::from_ulid(Ulid::new()));

        let a = queue.push_unique(payload.clone(), "k").await.unwrap();
        let b = queue.push_unique(payload, "k").await.unwrap();
        assert_eq!(a.task_id(), b.task_id());
        assert_eq!(queue.counts().await.unwrap().pending, 1);
    }
}
