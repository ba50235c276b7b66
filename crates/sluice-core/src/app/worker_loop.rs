//! Worker - 1 ステージ・1 アイデンティティに束縛された実行ループ
//!
//! # フロー
//! 1. 起動時に `startup_jitter` 以内のランダムな遅延（一斉ポーリングを避ける）
//! 2. claim → なければポーリングバックオフ（min から倍々で max まで、ジッタ付き）
//! 3. claim できたらハンドラを実行し、処理時間を測る
//! 4. 成功: 次ステージのタスクを投入（`next_stage:<task_id>` で重複排除）→ complete
//! 5. 失敗: 理由を付けて fail
//!
//! # 設計原則
//! - 同時に持つ claim は 1 件だけ
//! - ハンドラ実行中はロックもキャンセルトークンも持ち込まない
//! - ワーカー自身のクラッシュは何も記録しない（claim は reap が回収する）
//! - Task Store の一時エラーはループ内でバックオフ付きリトライ。
//!   `store_retry_budget` を超えて連続したら `StoreOutage` で終了し、
//!   Supervisor に再起動を任せる

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app::builder::App;
use crate::domain::{
    ErrorKind, Stage, StoreError, Task, TaskFailure, TaskId, TaskPayload, TaskResult,
    WorkerIdentity,
};
use crate::ports::{StageHandler, TaskStore};
use crate::queue::{Backoff, StageQueue, random_delay, sleep_or_cancel};

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub poll_min: Duration,
    pub poll_max: Duration,
    /// Relative jitter on each poll delay, `0.0..=1.0`.
    pub poll_jitter: f64,
    pub startup_jitter: Duration,
    /// Consecutive store failures tolerated before the worker gives up.
    pub store_retry_budget: u32,
    pub store_retry_min: Duration,
    pub store_retry_max: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_min: Duration::from_millis(200),
            poll_max: Duration::from_secs(5),
            poll_jitter: 0.2,
            startup_jitter: Duration::from_secs(1),
            store_retry_budget: 5,
            store_retry_min: Duration::from_millis(500),
            store_retry_max: Duration::from_secs(10),
        }
    }
}

/// What one claim/handle cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    /// Nothing to claim.
    Idle,
    Completed(TaskId),
    Failed(TaskId),
    /// The store refused the final report (claim lost to a reap, or the task
    /// was already terminal). Logged, nothing else to do.
    Rejected(TaskId),
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("worker {worker} gave up after {failures} consecutive store failures: {source}")]
    StoreOutage {
        worker: WorkerIdentity,
        failures: u32,
        #[source]
        source: StoreError,
    },

    #[error("no handler registered for stage '{0}'")]
    NoHandler(Stage),
}

enum Report {
    Complete(TaskResult),
    Fail(TaskFailure),
}

pub struct Worker {
    identity: WorkerIdentity,
    queue: StageQueue,
    handler: Arc<dyn StageHandler>,
    next: Option<StageQueue>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(identity: WorkerIdentity, queue: StageQueue, handler: Arc<dyn StageHandler>) -> Self {
        Self {
            identity,
            queue,
            handler,
            next: None,
            config: WorkerConfig::default(),
        }
    }

    pub fn with_next_stage(mut self, next: Option<StageQueue>) -> Self {
        self.next = next;
        self
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    pub fn stage(&self) -> &Stage {
        self.queue.stage()
    }

    pub fn next_stage(&self) -> Option<&Stage> {
        self.next.as_ref().map(StageQueue::stage)
    }

    /// Long-running loop. Returns `Ok(())` when `cancel` fires between tasks.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), WorkerError> {
        let stagger = random_delay(self.config.startup_jitter);
        info!(
            worker = %self.identity,
            stage = %self.stage(),
            stagger_ms = stagger.as_millis() as u64,
            "worker starting"
        );
        if !sleep_or_cancel(stagger, &cancel).await {
            info!(worker = %self.identity, "worker stopped before first poll");
            return Ok(());
        }

        let mut poll = Backoff::new(self.config.poll_min, self.config.poll_max)
            .with_jitter(self.config.poll_jitter);
        let mut outage = self.outage_backoff();
        let mut failures = 0u32;

        while !cancel.is_cancelled() {
            let delay = match self.work_once().await {
                Ok(WorkOutcome::Idle) => {
                    failures = 0;
                    outage.reset();
                    poll.next_delay()
                }
                Ok(_) => {
                    failures = 0;
                    outage.reset();
                    poll.reset();
                    continue;
                }
                Err(e) => {
                    failures += 1;
                    if failures > self.config.store_retry_budget {
                        error!(
                            worker = %self.identity,
                            failures,
                            error = %e,
                            "task store outage exceeded retry budget"
                        );
                        return Err(WorkerError::StoreOutage {
                            worker: self.identity.clone(),
                            failures,
                            source: e,
                        });
                    }
                    let delay = outage.next_delay();
                    warn!(
                        worker = %self.identity,
                        failures,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "task store call failed"
                    );
                    delay
                }
            };
            if !sleep_or_cancel(delay, &cancel).await {
                break;
            }
        }

        info!(worker = %self.identity, "worker stopped");
        Ok(())
    }

    /// One claim/handle/report cycle.
    pub async fn work_once(&self) -> Result<WorkOutcome, StoreError> {
        let Some(task) = self.queue.claim(&self.identity).await? else {
            return Ok(WorkOutcome::Idle);
        };
        debug!(
            worker = %self.identity,
            task_id = %task.id,
            stage = %task.stage,
            claims = task.claims,
            "task claimed"
        );

        let started = Instant::now();
        let handled = self.handler.handle(&task.stage, &task.payload).await;
        let elapsed = started.elapsed();

        match handled {
            Ok(output) => {
                self.chain_next(&task).await?;
                let report = Report::Complete(TaskResult::new(output).with_elapsed(elapsed));
                match self.report(task.id, &report).await {
                    Ok(()) => {
                        info!(
                            worker = %self.identity,
                            task_id = %task.id,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "task done"
                        );
                        Ok(WorkOutcome::Completed(task.id))
                    }
                    Err(e) => self.rejected(task.id, e),
                }
            }
            Err(e) => {
                warn!(
                    worker = %self.identity,
                    task_id = %task.id,
                    error = %e,
                    "stage handler failed"
                );
                let report = Report::Fail(TaskFailure::new(e.message()).with_elapsed(elapsed));
                match self.report(task.id, &report).await {
                    Ok(()) => Ok(WorkOutcome::Failed(task.id)),
                    Err(e) => self.rejected(task.id, e),
                }
            }
        }
    }

    /// Drain the stage. Returns how many tasks were handled.
    pub async fn work_all(&self) -> Result<usize, StoreError> {
        let mut handled = 0;
        while self.work_once().await? != WorkOutcome::Idle {
            handled += 1;
        }
        Ok(handled)
    }

    /// Enqueue the follow-up task before reporting completion. A crash in
    /// between leaves the task claimed; after the reap the retry hits the
    /// same dedup key.
    async fn chain_next(&self, task: &Task) -> Result<(), StoreError> {
        let Some(next) = &self.next else {
            return Ok(());
        };
        let key = next_stage_key(task.id);
        let payload = TaskPayload::new(task.payload.document_id)
            .with_params(task.payload.params.clone());

        let mut backoff = self.outage_backoff();
        let mut retries = 0;
        loop {
            match next.push_unique(payload.clone(), &key).await {
                Ok(enqueued) => {
                    debug!(
                        worker = %self.identity,
                        task_id = %task.id,
                        next_task = %enqueued.task_id(),
                        next_stage = %next.stage(),
                        created = enqueued.is_created(),
                        "next stage enqueued"
                    );
                    return Ok(());
                }
                Err(e) => self.pause_for_store(e, &mut backoff, &mut retries).await?,
            }
        }
    }

    async fn report(&self, task_id: TaskId, report: &Report) -> Result<(), StoreError> {
        let mut backoff = self.outage_backoff();
        let mut retries = 0;
        loop {
            let result = match report {
                Report::Complete(r) => self.queue.complete(task_id, &self.identity, r.clone()).await,
                Report::Fail(f) => self.queue.fail(task_id, &self.identity, f.clone()).await,
            };
            match result {
                Ok(()) => return Ok(()),
                Err(e) => self.pause_for_store(e, &mut backoff, &mut retries).await?,
            }
        }
    }

    /// Sleep before retrying a transient error; anything else, or an
    /// exhausted budget, is handed back.
    async fn pause_for_store(
        &self,
        err: StoreError,
        backoff: &mut Backoff,
        retries: &mut u32,
    ) -> Result<(), StoreError> {
        if !err.is_transient() || *retries >= self.config.store_retry_budget {
            return Err(err);
        }
        *retries += 1;
        let delay = backoff.next_delay();
        warn!(
            worker = %self.identity,
            retry = *retries,
            retry_in_ms = delay.as_millis() as u64,
            error = %err,
            "task store unavailable, retrying report"
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }

    fn rejected(&self, task_id: TaskId, err: StoreError) -> Result<WorkOutcome, StoreError> {
        if err.kind() == ErrorKind::Contract {
            error!(
                worker = %self.identity,
                task_id = %task_id,
                error = %err,
                "task store rejected report"
            );
            return Ok(WorkOutcome::Rejected(task_id));
        }
        Err(err)
    }

    fn outage_backoff(&self) -> Backoff {
        Backoff::new(self.config.store_retry_min, self.config.store_retry_max).with_jitter(0.1)
    }
}

pub(crate) fn next_stage_key(task_id: TaskId) -> String {
    format!("next_stage:{}", task_id.to_key())
}

/// Starts a worker process for an identity. The supervisor only sees this
/// seam, so tests can swap in scripted workers.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn run_worker(
        &self,
        identity: WorkerIdentity,
        stage: Stage,
        cancel: CancellationToken,
    ) -> Result<(), WorkerError>;
}

/// Launcher that builds real workers from the app's registry.
pub struct PipelineLauncher {
    app: App,
    store: Arc<dyn TaskStore>,
    config: WorkerConfig,
}

impl PipelineLauncher {
    pub fn new(app: App, store: Arc<dyn TaskStore>, config: WorkerConfig) -> Self {
        Self { app, store, config }
    }
}

#[async_trait]
impl WorkerLauncher for PipelineLauncher {
    async fn run_worker(
        &self,
        identity: WorkerIdentity,
        stage: Stage,
        cancel: CancellationToken,
    ) -> Result<(), WorkerError> {
        let worker = self
            .app
            .worker(identity, &stage, self.store.clone(), self.config.clone())
            .ok_or(WorkerError::NoHandler(stage))?;
        worker.run(cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DocumentId, HandlerError, TaskStatus};
    use crate::impls::InMemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use ulid::Ulid;

    struct Scripted {
        calls: AtomicUsize,
        fail: bool,
    }

    impl Scripted {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: true,
            })
        }
    }

    #[async_trait]
    impl StageHandler for Scripted {
        async fn handle(
            &self,
            stage: &Stage,
            payload: &TaskPayload,
        ) -> Result<serde_json::Value, HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(HandlerError::new("source returned 404"));
            }
            Ok(json!({ "stage": stage.as_str(), "params": payload.params }))
        }
    }

    fn fast_config() -> WorkerConfig {
        WorkerConfig {
            poll_min: Duration::from_millis(1),
            poll_max: Duration::from_millis(5),
            poll_jitter: 0.0,
            startup_jitter: Duration::ZERO,
            store_retry_budget: 2,
            store_retry_min: Duration::from_millis(1),
            store_retry_max: Duration::from_millis(2),
        }
    }

    fn extractor(store: &Arc<InMemoryStore>, handler: Arc<dyn StageHandler>) -> Worker {
        let queue = StageQueue::new(store.clone(), Stage::extract());
        let next = queue.for_stage(Stage::classify());
        Worker::new(WorkerIdentity::new("extractor", 0), queue, handler)
            .with_next_stage(Some(next))
            .with_config(fast_config())
    }

    fn payload() -> TaskPayload {
        TaskPayload::new(DocumentId::from_ulid(Ulid::new())).with_params(json!({"lang": "en"}))
    }

    #[tokio::test]
    async fn success_completes_and_chains_next_stage() {
        let store = Arc::new(InMemoryStore::new());
        let p = payload();
        let id = store.enqueue(&Stage::extract(), p.clone()).await.unwrap();
        let worker = extractor(&store, Scripted::ok());

        assert_eq!(worker.work_once().await.unwrap(), WorkOutcome::Completed(id));

        let done = store.get(id).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Done);
        assert!(done.processing_ms.is_some());
        assert_eq!(
            done.result,
            Some(json!({"stage": "extract", "params": {"lang": "en"}}))
        );

        let next = store
            .claim(&Stage::classify(), &WorkerIdentity::new("classifier", 0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.payload, p);
        assert_eq!(next.dedup_key, Some(next_stage_key(id)));

        assert_eq!(worker.work_once().await.unwrap(), WorkOutcome::Idle);
    }

    #[tokio::test]
    async fn handler_error_fails_without_chaining() {
        let store = Arc::new(InMemoryStore::new());
        let id = store.enqueue(&Stage::extract(), payload()).await.unwrap();
        let worker = extractor(&store, Scripted::failing());

        assert_eq!(worker.work_once().await.unwrap(), WorkOutcome::Failed(id));

        let failed = store.get(id).await.unwrap().unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("source returned 404"));
        assert_eq!(store.counts(Some(&Stage::classify())).await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn work_all_drains_the_stage() {
        let store = Arc::new(InMemoryStore::new());
        for _ in 0..4 {
            store.enqueue(&Stage::extract(), payload()).await.unwrap();
        }
        let handler = Scripted::ok();
        let worker = extractor(&store, handler.clone());

        assert_eq!(worker.work_all().await.unwrap(), 4);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 4);
        assert_eq!(store.counts(Some(&Stage::extract())).await.unwrap().done, 4);
        assert_eq!(store.counts(Some(&Stage::classify())).await.unwrap().pending, 4);
    }

    #[tokio::test]
    async fn lost_claim_is_rejected_not_fatal() {
        let store = Arc::new(InMemoryStore::new());
        let id = store.enqueue(&Stage::classify(), payload()).await.unwrap();

        struct Reaping {
            store: Arc<InMemoryStore>,
        }

        #[async_trait]
        impl StageHandler for Reaping {
            async fn handle(
                &self,
                _stage: &Stage,
                _payload: &TaskPayload,
            ) -> Result<serde_json::Value, HandlerError> {
                // The claim goes stale while the handler runs.
                tokio::time::sleep(Duration::from_millis(2)).await;
                self.store.reap(Duration::ZERO).await?;
                self.store
                    .claim(&Stage::classify(), &WorkerIdentity::new("classifier", 1))
                    .await?;
                Ok(json!("late"))
            }
        }

        let queue = StageQueue::new(store.clone(), Stage::classify());
        let worker = Worker::new(
            WorkerIdentity::new("classifier", 0),
            queue,
            Arc::new(Reaping {
                store: store.clone(),
            }),
        )
        .with_config(fast_config());

        assert_eq!(worker.work_once().await.unwrap(), WorkOutcome::Rejected(id));

        let task = store.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Claimed);
        assert_eq!(task.owner, Some(WorkerIdentity::new("classifier", 1)));
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let store = Arc::new(InMemoryStore::new());
        let worker = Arc::new(extractor(&store, Scripted::ok()));
        let cancel = CancellationToken::new();

        let handle = {
            let worker = worker.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.run(cancel).await })
        };

        let id = store.enqueue(&Stage::extract(), payload()).await.unwrap();
        for _ in 0..200 {
            if store.get(id).await.unwrap().unwrap().status == TaskStatus::Done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(store.get(id).await.unwrap().unwrap().status, TaskStatus::Done);

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn outage_beyond_budget_ends_the_worker() {
        let store = Arc::new(InMemoryStore::new());
        store.set_available(false);
        let worker = extractor(&store, Scripted::ok());

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            worker.run(CancellationToken::new()),
        )
        .await
        .unwrap();
        assert!(matches!(
            result,
            Err(WorkerError::StoreOutage { failures: 3, .. })
        ));
    }

    #[tokio::test]
    async fn launcher_without_handler_errors() {
        let app = crate::app::AppBuilder::new().build().unwrap();
        let launcher = app.launcher(Arc::new(InMemoryStore::new()), fast_config());
        let result = launcher
            .run_worker(
                WorkerIdentity::new("classifier", 0),
                Stage::classify(),
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(WorkerError::NoHandler(_))));
    }
}
