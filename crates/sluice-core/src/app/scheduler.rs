//! SchedulerTrigger - 定期的な取り込み
//!
//! # フロー
//! 1. 現在時刻を interval で切り捨てて run window を決める
//! 2. IngestSource から生参照（URL / パス）を受け取る
//! 3. 参照ごとに Document を登録し、先頭ステージのタスクを投入
//!    （dedup key = `ingest:<window>:<document>`）
//! 4. 全件投入できたら IngestSource に acknowledge
//!
//! 同じ window で 2 回発火しても dedup key が一致するので新しいタスクは増えません。
//! 取りこぼした tick は再生しません（`MissedTickBehavior::Skip`）。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::domain::{DocumentId, Stage, StoreError, TaskPayload};
use crate::ports::{Clock, DocumentStore, IngestError, IngestSource, TaskStore};

/// The interval-aligned slot one firing belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunWindow {
    start: DateTime<Utc>,
    interval: Duration,
}

impl RunWindow {
    /// Window containing `now`: `now` floored to a multiple of `interval`
    /// since the epoch.
    pub fn containing(now: DateTime<Utc>, interval: Duration) -> Self {
        let step = i64::try_from(interval.as_millis()).unwrap_or(i64::MAX).max(1);
        let ms = now.timestamp_millis();
        let floored = ms - ms.rem_euclid(step);
        let start = DateTime::from_timestamp_millis(floored).unwrap_or(now);
        Self { start, interval }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Compact UTC stamp, `20240301T100500Z`.
    pub fn key(&self) -> String {
        self.start.format("%Y%m%dT%H%M%SZ").to_string()
    }
}

impl fmt::Display for RunWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

pub(crate) fn ingest_key(window: &RunWindow, document: DocumentId) -> String {
    format!("ingest:{}:{}", window.key(), document.to_key())
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of one firing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub window: RunWindow,
    pub discovered: usize,
    pub enqueued: usize,
    /// References already enqueued for this window.
    pub duplicates: usize,
}

pub struct SchedulerTrigger {
    tasks: Arc<dyn TaskStore>,
    documents: Arc<dyn DocumentStore>,
    source: Arc<dyn IngestSource>,
    stage: Stage,
    interval: Duration,
    clock: Arc<dyn Clock>,
}

impl SchedulerTrigger {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        documents: Arc<dyn DocumentStore>,
        source: Arc<dyn IngestSource>,
        stage: Stage,
        interval: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tasks,
            documents,
            source,
            stage,
            interval,
            clock,
        }
    }

    pub fn window_now(&self) -> RunWindow {
        RunWindow::containing(self.clock.now(), self.interval)
    }

    /// One firing; the no-argument entry point for an external cron.
    pub async fn fire_once(&self) -> Result<IngestReport, SchedulerError> {
        let window = self.window_now();
        let refs = self.source.discover(&window).await?;

        let mut report = IngestReport {
            window,
            discovered: refs.len(),
            enqueued: 0,
            duplicates: 0,
        };
        for raw_ref in &refs {
            let document = self.documents.register(raw_ref).await?;
            let key = ingest_key(&window, document);
            let enqueued = self
                .tasks
                .enqueue_unique(&self.stage, TaskPayload::new(document), &key)
                .await?;
            if enqueued.is_created() {
                report.enqueued += 1;
            } else {
                report.duplicates += 1;
            }
        }
        self.source.acknowledge(&window).await?;

        info!(
            window = %window,
            stage = %self.stage,
            discovered = report.discovered,
            enqueued = report.enqueued,
            duplicates = report.duplicates,
            "ingest fired"
        );
        Ok(report)
    }

    /// Fire on every tick until cancelled. A failed firing is logged and the
    /// next tick tries again.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("scheduler trigger shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.fire_once().await {
                        error!(error = %e, "ingest firing failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskStatus;
    use crate::impls::{InMemoryStore, StaticIngestSource};
    use crate::ports::ManualClock;
    use chrono::TimeZone;
    use rstest::rstest;

    #[rstest]
    #[case::inside(10, 7, 31, 300, "20240301T100500Z")]
    #[case::on_boundary(10, 5, 0, 300, "20240301T100500Z")]
    #[case::hourly(10, 59, 59, 3600, "20240301T100000Z")]
    fn window_floors_to_interval(
        #[case] h: u32,
        #[case] m: u32,
        #[case] s: u32,
        #[case] interval_secs: u64,
        #[case] key: &str,
    ) {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap();
        let window = RunWindow::containing(now, Duration::from_secs(interval_secs));
        assert_eq!(window.key(), key);
        assert!(window.start() <= now);
    }

    fn trigger(
        store: &Arc<InMemoryStore>,
        clock: &Arc<ManualClock>,
        refs: &[&str],
    ) -> SchedulerTrigger {
        SchedulerTrigger::new(
            store.clone(),
            store.clone(),
            Arc::new(StaticIngestSource::new(refs.iter().copied())),
            Stage::extract(),
            Duration::from_secs(300),
            clock.clone(),
        )
    }

    #[tokio::test]
    async fn firing_twice_in_one_window_enqueues_once() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 1, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let trigger = trigger(&store, &clock, &["https://a", "https://b"]);

        let first = trigger.fire_once().await.unwrap();
        assert_eq!(first.enqueued, 2);
        assert_eq!(first.duplicates, 0);

        clock.advance(Duration::from_secs(60));
        let second = trigger.fire_once().await.unwrap();
        assert_eq!(second.window, first.window);
        assert_eq!(second.enqueued, 0);
        assert_eq!(second.duplicates, 2);

        let counts = store.counts(Some(&Stage::extract())).await.unwrap();
        assert_eq!(counts.pending, 2);
    }

    #[tokio::test]
    async fn next_window_enqueues_again_for_same_document() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 1, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let trigger = trigger(&store, &clock, &["https://a"]);

        trigger.fire_once().await.unwrap();
        clock.advance(Duration::from_secs(300));
        let report = trigger.fire_once().await.unwrap();
        assert_eq!(report.enqueued, 1);

        let worker = crate::domain::WorkerIdentity::new("extractor", 0);
        let a = store.claim(&Stage::extract(), &worker).await.unwrap().unwrap();
        let b = store.claim(&Stage::extract(), &worker).await.unwrap().unwrap();
        assert_eq!(a.payload.document_id, b.payload.document_id);
        assert_eq!(a.status, TaskStatus::Claimed);
    }

    #[tokio::test]
    async fn run_fires_until_cancelled() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 1, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let trigger = Arc::new(trigger(&store, &clock, &["https://a"]));
        let cancel = CancellationToken::new();

        let handle = {
            let trigger = trigger.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { trigger.run(cancel).await })
        };

        // First tick fires immediately.
        for _ in 0..200 {
            if store.counts(None).await.unwrap().total() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(store.counts(None).await.unwrap().total(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
