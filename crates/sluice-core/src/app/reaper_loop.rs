//! ReaperLoop - 期限切れ claim の回収
//!
//! # フロー
//! 1. `reap_interval` ごとに `TaskStore::reap(stale_after)` を呼ぶ
//! 2. claimed のまま `stale_after` を超えたタスクは pending に戻る
//! 3. 戻った件数が 0 でなければログに出す
//!
//! `stale_after` はハンドラの最長処理時間より十分長くしてください。
//! 短すぎると生きているワーカーの claim まで回収され、二重処理になります。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::StoreError;
use crate::ports::TaskStore;

pub struct ReaperLoop {
    store: Arc<dyn TaskStore>,
    stale_after: Duration,
    interval: Duration,
}

impl ReaperLoop {
    pub fn new(store: Arc<dyn TaskStore>, stale_after: Duration, interval: Duration) -> Self {
        Self {
            store,
            stale_after,
            interval,
        }
    }

    pub async fn reap_once(&self) -> Result<u64, StoreError> {
        let reaped = self.store.reap(self.stale_after).await?;
        if reaped > 0 {
            warn!(
                reaped,
                stale_after_secs = self.stale_after.as_secs(),
                "stale claims returned to pending"
            );
        }
        Ok(reaped)
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("reaper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.reap_once().await {
                        error!(error = %e, "reap failed");
                    }
                }
            }
        }
    }
}
