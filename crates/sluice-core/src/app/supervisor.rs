//! Supervisor - 名前付きワーカープールの起動・停止・自動再起動
//!
//! # 構成
//! - プールは `PoolSpec { name, stage, size }` から作られ、
//!   `name-00` .. `name-{size-1}` のアイデンティティを持つ
//! - アイデンティティごとに監視タスクが 1 つ走り、ワーカーを spawn して終了を待つ
//! - プールの登録簿は Supervisor が明示的に持つ（グローバル状態なし）
//!
//! # 再起動ポリシー
//! - `stop` 以外の終了はすべて再起動（エラー・panic・正常終了を問わない）
//! - 再起動の待ち時間は `restart_backoff` から倍々で `max_restart_backoff` まで
//! - `min_uptime` 以上動いてから落ちた場合はバックオフをリセット
//! - `min_uptime` 未満の終了が `degraded_after` 回続くとプールは degraded
//!
//! # 停止
//! 1. キャンセルトークンを発火（ワーカーはタスクの合間で抜ける）
//! 2. `stop_grace` だけ待つ
//! 3. まだハンドラ実行中なら abort。処理中だったタスクは claimed のまま残り、
//!    reap で回収される

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::app::status::{PoolHealth, PoolStatus, WorkerState, WorkerStatus};
use crate::app::worker_loop::{WorkerError, WorkerLauncher};
use crate::domain::{Stage, WorkerIdentity};
use crate::queue::{Backoff, sleep_or_cancel};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSpec {
    pub name: String,
    pub stage: Stage,
    #[serde(default = "default_pool_size")]
    pub size: u32,
}

fn default_pool_size() -> u32 {
    1
}

impl PoolSpec {
    pub fn new(name: impl Into<String>, stage: Stage, size: u32) -> Self {
        Self {
            name: name.into(),
            stage,
            size,
        }
    }

    pub fn identities(&self) -> impl Iterator<Item = WorkerIdentity> + '_ {
        (0..self.size).map(|ordinal| WorkerIdentity::new(self.name.clone(), ordinal))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestartPolicy {
    pub restart_backoff: Duration,
    pub max_restart_backoff: Duration,
    pub min_uptime: Duration,
    pub degraded_after: u32,
    pub stop_grace: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            restart_backoff: Duration::from_millis(500),
            max_restart_backoff: Duration::from_secs(30),
            min_uptime: Duration::from_secs(10),
            degraded_after: 3,
            stop_grace: Duration::from_secs(10),
        }
    }
}

/// What a control command addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    All,
    Pool(String),
    Worker(WorkerIdentity),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid target '{0}', expected all, <pool>:*, <pool>:<pool>-NN or <pool>-NN")]
pub struct ParseTargetError(pub String);

impl FromStr for Target {
    type Err = ParseTargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseTargetError(s.to_string());
        if s.is_empty() || s.chars().any(char::is_whitespace) {
            return Err(err());
        }
        if s == "all" {
            return Ok(Target::All);
        }
        if let Some((pool, rest)) = s.split_once(':') {
            if pool.is_empty() {
                return Err(err());
            }
            if rest.is_empty() || rest == "*" {
                return Ok(Target::Pool(pool.to_string()));
            }
            let identity: WorkerIdentity = rest.parse().map_err(|_| err())?;
            if identity.pool() != pool {
                return Err(err());
            }
            return Ok(Target::Worker(identity));
        }
        match s.parse::<WorkerIdentity>() {
            Ok(identity) => Ok(Target::Worker(identity)),
            Err(_) => Ok(Target::Pool(s.to_string())),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::All => f.write_str("all"),
            Target::Pool(name) => write!(f, "{name}:*"),
            Target::Worker(identity) => f.write_str(&identity.qualified()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("unknown pool '{0}'")]
    UnknownPool(String),

    #[error("unknown worker '{0}'")]
    UnknownWorker(WorkerIdentity),

    #[error("pool '{0}' is already registered")]
    DuplicatePool(String),

    #[error("pool '{0}' has size 0")]
    EmptyPool(String),
}

#[derive(Default)]
struct SlotRecord {
    state: WorkerState,
    starts: u32,
    crashes: u32,
    /// Consecutive runs shorter than `min_uptime`.
    rapid_crashes: u32,
    started_at: Option<Instant>,
    last_exit: Option<String>,
    worker: Option<AbortHandle>,
}

type SharedRecord = Arc<Mutex<SlotRecord>>;

fn lock(record: &SharedRecord) -> MutexGuard<'_, SlotRecord> {
    record.lock().unwrap_or_else(|e| e.into_inner())
}

struct Running {
    cancel: CancellationToken,
    monitor: JoinHandle<()>,
}

struct Slot {
    identity: WorkerIdentity,
    record: SharedRecord,
    running: Option<Running>,
}

impl Slot {
    fn is_alive(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|r| !r.monitor.is_finished())
    }
}

struct Pool {
    spec: PoolSpec,
    slots: Vec<Slot>,
}

pub struct Supervisor {
    pools: BTreeMap<String, Pool>,
    launcher: Arc<dyn WorkerLauncher>,
    policy: RestartPolicy,
}

impl Supervisor {
    pub fn new(launcher: Arc<dyn WorkerLauncher>, policy: RestartPolicy) -> Self {
        Self {
            pools: BTreeMap::new(),
            launcher,
            policy,
        }
    }

    pub fn with_pools(
        launcher: Arc<dyn WorkerLauncher>,
        policy: RestartPolicy,
        pools: &[PoolSpec],
    ) -> Result<Self, SupervisorError> {
        let mut supervisor = Self::new(launcher, policy);
        for spec in pools {
            supervisor.add_pool(spec.clone())?;
        }
        Ok(supervisor)
    }

    pub fn add_pool(&mut self, spec: PoolSpec) -> Result<(), SupervisorError> {
        if self.pools.contains_key(&spec.name) {
            return Err(SupervisorError::DuplicatePool(spec.name));
        }
        if spec.size == 0 {
            return Err(SupervisorError::EmptyPool(spec.name));
        }
        let slots = spec
            .identities()
            .map(|identity| Slot {
                identity,
                record: SharedRecord::default(),
                running: None,
            })
            .collect();
        self.pools.insert(spec.name.clone(), Pool { spec, slots });
        Ok(())
    }

    pub fn pool_specs(&self) -> impl Iterator<Item = &PoolSpec> {
        self.pools.values().map(|p| &p.spec)
    }

    /// Start every addressed worker that is not already running.
    /// Returns the identities that were started.
    pub fn start(&mut self, target: &Target) -> Result<Vec<WorkerIdentity>, SupervisorError> {
        let addressed = self.resolve(target)?;
        let launcher = self.launcher.clone();
        let policy = self.policy.clone();

        let mut started = Vec::new();
        for (pool, idx) in addressed {
            let Some(pool) = self.pools.get_mut(&pool) else {
                continue;
            };
            let stage = pool.spec.stage.clone();
            let slot = &mut pool.slots[idx];
            if slot.is_alive() {
                continue;
            }

            // Reset before spawning: the monitor may record a crash at once.
            {
                let mut record = lock(&slot.record);
                record.rapid_crashes = 0;
                record.state = WorkerState::Running;
                record.started_at = Some(Instant::now());
            }
            let cancel = CancellationToken::new();
            let monitor = tokio::spawn(supervise(
                slot.identity.clone(),
                stage,
                launcher.clone(),
                policy.clone(),
                slot.record.clone(),
                cancel.clone(),
            ));
            slot.running = Some(Running { cancel, monitor });
            info!(worker = %slot.identity.qualified(), "worker started");
            started.push(slot.identity.clone());
        }
        Ok(started)
    }

    /// Stop every addressed worker. Returns the identities that were running.
    pub async fn stop(&mut self, target: &Target) -> Result<Vec<WorkerIdentity>, SupervisorError> {
        let addressed = self.resolve(target)?;

        let mut stopping = Vec::new();
        for (pool, idx) in addressed {
            let Some(pool) = self.pools.get_mut(&pool) else {
                continue;
            };
            let slot = &mut pool.slots[idx];
            if let Some(running) = slot.running.take() {
                running.cancel.cancel();
                stopping.push((slot.identity.clone(), slot.record.clone(), running));
            }
        }

        let grace = self.policy.stop_grace;
        let mut stopped = Vec::with_capacity(stopping.len());
        for (identity, record, running) in stopping {
            let mut monitor = running.monitor;
            if tokio::time::timeout(grace, &mut monitor).await.is_err() {
                warn!(
                    worker = %identity.qualified(),
                    grace_ms = grace.as_millis() as u64,
                    "worker did not stop within grace period, aborting"
                );
                let worker = lock(&record).worker.take();
                if let Some(worker) = worker {
                    worker.abort();
                }
                if let Err(e) = monitor.await {
                    error!(worker = %identity.qualified(), error = %e, "worker monitor failed");
                }
            }
            {
                let mut r = lock(&record);
                r.state = WorkerState::Stopped;
                r.started_at = None;
            }
            info!(worker = %identity.qualified(), "worker stopped");
            stopped.push(identity);
        }
        Ok(stopped)
    }

    pub async fn restart(
        &mut self,
        target: &Target,
    ) -> Result<Vec<WorkerIdentity>, SupervisorError> {
        self.stop(target).await?;
        self.start(target)
    }

    pub async fn shutdown(&mut self) {
        if let Err(e) = self.stop(&Target::All).await {
            error!(error = %e, "supervisor shutdown failed");
        }
    }

    pub fn status(&self, target: &Target) -> Result<Vec<WorkerStatus>, SupervisorError> {
        let addressed = self.resolve(target)?;
        let mut statuses = Vec::with_capacity(addressed.len());
        for (pool, idx) in addressed {
            let Some(pool) = self.pools.get(&pool) else {
                continue;
            };
            let slot = &pool.slots[idx];
            let record = lock(&slot.record);
            statuses.push(WorkerStatus {
                identity: slot.identity.clone(),
                stage: pool.spec.stage.clone(),
                state: record.state,
                starts: record.starts,
                crashes: record.crashes,
                uptime: record.started_at.map(|at| at.elapsed()),
                last_exit: record.last_exit.clone(),
            });
        }
        Ok(statuses)
    }

    pub fn pool_health(&self, name: &str) -> Result<PoolHealth, SupervisorError> {
        let pool = self
            .pools
            .get(name)
            .ok_or_else(|| SupervisorError::UnknownPool(name.to_string()))?;
        Ok(self.health_of(pool))
    }

    pub fn pool_statuses(&self) -> Vec<PoolStatus> {
        self.pools
            .values()
            .map(|pool| PoolStatus {
                name: pool.spec.name.clone(),
                stage: pool.spec.stage.clone(),
                size: pool.spec.size,
                running: pool
                    .slots
                    .iter()
                    .filter(|s| lock(&s.record).state == WorkerState::Running)
                    .count(),
                health: self.health_of(pool),
            })
            .collect()
    }

    fn health_of(&self, pool: &Pool) -> PoolHealth {
        let threshold = self.policy.degraded_after.max(1);
        let mut any_alive = false;
        for slot in &pool.slots {
            if lock(&slot.record).rapid_crashes >= threshold {
                return PoolHealth::Degraded;
            }
            any_alive |= slot.is_alive();
        }
        if any_alive {
            PoolHealth::Healthy
        } else {
            PoolHealth::Stopped
        }
    }

    fn resolve(&self, target: &Target) -> Result<Vec<(String, usize)>, SupervisorError> {
        match target {
            Target::All => Ok(self
                .pools
                .values()
                .flat_map(|pool| (0..pool.slots.len()).map(|idx| (pool.spec.name.clone(), idx)))
                .collect()),
            Target::Pool(name) => {
                let pool = self
                    .pools
                    .get(name)
                    .ok_or_else(|| SupervisorError::UnknownPool(name.clone()))?;
                Ok((0..pool.slots.len()).map(|idx| (name.clone(), idx)).collect())
            }
            Target::Worker(identity) => {
                let idx = self
                    .pools
                    .get(identity.pool())
                    .and_then(|pool| pool.slots.iter().position(|s| &s.identity == identity))
                    .ok_or_else(|| SupervisorError::UnknownWorker(identity.clone()))?;
                Ok(vec![(identity.pool().to_string(), idx)])
            }
        }
    }
}

/// Monitor for one identity: run the worker, restart it whenever it exits
/// without `cancel` having fired.
async fn supervise(
    identity: WorkerIdentity,
    stage: Stage,
    launcher: Arc<dyn WorkerLauncher>,
    policy: RestartPolicy,
    record: SharedRecord,
    cancel: CancellationToken,
) {
    let mut backoff = Backoff::new(policy.restart_backoff, policy.max_restart_backoff);

    loop {
        let started = Instant::now();
        let worker = {
            let launcher = launcher.clone();
            let identity = identity.clone();
            let stage = stage.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { launcher.run_worker(identity, stage, cancel).await })
        };
        {
            let mut r = lock(&record);
            r.state = WorkerState::Running;
            r.starts += 1;
            r.started_at = Some(started);
            r.worker = Some(worker.abort_handle());
        }

        let exit = worker.await;
        let uptime = started.elapsed();
        let exit = describe_exit(&exit);

        if cancel.is_cancelled() {
            let mut r = lock(&record);
            r.state = WorkerState::Stopped;
            r.started_at = None;
            r.worker = None;
            r.last_exit = Some(exit);
            return;
        }

        let rapid = uptime < policy.min_uptime;
        if !rapid {
            backoff.reset();
        }
        let rapid_crashes = {
            let mut r = lock(&record);
            r.state = WorkerState::Crashed;
            r.crashes += 1;
            r.rapid_crashes = if rapid { r.rapid_crashes + 1 } else { 0 };
            r.started_at = None;
            r.worker = None;
            r.last_exit = Some(exit.clone());
            r.rapid_crashes
        };

        let delay = backoff.next_delay();
        error!(
            worker = %identity.qualified(),
            uptime_ms = uptime.as_millis() as u64,
            restart_in_ms = delay.as_millis() as u64,
            exit = %exit,
            "worker exited unexpectedly"
        );
        if rapid && rapid_crashes == policy.degraded_after.max(1) {
            warn!(
                pool = identity.pool(),
                worker = %identity.qualified(),
                rapid_crashes,
                "pool degraded: worker keeps crashing shortly after start"
            );
        }

        if !sleep_or_cancel(delay, &cancel).await {
            let mut r = lock(&record);
            r.state = WorkerState::Stopped;
            return;
        }
    }
}

fn describe_exit(exit: &Result<Result<(), WorkerError>, JoinError>) -> String {
    match exit {
        Ok(Ok(())) => "exited".to_string(),
        Ok(Err(e)) => format!("error: {e}"),
        Err(e) if e.is_cancelled() => "aborted".to_string(),
        Err(e) => format!("panicked: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rstest::rstest;
    use std::collections::HashMap;

    /// Behaviour is picked by pool name.
    #[derive(Default)]
    struct ScriptedLauncher {
        launches: Mutex<HashMap<WorkerIdentity, u32>>,
    }

    impl ScriptedLauncher {
        fn launches(&self, identity: &WorkerIdentity) -> u32 {
            self.launches
                .lock()
                .unwrap()
                .get(identity)
                .copied()
                .unwrap_or(0)
        }
    }

    #[async_trait]
    impl WorkerLauncher for ScriptedLauncher {
        async fn run_worker(
            &self,
            identity: WorkerIdentity,
            stage: Stage,
            cancel: CancellationToken,
        ) -> Result<(), WorkerError> {
            let launch = {
                let mut launches = self.launches.lock().unwrap();
                let n = launches.entry(identity.clone()).or_default();
                *n += 1;
                *n
            };
            match identity.pool() {
                "crashy" => Err(WorkerError::NoHandler(stage)),
                "flaky" if launch == 1 => Err(WorkerError::NoHandler(stage)),
                "panicky" => panic!("handler blew up"),
                "stubborn" => {
                    // Stuck inside a handler: never looks at the token.
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
                _ => {
                    cancel.cancelled().await;
                    Ok(())
                }
            }
        }
    }

    fn fast_policy() -> RestartPolicy {
        RestartPolicy {
            restart_backoff: Duration::from_millis(1),
            max_restart_backoff: Duration::from_millis(4),
            min_uptime: Duration::from_secs(5),
            degraded_after: 3,
            stop_grace: Duration::from_millis(50),
        }
    }

    fn supervisor(launcher: Arc<ScriptedLauncher>, pools: &[PoolSpec]) -> Supervisor {
        Supervisor::with_pools(launcher, fast_policy(), pools).unwrap()
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[rstest]
    #[case::all("all", Target::All)]
    #[case::wildcard("extractor:*", Target::Pool("extractor".into()))]
    #[case::group_only("extractor:", Target::Pool("extractor".into()))]
    #[case::bare_pool("classifier", Target::Pool("classifier".into()))]
    #[case::qualified("classifier:classifier-01", Target::Worker(WorkerIdentity::new("classifier", 1)))]
    #[case::bare_worker("classifier-00", Target::Worker(WorkerIdentity::new("classifier", 0)))]
    fn parses_targets(#[case] raw: &str, #[case] expected: Target) {
        assert_eq!(raw.parse::<Target>().unwrap(), expected);
    }

    #[rstest]
    #[case::empty("")]
    #[case::mismatched_group("extractor:classifier-00")]
    #[case::no_group(":*")]
    #[case::bad_ordinal("extractor:extractor-x")]
    fn rejects_bad_targets(#[case] raw: &str) {
        assert!(raw.parse::<Target>().is_err());
    }

    #[tokio::test]
    async fn start_and_stop_a_pool() {
        let launcher = Arc::new(ScriptedLauncher::default());
        let mut sup = supervisor(
            launcher.clone(),
            &[
                PoolSpec::new("extractor", Stage::extract(), 2),
                PoolSpec::new("classifier", Stage::classify(), 1),
            ],
        );

        let started = sup.start(&"extractor:*".parse().unwrap()).unwrap();
        assert_eq!(
            started,
            vec![WorkerIdentity::new("extractor", 0), WorkerIdentity::new("extractor", 1)]
        );
        wait_until(|| launcher.launches(&WorkerIdentity::new("extractor", 1)) == 1).await;

        // Already running: nothing new.
        assert!(sup.start(&Target::All).unwrap().len() == 1);

        let statuses = sup.status(&Target::Pool("extractor".into())).unwrap();
        assert!(statuses.iter().all(|s| s.state == WorkerState::Running));
        assert_eq!(sup.pool_health("extractor").unwrap(), PoolHealth::Healthy);

        let stopped = sup.stop(&"extractor:extractor-00".parse().unwrap()).await.unwrap();
        assert_eq!(stopped, vec![WorkerIdentity::new("extractor", 0)]);
        let status = sup
            .status(&Target::Worker(WorkerIdentity::new("extractor", 0)))
            .unwrap();
        assert_eq!(status[0].state, WorkerState::Stopped);
        assert_eq!(status[0].last_exit.as_deref(), Some("exited"));

        sup.shutdown().await;
        assert_eq!(sup.pool_health("extractor").unwrap(), PoolHealth::Stopped);
        assert_eq!(launcher.launches(&WorkerIdentity::new("extractor", 0)), 1);
    }

    #[tokio::test]
    async fn crashing_worker_is_restarted_and_pool_degrades() {
        let launcher = Arc::new(ScriptedLauncher::default());
        let mut sup = supervisor(
            launcher.clone(),
            &[
                PoolSpec::new("crashy", Stage::classify(), 1),
                PoolSpec::new("extractor", Stage::extract(), 1),
            ],
        );
        sup.start(&Target::All).unwrap();

        let crashy = WorkerIdentity::new("crashy", 0);
        wait_until(|| launcher.launches(&crashy) >= 4).await;

        assert_eq!(sup.pool_health("crashy").unwrap(), PoolHealth::Degraded);
        assert_eq!(sup.pool_health("extractor").unwrap(), PoolHealth::Healthy);

        let status = &sup.status(&Target::Worker(crashy.clone())).unwrap()[0];
        assert!(status.crashes >= 3);
        assert!(status.last_exit.as_deref().unwrap().starts_with("error:"));

        sup.shutdown().await;
        let launches = launcher.launches(&crashy);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(launcher.launches(&crashy), launches);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn crash_right_after_start_is_not_masked() {
        let launcher = Arc::new(ScriptedLauncher::default());
        let policy = RestartPolicy {
            restart_backoff: Duration::from_secs(30),
            max_restart_backoff: Duration::from_secs(30),
            ..fast_policy()
        };
        let mut sup = Supervisor::with_pools(
            launcher.clone(),
            policy,
            &[PoolSpec::new("flaky", Stage::extract(), 1)],
        )
        .unwrap();
        sup.start(&Target::All).unwrap();

        let flaky = WorkerIdentity::new("flaky", 0);
        wait_until(|| {
            sup.status(&Target::Worker(flaky.clone())).unwrap()[0].state == WorkerState::Crashed
        })
        .await;

        // Restart is 30s away: the crash stays visible.
        let status = &sup.status(&Target::Worker(flaky.clone())).unwrap()[0];
        assert_eq!(status.crashes, 1);
        assert_eq!(status.starts, 1);
        assert_eq!(launcher.launches(&flaky), 1);

        sup.shutdown().await;
        let status = &sup.status(&Target::Worker(flaky)).unwrap()[0];
        assert_eq!(status.state, WorkerState::Stopped);
    }

    #[tokio::test]
    async fn panicking_worker_is_restarted() {
        let launcher = Arc::new(ScriptedLauncher::default());
        let mut sup = supervisor(launcher.clone(), &[PoolSpec::new("panicky", Stage::extract(), 1)]);
        sup.start(&Target::All).unwrap();

        let panicky = WorkerIdentity::new("panicky", 0);
        wait_until(|| launcher.launches(&panicky) >= 2).await;
        let status = &sup.status(&Target::Worker(panicky)).unwrap()[0];
        assert!(
            status
                .last_exit
                .as_deref()
                .is_some_and(|e| e.starts_with("panicked"))
        );
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn stuck_worker_is_aborted_after_grace() {
        let launcher = Arc::new(ScriptedLauncher::default());
        let mut sup = supervisor(launcher.clone(), &[PoolSpec::new("stubborn", Stage::extract(), 1)]);
        sup.start(&Target::All).unwrap();
        let stubborn = WorkerIdentity::new("stubborn", 0);
        wait_until(|| launcher.launches(&stubborn) == 1).await;

        let stopped = tokio::time::timeout(Duration::from_secs(2), sup.stop(&Target::All))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stopped, vec![stubborn.clone()]);

        let status = &sup.status(&Target::Worker(stubborn.clone())).unwrap()[0];
        assert_eq!(status.state, WorkerState::Stopped);
        assert_eq!(status.last_exit.as_deref(), Some("aborted"));
        assert_eq!(launcher.launches(&stubborn), 1);
    }

    #[tokio::test]
    async fn restart_relaunches() {
        let launcher = Arc::new(ScriptedLauncher::default());
        let mut sup = supervisor(launcher.clone(), &[PoolSpec::new("extractor", Stage::extract(), 1)]);
        let id = WorkerIdentity::new("extractor", 0);

        sup.start(&Target::All).unwrap();
        wait_until(|| launcher.launches(&id) == 1).await;
        let restarted = sup.restart(&Target::Worker(id.clone())).await.unwrap();
        assert_eq!(restarted, vec![id.clone()]);
        wait_until(|| launcher.launches(&id) == 2).await;

        assert_eq!(sup.status(&Target::All).unwrap()[0].starts, 2);
        sup.shutdown().await;
    }

    #[test]
    fn registry_errors() {
        let launcher = Arc::new(ScriptedLauncher::default());
        let mut sup = Supervisor::new(launcher, fast_policy());
        sup.add_pool(PoolSpec::new("extractor", Stage::extract(), 1))
            .unwrap();

        assert!(matches!(
            sup.add_pool(PoolSpec::new("extractor", Stage::extract(), 2)),
            Err(SupervisorError::DuplicatePool(_))
        ));
        assert!(matches!(
            sup.add_pool(PoolSpec::new("idle", Stage::extract(), 0)),
            Err(SupervisorError::EmptyPool(_))
        ));
        assert!(matches!(
            sup.status(&Target::Pool("nope".into())),
            Err(SupervisorError::UnknownPool(_))
        ));
        assert!(matches!(
            sup.status(&Target::Worker(WorkerIdentity::new("extractor", 5))),
            Err(SupervisorError::UnknownWorker(_))
        ));
    }
}
