//! Configuration for the sluice runtime.
//!
//! Loaded from YAML (or JSON, by file extension). Every section has serde
//! defaults so an empty file is a valid single-host setup.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::supervisor::{PoolSpec, RestartPolicy};
use crate::app::worker_loop::WorkerConfig;
use crate::domain::{Pipeline, Stage};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Main configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Task store connection URL (`sqlite://…`), or `memory` for the
    /// in-process store.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Stage order; a task done in one stage is chained into the next.
    #[serde(default)]
    pub pipeline: Pipeline,

    #[serde(default = "default_pools")]
    pub pools: Vec<PoolSpec>,

    #[serde(default)]
    pub worker: WorkerSection,

    #[serde(default)]
    pub reaper: ReaperSection,

    #[serde(default)]
    pub supervisor: SupervisorSection,

    #[serde(default)]
    pub scheduler: SchedulerSection,
}

fn default_database_url() -> String {
    "sqlite://sluice.db".to_string()
}

fn default_pools() -> Vec<PoolSpec> {
    vec![
        PoolSpec::new("extractor", Stage::extract(), 2),
        PoolSpec::new("classifier", Stage::classify(), 2),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub poll_min_ms: u64,
    pub poll_max_ms: u64,
    pub poll_jitter: f64,
    pub startup_jitter_ms: u64,
    pub store_retry_budget: u32,
    pub store_retry_min_ms: u64,
    pub store_retry_max_ms: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        let d = WorkerConfig::default();
        Self {
            poll_min_ms: millis(d.poll_min),
            poll_max_ms: millis(d.poll_max),
            poll_jitter: d.poll_jitter,
            startup_jitter_ms: millis(d.startup_jitter),
            store_retry_budget: d.store_retry_budget,
            store_retry_min_ms: millis(d.store_retry_min),
            store_retry_max_ms: millis(d.store_retry_max),
        }
    }
}

impl WorkerSection {
    pub fn to_worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            poll_min: Duration::from_millis(self.poll_min_ms),
            poll_max: Duration::from_millis(self.poll_max_ms),
            poll_jitter: self.poll_jitter,
            startup_jitter: Duration::from_millis(self.startup_jitter_ms),
            store_retry_budget: self.store_retry_budget,
            store_retry_min: Duration::from_millis(self.store_retry_min_ms),
            store_retry_max: Duration::from_millis(self.store_retry_max_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperSection {
    /// A claim older than this is considered abandoned.
    pub stale_after_secs: u64,
    pub interval_secs: u64,
}

impl Default for ReaperSection {
    fn default() -> Self {
        Self {
            stale_after_secs: 600,
            interval_secs: 60,
        }
    }
}

impl ReaperSection {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSection {
    pub restart_backoff_ms: u64,
    pub max_restart_backoff_ms: u64,
    pub min_uptime_secs: u64,
    pub degraded_after: u32,
    pub stop_grace_secs: u64,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        let d = RestartPolicy::default();
        Self {
            restart_backoff_ms: millis(d.restart_backoff),
            max_restart_backoff_ms: millis(d.max_restart_backoff),
            min_uptime_secs: d.min_uptime.as_secs(),
            degraded_after: d.degraded_after,
            stop_grace_secs: d.stop_grace.as_secs(),
        }
    }
}

impl SupervisorSection {
    pub fn to_restart_policy(&self) -> RestartPolicy {
        RestartPolicy {
            restart_backoff: Duration::from_millis(self.restart_backoff_ms),
            max_restart_backoff: Duration::from_millis(self.max_restart_backoff_ms),
            min_uptime: Duration::from_secs(self.min_uptime_secs),
            degraded_after: self.degraded_after,
            stop_grace: Duration::from_secs(self.stop_grace_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Spool directory with `*.txt` reference lists.
    pub inbox: PathBuf,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
            inbox: PathBuf::from("inbox"),
        }
    }
}

impl SchedulerSection {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            pipeline: Pipeline::default(),
            pools: default_pools(),
            worker: WorkerSection::default(),
            reaper: ReaperSection::default(),
            supervisor: SupervisorSection::default(),
            scheduler: SchedulerSection::default(),
        }
    }
}

impl Config {
    /// Load from a file; `.json` is parsed as JSON, anything else as YAML.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Stages that need a handler because some pool works on them.
    pub fn pool_stages(&self) -> Vec<Stage> {
        let mut stages: Vec<Stage> = self.pools.iter().map(|p| p.stage.clone()).collect();
        stages.sort();
        stages.dedup();
        stages
    }

    /// Hard errors fail; risky but legal settings come back as warnings.
    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Invalid("database_url is empty".into()));
        }
        if self.pipeline.stages().is_empty() {
            return Err(ConfigError::Invalid("pipeline has no stages".into()));
        }
        let mut seen = HashSet::new();
        for stage in self.pipeline.stages() {
            if !seen.insert(stage) {
                return Err(ConfigError::Invalid(format!(
                    "stage '{stage}' appears twice in the pipeline"
                )));
            }
        }

        let mut names = HashSet::new();
        for pool in &self.pools {
            if pool.name.is_empty() || pool.name.contains(|c: char| c == ':' || c.is_whitespace())
            {
                return Err(ConfigError::Invalid(format!(
                    "pool name '{}' must be non-empty without ':' or spaces",
                    pool.name
                )));
            }
            if !names.insert(pool.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "pool '{}' is defined twice",
                    pool.name
                )));
            }
            if pool.size == 0 {
                return Err(ConfigError::Invalid(format!("pool '{}' has size 0", pool.name)));
            }
            if !self.pipeline.contains(&pool.stage) {
                return Err(ConfigError::Invalid(format!(
                    "pool '{}' works on stage '{}' which is not in the pipeline",
                    pool.name, pool.stage
                )));
            }
        }

        let w = &self.worker;
        if w.poll_min_ms == 0 || w.poll_max_ms < w.poll_min_ms {
            return Err(ConfigError::Invalid(
                "worker.poll_min_ms must be > 0 and <= worker.poll_max_ms".into(),
            ));
        }
        if !(0.0..=1.0).contains(&w.poll_jitter) {
            return Err(ConfigError::Invalid(
                "worker.poll_jitter must be within 0.0..=1.0".into(),
            ));
        }
        if self.reaper.stale_after_secs == 0 || self.reaper.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "reaper.stale_after_secs and reaper.interval_secs must be > 0".into(),
            ));
        }
        if self.scheduler.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.interval_secs must be > 0".into(),
            ));
        }

        let mut warnings = Vec::new();
        let stale_after = self.reaper.stale_after();
        let poll_ceiling = Duration::from_millis(w.poll_max_ms);
        if stale_after <= poll_ceiling {
            warnings.push(format!(
                "reaper.stale_after_secs ({}s) is not larger than the poll ceiling ({}ms): \
                 live claims may be reaped and processed twice",
                self.reaper.stale_after_secs, w.poll_max_ms
            ));
        }
        if self.supervisor.min_uptime_secs == 0 {
            warnings.push(
                "supervisor.min_uptime_secs is 0: crash loops never mark a pool degraded".into(),
            );
        }
        for stage in self.pipeline.stages() {
            if !self.pools.iter().any(|p| &p.stage == stage) {
                warnings.push(format!("no pool works on stage '{stage}'"));
            }
        }
        Ok(warnings)
    }
}
