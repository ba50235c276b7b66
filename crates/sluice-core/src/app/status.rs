//! Status - Supervisor と Task Store の状態ビュー
//!
//! 表示は supervisorctl に寄せています:
//! `extractor:extractor-00   RUNNING   uptime 0:12:04, starts 1`

use std::fmt;
use std::time::Duration;

use crate::domain::{Stage, TaskCounts, WorkerIdentity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
    Running,
    #[default]
    Stopped,
    /// Exited without being asked to; a restart is pending.
    Crashed,
}

impl WorkerState {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::Running => "RUNNING",
            WorkerState::Stopped => "STOPPED",
            WorkerState::Crashed => "CRASHED",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolHealth {
    Healthy,
    /// Some worker keeps crashing shortly after start.
    Degraded,
    /// No worker of the pool is running.
    Stopped,
}

impl fmt::Display for PoolHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            PoolHealth::Healthy => "healthy",
            PoolHealth::Degraded => "degraded",
            PoolHealth::Stopped => "stopped",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStatus {
    pub identity: WorkerIdentity,
    pub stage: Stage,
    pub state: WorkerState,
    pub starts: u32,
    pub crashes: u32,
    pub uptime: Option<Duration>,
    pub last_exit: Option<String>,
}

impl WorkerStatus {
    pub fn line(&self) -> String {
        let detail = match self.state {
            WorkerState::Running => format!(
                "uptime {}, starts {}",
                format_uptime(self.uptime.unwrap_or_default()),
                self.starts
            ),
            WorkerState::Crashed | WorkerState::Stopped => match &self.last_exit {
                Some(exit) => format!("last exit: {exit}"),
                None => "not started".to_string(),
            },
        };
        format!("{:<32} {:<8} {}", self.identity.qualified(), self.state, detail)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStatus {
    pub name: String,
    pub stage: Stage,
    pub size: u32,
    pub running: usize,
    pub health: PoolHealth,
}

impl PoolStatus {
    pub fn line(&self) -> String {
        format!(
            "{:<16} stage={:<12} running {}/{} {}",
            self.name, self.stage.as_str(), self.running, self.size, self.health
        )
    }
}

/// `H:MM:SS`
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

pub fn counts_line(label: &str, counts: &TaskCounts) -> String {
    format!(
        "{:<12} pending={} claimed={} done={} failed={} total={}",
        label,
        counts.pending,
        counts.claimed,
        counts.done,
        counts.failed,
        counts.total()
    )
}
