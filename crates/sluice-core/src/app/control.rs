//! Control surface - supervisorctl 相当のテキストコマンド
//!
//! ```text
//! status [target]
//! start <target>
//! stop <target>
//! restart <target>
//! pools
//! ```
//!
//! target は `all`、`<pool>:*`、`<pool>:<pool>-NN`、`<pool>-NN` のいずれか。

use std::str::FromStr;

use crate::app::supervisor::{ParseTargetError, Supervisor, SupervisorError, Target};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Status(Target),
    Start(Target),
    Stop(Target),
    Restart(Target),
    /// One line per pool with its health.
    Pools,
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}' (expected status, start, stop, restart or pools)")]
    UnknownCommand(String),

    #[error("'{0}' needs a target")]
    MissingTarget(String),

    #[error("unexpected argument '{0}'")]
    UnexpectedArgument(String),

    #[error(transparent)]
    Target(#[from] ParseTargetError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

impl FromStr for ControlCommand {
    type Err = ControlError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or(ControlError::Empty)?;
        let target = words.next();
        if let Some(extra) = words.next() {
            return Err(ControlError::UnexpectedArgument(extra.to_string()));
        }

        let required = |target: Option<&str>| -> Result<Target, ControlError> {
            let raw = target.ok_or_else(|| ControlError::MissingTarget(verb.to_string()))?;
            Ok(raw.parse()?)
        };

        match verb {
            "status" => Ok(ControlCommand::Status(match target {
                Some(raw) => raw.parse()?,
                None => Target::All,
            })),
            "start" => Ok(ControlCommand::Start(required(target)?)),
            "stop" => Ok(ControlCommand::Stop(required(target)?)),
            "restart" => Ok(ControlCommand::Restart(required(target)?)),
            "pools" => match target {
                Some(extra) => Err(ControlError::UnexpectedArgument(extra.to_string())),
                None => Ok(ControlCommand::Pools),
            },
            other => Err(ControlError::UnknownCommand(other.to_string())),
        }
    }
}

impl ControlCommand {
    /// Run against the supervisor. Returns the reply lines.
    pub async fn execute(&self, supervisor: &mut Supervisor) -> Result<Vec<String>, ControlError> {
        let lines = match self {
            ControlCommand::Status(target) => supervisor
                .status(target)?
                .iter()
                .map(|s| s.line())
                .collect(),
            ControlCommand::Start(target) => {
                let started = supervisor.start(target)?;
                if started.is_empty() {
                    vec![format!("{target}: already running")]
                } else {
                    started
                        .iter()
                        .map(|id| format!("{}: started", id.qualified()))
                        .collect()
                }
            }
            ControlCommand::Stop(target) => {
                let stopped = supervisor.stop(target).await?;
                if stopped.is_empty() {
                    vec![format!("{target}: not running")]
                } else {
                    stopped
                        .iter()
                        .map(|id| format!("{}: stopped", id.qualified()))
                        .collect()
                }
            }
            ControlCommand::Restart(target) => supervisor
                .restart(target)
                .await?
                .iter()
                .map(|id| format!("{}: restarted", id.qualified()))
                .collect(),
            ControlCommand::Pools => supervisor
                .pool_statuses()
                .iter()
                .map(|p| p.line())
                .collect(),
        };
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::supervisor::{PoolSpec, RestartPolicy};
    use crate::app::worker_loop::{WorkerError, WorkerLauncher};
    use crate::domain::{Stage, WorkerIdentity};
    use async_trait::async_trait;
    use rstest::rstest;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct IdleLauncher;

    #[async_trait]
    impl WorkerLauncher for IdleLauncher {
        async fn run_worker(
            &self,
            _identity: WorkerIdentity,
            _stage: Stage,
            cancel: CancellationToken,
        ) -> Result<(), WorkerError> {
            cancel.cancelled().await;
            Ok(())
        }
    }

    #[rstest]
    #[case("status", ControlCommand::Status(Target::All))]
    #[case("  status   extractor:* ", ControlCommand::Status(Target::Pool("extractor".into())))]
    #[case("start all", ControlCommand::Start(Target::All))]
    #[case("stop classifier:classifier-00", ControlCommand::Stop(Target::Worker(WorkerIdentity::new("classifier", 0))))]
    #[case("restart extractor-01", ControlCommand::Restart(Target::Worker(WorkerIdentity::new("extractor", 1))))]
    #[case("pools", ControlCommand::Pools)]
    fn parses_commands(#[case] line: &str, #[case] expected: ControlCommand) {
        assert_eq!(line.parse::<ControlCommand>().unwrap(), expected);
    }

    #[rstest]
    #[case::empty("   ")]
    #[case::unknown("reload all")]
    #[case::missing_target("stop")]
    #[case::extra("start all now")]
    #[case::bad_target("start extractor:classifier-00")]
    fn rejects_bad_commands(#[case] line: &str) {
        assert!(line.parse::<ControlCommand>().is_err());
    }

    #[tokio::test]
    async fn executes_against_supervisor() {
        let policy = RestartPolicy {
            stop_grace: Duration::from_millis(100),
            ..RestartPolicy::default()
        };
        let mut sup = Supervisor::with_pools(
            Arc::new(IdleLauncher),
            policy,
            &[PoolSpec::new("extractor", Stage::extract(), 2)],
        )
        .unwrap();

        let reply = ControlCommand::Start(Target::All).execute(&mut sup).await.unwrap();
        assert_eq!(
            reply,
            vec!["extractor:extractor-00: started", "extractor:extractor-01: started"]
        );

        let reply = "start extractor:*"
            .parse::<ControlCommand>()
            .unwrap()
            .execute(&mut sup)
            .await
            .unwrap();
        assert_eq!(reply, vec!["extractor:*: already running"]);

        let reply = "status".parse::<ControlCommand>().unwrap().execute(&mut sup).await.unwrap();
        assert_eq!(reply.len(), 2);
        assert!(reply.iter().all(|l| l.contains("RUNNING")));

        let reply = "stop extractor-01".parse::<ControlCommand>().unwrap().execute(&mut sup).await.unwrap();
        assert_eq!(reply, vec!["extractor:extractor-01: stopped"]);

        let reply = "pools".parse::<ControlCommand>().unwrap().execute(&mut sup).await.unwrap();
        assert!(reply[0].contains("running 1/2"));

        let err = "stop geo:*".parse::<ControlCommand>().unwrap().execute(&mut sup).await.unwrap_err();
        assert!(matches!(err, ControlError::Supervisor(SupervisorError::UnknownPool(_))));

        sup.shutdown().await;
    }
}
