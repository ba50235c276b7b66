//! sluice - ドキュメントパイプラインのワーカー群を動かす CLI
//!
//! # サブコマンド
//! - `run`: Supervisor・Reaper・Scheduler を起動し、stdin から制御コマンドを読む
//! - `ingest`: 取り込みを 1 回だけ実行（外部 cron 用）
//! - `reap` / `counts` / `retry`: Task Store の保守
//! - `validate` / `generate-config`: 設定ファイル

mod handlers;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sluice_core::Config;
use sluice_core::app::status::counts_line;
use sluice_core::app::{
    AppBuilder, ControlCommand, ReaperLoop, SchedulerTrigger, Supervisor, Target,
};
use sluice_core::domain::{Stage, TaskId};
use sluice_core::impls::{InMemoryStore, SpoolIngestSource, SqliteStore};
use sluice_core::ports::{DocumentStore, SystemClock, TaskStore};
use sluice_core::telemetry::init_tracing;

use crate::handlers::{KeywordClassifier, PlainTextExtractor};

#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "Task-queue backed worker pools for a document pipeline")]
#[command(version)]
struct Cli {
    /// Configuration file (YAML, or JSON by extension). Defaults apply when
    /// the file does not exist.
    #[arg(short, long, global = true, default_value = "sluice.yaml")]
    config: PathBuf,

    /// Override `database_url` from the configuration.
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the worker pools until Ctrl-C
    Run {
        /// Do not start the periodic ingest trigger
        #[arg(long)]
        no_scheduler: bool,
    },

    /// Fire the ingest trigger once
    Ingest {
        /// Inbox directory, overriding `scheduler.inbox`
        #[arg(long)]
        inbox: Option<PathBuf>,
    },

    /// Return stale claims to pending
    Reap {
        /// Override `reaper.stale_after_secs`
        #[arg(long)]
        stale_after_secs: Option<u64>,
    },

    /// Task counts per stage
    Counts,

    /// Re-enqueue a failed task
    Retry {
        task_id: String,
    },

    /// Validate the configuration file
    Validate,

    /// Write the default configuration
    GenerateConfig {
        #[arg(short, long, default_value = "sluice.yaml")]
        output: PathBuf,
    },
}

struct Stores {
    tasks: Arc<dyn TaskStore>,
    documents: Arc<dyn DocumentStore>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");
    let cli = Cli::parse();

    let command = match cli.command {
        Commands::GenerateConfig { output } => {
            let yaml = Config::default().to_yaml()?;
            tokio::fs::write(&output, yaml)
                .await
                .with_context(|| format!("write {}", output.display()))?;
            println!("wrote {}", output.display());
            return Ok(());
        }
        command => command,
    };

    let mut config = load_config(&cli.config).await?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }
    let warnings = config.validate().context("invalid configuration")?;

    match command {
        Commands::Validate => {
            for warning in &warnings {
                println!("warning: {warning}");
            }
            println!("{}: ok", cli.config.display());
        }
        Commands::Run { no_scheduler } => {
            for warning in &warnings {
                warn!("{warning}");
            }
            let stores = open_stores(&config).await?;
            run(config, stores, !no_scheduler).await?;
        }
        Commands::Ingest { inbox } => {
            let stores = open_stores(&config).await?;
            let inbox = inbox.unwrap_or_else(|| config.scheduler.inbox.clone());
            let report = scheduler(&config, &stores, inbox)?.fire_once().await?;
            println!(
                "window {}: discovered={} enqueued={} duplicates={}",
                report.window, report.discovered, report.enqueued, report.duplicates
            );
        }
        Commands::Reap { stale_after_secs } => {
            let stores = open_stores(&config).await?;
            let stale_after = stale_after_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.reaper.stale_after());
            let reaped = stores.tasks.reap(stale_after).await?;
            println!("reaped {reaped}");
        }
        Commands::Counts => {
            let stores = open_stores(&config).await?;
            for stage in config.pipeline.stages() {
                let counts = stores.tasks.counts(Some(stage)).await?;
                println!("{}", counts_line(stage.as_str(), &counts));
            }
            let total = stores.tasks.counts(None).await?;
            println!("{}", counts_line("all", &total));
        }
        Commands::Retry { task_id } => {
            let stores = open_stores(&config).await?;
            let task_id: TaskId = task_id
                .parse()
                .with_context(|| format!("bad task id '{task_id}'"))?;
            let new_id = stores.tasks.requeue_failed(task_id).await?;
            println!("{task_id} -> {new_id}");
        }
        Commands::GenerateConfig { .. } => {}
    }
    Ok(())
}

async fn load_config(path: &Path) -> Result<Config> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        Config::from_file(path)
            .await
            .with_context(|| format!("load {}", path.display()))
    } else {
        info!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::default())
    }
}

async fn open_stores(config: &Config) -> Result<Stores> {
    if config.database_url == "memory" {
        let store = Arc::new(InMemoryStore::new());
        return Ok(Stores {
            tasks: store.clone(),
            documents: store,
        });
    }

    // workers + reaper + scheduler + control
    let connections = config.pools.iter().map(|p| p.size).sum::<u32>() + 4;
    let store = Arc::new(
        SqliteStore::connect(&config.database_url, connections)
            .await
            .with_context(|| format!("connect {}", config.database_url))?,
    );
    Ok(Stores {
        tasks: store.clone(),
        documents: store,
    })
}

fn scheduler(config: &Config, stores: &Stores, inbox: PathBuf) -> Result<SchedulerTrigger> {
    let stage = config
        .pipeline
        .first()
        .cloned()
        .context("pipeline has no stages")?;
    Ok(SchedulerTrigger::new(
        stores.tasks.clone(),
        stores.documents.clone(),
        Arc::new(SpoolIngestSource::new(inbox)),
        stage,
        config.scheduler.interval(),
        Arc::new(SystemClock),
    ))
}

async fn run(config: Config, stores: Stores, with_scheduler: bool) -> Result<()> {
    let app = AppBuilder::new()
        .register(
            Stage::extract(),
            Arc::new(PlainTextExtractor::new(stores.documents.clone())),
        )?
        .register(
            Stage::classify(),
            Arc::new(KeywordClassifier::new(stores.documents.clone())),
        )?
        .pipeline(config.pipeline.clone())
        .expect_stages(&config.pool_stages())
        .build()?;

    let launcher = Arc::new(app.launcher(stores.tasks.clone(), config.worker.to_worker_config()));
    let mut supervisor = Supervisor::with_pools(
        launcher,
        config.supervisor.to_restart_policy(),
        &config.pools,
    )?;

    let cancel = CancellationToken::new();
    let mut background = Vec::new();

    let reaper = ReaperLoop::new(
        stores.tasks.clone(),
        config.reaper.stale_after(),
        config.reaper.interval(),
    );
    let token = cancel.clone();
    background.push(tokio::spawn(async move { reaper.run(token).await }));

    if with_scheduler && config.scheduler.enabled {
        let trigger = scheduler(&config, &stores, config.scheduler.inbox.clone())?;
        let token = cancel.clone();
        background.push(tokio::spawn(async move { trigger.run(token).await }));
    }

    let started = supervisor.start(&Target::All)?;
    info!(workers = started.len(), "pools started");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received, shutting down");
                break;
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => control(&mut supervisor, &line).await,
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        warn!(error = %e, "stdin closed");
                        stdin_open = false;
                    }
                }
            }
        }
    }

    cancel.cancel();
    supervisor.shutdown().await;
    for handle in background {
        if let Err(e) = handle.await {
            warn!(error = %e, "background loop ended abnormally");
        }
    }
    info!("bye");
    Ok(())
}

async fn control(supervisor: &mut Supervisor, line: &str) {
    let reply = match line.parse::<ControlCommand>() {
        Ok(command) => command.execute(supervisor).await,
        Err(e) => Err(e),
    };
    match reply {
        Ok(lines) => {
            for line in lines {
                println!("{line}");
            }
        }
        Err(e) => println!("error: {e}"),
    }
}
