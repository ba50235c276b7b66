//! App - アプリケーション層
//!
//! ports を組み合わせてパイプラインを動かします。
//!
//! # 主要コンポーネント
//! - **AppBuilder / App**: ハンドラ登録と起動時検証
//! - **StageRegistry**: ステージ → ハンドラ
//! - **Worker**: claim → handle → 次ステージ投入 → complete / fail
//! - **Supervisor**: プール単位の起動・停止・自動再起動
//! - **ControlCommand**: status / start / stop / restart のテキスト操作
//! - **SchedulerTrigger**: 定期取り込み
//! - **ReaperLoop**: 期限切れ claim の回収

pub mod builder;
pub mod control;
pub mod reaper_loop;
pub mod registry;
pub mod scheduler;
pub mod status;
pub mod supervisor;
pub mod worker_loop;

pub use self::builder::{App, AppBuilder, BuildError};
pub use self::control::{ControlCommand, ControlError};
pub use self::reaper_loop::ReaperLoop;
pub use self::registry::{RegistryError, StageRegistry};
pub use self::scheduler::{IngestReport, RunWindow, SchedulerError, SchedulerTrigger};
pub use self::status::{PoolHealth, PoolStatus, WorkerState, WorkerStatus};
pub use self::supervisor::{PoolSpec, RestartPolicy, Supervisor, SupervisorError, Target};
pub use self::worker_loop::{
    PipelineLauncher, WorkOutcome, Worker, WorkerConfig, WorkerError, WorkerLauncher,
};
