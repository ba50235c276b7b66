//! sluice-core
//!
//! Task-queue-backed worker orchestration for a document pipeline.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, stage, task, state, worker_identity, document, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, DocumentStore, StageHandler, IngestSource, Clock, IdGenerator）
//! - **impls**: 実装（InMemoryStore, SqliteStore, SpoolIngestSource）
//! - **queue**: ステージ単位のキュー操作（StageQueue）とバックオフ
//! - **app**: アプリケーションロジック（builder, worker_loop, supervisor, control, scheduler, reaper_loop）
//! - **config**: YAML / JSON 設定
//! - **telemetry**: tracing の初期化

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod telemetry;

pub use crate::config::{Config, ConfigError};
