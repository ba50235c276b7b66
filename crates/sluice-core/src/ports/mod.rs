//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部システム（リレーショナル DB、ステージ処理、取り込み元など）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - Task Store が source of truth（正本）
//! - ワーカー同士は直接通信しない。すべて Task Store 経由
//! - ステージ処理は不透明な capability として注入される

pub mod clock;
pub mod document_store;
pub mod id_generator;
pub mod ingest_source;
pub mod stage_handler;
pub mod task_store;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::document_store::DocumentStore;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::ingest_source::{IngestError, IngestSource};
pub use self::stage_handler::StageHandler;
pub use self::task_store::TaskStore;
