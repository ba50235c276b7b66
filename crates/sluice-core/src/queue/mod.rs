//! Queue - ステージ単位のキュー操作とバックオフ
//!
//! - **StageQueue**: 1 ステージに束縛された Task Store のビュー（Stage Queue Adapter）
//! - **Backoff**: 空ポーリングと再起動の待ち時間（指数 + ジッタ）

pub mod backoff;
pub mod stage_queue;

pub use self::backoff::{Backoff, random_delay, sleep_or_cancel};
pub use self::stage_queue::StageQueue;
