//! StageHandler port - 差し替え可能なステージ処理（extractor / classifier）
//!
//! コアはこの trait に依存するだけで、実装は持ちません。

use async_trait::async_trait;

use crate::domain::{HandlerError, Stage, TaskPayload};

/// `handle(stage, payload) -> result`
///
/// Implementations should be idempotent: after a reap the same payload may be
/// handled twice.
#[async_trait]
pub trait StageHandler: Send + Sync {
    async fn handle(
        &self,
        stage: &Stage,
        payload: &TaskPayload,
    ) -> Result<serde_json::Value, HandlerError>;
}
