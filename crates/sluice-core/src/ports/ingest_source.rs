//! IngestSource port - スケジューラが新しいドキュメントを見つける場所

use async_trait::async_trait;

use crate::app::scheduler::RunWindow;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("ingest source io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ingest source error: {0}")]
    Other(String),
}

/// Yields raw document references (URLs, paths) for one run window.
///
/// `acknowledge` is called once every reference from `discover` has been
/// enqueued, so a source may consume what it handed out.
#[async_trait]
pub trait IngestSource: Send + Sync {
    async fn discover(&self, window: &RunWindow) -> Result<Vec<String>, IngestError>;

    async fn acknowledge(&self, _window: &RunWindow) -> Result<(), IngestError> {
        Ok(())
    }
}
