//! DocumentStore port - ステージハンドラが読み書きするドキュメント
//!
//! ワーカー自身はドキュメントに触れません。ハンドラが payload の
//! `document_id` を使ってここから読み、結果を書き戻します。

use async_trait::async_trait;

use crate::domain::{Document, DocumentId, StoreError};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Register a raw reference. Idempotent: the same `raw_ref` returns the
    /// same id.
    async fn register(&self, raw_ref: &str) -> Result<DocumentId, StoreError>;

    async fn document(&self, id: DocumentId) -> Result<Option<Document>, StoreError>;

    async fn set_extracted_text(&self, id: DocumentId, text: &str) -> Result<(), StoreError>;

    async fn set_classification(
        &self,
        id: DocumentId,
        classification: serde_json::Value,
    ) -> Result<(), StoreError>;
}
