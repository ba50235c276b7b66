//! Demonstration stage handlers so the binary runs out of the box.
//!
//! Real deployments register their own extractor and classifier; these only
//! move text around and match a few keywords.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use sluice_core::domain::{Document, HandlerError, Stage, TaskPayload};
use sluice_core::ports::{DocumentStore, StageHandler};

const EVENT_KEYWORDS: &[(&str, &[&str])] = &[
    ("flood", &["flood", "inundation", "river levels"]),
    ("earthquake", &["earthquake", "seismic", "tremor"]),
    ("wildfire", &["wildfire", "bushfire", "forest fire"]),
    ("storm", &["storm", "hurricane", "cyclone", "typhoon"]),
];

async fn load(documents: &dyn DocumentStore, payload: &TaskPayload) -> Result<Document, HandlerError> {
    documents
        .document(payload.document_id)
        .await?
        .ok_or_else(|| HandlerError::new(format!("document {} not found", payload.document_id)))
}

/// Reads a local file when `raw_ref` is a path, otherwise keeps the
/// reference itself as the text.
pub struct PlainTextExtractor {
    documents: Arc<dyn DocumentStore>,
}

impl PlainTextExtractor {
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self { documents }
    }
}

#[async_trait]
impl StageHandler for PlainTextExtractor {
    async fn handle(
        &self,
        _stage: &Stage,
        payload: &TaskPayload,
    ) -> Result<serde_json::Value, HandlerError> {
        let doc = load(self.documents.as_ref(), payload).await?;
        let path = Path::new(&doc.raw_ref);
        let (text, source) = if path.is_file() {
            let text = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| HandlerError::new(format!("read {}: {e}", doc.raw_ref)))?;
            (text, "file")
        } else {
            (doc.raw_ref.clone(), "reference")
        };
        self.documents
            .set_extracted_text(doc.id, &text)
            .await?;
        Ok(json!({ "source": source, "chars": text.chars().count() }))
    }
}

/// Labels a document with the first event type whose keyword appears in
/// the extracted text.
pub struct KeywordClassifier {
    documents: Arc<dyn DocumentStore>,
}

impl KeywordClassifier {
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self { documents }
    }
}

pub fn classify_text(text: &str) -> &'static str {
    let lower = text.to_lowercase();
    EVENT_KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map(|(event, _)| *event)
        .unwrap_or("none")
}

#[async_trait]
impl StageHandler for KeywordClassifier {
    async fn handle(
        &self,
        _stage: &Stage,
        payload: &TaskPayload,
    ) -> Result<serde_json::Value, HandlerError> {
        let doc = load(self.documents.as_ref(), payload).await?;
        let text = doc
            .extracted_text
            .ok_or_else(|| HandlerError::new(format!("document {} has no extracted text", doc.id)))?;
        let classification = json!({ "event": classify_text(&text) });
        self.documents
            .set_classification(doc.id, classification.clone())
            .await?;
        Ok(classification)
    }
}
