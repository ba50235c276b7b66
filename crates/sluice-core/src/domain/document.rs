//! Document - パイプラインを流れる記事・レポート

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::DocumentId;

/// The entity being processed.
///
/// `extracted_text` is filled by the `extract` stage, `classification` by the
/// `classify` stage. Identity and `raw_ref` never change after registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,

    /// Where the raw content lives (URL or file path).
    pub raw_ref: String,

    pub extracted_text: Option<String>,
    pub classification: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn new(id: DocumentId, raw_ref: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            raw_ref: raw_ref.into(),
            extracted_text: None,
            classification: None,
            created_at: now,
        }
    }
}
