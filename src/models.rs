//! Core data types for documents and chunks.
//!
//! The data lifecycle is:
//!
//! ```text
//! bytes + MIME → load() → canonical text → count() → classify() → Document
//!                                              ↓ (tier ≥ 3)
//!                                         chunk() → ChunkRecord
//!                                              ↓ (tier 4)
//!                                         embed() → IndexArtifact
//! ```
//!
//! A [`Document`] is created once at upload and never mutated afterwards;
//! its chunk rows (tier ≥ 3 only) and cached index artifact are derived
//! state and are deleted with it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tier::Tier;

/// Lifecycle status of a stored document.
///
/// `Ready` documents are queryable; `Failed` ones record an upload that
/// parsed but could not be fully persisted. There are no transitions out
/// of `Ready` except deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Ready,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Ready => "ready",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> DocumentStatus {
        match s {
            "ready" => DocumentStatus::Ready,
            _ => DocumentStatus::Failed,
        }
    }
}

/// Stored document metadata. The canonical text itself lives as a file
/// artifact at `text_path`; everything token-derived (count, tier) is
/// computed once at upload.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: Uuid,
    pub filename: String,
    pub file_size: i64,
    pub mime_type: String,
    /// Path of the canonical-text artifact under the upload directory.
    pub text_path: String,
    pub token_count: i64,
    pub tier: Tier,
    /// PDF only.
    pub page_count: Option<i64>,
    /// Tabular formats only.
    pub row_count: Option<i64>,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
}

/// A contiguous, token-bounded, sentence-aligned fragment of canonical
/// text. Indices are dense and 0-based within a document. Chunk rows exist
/// only for documents in tier ≥ 3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Zero-based position in reading order.
    pub index: usize,
    /// Exact token count of `text`.
    pub tokens: usize,
    pub text: String,
    /// Page or sheet hint, e.g. `"Page 12"` or `"Sheet Revenue"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}
