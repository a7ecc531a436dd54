//! Engine error taxonomy.
//!
//! One variant per failure kind the pipeline can surface. The HTTP layer
//! maps these onto status codes (see `server`); the CLI prints them via
//! `anyhow`. Cache failures never appear here; they are logged and
//! swallowed at the call site, since artifacts can always be rebuilt from
//! durable chunks.

use uuid::Uuid;

/// Failure kinds surfaced by the context-construction engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The file's extension and MIME hint match no supported format.
    #[error("unsupported format: {0}. Supported: .txt .md .pdf .docx .csv .tsv .xlsx")]
    UnsupportedFormat(String),

    /// The bytes are malformed for the claimed format.
    #[error("could not decode {format}: {message}")]
    Decode { format: String, message: String },

    /// Upload exceeds the configured size ceiling.
    #[error("file too large: {size} bytes (limit {limit} bytes)")]
    Oversize { size: u64, limit: u64 },

    /// Tokenizer failure. Should not occur in practice: the vocabulary is
    /// bundled and counting is total over valid UTF-8.
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// Both the primary and the fallback embedder failed or are absent.
    #[error("no embedding backend available: {0}")]
    EmbedderUnavailable(String),

    /// A stored artifact or query vector has the wrong dimension.
    /// On cache load this is treated as a miss and the index is rebuilt.
    #[error("embedding dimension mismatch: got {found}, expected {expected}")]
    DimensionMismatch { found: usize, expected: usize },

    #[error("document not found: {0}")]
    DocumentNotFound(Uuid),

    /// The document exists but is not queryable (e.g. a failed upload).
    #[error("document {id} is not ready (status: {status})")]
    DocumentNotReady { id: Uuid, status: String },

    #[error("query must not be empty")]
    EmptyQuery,

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    /// The request's cancellation signal fired. No partial writes occurred.
    #[error("request cancelled")]
    Cancelled,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Errors that abort an upload with a client-side (4xx) response.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EngineError::UnsupportedFormat(_)
                | EngineError::Decode { .. }
                | EngineError::Oversize { .. }
                | EngineError::DocumentNotFound(_)
                | EngineError::DocumentNotReady { .. }
                | EngineError::EmptyQuery
        )
    }
}
