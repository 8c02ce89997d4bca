//! Error kinds surfaced by the ingestion and retrieval pipeline.
//!
//! Each variant maps to one HTTP status in [`crate::server`]; the CLI simply
//! prints the message.

use thiserror::Error;

use crate::provider::ProviderError;

pub type RagResult<T> = std::result::Result<T, RagError>;

#[derive(Debug, Error)]
pub enum RagError {
    /// The upload is not a PDF or could not be received.
    #[error("{0}")]
    InvalidUpload(String),

    /// The PDF is encrypted, corrupted, or holds no extractable text.
    #[error("Error extracting text from PDF: {0}")]
    UnreadablePdf(String),

    #[error("No documents have been uploaded yet. Please upload a PDF document first.")]
    EmptyStore,

    /// Malformed chat request (empty question, bad `k`).
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Provider request failed: {0}")]
    Provider(#[from] ProviderError),

    /// Stored vectors were produced by a different embedding model or width.
    #[error(
        "Embedding mismatch: store holds {expected} vectors but provider produced {actual}; \
         clear the store before switching embedding providers"
    )]
    EmbeddingMismatch { expected: String, actual: String },

    #[error("Vector store error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl From<sqlx::Error> for RagError {
    fn from(err: sqlx::Error) -> Self {
        RagError::Storage(err.into())
    }
}

impl RagError {
    /// Machine-readable code used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::InvalidUpload(_) => "invalid_upload",
            RagError::UnreadablePdf(_) => "unreadable_pdf",
            RagError::EmptyStore => "empty_store",
            RagError::InvalidRequest(_) => "bad_request",
            RagError::Provider(_) => "provider_error",
            RagError::EmbeddingMismatch { .. } => "embedding_mismatch",
            RagError::Storage(_) => "internal",
        }
    }
}
