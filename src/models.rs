//! Core data models.
//!
//! These types represent the chunks, stored entries, and retrieval results
//! that flow through the ingestion and chat pipeline.

use serde::Serialize;

/// A contiguous slice of a document's extracted text.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Source filename as uploaded.
    pub source: String,
    /// Zero-based position within the source document.
    pub chunk_index: i64,
    /// Number of chunks produced for the source document.
    pub total_chunks: i64,
    pub text: String,
    /// Length of `text` in characters.
    pub char_len: i64,
    /// SHA-256 of `text`, hex-encoded.
    pub hash: String,
}

/// A chunk paired with its embedding, ready to persist.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// One entry of a top-k query, most similar first.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub source: String,
    pub chunk_index: i64,
    pub text: String,
    /// Cosine similarity to the query embedding.
    pub score: f32,
}

/// Citation returned with a chat answer.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceRef {
    pub source: String,
    pub chunk_index: i64,
    pub preview: String,
    pub score: f32,
}

/// Result of ingesting one document.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub filename: String,
    pub text_length: usize,
    pub chunks_created: usize,
    /// Entries previously stored for the same filename that were replaced.
    pub chunks_replaced: u64,
    pub total_documents: u64,
}

/// Generated answer plus the chunks it was grounded on.
#[derive(Debug, Clone, Serialize)]
pub struct ChatAnswer {
    pub answer: String,
    pub sources: Vec<SourceRef>,
}

/// Snapshot of the vector store.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub initialized: bool,
    pub total_documents: u64,
    pub persist_directory: String,
    /// `provider/model` of the stored vectors, if any.
    pub embedding_model: Option<String>,
    pub embedding_dims: Option<usize>,
}

impl StoreStatus {
    pub fn message(&self) -> String {
        if self.initialized {
            format!(
                "Vector store contains {} document chunks",
                self.total_documents
            )
        } else {
            "Vector store not initialized".to_string()
        }
    }
}
