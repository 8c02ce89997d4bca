//! Document ingestion pipeline.
//!
//! Coordinates the upload flow: validation → text extraction → chunking →
//! embedding → storage. Every chunk of a document is embedded before the
//! first row is written, so a provider failure leaves the store untouched.

use std::path::Path;
use std::sync::Arc;

use crate::chunk::{chunk_document, TextSplitter};
use crate::config::{Config, DuplicatePolicy};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, RagResult};
use crate::extract;
use crate::models::{EmbeddedChunk, IngestOutcome};
use crate::store::VectorStore;

/// Turns uploaded PDFs into stored, embedded chunks.
pub struct DocumentProcessor {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    splitter: TextSplitter,
    on_duplicate: DuplicatePolicy,
}

impl DocumentProcessor {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        splitter: TextSplitter,
        on_duplicate: DuplicatePolicy,
    ) -> Self {
        Self {
            store,
            embedder,
            splitter,
            on_duplicate,
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self::new(
            store,
            embedder,
            TextSplitter::from_config(&config.chunking),
            config.store.on_duplicate,
        )
    }

    /// Ingest a PDF on disk. `filename` is the name recorded as the source.
    pub async fn process_pdf(&self, path: &Path, filename: &str) -> RagResult<IngestOutcome> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            RagError::InvalidUpload(format!("Failed to read {}: {}", path.display(), e))
        })?;
        self.process_bytes(filename, bytes).await
    }

    /// Ingest an in-memory PDF upload.
    pub async fn process_bytes(&self, filename: &str, bytes: Vec<u8>) -> RagResult<IngestOutcome> {
        extract::validate_upload(filename, &bytes)?;

        // pdf-extract can panic on hostile input; a blocking task contains it.
        let pages = tokio::task::spawn_blocking(move || extract::extract_pages(&bytes))
            .await
            .map_err(|e| {
                RagError::UnreadablePdf(format!("extraction aborted: {}", e))
            })??;

        tracing::debug!(filename, pages = pages.len(), "Extracted PDF text");
        let text = extract::join_pages(&pages);
        self.ingest_text(filename, &text).await
    }

    /// Chunk, embed, and store already-extracted text under `filename`.
    pub async fn ingest_text(&self, filename: &str, text: &str) -> RagResult<IngestOutcome> {
        let chunks = chunk_document(filename, text, &self.splitter);
        if chunks.is_empty() {
            return Err(RagError::UnreadablePdf(
                "No text could be extracted from the PDF".to_string(),
            ));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_texts(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(RagError::Storage(anyhow::anyhow!(
                "embedding provider returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        let entries: Vec<EmbeddedChunk> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| EmbeddedChunk { chunk, embedding })
            .collect();
        let chunks_created = entries.len();
        let identity = self.embedder.identity();

        let (chunks_replaced, total_documents) = match self.on_duplicate {
            DuplicatePolicy::Replace => {
                let outcome = self
                    .store
                    .replace_source(filename, &entries, &identity)
                    .await?;
                (outcome.removed, outcome.total)
            }
            DuplicatePolicy::Append => (0, self.store.add(&entries, &identity).await?),
        };

        tracing::info!(
            filename,
            chunks = chunks_created,
            replaced = chunks_replaced,
            total = total_documents,
            "Document ingested"
        );

        Ok(IngestOutcome {
            filename: filename.to_string(),
            text_length: text.chars().count(),
            chunks_created,
            chunks_replaced,
            total_documents,
        })
    }
}
