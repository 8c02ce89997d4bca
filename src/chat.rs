//! Retrieval-augmented question answering.
//!
//! A question is embedded with the ingestion provider, the top-k most
//! similar chunks are fetched from the store, and one generation call is
//! made with those chunks as the only context.

use std::sync::Arc;

use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, RagResult};
use crate::llm::ChatModel;
use crate::models::{ChatAnswer, ScoredChunk, SourceRef};
use crate::store::VectorStore;

const PREVIEW_CHARS: usize = 200;

const SYSTEM_PROMPT: &str = "You are a helpful AI assistant that answers questions based on \
provided PDF documents. Always cite your sources and be accurate.";

pub struct ChatEngine {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn ChatModel>,
    default_k: usize,
    max_k: usize,
}

impl ChatEngine {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn ChatModel>,
        default_k: usize,
        max_k: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            llm,
            default_k,
            max_k: max_k.max(1),
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn ChatModel>,
    ) -> Self {
        Self::new(
            store,
            embedder,
            llm,
            config.retrieval.default_k,
            config.retrieval.max_k,
        )
    }

    /// Answer `question` from the `k` most similar stored chunks.
    ///
    /// `k` defaults to the configured value and is capped at `max_k`.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidRequest`] for a blank question or `k == 0`
    /// - [`RagError::EmptyStore`] when nothing has been ingested
    /// - [`RagError::Provider`] when embedding or generation fails
    pub async fn chat(&self, question: &str, k: Option<usize>) -> RagResult<ChatAnswer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidRequest(
                "Question must not be empty".to_string(),
            ));
        }
        let k = k.unwrap_or(self.default_k);
        if k == 0 {
            return Err(RagError::InvalidRequest("k must be at least 1".to_string()));
        }
        let k = k.min(self.max_k);

        if self.store.count().await? == 0 {
            return Err(RagError::EmptyStore);
        }

        let query = self.embedder.embed_query(question).await?;
        let hits = self
            .store
            .query(&query, &self.embedder.identity(), k)
            .await?;
        if hits.is_empty() {
            return Err(RagError::EmptyStore);
        }

        let prompt = build_prompt(question, &hits);
        let answer = self.llm.generate(SYSTEM_PROMPT, &prompt).await?;

        tracing::info!(
            k,
            sources = hits.len(),
            llm = self.llm.provider_name(),
            "Answered question"
        );

        Ok(ChatAnswer {
            answer,
            sources: hits.iter().map(source_ref).collect(),
        })
    }
}

fn build_prompt(question: &str, hits: &[ScoredChunk]) -> String {
    let context = hits
        .iter()
        .map(|hit| {
            format!(
                "[Source: {}, Chunk {}]\n{}",
                hit.source, hit.chunk_index, hit.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Based on the following documents, please answer this question: {question}\n\n\
         Documents:\n{context}\n\n\
         Please provide a clear, helpful answer using only the information from these \
         documents. If you can't find the answer in the documents, say \"I don't have \
         enough information to answer that question based on the provided documents.\"\n\n\
         Include specific references to the source documents when relevant."
    )
}

fn source_ref(hit: &ScoredChunk) -> SourceRef {
    SourceRef {
        source: hit.source.clone(),
        chunk_index: hit.chunk_index,
        preview: preview(&hit.text),
        score: hit.score,
    }
}

fn preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
