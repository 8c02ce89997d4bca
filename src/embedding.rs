//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`OpenAIEmbeddings`]**: `POST /v1/embeddings` on the OpenAI API.
//! - **[`GeminiEmbeddings`]**: `batchEmbedContents` on the Google Generative Language API.
//! - **[`OllamaEmbeddings`]**: `POST /api/embed` on a local Ollama instance.
//! - **[`HashEmbeddings`]**: deterministic byte-hashing embedder; no network calls.
//!
//! Also provides vector utilities for the SQLite store:
//! - [`cosine_similarity`]: compute similarity between two embedding vectors
//! - [`vec_to_blob`]: encode a `Vec<f32>` as little-endian bytes for SQLite BLOB storage
//! - [`blob_to_vec`]: decode a SQLite BLOB back into a `Vec<f32>`
//!
//! The provider is chosen once at startup by [`create_provider`] and shared
//! by the ingestion pipeline and the chat engine, so documents and questions
//! are always embedded by the same model.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::config::{Config, EmbeddingKind};
use crate::provider::{api_key, ProviderClient, ProviderError};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const OLLAMA_BASE_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_HASH_DIMS: usize = 256;

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Backend name (e.g. `"openai"`).
    fn provider_name(&self) -> &str;

    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Embed a batch of texts, returning one vector per input in input order.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.embed_texts(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::invalid(self.provider_name(), "empty embedding response"))
    }

    /// Identifier stored next to every vector; entries with a different
    /// identifier are never compared.
    fn identity(&self) -> String {
        format!("{}/{}", self.provider_name(), self.model_name())
    }
}

/// Build the embedding provider selected by configuration.
///
/// # Errors
///
/// Returns an error if the provider needs an API key that is not present
/// in the environment.
pub fn create_provider(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    let kind = config.embedding_kind();
    let emb = &config.embedding;
    let model = emb.model_or_default(kind);
    let client = ProviderClient::new(kind.to_string(), emb.timeout_secs, emb.max_retries)?;

    let provider: Arc<dyn EmbeddingProvider> = match kind {
        EmbeddingKind::OpenAI => Arc::new(OpenAIEmbeddings {
            client,
            api_key: api_key("OPENAI_API_KEY")?,
            base_url: emb
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            model,
            batch_size: emb.batch_size,
        }),
        EmbeddingKind::Gemini => Arc::new(GeminiEmbeddings {
            client,
            api_key: api_key("GOOGLE_API_KEY")?,
            base_url: emb
                .base_url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            model: if model.starts_with("models/") {
                model
            } else {
                format!("models/{}", model)
            },
            batch_size: emb.batch_size,
        }),
        EmbeddingKind::Ollama => Arc::new(OllamaEmbeddings {
            client,
            base_url: emb
                .base_url
                .clone()
                .unwrap_or_else(|| OLLAMA_BASE_URL.to_string()),
            model,
            batch_size: emb.batch_size,
        }),
        EmbeddingKind::Hash => Arc::new(HashEmbeddings::new(
            emb.dims.unwrap_or(DEFAULT_HASH_DIMS),
        )),
    };

    tracing::info!(
        provider = provider.provider_name(),
        model = provider.model_name(),
        "Embedding provider ready"
    );
    Ok(provider)
}

fn check_count(provider: &str, expected: usize, got: &[Vec<f32>]) -> Result<(), ProviderError> {
    if got.len() != expected {
        return Err(ProviderError::invalid(
            provider,
            format!("expected {} embeddings, got {}", expected, got.len()),
        ));
    }
    Ok(())
}

fn parse_vector(provider: &str, value: &Value) -> Result<Vec<f32>, ProviderError> {
    let arr = value
        .as_array()
        .ok_or_else(|| ProviderError::invalid(provider, "embedding is not an array"))?;
    arr.iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| ProviderError::invalid(provider, "non-numeric embedding value"))
        })
        .collect()
}

// ============ OpenAI ============

/// Embeddings from the OpenAI API. Requires `OPENAI_API_KEY`.
pub struct OpenAIEmbeddings {
    client: ProviderClient,
    api_key: String,
    base_url: String,
    model: String,
    batch_size: usize,
}

impl OpenAIEmbeddings {
    pub fn new(client: ProviderClient, api_key: String, base_url: String, model: String) -> Self {
        Self {
            client,
            api_key,
            base_url,
            model,
            batch_size: 64,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddings {
    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let mut out = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size.max(1)) {
            let body = json!({ "model": self.model, "input": batch });
            let headers = [("authorization", format!("Bearer {}", self.api_key))];
            let resp = self.client.post_json(&url, &headers, &body).await?;
            let vectors = parse_openai_response(&resp)?;
            check_count("openai", batch.len(), &vectors)?;
            out.extend(vectors);
        }

        Ok(out)
    }
}

/// Extract `data[].embedding` arrays, ordered by their `index` field.
fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>, ProviderError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| ProviderError::invalid("openai", "missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| ProviderError::invalid("openai", "missing embedding"))?;
        indexed.push((index, parse_vector("openai", embedding)?));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Gemini ============

/// Embeddings from the Google Generative Language API. Requires `GOOGLE_API_KEY`.
pub struct GeminiEmbeddings {
    client: ProviderClient,
    api_key: String,
    base_url: String,
    model: String,
    batch_size: usize,
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbeddings {
    fn provider_name(&self) -> &str {
        "gemini"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let url = format!(
            "{}/{}:batchEmbedContents",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let mut out = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size.max(1)) {
            let requests: Vec<Value> = batch
                .iter()
                .map(|text| {
                    json!({
                        "model": self.model,
                        "content": { "parts": [{ "text": text }] },
                    })
                })
                .collect();
            let body = json!({ "requests": requests });
            let headers = [("x-goog-api-key", self.api_key.clone())];
            let resp = self.client.post_json(&url, &headers, &body).await?;

            let embeddings = resp
                .get("embeddings")
                .and_then(|e| e.as_array())
                .ok_or_else(|| ProviderError::invalid("gemini", "missing embeddings array"))?;
            let vectors = embeddings
                .iter()
                .map(|e| {
                    let values = e
                        .get("values")
                        .ok_or_else(|| ProviderError::invalid("gemini", "missing values"))?;
                    parse_vector("gemini", values)
                })
                .collect::<Result<Vec<_>, _>>()?;
            check_count("gemini", batch.len(), &vectors)?;
            out.extend(vectors);
        }

        Ok(out)
    }
}

// ============ Ollama ============

/// Embeddings from a local Ollama instance.
///
/// Requires Ollama to be running with an embedding model pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaEmbeddings {
    client: ProviderClient,
    base_url: String,
    model: String,
    batch_size: usize,
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddings {
    fn provider_name(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let url = format!("{}/api/embed", self.base_url.trim_end_matches('/'));
        let mut out = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size.max(1)) {
            let body = json!({ "model": self.model, "input": batch });
            let resp = self.client.post_json(&url, &[], &body).await?;
            let vectors = resp
                .get("embeddings")
                .and_then(|e| e.as_array())
                .ok_or_else(|| ProviderError::invalid("ollama", "missing embeddings array"))?
                .iter()
                .map(|v| parse_vector("ollama", v))
                .collect::<Result<Vec<_>, _>>()?;
            check_count("ollama", batch.len(), &vectors)?;
            out.extend(vectors);
        }

        Ok(out)
    }
}

// ============ Hash ============

/// Deterministic embedder: a bag of hashed, lowercased words.
///
/// Texts sharing vocabulary score higher than unrelated ones, which keeps
/// the whole pipeline usable offline and in tests.
pub struct HashEmbeddings {
    dims: usize,
    model: String,
}

impl HashEmbeddings {
    pub fn new(dims: usize) -> Self {
        Self {
            dims: dims.max(1),
            model: format!("hash-{}", dims.max(1)),
        }
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; self.dims];

        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let digest = Sha256::digest(word.to_lowercase().as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]);
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            embedding[(bucket % self.dims as u64) as usize] += sign;
        }

        let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddings {
    fn provider_name(&self) -> &str {
        "hash"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|t| self.encode(t)).collect())
    }
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use pdf_rag::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or
/// zero-magnitude vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
