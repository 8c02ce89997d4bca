//! Configuration loading.
//!
//! Settings come from three layers, later layers winning:
//!
//! 1. Built-in defaults (see the `default_*` functions below).
//! 2. An optional TOML file (`--config`, default `./config/pdf-rag.toml`).
//! 3. Environment variables, including anything in a `.env` file.
//!
//! API keys are never read from the TOML file; they only come from
//! `OPENAI_API_KEY`, `GOOGLE_API_KEY` and `GROQ_API_KEY`.
//!
//! ```toml
//! [store]
//! persist_directory = "db/vector_store"
//!
//! [chunking]
//! chunk_size = 1000
//! chunk_overlap = 200
//!
//! [llm]
//! provider = "openai"
//!
//! [server]
//! bind = "0.0.0.0:8000"
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Directory holding the on-disk vector index.
    #[serde(default = "default_persist_directory")]
    pub persist_directory: PathBuf,
    /// What to do when a filename is ingested again.
    #[serde(default)]
    pub on_duplicate: DuplicatePolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            persist_directory: default_persist_directory(),
            on_duplicate: DuplicatePolicy::default(),
        }
    }
}

/// Handling of a re-uploaded filename.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Drop the previous entries for the filename, then store the new ones.
    #[default]
    Replace,
    /// Keep previous entries; the new ones are stored alongside them.
    Append,
}

fn default_persist_directory() -> PathBuf {
    PathBuf::from("db/vector_store")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Target chunk length in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default = "default_max_k")]
    pub max_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            max_k: default_max_k(),
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_max_k() -> usize {
    20
}

/// Hosted or local service that produces text generations.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    OpenAI,
    #[serde(alias = "google")]
    Gemini,
    Groq,
    Ollama,
}

impl FromStr for LlmProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" | "google" => Ok(Self::Gemini),
            "groq" => Ok(Self::Groq),
            "ollama" => Ok(Self::Ollama),
            other => bail!(
                "Unknown LLM provider: '{}'. Must be openai, gemini, groq, or ollama.",
                other
            ),
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OpenAI => "openai",
            Self::Gemini => "gemini",
            Self::Groq => "groq",
            Self::Ollama => "ollama",
        };
        f.write_str(name)
    }
}

impl LlmProvider {
    pub fn default_model(self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-4o",
            Self::Gemini => "gemini-pro",
            Self::Groq => "mixtral-8x7b-32768",
            Self::Ollama => "llama2",
        }
    }

    /// Embedding backend paired with this LLM when none is configured.
    /// Groq serves no embeddings, so it falls back to a local Ollama model.
    pub fn paired_embedding(self) -> EmbeddingKind {
        match self {
            Self::OpenAI => EmbeddingKind::OpenAI,
            Self::Gemini => EmbeddingKind::Gemini,
            Self::Groq | Self::Ollama => EmbeddingKind::Ollama,
        }
    }
}

/// Service that produces embedding vectors.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingKind {
    OpenAI,
    #[serde(alias = "google")]
    Gemini,
    Ollama,
    /// Deterministic local hashing embedder; no network access.
    Hash,
}

impl FromStr for EmbeddingKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" | "google" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            "hash" => Ok(Self::Hash),
            other => bail!(
                "Unknown embedding provider: '{}'. Must be openai, gemini, ollama, or hash.",
                other
            ),
        }
    }
}

impl fmt::Display for EmbeddingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OpenAI => "openai",
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
            Self::Hash => "hash",
        };
        f.write_str(name)
    }
}

impl EmbeddingKind {
    pub fn default_model(self) -> &'static str {
        match self {
            Self::OpenAI => "text-embedding-3-small",
            Self::Gemini => "models/embedding-001",
            Self::Ollama => "nomic-embed-text",
            Self::Hash => "hash-256",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Falls back to the provider paired with `[llm].provider`.
    #[serde(default)]
    pub provider: Option<EmbeddingKind>,
    #[serde(default)]
    pub model: Option<String>,
    /// Only used by the `hash` provider.
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            dims: None,
            base_url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    2
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            model: None,
            base_url: None,
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_temperature() -> f32 {
    0.7
}
fn default_llm_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Scratch directory for uploads while they are processed.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            upload_dir: default_upload_dir(),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}
fn default_max_upload_mb() -> usize {
    50
}

impl EmbeddingConfig {
    /// The effective embedding backend for a given LLM provider.
    pub fn kind(&self, llm: LlmProvider) -> EmbeddingKind {
        self.provider.unwrap_or_else(|| llm.paired_embedding())
    }

    pub fn model_or_default(&self, kind: EmbeddingKind) -> String {
        match (kind, self.dims) {
            (EmbeddingKind::Hash, Some(dims)) => format!("hash-{}", dims),
            _ => self
                .model
                .clone()
                .unwrap_or_else(|| kind.default_model().to_string()),
        }
    }
}

impl LlmConfig {
    pub fn model_or_default(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }
}

impl Config {
    pub fn embedding_kind(&self) -> EmbeddingKind {
        self.embedding.kind(self.llm.provider)
    }
}

/// Load configuration from `path` (if it exists) and the environment.
pub fn load_config(path: &Path) -> Result<Config> {
    dotenvy::dotenv().ok();

    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;

    tracing::debug!(
        persist_directory = %config.store.persist_directory.display(),
        llm_provider = %config.llm.provider,
        embedding_provider = %config.embedding_kind(),
        bind = %config.server.bind,
        "Loaded configuration"
    );

    Ok(config)
}

/// Apply environment overrides using `lookup` as the variable source.
pub(crate) fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(provider) = get("LLM_PROVIDER") {
        config.llm.provider = provider.parse()?;
    }
    if let Some(provider) = get("EMBEDDING_PROVIDER") {
        config.embedding.provider = Some(provider.parse()?);
    }
    if let Some(dir) = get("PERSIST_DIRECTORY") {
        config.store.persist_directory = PathBuf::from(dir);
    }
    if let Some(port) = get("PORT") {
        let port: u16 = port
            .parse()
            .with_context(|| format!("Invalid PORT value: {}", port))?;
        let host = config
            .server
            .bind
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        config.server.bind = format!("{}:{}", host, port);
    }

    match config.llm.provider {
        LlmProvider::Ollama => {
            if let Some(model) = get("OLLAMA_MODEL") {
                config.llm.model = Some(model);
            }
            if let Some(url) = get("OLLAMA_URL") {
                config.llm.base_url = Some(url);
            }
        }
        LlmProvider::Groq => {
            if let Some(model) = get("GROQ_MODEL") {
                config.llm.model = Some(model);
            }
        }
        LlmProvider::OpenAI | LlmProvider::Gemini => {}
    }

    if config.embedding_kind() == EmbeddingKind::Ollama {
        if let Some(model) = get("OLLAMA_EMBED_MODEL") {
            config.embedding.model = Some(model);
        }
        if let Some(url) = get("OLLAMA_URL") {
            config.embedding.base_url = Some(url);
        }
    }

    Ok(())
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        bail!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }
    if config.retrieval.default_k == 0 || config.retrieval.max_k == 0 {
        bail!("retrieval.default_k and retrieval.max_k must be >= 1");
    }
    if config.retrieval.default_k > config.retrieval.max_k {
        bail!("retrieval.default_k must not exceed retrieval.max_k");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        bail!("llm.temperature must be in [0.0, 2.0]");
    }
    if config.server.max_upload_mb == 0 {
        bail!("server.max_upload_mb must be > 0");
    }
    Ok(())
}
