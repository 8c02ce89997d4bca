//! Text generation providers.
//!
//! [`ChatModel`] is the single seam between the chat engine and a hosted
//! (or local) language model. One implementation exists per wire format:
//!
//! | Provider | Implementation | Endpoint |
//! |----------|----------------|----------|
//! | OpenAI   | [`OpenAICompatibleChat`] | `POST {base}/chat/completions` |
//! | Groq     | [`OpenAICompatibleChat`] | same format, Groq base URL |
//! | Gemini   | [`GeminiChat`] | `POST {base}/models/{model}:generateContent` |
//! | Ollama   | [`OllamaChat`] | `POST {base}/api/chat` |

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::{Config, EmbeddingKind, LlmProvider};
use crate::provider::{api_key, ProviderClient, ProviderError};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const OLLAMA_BASE_URL: &str = "http://127.0.0.1:11434";

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;

    /// Generate a single completion for a system instruction and user prompt.
    async fn generate(&self, system: &str, prompt: &str) -> Result<String, ProviderError>;
}

/// Build the chat model selected by `[llm].provider`.
pub fn create_chat_model(config: &Config) -> Result<Arc<dyn ChatModel>> {
    let llm = &config.llm;
    let model = llm.model_or_default();
    let client =
        ProviderClient::new(llm.provider.to_string(), llm.timeout_secs, llm.max_retries)?;
    let base = |default: &str| llm.base_url.clone().unwrap_or_else(|| default.to_string());

    let chat: Arc<dyn ChatModel> = match llm.provider {
        LlmProvider::OpenAI => Arc::new(OpenAICompatibleChat {
            name: "openai",
            client,
            api_key: api_key("OPENAI_API_KEY")?,
            base_url: base(OPENAI_BASE_URL),
            model,
            temperature: llm.temperature,
        }),
        LlmProvider::Groq => Arc::new(OpenAICompatibleChat {
            name: "groq",
            client,
            api_key: api_key("GROQ_API_KEY")?,
            base_url: base(GROQ_BASE_URL),
            model,
            temperature: llm.temperature,
        }),
        LlmProvider::Gemini => Arc::new(GeminiChat {
            client,
            api_key: api_key("GOOGLE_API_KEY")?,
            base_url: base(GEMINI_BASE_URL),
            model,
            temperature: llm.temperature,
        }),
        LlmProvider::Ollama => Arc::new(OllamaChat {
            client,
            base_url: base(OLLAMA_BASE_URL),
            model,
            temperature: llm.temperature,
        }),
    };

    tracing::info!(
        provider = chat.provider_name(),
        model = chat.model_name(),
        "Chat model ready"
    );
    Ok(chat)
}

// ============ OpenAI / Groq ============

/// Chat completions over the OpenAI wire format (OpenAI, Groq).
pub struct OpenAICompatibleChat {
    name: &'static str,
    client: ProviderClient,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OpenAICompatibleChat {
    pub fn new(
        name: &'static str,
        client: ProviderClient,
        api_key: String,
        base_url: String,
        model: String,
        temperature: f32,
    ) -> Self {
        Self {
            name,
            client,
            api_key,
            base_url,
            model,
            temperature,
        }
    }
}

#[async_trait]
impl ChatModel for OpenAICompatibleChat {
    fn provider_name(&self) -> &str {
        self.name
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, system: &str, prompt: &str) -> Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt },
            ],
        });
        let headers = [("authorization", format!("Bearer {}", self.api_key))];
        let resp = self.client.post_json(&url, &headers, &body).await?;

        resp.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::invalid(self.name, "missing choices[0].message.content"))
    }
}

// ============ Gemini ============

pub struct GeminiChat {
    client: ProviderClient,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
}

#[async_trait]
impl ChatModel for GeminiChat {
    fn provider_name(&self) -> &str {
        "gemini"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, system: &str, prompt: &str) -> Result<String, ProviderError> {
        let model = self.model.trim_start_matches("models/");
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            model
        );
        let body = json!({
            "systemInstruction": { "parts": [{ "text": system }] },
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": self.temperature },
        });
        let headers = [("x-goog-api-key", self.api_key.clone())];
        let resp = self.client.post_json(&url, &headers, &body).await?;

        let parts = resp
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::invalid("gemini", "missing candidates[0].content.parts"))?;
        let text: String = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect();
        Ok(text)
    }
}

// ============ Ollama ============

pub struct OllamaChat {
    client: ProviderClient,
    base_url: String,
    model: String,
    temperature: f32,
}

#[async_trait]
impl ChatModel for OllamaChat {
    fn provider_name(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, system: &str, prompt: &str) -> Result<String, ProviderError> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "stream": false,
            "options": { "temperature": self.temperature },
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt },
            ],
        });
        let resp = self.client.post_json(&url, &[], &body).await?;

        resp.pointer("/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::invalid("ollama", "missing message.content"))
    }
}

// ============ Provider info ============

#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub provider: String,
    pub name: String,
    pub models: ProviderModels,
    pub cost: String,
    pub requires: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderModels {
    pub llm: String,
    pub embeddings: String,
}

/// Describe the configured LLM/embedding pairing for display.
pub fn provider_info(config: &Config) -> ProviderInfo {
    let embedding_kind = config.embedding_kind();
    let (name, cost) = match config.llm.provider {
        LlmProvider::OpenAI => ("OpenAI", "Paid"),
        LlmProvider::Gemini => ("Google Gemini", "Free tier available"),
        LlmProvider::Groq => ("Groq", "Free tier available"),
        LlmProvider::Ollama => ("Ollama (Local)", "100% Free (Local)"),
    };

    let mut requires = Vec::new();
    for key in [
        llm_key(config.llm.provider),
        embedding_key(embedding_kind),
    ]
    .into_iter()
    .flatten()
    {
        if !requires.iter().any(|r| r == key) {
            requires.push(key.to_string());
        }
    }
    if config.llm.provider == LlmProvider::Ollama || embedding_kind == EmbeddingKind::Ollama {
        requires.push("Ollama running locally".to_string());
    }

    ProviderInfo {
        provider: config.llm.provider.to_string(),
        name: name.to_string(),
        models: ProviderModels {
            llm: config.llm.model_or_default(),
            embeddings: format!(
                "{} ({})",
                config.embedding.model_or_default(embedding_kind),
                embedding_kind
            ),
        },
        cost: cost.to_string(),
        requires,
    }
}

fn llm_key(provider: LlmProvider) -> Option<&'static str> {
    match provider {
        LlmProvider::OpenAI => Some("OPENAI_API_KEY"),
        LlmProvider::Gemini => Some("GOOGLE_API_KEY"),
        LlmProvider::Groq => Some("GROQ_API_KEY"),
        LlmProvider::Ollama => None,
    }
}

fn embedding_key(kind: EmbeddingKind) -> Option<&'static str> {
    match kind {
        EmbeddingKind::OpenAI => Some("OPENAI_API_KEY"),
        EmbeddingKind::Gemini => Some("GOOGLE_API_KEY"),
        EmbeddingKind::Ollama | EmbeddingKind::Hash => None,
    }
}
