//! Shared HTTP plumbing for external embedding and generation providers.
//!
//! Every outbound call goes through [`ProviderClient::post_json`], which
//! applies an explicit per-request timeout and a bounded retry loop:
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: base, 2×base, 4×base, ... (capped at 2^5 × base)

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{0} environment variable not set")]
    MissingApiKey(&'static str),

    #[error("{provider} request timed out after {secs}s")]
    Timeout { provider: String, secs: u64 },

    #[error("{provider} API error {status}: {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} request failed: {message}")]
    Transport { provider: String, message: String },

    #[error("Invalid {provider} response: {message}")]
    InvalidResponse { provider: String, message: String },
}

impl ProviderError {
    pub(crate) fn invalid(provider: &str, message: impl Into<String>) -> Self {
        ProviderError::InvalidResponse {
            provider: provider.to_string(),
            message: message.into(),
        }
    }
}

/// Read a required API key from the environment.
pub fn api_key(var: &'static str) -> Result<String, ProviderError> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ProviderError::MissingApiKey(var))
}

/// A `reqwest` client bound to one provider's timeout and retry budget.
#[derive(Clone)]
pub struct ProviderClient {
    name: String,
    http: reqwest::Client,
    timeout_secs: u64,
    max_retries: u32,
    backoff: Duration,
}

impl ProviderClient {
    pub fn new(
        name: impl Into<String>,
        timeout_secs: u64,
        max_retries: u32,
    ) -> Result<Self, ProviderError> {
        let name = name.into();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("pdf-rag/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Transport {
                provider: name.clone(),
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            name,
            http,
            timeout_secs,
            max_retries,
            backoff: Duration::from_secs(1),
        })
    }

    /// Override the base backoff delay between retries.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// POST a JSON body and return the parsed JSON response.
    pub async fn post_json(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
        body: &Value,
    ) -> Result<Value, ProviderError> {
        let header_map = self.header_map(headers)?;
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff * (1u32 << (attempt - 1).min(5));
                tracing::warn!(
                    provider = %self.name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_err.as_ref().map(ToString::to_string).unwrap_or_default(),
                    "Retrying provider request"
                );
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .post(url)
                .headers(header_map.clone())
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response.json::<Value>().await.map_err(|e| {
                            if e.is_timeout() {
                                self.timeout()
                            } else {
                                ProviderError::invalid(&self.name, e.to_string())
                            }
                        });
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = ProviderError::Http {
                        provider: self.name.clone(),
                        status: status.as_u16(),
                        body: body_text,
                    };

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }

                    return Err(err);
                }
                Err(e) if e.is_timeout() => {
                    last_err = Some(self.timeout());
                }
                Err(e) => {
                    last_err = Some(ProviderError::Transport {
                        provider: self.name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ProviderError::Transport {
            provider: self.name.clone(),
            message: "request failed after retries".to_string(),
        }))
    }

    fn timeout(&self) -> ProviderError {
        ProviderError::Timeout {
            provider: self.name.clone(),
            secs: self.timeout_secs,
        }
    }

    fn header_map(&self, headers: &[(&'static str, String)]) -> Result<HeaderMap, ProviderError> {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            let value = HeaderValue::from_str(value).map_err(|_| ProviderError::Transport {
                provider: self.name.clone(),
                message: format!("invalid value for header {}", name),
            })?;
            map.insert(HeaderName::from_static(name), value);
        }
        Ok(map)
    }
}
