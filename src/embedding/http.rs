//! HTTP embedding providers: Ollama and OpenAI-style APIs.
//!
//! Both share one request loop with exponential backoff:
//! - HTTP 429 and 5xx, timeouts → retry, then [`EmbedError::Unavailable`]
//! - refused or failed connections → [`EmbedError::Unavailable`] immediately
//! - HTTP 401/403/404 → [`EmbedError::Config`]
//! - any other 4xx → [`EmbedError::Rejected`]
//! - Backoff: 1s, 2s, 4s, ... (capped at 2^5)

use async_trait::async_trait;
use std::time::Duration;

use super::{dims_for, model_for, EmbedError, EmbeddingProvider, ProviderKind};
use crate::config::EmbeddingConfig;

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

fn build_client(config: &EmbeddingConfig) -> Result<reqwest::Client, EmbedError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| EmbedError::Config(format!("failed to build HTTP client: {}", e)))
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default
/// `http://localhost:11434`). Requires an embedding model to be pulled,
/// e.g. `ollama pull nomic-embed-text`.
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let model = model_for(ProviderKind::Ollama, config)?;
        let dims = dims_for(&model, config)?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());

        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            client: build_client(config)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let url = format!("{}/api/embed", self.url);
        let json = send_with_retry("Ollama", self.max_retries, || {
            self.client.post(&url).json(&body)
        })
        .await?;
        parse_ollama_response(&json)
    }

    async fn probe(&self) -> Result<(), EmbedError> {
        let resp = self
            .client
            .get(format!("{}/api/tags", self.url))
            .send()
            .await
            .map_err(|e| {
                EmbedError::Unavailable(format!("Ollama not reachable at {}: {}", self.url, e))
            })?;
        if !resp.status().is_success() {
            return Err(EmbedError::Unavailable(format!(
                "Ollama at {} answered {}",
                self.url,
                resp.status()
            )));
        }
        Ok(())
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbedError> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            EmbedError::Unavailable("invalid Ollama response: missing embeddings array".into())
        })?;

    embeddings
        .iter()
        .map(|e| {
            e.as_array().map(|a| to_f32(a)).ok_or_else(|| {
                EmbedError::Unavailable("invalid Ollama response: embedding is not an array".into())
            })
        })
        .collect()
}

// ============ OpenAI Provider ============

/// Embedding provider for the OpenAI API and OpenAI-compatible servers.
///
/// Calls `POST {base}/embeddings`. The hosted API requires the key named by
/// `embedding.api_key_env`; compatible servers take `embedding.url` as the
/// base and send the key only when one is set.
pub struct OpenAIProvider {
    kind: ProviderKind,
    model: String,
    dims: usize,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIProvider {
    /// The hosted OpenAI API.
    ///
    /// # Errors
    ///
    /// [`EmbedError::Config`] if the API key variable is not set.
    pub fn openai(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let model = model_for(ProviderKind::OpenAI, config)?;
        let dims = dims_for(&model, config)?;
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            EmbedError::Config(format!(
                "{} environment variable not set",
                config.api_key_env
            ))
        })?;

        Ok(Self {
            kind: ProviderKind::OpenAI,
            model,
            dims,
            base_url: OPENAI_BASE_URL.to_string(),
            api_key: Some(api_key),
            max_retries: config.max_retries,
            client: build_client(config)?,
        })
    }

    /// A self-hosted server speaking the OpenAI embeddings protocol.
    ///
    /// # Errors
    ///
    /// [`EmbedError::Config`] if `embedding.url` or `embedding.model` is unset.
    pub fn compatible(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let base_url = config.url.clone().ok_or_else(|| {
            EmbedError::Config("embedding.url required for openai-compatible provider".into())
        })?;
        let model = model_for(ProviderKind::OpenAICompatible, config)?;
        let dims = dims_for(&model, config)?;

        Ok(Self {
            kind: ProviderKind::OpenAICompatible,
            model,
            dims,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: std::env::var(&config.api_key_env).ok(),
            max_retries: config.max_retries,
            client: build_client(config)?,
        })
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("Authorization", format!("Bearer {}", key)),
            None => req,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let url = format!("{}/embeddings", self.base_url);
        let json = send_with_retry(self.kind.as_str(), self.max_retries, || {
            self.authorize(self.client.post(&url)).json(&body)
        })
        .await?;
        parse_openai_response(&json)
    }

    async fn probe(&self) -> Result<(), EmbedError> {
        if self.kind == ProviderKind::OpenAI {
            return Ok(());
        }
        // Any HTTP answer means the server is up.
        self.authorize(self.client.get(format!("{}/models", self.base_url)))
            .send()
            .await
            .map(|_| ())
            .map_err(|e| {
                EmbedError::Unavailable(format!("{} not reachable: {}", self.base_url, e))
            })
    }
}

/// Extract `data[].embedding`, ordered by `data[].index` when present.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbedError> {
    let data = json.get("data").and_then(|d| d.as_array()).ok_or_else(|| {
        EmbedError::Unavailable("invalid embeddings response: missing data array".into())
    })?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                EmbedError::Unavailable("invalid embeddings response: missing embedding".into())
            })?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, to_f32(embedding)));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn to_f32(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

/// Send a JSON request, retrying transient failures with backoff.
async fn send_with_retry<F>(
    label: &str,
    max_retries: u32,
    make_request: F,
) -> Result<serde_json::Value, EmbedError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let response = match make_request().send().await {
            Ok(r) => r,
            Err(e) if e.is_connect() => {
                return Err(EmbedError::Unavailable(format!(
                    "{} connection failed: {}",
                    label, e
                )));
            }
            Err(e) => {
                last_err = Some(EmbedError::Unavailable(format!(
                    "{} request failed: {}",
                    label, e
                )));
                continue;
            }
        };

        let status = response.status();
        if status.is_success() {
            return response.json().await.map_err(|e| {
                EmbedError::Unavailable(format!("{} returned invalid JSON: {}", label, e))
            });
        }

        let body_text = response.text().await.unwrap_or_default();
        let message = format!("{} API error {}: {}", label, status, body_text);
        match status.as_u16() {
            429 | 500..=599 => last_err = Some(EmbedError::Unavailable(message)),
            401 | 403 | 404 => return Err(EmbedError::Config(message)),
            _ => return Err(EmbedError::Rejected(message)),
        }
    }

    Err(last_err
        .unwrap_or_else(|| EmbedError::Unavailable(format!("{} failed after retries", label))))
}
