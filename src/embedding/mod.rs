//! Embedding provider abstraction and the embedding orchestrator.
//!
//! Defines the [`EmbeddingProvider`] strategy trait and its implementations:
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **[`OpenAIProvider`]**: calls `POST /embeddings` on the OpenAI API or any
//!   OpenAI-compatible server.
//! - **`LocalProvider`**: in-process inference via fastembed
//!   (`local-embeddings-fastembed` feature).
//!
//! The [`Embedder`] wraps at most one provider and turns provider failures
//! into the three outcomes the indexer and retriever act on:
//!
//! | Failure | Result |
//! |---------|--------|
//! | unreachable endpoint, refused connection, timeout, exhausted retries | [`Embedding::Degraded`] |
//! | provider rejected one input (HTTP 400/413/422) | [`EmbedError::Rejected`] |
//! | missing key, unknown model or endpoint, wrong dimensions | [`EmbedError::Config`] / [`EmbedError::DimensionMismatch`] |
//!
//! # Provider Selection
//!
//! [`resolution_order`] maps configuration to an ordered candidate list
//! without touching the network; [`Embedder::resolve`] walks it.
//!
//! ```rust
//! use vault_index::config::EmbeddingConfig;
//! use vault_index::embedding::{resolution_order, ProviderKind};
//!
//! let mut config = EmbeddingConfig::default();
//! config.provider = "auto".into();
//! assert_eq!(
//!     resolution_order(&config).unwrap(),
//!     vec![ProviderKind::Ollama, ProviderKind::OpenAI, ProviderKind::OpenAICompatible]
//! );
//! ```

mod http;
#[cfg(feature = "local-embeddings-fastembed")]
mod local;

pub use http::{OllamaProvider, OpenAIProvider};
#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalProvider;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::EmbeddingConfig;

/// Embedding failures, classified by what the caller should do about them.
#[derive(Debug, Clone, Error)]
pub enum EmbedError {
    /// The provider cannot be reached right now. Never fatal.
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
    /// The provider refused this particular input.
    #[error("embedding provider rejected input: {0}")]
    Rejected(String),
    /// Setup problem: missing credential, unknown model or endpoint.
    #[error("embedding configuration error: {0}")]
    Config(String),
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl EmbedError {
    /// Connectivity-class failures that trigger lite-mode fallback.
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbedError::Unavailable(_))
    }

    /// Failures that must abort the operation depending on them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EmbedError::Config(_) | EmbedError::DimensionMismatch { .. }
        )
    }
}

/// Strategy interface implemented by every embedding backend.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider identity (e.g. `"ollama"`).
    fn kind(&self) -> ProviderKind;
    /// Returns the model identifier (e.g. `"nomic-embed-text"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `768`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
    /// Cheap reachability check used during `auto` resolution.
    async fn probe(&self) -> Result<(), EmbedError> {
        Ok(())
    }
}

/// Known provider implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Ollama,
    OpenAI,
    OpenAICompatible,
    Local,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Ollama => "ollama",
            ProviderKind::OpenAI => "openai",
            ProviderKind::OpenAICompatible => "openai-compatible",
            ProviderKind::Local => "local",
        }
    }

    fn default_model(&self) -> Option<&'static str> {
        match self {
            ProviderKind::Ollama => Some("nomic-embed-text"),
            ProviderKind::OpenAI => Some("text-embedding-3-small"),
            ProviderKind::OpenAICompatible => None,
            ProviderKind::Local => Some("all-minilm-l6-v2"),
        }
    }
}

/// Ordered provider candidates for a configuration.
///
/// | `embedding.provider` | Candidates |
/// |----------------------|-----------|
/// | `"auto"` | ollama, openai, openai-compatible |
/// | a provider name | that provider only |
/// | `"disabled"` | none (lite mode) |
pub fn resolution_order(config: &EmbeddingConfig) -> Result<Vec<ProviderKind>, EmbedError> {
    match config.provider.as_str() {
        "auto" => Ok(vec![
            ProviderKind::Ollama,
            ProviderKind::OpenAI,
            ProviderKind::OpenAICompatible,
        ]),
        "ollama" => Ok(vec![ProviderKind::Ollama]),
        "openai" => Ok(vec![ProviderKind::OpenAI]),
        "openai-compatible" => Ok(vec![ProviderKind::OpenAICompatible]),
        "local" => Ok(vec![ProviderKind::Local]),
        "disabled" => Ok(Vec::new()),
        other => Err(EmbedError::Config(format!(
            "unknown embedding provider '{}'",
            other
        ))),
    }
}

/// Model name a provider kind will use under this configuration.
pub fn model_for(kind: ProviderKind, config: &EmbeddingConfig) -> Result<String, EmbedError> {
    config
        .model
        .clone()
        .or_else(|| kind.default_model().map(str::to_string))
        .ok_or_else(|| {
            EmbedError::Config(format!(
                "embedding.model required for {} provider",
                kind.as_str()
            ))
        })
}

/// Vector dimensionality: explicit config, else the known size of the model.
pub fn dims_for(model: &str, config: &EmbeddingConfig) -> Result<usize, EmbedError> {
    if let Some(d) = config.dims {
        return Ok(d);
    }
    let known = match model {
        "nomic-embed-text" | "nomic-embed-text-v1.5" => 768,
        "mxbai-embed-large" => 1024,
        "all-minilm" | "all-minilm-l6-v2" | "bge-small-en-v1.5" => 384,
        "bge-base-en-v1.5" => 768,
        "text-embedding-3-small" | "text-embedding-ada-002" => 1536,
        "text-embedding-3-large" => 3072,
        _ => 0,
    };
    if known == 0 {
        return Err(EmbedError::Config(format!(
            "embedding.dims required for unknown model '{}'",
            model
        )));
    }
    Ok(known)
}

/// Construct one provider. Construction never touches the network.
pub fn build_provider(
    kind: ProviderKind,
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>, EmbedError> {
    match kind {
        ProviderKind::Ollama => Ok(Arc::new(OllamaProvider::new(config)?)),
        ProviderKind::OpenAI => Ok(Arc::new(OpenAIProvider::openai(config)?)),
        ProviderKind::OpenAICompatible => Ok(Arc::new(OpenAIProvider::compatible(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        ProviderKind::Local => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        ProviderKind::Local => Err(EmbedError::Config(
            "local embedding provider requires --features local-embeddings-fastembed".to_string(),
        )),
    }
}

/// Result of an embedding request through the [`Embedder`].
#[derive(Debug, Clone, PartialEq)]
pub enum Embedding {
    Vector(Vec<f32>),
    /// No usable provider; callers fall back to lite mode.
    Degraded,
}

/// The embedding orchestrator.
///
/// Holds the selected provider (or none, in lite mode) and applies the
/// failure classification described in the module docs. It keeps no
/// degraded state of its own: every call tries the provider again, and
/// callers decide how long to stay in lite mode.
#[derive(Clone)]
pub struct Embedder {
    provider: Option<Arc<dyn EmbeddingProvider>>,
    batch_size: usize,
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("provider", &self.provider.as_ref().map(|p| p.model_name()))
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider: Some(provider),
            batch_size: 32,
        }
    }

    /// An embedder with no provider: every request is [`Embedding::Degraded`].
    pub fn lite() -> Self {
        Self {
            provider: None,
            batch_size: 32,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Select a provider by walking [`resolution_order`].
    ///
    /// With an explicit provider, construction errors are returned as
    /// [`EmbedError::Config`] and no reachability probe is made. In `auto`
    /// mode, candidates that are unconfigured or unreachable are skipped; if
    /// none remains the embedder starts in lite mode.
    pub async fn resolve(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let order = resolution_order(config)?;
        let auto = config.provider == "auto";

        for kind in order {
            let provider = match build_provider(kind, config) {
                Ok(p) => p,
                Err(e) if auto => {
                    debug!("skipping {} provider: {}", kind.as_str(), e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            if auto {
                if let Err(e) = provider.probe().await {
                    debug!("skipping {} provider: {}", kind.as_str(), e);
                    continue;
                }
            }

            info!(
                "embedding provider: {} (model {}, {} dims)",
                kind.as_str(),
                provider.model_name(),
                provider.dims()
            );
            return Ok(Self::new(provider).with_batch_size(config.batch_size));
        }

        if config.is_enabled() {
            warn!("no embedding provider available; indexing in lite mode");
        }
        Ok(Self::lite().with_batch_size(config.batch_size))
    }

    pub fn provider(&self) -> Option<&dyn EmbeddingProvider> {
        self.provider.as_deref()
    }

    /// True when no provider was selected.
    pub fn is_lite(&self) -> bool {
        self.provider.is_none()
    }

    /// Embed a batch of document texts.
    ///
    /// Returns `Ok(None)` when degraded. Inputs are sent in batches of
    /// `batch_size`; a connectivity failure on any batch degrades the
    /// whole request.
    pub async fn embed_documents(
        &self,
        texts: &[String],
    ) -> Result<Option<Vec<Vec<f32>>>, EmbedError> {
        let provider = match &self.provider {
            Some(p) => p,
            None => return Ok(None),
        };

        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            match provider.embed(batch).await {
                Ok(vectors) => {
                    if vectors.len() != batch.len() {
                        return Err(EmbedError::Unavailable(format!(
                            "provider returned {} vectors for {} inputs",
                            vectors.len(),
                            batch.len()
                        )));
                    }
                    for v in &vectors {
                        check_dims(provider.dims(), v)?;
                    }
                    out.extend(vectors);
                }
                Err(e) if e.is_transient() => {
                    warn!("embedding degraded: {}", e);
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Some(out))
    }

    /// Embed one document chunk.
    pub async fn embed_document(&self, text: &str) -> Result<Embedding, EmbedError> {
        self.embed_one(text).await
    }

    /// Embed a retrieval query.
    pub async fn embed_query(&self, text: &str) -> Result<Embedding, EmbedError> {
        self.embed_one(text).await
    }

    async fn embed_one(&self, text: &str) -> Result<Embedding, EmbedError> {
        match self.embed_documents(&[text.to_string()]).await? {
            Some(mut vectors) => match vectors.pop() {
                Some(v) => Ok(Embedding::Vector(v)),
                None => Ok(Embedding::Degraded),
            },
            None => Ok(Embedding::Degraded),
        }
    }
}

fn check_dims(expected: usize, v: &[f32]) -> Result<(), EmbedError> {
    if v.len() != expected {
        return Err(EmbedError::DimensionMismatch {
            expected,
            actual: v.len(),
        });
    }
    Ok(())
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use vault_index::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Euclidean (L2) distance. Smaller is more similar.
///
/// Vectors of different lengths are infinitely far apart, so stale vectors
/// from a previous model never rank.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return f64::INFINITY;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = (*x as f64) - (*y as f64);
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        dims: usize,
        calls: AtomicUsize,
        fail: Option<EmbedError>,
        wrong_dims: bool,
    }

    impl Fixed {
        fn ok(dims: usize) -> Self {
            Self {
                dims,
                calls: AtomicUsize::new(0),
                fail: None,
                wrong_dims: false,
            }
        }
        fn failing(e: EmbedError) -> Self {
            Self {
                fail: Some(e),
                ..Self::ok(3)
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for Fixed {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Ollama
        }
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(e) = &self.fail {
                return Err(e.clone());
            }
            let n = if self.wrong_dims { self.dims + 1 } else { self.dims };
            Ok(texts.iter().map(|t| vec![t.len() as f32; n]).collect())
        }
    }

    fn config(provider: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: provider.to_string(),
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn test_resolution_order() {
        assert!(resolution_order(&config("disabled")).unwrap().is_empty());
        assert_eq!(
            resolution_order(&config("openai-compatible")).unwrap(),
            vec![ProviderKind::OpenAICompatible]
        );
        assert!(matches!(
            resolution_order(&config("cohere")),
            Err(EmbedError::Config(_))
        ));
    }

    #[test]
    fn test_model_and_dims_defaults() {
        let c = config("ollama");
        let model = model_for(ProviderKind::Ollama, &c).unwrap();
        assert_eq!(model, "nomic-embed-text");
        assert_eq!(dims_for(&model, &c).unwrap(), 768);
        assert!(model_for(ProviderKind::OpenAICompatible, &c).is_err());
        assert!(dims_for("mystery-model", &c).is_err());

        let mut c = config("ollama");
        c.dims = Some(12);
        assert_eq!(dims_for("mystery-model", &c).unwrap(), 12);
    }

    #[test]
    fn test_error_classification() {
        assert!(EmbedError::Unavailable("x".into()).is_transient());
        assert!(!EmbedError::Unavailable("x".into()).is_fatal());
        assert!(EmbedError::Config("x".into()).is_fatal());
        assert!(EmbedError::DimensionMismatch {
            expected: 1,
            actual: 2
        }
        .is_fatal());
        assert!(!EmbedError::Rejected("x".into()).is_fatal());
        assert!(!EmbedError::Rejected("x".into()).is_transient());
    }

    #[tokio::test]
    async fn test_disabled_resolves_to_lite() {
        let embedder = Embedder::resolve(&config("disabled")).await.unwrap();
        assert!(embedder.is_lite());
        assert_eq!(
            embedder.embed_query("anything").await.unwrap(),
            Embedding::Degraded
        );
    }

    #[tokio::test]
    async fn test_explicit_misconfigured_provider_is_fatal() {
        let mut c = config("openai-compatible");
        c.model = Some("m".into());
        c.dims = Some(4);
        let err = Embedder::resolve(&c).await.unwrap_err();
        assert!(err.is_fatal(), "{}", err);
    }

    #[tokio::test]
    async fn test_connectivity_failure_degrades() {
        let embedder = Embedder::new(Arc::new(Fixed::failing(EmbedError::Unavailable(
            "connection refused".into(),
        ))));
        assert_eq!(
            embedder.embed_document("text").await.unwrap(),
            Embedding::Degraded
        );
    }

    #[tokio::test]
    async fn test_config_failure_is_raised() {
        let embedder = Embedder::new(Arc::new(Fixed::failing(EmbedError::Config(
            "missing key".into(),
        ))));
        let err = embedder.embed_query("text").await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_wrong_dimensions_are_fatal() {
        let provider = Fixed {
            wrong_dims: true,
            ..Fixed::ok(3)
        };
        let embedder = Embedder::new(Arc::new(provider));
        let err = embedder.embed_document("text").await.unwrap_err();
        assert!(matches!(
            err,
            EmbedError::DimensionMismatch {
                expected: 3,
                actual: 4
            }
        ));
    }

    #[tokio::test]
    async fn test_batches_respect_batch_size() {
        let provider = Arc::new(Fixed::ok(2));
        let embedder = Embedder::new(provider.clone()).with_batch_size(2);
        let texts: Vec<String> = (0..5).map(|i| "x".repeat(i)).collect();
        let vectors = embedder.embed_documents(&texts).await.unwrap().unwrap();
        assert_eq!(vectors.len(), 5);
        assert_eq!(vectors[4], vec![4.0, 4.0]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_l2_distance() {
        assert_eq!(l2_distance(&[0.0, 0.0], &[3.0, 4.0]), 5.0);
        assert_eq!(l2_distance(&[1.0, 2.0], &[1.0, 2.0]), 0.0);
        assert!(l2_distance(&[1.0], &[1.0, 2.0]).is_infinite());
        assert!(l2_distance(&[], &[]).is_infinite());
    }
}
