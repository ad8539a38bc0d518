//! In-process embeddings via fastembed.
//!
//! Models are downloaded from Hugging Face on first use and cached; after
//! that no network access is needed. The loaded model is kept for the
//! lifetime of the provider.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::{dims_for, model_for, EmbedError, EmbeddingProvider, ProviderKind};
use crate::config::EmbeddingConfig;

pub struct LocalProvider {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
}

impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let model_name = model_for(ProviderKind::Local, config)?;
        fastembed_model(&model_name)?;
        let dims = dims_for(&model_name, config)?;
        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model: Arc::new(Mutex::new(None)),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let which = fastembed_model(&self.model_name)?;
        let slot = self.model.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| EmbedError::Unavailable("local model lock poisoned".into()))?;
            if guard.is_none() {
                let model = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(which).with_show_download_progress(true),
                )
                .map_err(|e| {
                    EmbedError::Unavailable(format!("failed to load local embedding model: {}", e))
                })?;
                *guard = Some(model);
            }
            match guard.as_mut() {
                Some(model) => model
                    .embed(texts, Some(batch_size))
                    .map_err(|e| EmbedError::Rejected(format!("local embedding failed: {}", e))),
                None => Err(EmbedError::Unavailable("local model not loaded".into())),
            }
        })
        .await
        .map_err(|e| EmbedError::Unavailable(format!("embedding task failed: {}", e)))?
    }
}

fn fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel, EmbedError> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        other => Err(EmbedError::Config(format!(
            "unknown local embedding model '{}'. Supported: all-minilm-l6-v2, \
             bge-small-en-v1.5, bge-base-en-v1.5, nomic-embed-text-v1.5",
            other
        ))),
    }
}
