//! In-process embeddings via fastembed.
//!
//! Models are downloaded from Hugging Face on first use and cached; after
//! that no network calls are made.

use std::sync::{Mutex, PoisonError};

use context_store_core::embedding::EmbeddingProvider;
use context_store_core::{Result, StoreError};
use tracing::info;

use crate::config::EmbeddingConfig;

const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";

/// Embedding provider backed by a fastembed `TextEmbedding`.
///
/// The model is loaded once in [`LocalProvider::new`]. `TextEmbedding::embed`
/// takes `&mut self`, so the model sits behind a `Mutex`.
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Mutex<fastembed::TextEmbedding>,
}

impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model_name, dims) = resolve_local_model(config)?;
        let fastembed_model = config_to_fastembed_model(&model_name)?;

        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed_model).with_show_download_progress(false),
        )
        .map_err(|e| {
            StoreError::Configuration(format!(
                "Failed to initialize local embedding model '{}': {}",
                model_name, e
            ))
        })?;
        info!(model = %model_name, dims, "local embedding model loaded");

        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size.max(1),
            model: Mutex::new(model),
        })
    }
}

impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut model = self.model.lock().unwrap_or_else(PoisonError::into_inner);
        model
            .embed(texts.to_vec(), Some(self.batch_size))
            .map_err(|e| StoreError::Provider(format!("Local embedding failed: {}", e)))
    }
}

/// Model name and dimensionality for the local backend. fastembed always
/// returns a model's native size, so an explicit `embedding.dims` must
/// match it.
fn resolve_local_model(config: &EmbeddingConfig) -> Result<(String, usize)> {
    let model_name = config
        .model
        .clone()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());

    let known = match model_name.as_str() {
        "all-minilm-l6-v2" => 384,
        "bge-small-en-v1.5" => 384,
        "bge-base-en-v1.5" => 768,
        "bge-large-en-v1.5" => 1024,
        "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
        "multilingual-e5-small" => 384,
        "multilingual-e5-base" => 768,
        "multilingual-e5-large" => 1024,
        other => return Err(unknown_model(other)),
    };

    match config.dims {
        Some(dims) if dims != known => Err(StoreError::Configuration(format!(
            "embedding.dims = {} does not match '{}', which produces {}-dim vectors",
            dims, model_name, known
        ))),
        _ => Ok((model_name, known)),
    }
}

fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => Err(unknown_model(other)),
    }
}

fn unknown_model(name: &str) -> StoreError {
    StoreError::Configuration(format!(
        "Unknown local embedding model: '{}'. Supported models: \
         all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
         nomic-embed-text-v1, nomic-embed-text-v1.5, \
         multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
        name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_model_and_dims() {
        let (name, dims) = resolve_local_model(&EmbeddingConfig::default()).unwrap();
        assert_eq!(name, "all-minilm-l6-v2");
        assert_eq!(dims, 384);
    }

    #[test]
    fn test_mismatched_dims_rejected() {
        let config = EmbeddingConfig {
            model: Some("bge-base-en-v1.5".to_string()),
            dims: Some(512),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(
            resolve_local_model(&config),
            Err(StoreError::Configuration(_))
        ));

        let matching = EmbeddingConfig {
            dims: Some(768),
            ..config
        };
        assert_eq!(resolve_local_model(&matching).unwrap().1, 768);
    }

    #[test]
    fn test_unknown_model_is_configuration_error() {
        let config = EmbeddingConfig {
            model: Some("word2vec".to_string()),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(
            resolve_local_model(&config),
            Err(StoreError::Configuration(_))
        ));
        assert!(config_to_fastembed_model("word2vec").is_err());
    }
}
