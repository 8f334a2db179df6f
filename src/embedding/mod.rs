//! Embedding provider implementations.
//!
//! Concrete backends for the [`EmbeddingProvider`] trait defined in
//! `context-store-core`:
//! - **[`OpenAIProvider`]**: calls an OpenAI-compatible `POST /embeddings`
//!   endpoint in fixed-size batches.
//! - **[`LocalProvider`]**: runs a fastembed model in-process; the model is
//!   loaded once when the provider is built.
//!
//! # Provider Selection
//!
//! Use [`create_provider`] to instantiate the backend named by
//! `embedding.provider`. Selection happens once, at startup; a provider
//! that cannot be built (missing API key, unknown model) fails there with
//! a configuration error instead of on the first insert.
//!
//! # Failure Handling
//!
//! Upstream failures (transport errors, non-2xx status, malformed JSON)
//! surface as [`StoreError::Provider`]. There are no retries and no
//! fallback to another backend.

#[cfg(feature = "local-embeddings-fastembed")]
mod local;

#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalProvider;

use std::time::Duration;

use context_store_core::embedding::EmbeddingProvider;
use context_store_core::{Result, StoreError};
use serde_json::Value;
use tracing::debug;

use crate::config::{EmbeddingConfig, ProviderKind};

// ============ OpenAI Provider ============

/// Embedding provider using an OpenAI-compatible API.
///
/// Sends `{"model", "input": [...]}` to `{api_base}/embeddings` with a
/// bearer token read from the environment variable named by
/// `embedding.api_key_env`. Inputs are split into batches of
/// `embedding.batch_size` texts, one request per batch.
pub struct OpenAIProvider {
    /// Model name (e.g. `"text-embedding-3-small"`).
    model: String,
    /// Vector dimensionality (e.g. `1536`).
    dims: usize,
    batch_size: usize,
    endpoint: String,
    api_key: String,
    client: reqwest::blocking::Client,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Configuration`] if `model` or `dims` is not
    /// set, or if the API key variable is missing from the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            StoreError::Configuration(format!(
                "{} environment variable not set",
                config.api_key_env
            ))
        })?;
        Self::with_api_key(config, api_key)
    }

    /// Create a provider with an explicit API key instead of reading the
    /// environment.
    pub fn with_api_key(config: &EmbeddingConfig, api_key: impl Into<String>) -> Result<Self> {
        let model = config
            .model
            .clone()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| {
                StoreError::Configuration("embedding.model required for OpenAI provider".to_string())
            })?;
        let dims = config.dims.filter(|d| *d > 0).ok_or_else(|| {
            StoreError::Configuration("embedding.dims required for OpenAI provider".to_string())
        })?;
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(StoreError::Configuration(
                "OpenAI API key is empty".to_string(),
            ));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StoreError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            model,
            dims,
            batch_size: config.batch_size.max(1),
            endpoint: format!("{}/embeddings", config.api_base.trim_end_matches('/')),
            api_key,
            client,
        })
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .map_err(|e| StoreError::Provider(format!("OpenAI request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().unwrap_or_default();
            return Err(StoreError::Provider(format!(
                "OpenAI API error {}: {}",
                status, body_text
            )));
        }

        let json: Value = response
            .json()
            .map_err(|e| StoreError::Provider(format!("Invalid OpenAI response: {}", e)))?;
        parse_openai_response(&json)
    }
}

impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for (i, batch) in texts.chunks(self.batch_size).enumerate() {
            debug!(batch = i, size = batch.len(), model = %self.model, "embedding batch");
            out.extend(self.embed_batch(batch)?);
        }
        Ok(out)
    }
}

/// Parse the OpenAI embeddings API response JSON.
///
/// Extracts the `data[].embedding` arrays. When every item carries an
/// `index`, results are re-ordered by it so they line up with the input.
fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| StoreError::Provider("Invalid OpenAI response: missing data array".to_string()))?;

    let mut embeddings: Vec<(Option<u64>, Vec<f32>)> = Vec::with_capacity(data.len());

    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                StoreError::Provider("Invalid OpenAI response: missing embedding".to_string())
            })?;

        let vec = embedding
            .iter()
            .map(|v| {
                v.as_f64().map(|f| f as f32).ok_or_else(|| {
                    StoreError::Provider("Invalid OpenAI response: non-numeric component".to_string())
                })
            })
            .collect::<Result<Vec<f32>>>()?;

        embeddings.push((item.get("index").and_then(Value::as_u64), vec));
    }

    if embeddings.iter().all(|(index, _)| index.is_some()) {
        embeddings.sort_by_key(|(index, _)| *index);
    }

    Ok(embeddings.into_iter().map(|(_, v)| v).collect())
}

/// Create the [`EmbeddingProvider`] selected by configuration.
///
/// # Supported Providers
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"local"` | `LocalProvider` (requires the `local-embeddings-fastembed` feature) |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider {
        ProviderKind::OpenAI => Ok(Box::new(OpenAIProvider::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        ProviderKind::Local => Ok(Box::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        ProviderKind::Local => Err(StoreError::Configuration(
            "Local embedding provider requires --features local-embeddings-fastembed".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn openai_config(api_base: String, batch_size: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: ProviderKind::OpenAI,
            model: Some("text-embedding-3-small".to_string()),
            dims: Some(2),
            batch_size,
            api_base,
            ..EmbeddingConfig::default()
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("text-{:02}", i)).collect()
    }

    fn response(n: usize) -> Value {
        let data: Vec<Value> = (0..n)
            .map(|i| json!({"object": "embedding", "index": i, "embedding": [i as f32, 1.0]}))
            .collect();
        json!({"object": "list", "data": data, "model": "text-embedding-3-small"})
    }

    #[test]
    fn test_batches_requests() {
        let server = MockServer::start();
        let first = server.mock(|when, then| {
            when.method(POST).path("/embeddings").body_includes("text-00");
            then.status(200).json_body_obj(&response(10));
        });
        let second = server.mock(|when, then| {
            when.method(POST).path("/embeddings").body_includes("text-10");
            then.status(200).json_body_obj(&response(10));
        });
        let third = server.mock(|when, then| {
            when.method(POST).path("/embeddings").body_includes("text-20");
            then.status(200).json_body_obj(&response(5));
        });

        let provider = OpenAIProvider::with_api_key(&openai_config(server.url(""), 10), "sk-test").unwrap();
        let vectors = provider.embed(&texts(25)).unwrap();

        assert_eq!(vectors.len(), 25);
        first.assert();
        second.assert();
        third.assert();
    }

    #[test]
    fn test_sends_bearer_token_and_model() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/embeddings")
                .header("Authorization", "Bearer sk-test")
                .body_includes("text-embedding-3-small");
            then.status(200).json_body_obj(&response(1));
        });

        let provider = OpenAIProvider::with_api_key(&openai_config(server.url(""), 10), "sk-test").unwrap();
        provider.embed(&texts(1)).unwrap();
        mock.assert();
    }

    #[test]
    fn test_upstream_error_is_provider_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(500).body("boom");
        });

        let provider = OpenAIProvider::with_api_key(&openai_config(server.url(""), 10), "sk-test").unwrap();
        let err = provider.embed(&texts(3)).unwrap_err();
        assert!(matches!(err, StoreError::Provider(ref m) if m.contains("500")));
    }

    #[test]
    fn test_malformed_body_is_provider_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(200).json_body_obj(&json!({"unexpected": true}));
        });

        let provider = OpenAIProvider::with_api_key(&openai_config(server.url(""), 10), "sk-test").unwrap();
        assert!(matches!(
            provider.embed(&texts(1)),
            Err(StoreError::Provider(_))
        ));
    }

    #[test]
    fn test_parse_reorders_by_index() {
        let json = json!({"data": [
            {"index": 1, "embedding": [2.0, 2.0]},
            {"index": 0, "embedding": [1.0, 1.0]}
        ]});
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 1.0], vec![2.0, 2.0]]);
    }

    #[test]
    fn test_parse_rejects_non_numeric() {
        let json = json!({"data": [{"embedding": [1.0, "x"]}]});
        assert!(parse_openai_response(&json).is_err());
    }

    #[test]
    fn test_missing_model_is_configuration_error() {
        let mut config = openai_config("http://localhost".to_string(), 10);
        config.model = None;
        assert!(matches!(
            OpenAIProvider::with_api_key(&config, "sk-test"),
            Err(StoreError::Configuration(_))
        ));
    }

    #[test]
    fn test_missing_api_key_is_configuration_error() {
        let mut config = openai_config("http://localhost".to_string(), 10);
        config.api_key_env = "CTXS_TEST_KEY_THAT_IS_NEVER_SET".to_string();
        assert!(matches!(
            create_provider(&config),
            Err(StoreError::Configuration(_))
        ));
    }
}
