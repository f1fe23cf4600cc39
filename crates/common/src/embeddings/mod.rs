//! Embedding service abstraction
//!
//! Provides a unified interface for query embedding:
//! - OpenAI (text-embedding-3-small, text-embedding-3-large, ada-002)
//! - Deterministic mock for development without an API key

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, CollaboratorError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, CollaboratorError>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// OpenAI embedding client
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    input: &'a str,
    model: &'a str,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    data: Vec<OpenAIEmbedding>,
}

#[derive(Deserialize)]
struct OpenAIEmbedding {
    embedding: Vec<f32>,
}

impl OpenAIEmbedder {
    /// Create a new OpenAI embedder
    pub fn new(
        api_key: String,
        model: String,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let dimension = match model.as_str() {
            "text-embedding-ada-002" => 1536,
            "text-embedding-3-small" => 1536,
            "text-embedding-3-large" => 3072,
            _ => 768,
        };

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model,
            dimension,
            base_url: base_url
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    // Retries belong to the caller's policy, so a failure here is reported once
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, CollaboratorError> {
        let url = format!("{}/embeddings", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&OpenAIRequest {
                input: text,
                model: &self.model,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    CollaboratorError::transient(format!("Embedding request failed: {}", e))
                } else {
                    CollaboratorError::permanent(format!("Embedding request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("Embedding API error {}: {}", status, body);
            return Err(
                if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                    CollaboratorError::transient(message)
                } else {
                    CollaboratorError::permanent(message)
                },
            );
        }

        let result: OpenAIResponse = response.json().await.map_err(|e| {
            CollaboratorError::malformed(format!("Failed to parse embedding response: {}", e))
        })?;

        result
            .data
            .into_iter()
            .next()
            .map(|e| e.embedding)
            .ok_or_else(|| CollaboratorError::malformed("Empty embedding response"))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic embedder: the same text always maps to the same unit vector
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut values = Vec::with_capacity(self.dimension);
        let mut block = 0u32;

        while values.len() < self.dimension {
            let digest = Sha256::new()
                .chain_update(text.as_bytes())
                .chain_update(block.to_le_bytes())
                .finalize();
            values.extend(
                digest
                    .iter()
                    .take(self.dimension - values.len())
                    .map(|b| (*b as f32 / 127.5) - 1.0),
            );
            block += 1;
        }

        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            values.iter_mut().for_each(|v| *v /= norm);
        }
        values
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, CollaboratorError> {
        Ok(self.vector_for(text))
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => {
            let key = config
                .api_key
                .clone()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| AppError::Configuration {
                    message: "embedding.api_key is required for the openai provider".to_string(),
                })?;
            Ok(Arc::new(OpenAIEmbedder::new(
                key,
                config.model.clone(),
                config.api_base.clone(),
                Duration::from_secs(config.timeout_secs),
            )?))
        }
        "mock" => Ok(Arc::new(MockEmbedder::new(config.dimension))),
        other => {
            tracing::warn!(provider = other, "Unknown embedding provider, using mock");
            Ok(Arc::new(MockEmbedder::new(config.dimension)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_embedder_is_deterministic() {
        let embedder = MockEmbedder::new(100);
        let a = embedder.embed("raft leader election").await.unwrap();
        let b = embedder.embed("raft leader election").await.unwrap();
        let c = embedder.embed("paxos").await.unwrap();

        assert_eq!(a.len(), 100);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_openai_requires_key() {
        let config = EmbeddingConfig {
            provider: "openai".to_string(),
            api_key: None,
            ..EmbeddingConfig::default()
        };
        assert!(matches!(
            create_embedder(&config),
            Err(AppError::Configuration { .. })
        ));
    }

    #[test]
    fn test_mock_provider_uses_configured_dimension() {
        let config = EmbeddingConfig {
            provider: "mock".to_string(),
            dimension: 384,
            ..EmbeddingConfig::default()
        };
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.dimension(), 384);
        assert_eq!(embedder.model_name(), "mock-embedding");
    }
}
