
use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::Embedder;
use crate::config::Config;
use crate::http::AzureHttpClient;
use crate::{RagError, Result};

const SERVICE: &str = "embedding service";

/// Azure OpenAI embeddings deployment
#[derive(Debug, Clone)]
pub struct AzureOpenAiEmbedder {
    http: AzureHttpClient,
    deployment: String,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl AzureOpenAiEmbedder {
    #[inline]
    pub fn new(config: &Config, api_key: SecretString) -> Result<Self> {
        let http = AzureHttpClient::new(&config.openai, api_key, SERVICE)?;

        Ok(Self {
            http,
            deployment: config.openai.embedding_deployment.clone(),
            dimension: config.store.vector_dimension as usize,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http = self.http.with_timeout(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.http = self.http.with_retry_attempts(attempts);
        self
    }

    #[inline]
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.http = self.http.with_backoff_unit(unit);
        self
    }

    /// Generate the embedding for a single text input
    #[inline]
    pub fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for text (length: {})", text.len());

        let url = self.http.deployment_url(&self.deployment, "embeddings")?;
        let request_json = serde_json::to_string(&EmbedRequest { input: text })
            .map_err(|e| RagError::Other(e.into()))?;

        let response_text = self.http.post_json(&url, &request_json)?;

        let response: EmbedResponse =
            serde_json::from_str(&response_text).map_err(|e| RagError::Service {
                service: SERVICE,
                message: format!("Failed to parse embedding response: {}", e),
            })?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .ok_or_else(|| RagError::Service {
                service: SERVICE,
                message: "Embedding response contained no data".to_string(),
            })?;

        if embedding.len() != self.dimension {
            return Err(RagError::Service {
                service: SERVICE,
                message: format!(
                    "Expected {} dimensions, deployment returned {}",
                    self.dimension,
                    embedding.len()
                ),
            });
        }

        debug!("Generated embedding with {} dimensions", embedding.len());
        Ok(embedding)
    }
}

#[async_trait]
impl Embedder for AzureOpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embedder = self.clone();
        let text = text.to_string();

        tokio::task::spawn_blocking(move || embedder.generate_embedding(&text))
            .await
            .map_err(|e| RagError::Other(e.into()))?
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
