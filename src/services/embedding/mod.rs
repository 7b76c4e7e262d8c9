use crate::algorithms::{normalized, VectorDimension};
use crate::config::EmbeddingConfig;
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// Text to fixed-length vector. The model behind it is a black box.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn dimension(&self) -> VectorDimension;

    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>>;
}

/// Embeds `text` and returns a unit vector of the configured dimension.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> EngineResult<Vec<f32>> {
    let vector = provider.embed(text).await?;
    provider.dimension().check(&vector)?;
    normalized(&vector).ok_or_else(|| EngineError::Embedding("provider returned a zero vector".into()))
}

/// Startup probe: a provider whose output size disagrees with the
/// deployment's dimension is a configuration error, not a per-request one.
pub async fn verify_dimension(provider: &dyn EmbeddingProvider, expected: VectorDimension) -> EngineResult<()> {
    let probe = provider.embed("dimension probe").await?;
    if probe.len() != expected.get() || provider.dimension() != expected {
        return Err(EngineError::DimensionMismatch {
            expected: expected.get(),
            actual: probe.len(),
        });
    }
    info!("Embedding provider verified at dimension {}", expected.get());
    Ok(())
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimension: VectorDimension,
}

impl HttpEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig, dimension: VectorDimension) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| EngineError::Embedding(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            dimension,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let mut request = self.client.post(&self.endpoint).json(&EmbeddingRequest {
            model: &self.model,
            input: text,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::Timeout(format!("embedding request: {e}"))
                } else {
                    EngineError::Embedding(e.to_string())
                }
            })?
            .error_for_status()
            .map_err(|e| EngineError::Embedding(e.to_string()))?;

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Embedding(format!("malformed embedding response: {e}")))?;

        body.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EngineError::Embedding("embedding response had no data".into()))
    }
}
