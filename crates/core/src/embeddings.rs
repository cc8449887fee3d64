use crate::error::RetrievalError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 256;
pub const DEFAULT_EMBEDDING_API_URL: &str = "http://localhost:11434/v1";
pub const DEFAULT_EMBEDDING_MODEL: &str = "all-minilm";
pub const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 32;
pub const DEFAULT_EMBEDDING_TIMEOUT: Duration = Duration::from_secs(60);

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        self.embed_batch(&[text])
            .await?
            .pop()
            .ok_or_else(|| RetrievalError::Request("embedder returned no vector".to_string()))
    }
}

#[async_trait]
impl<E: Embedder + ?Sized> Embedder for Box<E> {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        (**self).embed_batch(texts).await
    }
}

/// Hashed character trigrams, L2-normalised. Works offline.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        let mut encoded = [0u8; 4];
        for window in chars.windows(3) {
            let mut hash = 1469598103934665603u64;
            for ch in window {
                for byte in ch.encode_utf8(&mut encoded).bytes() {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(1099511628211);
                }
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        Ok(texts.iter().map(|text| self.vector(text)).collect())
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    pub base_url: String,
    pub model: String,
    pub auth_token: Option<String>,
    pub timeout: Duration,
    pub batch_size: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_EMBEDDING_API_URL.to_string(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            auth_token: None,
            timeout: DEFAULT_EMBEDDING_TIMEOUT,
            batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
        }
    }
}

pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    auth_token: Option<String>,
    batch_size: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(settings: &EmbeddingSettings) -> Result<Self, RetrievalError> {
        if settings.model.trim().is_empty() {
            return Err(RetrievalError::Request("embedding model is empty".to_string()));
        }
        let endpoint = format!("{}/embeddings", settings.base_url.trim_end_matches('/'));
        url::Url::parse(&endpoint)?;

        let client = Client::builder().timeout(settings.timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            model: settings.model.clone(),
            auth_token: settings.auth_token.clone(),
            batch_size: settings.batch_size.max(1),
        })
    }

    async fn request_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let mut request = self.client.post(&self.endpoint).json(&EmbeddingRequest {
            model: &self.model,
            input: inputs,
        });
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(RetrievalError::Embedding {
                status: status.as_u16(),
                body,
            });
        }

        let mut parsed: EmbeddingResponse = serde_json::from_str(&body)?;
        if parsed.data.len() != inputs.len() {
            return Err(RetrievalError::Request(format!(
                "embedding endpoint returned {} vectors for {} inputs",
                parsed.data.len(),
                inputs.len()
            )));
        }
        parsed.data.sort_by_key(|entry| entry.index);
        Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!(inputs = batch.len(), model = %self.model, "requesting embeddings");
            vectors.extend(self.request_batch(batch).await?);
        }
        Ok(vectors)
    }
}
