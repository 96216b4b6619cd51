//! Embedding collaborator for the dense similarity strategy
//!
//! The shipped implementation talks to an OpenAI-compatible `/embeddings`
//! endpoint (OpenRouter works with the same key as the chat API) and caches
//! recent results in an LRU.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::EmbeddingsConfig;

/// Maps text to a fixed-length vector. External collaborator; absence means
/// the lexical strategy is used instead.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Expected output dimension
    fn dimension(&self) -> usize;
}

/// OpenAI-compatible embedding client with an LRU result cache
pub struct HttpEmbedder {
    config: EmbeddingsConfig,
    api_key: String,
    client: Client,
    cache: Arc<RwLock<lru::LruCache<String, Vec<f32>>>>,
}

impl HttpEmbedder {
    pub fn new(config: EmbeddingsConfig, api_key: String) -> Result<Self> {
        info!("Initializing embedding client: {}", config.model);

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        let cache = Arc::new(RwLock::new(lru::LruCache::new(
            std::num::NonZeroUsize::new(1000).unwrap(),
        )));

        Ok(Self {
            config,
            api_key,
            client,
            cache,
        })
    }

    async fn embed_via_api(&self, text: &str) -> Result<Vec<f32>> {
        let text = self.truncate_text(text);

        let request = EmbeddingRequest {
            model: self.config.model.clone(),
            input: vec![text.to_string()],
        };

        let url = format!("{}/embeddings", self.config.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .context("Failed to send embedding request")?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!("Embedding API error: {}", error_text);
            anyhow::bail!("Embedding API error: {error_text}");
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;

        let embedding = result
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .context("No embedding in response")?;

        Ok(embedding)
    }

    /// Truncate text to the model's rough input bound (4 chars per token)
    fn truncate_text<'a>(&self, text: &'a str) -> &'a str {
        let max_chars = self.config.max_length * 4;
        if text.len() > max_chars {
            let mut end = max_chars;
            while end > 0 && !text.is_char_boundary(end) {
                end -= 1;
            }
            &text[..end]
        } else {
            text
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        {
            let mut cache = self.cache.write().await;
            if let Some(cached) = cache.get(text) {
                return Ok(cached.clone());
            }
        }

        let embedding = self.embed_via_api(text).await?;

        {
            let mut cache = self.cache.write().await;
            cache.put(text.to_string(), embedding.clone());
        }

        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Calculate cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}
