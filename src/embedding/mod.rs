//! Embedding providers and the question embedding client.
//!
//! - [`EmbeddingProvider`] is the boundary to a remote embedding service.
//!   [`OpenAIProvider`] calls `POST /embeddings` on an OpenAI-compatible API,
//!   [`OllamaProvider`] calls a local Ollama instance's `/api/embed`.
//! - [`EmbeddingClient`] wraps an optional provider for the question path.
//!   It never fails: a missing credential or a remote error both become
//!   `None`, and retrieval falls back to lexical search.
//!
//! Also provides the vector helpers used by the SQLite store:
//! [`vec_to_blob`], [`blob_to_vec`], [`cosine_similarity`], [`cosine_distance`].
//!
//! Calls are single-attempt. There is no retry loop here; a failed question
//! embedding degrades to lexical search, and a failed backfill batch aborts
//! the job.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{EmbeddingConfig, Secrets};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// A remote service that turns texts into fixed-length vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier sent with every request.
    fn model_name(&self) -> &str;

    /// Embed a batch of texts. Returns one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Build the provider named in `[embedding].provider`.
///
/// Returns `Ok(None)` when embeddings are disabled or the provider's
/// credential is absent; that is a degraded configuration, not an error.
pub fn create_provider(
    config: &EmbeddingConfig,
    secrets: &Secrets,
) -> Result<Option<Arc<dyn EmbeddingProvider>>> {
    if !config.is_enabled() {
        return Ok(None);
    }

    match config.provider.as_str() {
        "openai" => match &secrets.openai_api_key {
            Some(key) => Ok(Some(Arc::new(OpenAIProvider::new(config, key.clone())?))),
            None => {
                debug!("OPENAI_API_KEY not set, question embeddings unavailable");
                Ok(None)
            }
        },
        "ollama" => Ok(Some(Arc::new(OllamaProvider::new(config)?))),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Question embedding client ============

/// Embeds questions for vector search, tolerating an absent provider.
#[derive(Clone, Default)]
pub struct EmbeddingClient {
    provider: Option<Arc<dyn EmbeddingProvider>>,
}

impl EmbeddingClient {
    pub fn new(provider: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        Self { provider }
    }

    pub fn unavailable() -> Self {
        Self { provider: None }
    }

    pub fn is_available(&self) -> bool {
        self.provider.is_some()
    }

    /// Embed one question.
    ///
    /// `None` means "no vector available": no provider, a remote failure, or
    /// an empty response. Failures are logged and swallowed.
    pub async fn embed_question(&self, question: &str) -> Option<Vec<f32>> {
        let provider = self.provider.as_ref()?;

        match provider.embed(&[question.to_string()]).await {
            Ok(vectors) => match vectors.into_iter().next() {
                Some(vec) if !vec.is_empty() => {
                    debug!(dims = vec.len(), model = provider.model_name(), "question embedded");
                    Some(vec)
                }
                _ => {
                    warn!(model = provider.model_name(), "embedding response was empty");
                    None
                }
            },
            Err(e) => {
                warn!(model = provider.model_name(), error = %e, "question embedding failed");
                None
            }
        }
    }
}

// ============ OpenAI Provider ============

/// Embedding provider for the OpenAI embeddings API.
pub struct OpenAIProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| OPENAI_BASE_URL.to_string());

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("OpenAI embeddings request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        let vectors = parse_openai_response(&json)?;
        if vectors.len() != texts.len() {
            bail!(
                "OpenAI returned {} embeddings for {} inputs",
                vectors.len(),
                texts.len()
            );
        }
        Ok(vectors)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());

    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;

        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, vec)| vec).collect())
}

// ============ Ollama Provider ============

/// Embedding provider for a local Ollama instance.
///
/// Requires Ollama to be running with the configured model pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OLLAMA_BASE_URL.to_string());

        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Ollama connection error (is Ollama running at {}?)", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|item| {
            item.as_array()
                .map(|values| {
                    values
                        .iter()
                        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                        .collect()
                })
                .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))
        })
        .collect()
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Cosine distance, `1 - similarity`. Ascending is better.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    1.0 - cosine_similarity(a, b) as f64
}
