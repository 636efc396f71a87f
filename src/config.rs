//! TOML configuration.
//!
//! Every section is optional. Secrets (API keys, the object-store root) are
//! never read from this file; they come from the environment, see
//! [`Secrets`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/docs.sqlite"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Row cap applied to both the vector and the lexical query.
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_chunks: default_max_chunks(),
        }
    }
}

fn default_max_chunks() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `openai`, `ollama`, or `disabled`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Base URL override. Defaults to the provider's public endpoint.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            url: None,
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_batch_size() -> usize {
    100
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_openai_chat_model")]
    pub openai_model: String,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_groq_chat_model")]
    pub groq_model: String,
    #[serde(default = "default_groq_base_url")]
    pub groq_base_url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            openai_model: default_openai_chat_model(),
            openai_base_url: default_openai_base_url(),
            groq_model: default_groq_chat_model(),
            groq_base_url: default_groq_base_url(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            max_history_turns: default_max_history_turns(),
        }
    }
}

fn default_openai_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_groq_chat_model() -> String {
    "meta-llama/llama-4-scout-17b-16e-instruct".to_string()
}
fn default_groq_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_history_turns() -> usize {
    6
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Public object-store root, e.g. `https://project.supabase.co`.
    /// Falls back to `SUPABASE_URL` when unset.
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default = "default_public_prefix")]
    pub public_prefix: String,
    /// Serve every object from this bucket regardless of the row's bucket.
    #[serde(default)]
    pub bucket_override: Option<String>,
    /// Prefix for local links when no object store is configured.
    #[serde(default)]
    pub local_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            public_url: None,
            public_prefix: default_public_prefix(),
            bucket_override: None,
            local_prefix: String::new(),
        }
    }
}

fn default_public_prefix() -> String {
    "storage/v1/object/public".to_string()
}

/// Credentials read from the process environment.
///
/// Kept apart from [`Config`] so tests can build a service with explicit
/// keys and no environment access.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub openai_api_key: Option<String>,
    pub groq_api_key: Option<String>,
    pub supabase_url: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        Self {
            openai_api_key: non_empty_env("OPENAI_API_KEY"),
            groq_api_key: non_empty_env("GROQ_API_KEY"),
            supabase_url: non_empty_env("SUPABASE_URL"),
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Load and validate the config file. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.retrieval.max_chunks < 1 {
        anyhow::bail!("retrieval.max_chunks must be >= 1");
    }

    if config.embedding.batch_size < 1 {
        anyhow::bail!("embedding.batch_size must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    if !(0.0..=2.0).contains(&config.generation.temperature) {
        anyhow::bail!("generation.temperature must be in [0.0, 2.0]");
    }

    Ok(())
}
