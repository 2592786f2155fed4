//! Configuration for the askdoc pipeline
//!
//! Supports loading configuration from:
//! - Configuration files (config/default.toml, config/local.toml)
//! - Environment variables (prefixed with ASKDOC__)
//! - Default values
//!
//! Credentials are resolved once at load time into typed fields and
//! injected into collaborator constructors; a missing credential is a
//! configuration error at startup, not a runtime surprise.

use crate::errors::{PipelineError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Document chunking parameters
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Retrieval parameters
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Chat model configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Vector store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Index naming and prompt resources
    #[serde(default)]
    pub index: IndexConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkingConfig {
    /// Maximum chunk size in tokens
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Overlap between consecutive chunks in tokens
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Top-k fan-out per similarity search
    #[serde(default = "default_k")]
    pub k: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Model served by the embedding endpoint
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Base URL of the Ollama server
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Texts per embedding request
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,

    /// Bounded retry attempts inside the client
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// API key; falls back to GROQ_API_KEY at load time
    pub api_key: Option<String>,

    /// OpenAI-compatible API base URL
    #[serde(default = "default_llm_api_base")]
    pub api_base: String,

    /// Model name
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// API key; falls back to PINECONE_API_KEY at load time
    pub api_key: Option<String>,

    /// Control plane URL
    #[serde(default = "default_store_control_plane")]
    pub control_plane_url: String,

    /// Serverless cloud provider
    #[serde(default = "default_store_cloud")]
    pub cloud: String,

    /// Serverless region
    #[serde(default = "default_store_region")]
    pub region: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    /// Prefix for derived index identifiers
    #[serde(default = "default_index_prefix")]
    pub prefix: String,

    /// Override path for the step-back exemplar file; the bundled
    /// exemplars are used when unset
    pub examples_path: Option<String>,
}

// Default value functions
fn default_chunk_size() -> usize { 512 }
fn default_chunk_overlap() -> usize { 128 }
fn default_k() -> usize { 5 }
fn default_embedding_model() -> String { "mofanke/acge_text_embedding:latest".to_string() }
fn default_embedding_base_url() -> String { "http://localhost:11434".to_string() }
fn default_embedding_dimension() -> usize { 1024 }
fn default_embedding_batch_size() -> usize { 32 }
fn default_embedding_retries() -> u32 { 3 }
fn default_llm_api_base() -> String { "https://api.groq.com/openai/v1".to_string() }
fn default_llm_model() -> String { "llama3-8b-8192".to_string() }
fn default_temperature() -> f32 { 0.7 }
fn default_store_control_plane() -> String { "https://api.pinecone.io".to_string() }
fn default_store_cloud() -> String { "aws".to_string() }
fn default_store_region() -> String { "us-east-1".to_string() }
fn default_timeout() -> u64 { 30 }
fn default_index_prefix() -> String { "askdoc".to_string() }

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { k: default_k() }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            base_url: default_embedding_base_url(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_timeout(),
            batch_size: default_embedding_batch_size(),
            max_retries: default_embedding_retries(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_llm_api_base(),
            model: default_llm_model(),
            temperature: default_temperature(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            control_plane_url: default_store_control_plane(),
            cloud: default_store_cloud(),
            region: default_store_region(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            prefix: default_index_prefix(),
            examples_path: None,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            store: StoreConfig::default(),
            index: IndexConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment, resolve
    /// credentials, and validate.
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // e.g. ASKDOC__CHUNKING__CHUNK_SIZE=256
            .add_source(
                Environment::with_prefix("ASKDOC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| PipelineError::configuration(e.to_string()))?;

        let mut config: AppConfig = config
            .try_deserialize()
            .map_err(|e| PipelineError::configuration(e.to_string()))?;

        if config.llm.api_key.is_none() {
            config.llm.api_key = non_empty_env("GROQ_API_KEY");
        }
        if config.store.api_key.is_none() {
            config.store.api_key = non_empty_env("PINECONE_API_KEY");
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate parameter combinations and required credentials.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(PipelineError::configuration("chunk_size must be positive"));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(PipelineError::configuration(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }
        if self.retrieval.k == 0 {
            return Err(PipelineError::configuration("retrieval k must be at least 1"));
        }
        if self.embedding.dimension == 0 {
            return Err(PipelineError::configuration("embedding dimension must be positive"));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(PipelineError::configuration(format!(
                "temperature must be within [0, 2], got {}",
                self.llm.temperature
            )));
        }
        if self.llm.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(PipelineError::configuration("GROQ_API_KEY not set"));
        }
        if self.store.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(PipelineError::configuration("PINECONE_API_KEY not set"));
        }
        Ok(())
    }

    /// Embedding request timeout as Duration
    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_secs(self.embedding.timeout_secs)
    }

    /// LLM request timeout as Duration
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.timeout_secs)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_keys() -> AppConfig {
        let mut config = AppConfig::default();
        config.llm.api_key = Some("gsk-test".into());
        config.store.api_key = Some("pc-test".into());
        config
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.chunking.chunk_size, 512);
        assert_eq!(config.chunking.chunk_overlap, 128);
        assert_eq!(config.retrieval.k, 5);
        assert_eq!(config.llm.model, "llama3-8b-8192");
        assert_eq!(config.store.region, "us-east-1");
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(config_with_keys().validate().is_ok());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let mut config = config_with_keys();
        config.chunking.chunk_overlap = config.chunking.chunk_size;
        let err = config.validate().unwrap_err();
        assert_eq!(err.stage(), "configuration");
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn test_missing_credentials_fail_fast() {
        let mut config = config_with_keys();
        config.llm.api_key = None;
        assert!(config.validate().unwrap_err().to_string().contains("GROQ_API_KEY"));

        let mut config = config_with_keys();
        config.store.api_key = Some(String::new());
        assert!(config.validate().unwrap_err().to_string().contains("PINECONE_API_KEY"));
    }

    #[test]
    fn test_zero_k_rejected() {
        let mut config = config_with_keys();
        config.retrieval.k = 0;
        assert!(config.validate().is_err());
    }
}
