//! TOML configuration parsing and validation.
//!
//! Compliance Harness is configured through a single TOML file (default
//! `config/cmpl.toml`). [`load_config`] reads it, applies defaults and
//! rejects invalid combinations up front so the run coordinator never has
//! to re-check them.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/cmpl.sqlite"
//!
//! [chunking]
//! max_chars = 1200
//!
//! [retrieval]
//! strategy = "local"        # or "managed"
//! top_k = 6
//! index_name = "compliance-chile"
//!
//! [inference]
//! provider = "openai"
//! url = "https://api.openai.com/v1"
//! chat_model = "gpt-4o-mini"
//! synthesis_model = "gpt-4o-mini"
//! embedding_model = "text-embedding-3-small"
//!
//! [search]
//! url = "http://localhost:8787"
//!
//! [pipeline]
//! stage_timeout_secs = 120
//!
//! [server]
//! bind = "127.0.0.1:7341"
//!
//! [[documents]]
//! id = "ley-19913"
//! title = "Ley 19.913 (UAF; sujetos obligados y reportes)"
//! url = "https://example.org/Ley-19913.pdf"
//! topics = ["lavado de activos", "reportes", "uaf"]
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use compliance_harness_core::chunk::DEFAULT_MAX_CHARS;
use compliance_harness_core::models::DocumentMetadata;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub documents: Vec<DocumentMetadata>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    DEFAULT_MAX_CHARS
}

/// Which retrieval strategy backs the retrieval stage.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalStrategy {
    /// Chunk + embed documents locally, rank by cosine similarity.
    Local,
    /// Delegate to a managed search index, synced by fingerprint.
    Managed,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_strategy")]
    pub strategy: RetrievalStrategy,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_index_name")]
    pub index_name: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            top_k: default_top_k(),
            index_name: default_index_name(),
        }
    }
}

fn default_strategy() -> RetrievalStrategy {
    RetrievalStrategy::Local
}
fn default_top_k() -> usize {
    6
}
fn default_index_name() -> String {
    "compliance-chile".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct InferenceConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_inference_url")]
    pub url: String,
    /// Environment variable holding the bearer token.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_chat_model")]
    pub synthesis_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            url: default_inference_url(),
            api_key_env: default_api_key_env(),
            chat_model: default_chat_model(),
            synthesis_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl InferenceConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_inference_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Upper bound for a single stage; expiry fails the run.
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_timeout_secs: default_stage_timeout_secs(),
        }
    }
}

fn default_stage_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

/// Read, parse and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Validation rules shared by [`load_config`] and programmatic configs.
pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chars == 0 {
        bail!("chunking.max_chars must be > 0");
    }

    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }

    if config.retrieval.index_name.trim().is_empty() {
        bail!("retrieval.index_name must not be empty");
    }

    if config.pipeline.stage_timeout_secs == 0 {
        bail!("pipeline.stage_timeout_secs must be > 0");
    }

    if config.documents.is_empty() {
        bail!("at least one [[documents]] entry is required");
    }

    let mut seen = HashSet::new();
    for doc in &config.documents {
        if doc.id.trim().is_empty() {
            bail!("documents: id must not be empty");
        }
        if doc.url.trim().is_empty() {
            bail!("documents.{}: url must not be empty", doc.id);
        }
        if !seen.insert(doc.id.as_str()) {
            bail!("documents: duplicate id '{}'", doc.id);
        }
    }

    match config.inference.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown inference provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.retrieval.strategy == RetrievalStrategy::Managed && config.search.url.is_none() {
        bail!("search.url is required when retrieval.strategy = \"managed\"");
    }

    Ok(())
}
