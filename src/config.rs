//! TOML configuration parsing and validation.
//!
//! Every section carries serde defaults, so an empty file (or no file at
//! all, see [`Config::minimal`]) yields the stock setup: `llama3:instruct`
//! for chat and `llama2:13b` for embeddings, both served by a local Ollama
//! at `http://localhost:11434`, with a SQLite vector store in a fresh
//! temporary directory.
//!
//! ```toml
//! [llm]
//! model = "llama3:instruct"
//! max_tokens = 250
//! temperature = 0.5
//! stream = true
//!
//! [embedder]
//! model = "llama2:13b"
//!
//! [server]
//! bind = "127.0.0.1:8501"
//! session_idle_secs = 3600
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub vectordb: VectorDbConfig,
    #[serde(default)]
    pub embedder: EmbedderConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_ollama")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_stream")]
    pub stream: bool,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Optional system prompt prepended to every chat request.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Request timeout. Unset means the request waits for as long as the
    /// model takes.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_ollama(),
            model: default_llm_model(),
            max_tokens: default_llm_max_tokens(),
            temperature: default_temperature(),
            stream: default_stream(),
            base_url: default_base_url(),
            system_prompt: None,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorDbConfig {
    #[serde(default = "default_vectordb_provider")]
    pub provider: String,
    /// Parent directory for the per-process temporary store. Defaults to
    /// the system temp dir.
    #[serde(default)]
    pub temp_root: Option<PathBuf>,
}

impl Default for VectorDbConfig {
    fn default() -> Self {
        Self {
            provider: default_vectordb_provider(),
            temp_root: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbedderConfig {
    #[serde(default = "default_ollama")]
    pub provider: String,
    #[serde(default = "default_embedder_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            provider: default_ollama(),
            model: default_embedder_model(),
            base_url: default_base_url(),
            batch_size: default_batch_size(),
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_clone_base")]
    pub clone_base: String,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            clone_base: default_clone_base(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_chunk_tokens(),
            overlap_tokens: default_overlap(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_number_documents")]
    pub number_documents: usize,
    /// How many transcript messages are replayed into the prompt.
    #[serde(default = "default_history_messages")]
    pub history_messages: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            number_documents: default_number_documents(),
            history_messages: default_history_messages(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Sessions idle for longer than this are discarded.
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            session_idle_secs: default_session_idle_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecretsConfig {
    #[serde(default = "default_secrets_path")]
    pub path: PathBuf,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            path: default_secrets_path(),
        }
    }
}

fn default_ollama() -> String {
    "ollama".to_string()
}
fn default_llm_model() -> String {
    "llama3:instruct".to_string()
}
fn default_llm_max_tokens() -> u32 {
    250
}
fn default_temperature() -> f32 {
    0.5
}
fn default_stream() -> bool {
    true
}
fn default_base_url() -> String {
    DEFAULT_OLLAMA_URL.to_string()
}
fn default_vectordb_provider() -> String {
    "sqlite".to_string()
}
fn default_embedder_model() -> String {
    "llama2:13b".to_string()
}
fn default_batch_size() -> usize {
    16
}
fn default_api_base() -> String {
    "https://api.github.com".to_string()
}
fn default_clone_base() -> String {
    "https://github.com".to_string()
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}
fn default_max_file_bytes() -> u64 {
    512 * 1024
}
fn default_chunk_tokens() -> usize {
    500
}
fn default_overlap() -> usize {
    50
}
fn default_number_documents() -> usize {
    3
}
fn default_history_messages() -> usize {
    6
}
fn default_bind() -> String {
    "127.0.0.1:8501".to_string()
}
fn default_session_idle_secs() -> u64 {
    60 * 60
}
fn default_secrets_path() -> PathBuf {
    PathBuf::from(".secrets.toml")
}

impl Config {
    /// Built-in defaults, used when no config file exists at the default path.
    pub fn minimal() -> Self {
        Self::default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Loads `path` if it exists. A missing file is only tolerated when the
/// caller passes `allow_missing` (the default path case).
pub fn load_or_default(path: &Path, allow_missing: bool) -> Result<Config> {
    if allow_missing && !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(Config::minimal());
    }
    load_config(path)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.llm.provider != "ollama" {
        anyhow::bail!(
            "Unknown llm provider: '{}'. Must be ollama.",
            config.llm.provider
        );
    }
    if config.llm.max_tokens == 0 {
        anyhow::bail!("llm.max_tokens must be > 0");
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }

    if config.embedder.provider != "ollama" {
        anyhow::bail!(
            "Unknown embedder provider: '{}'. Must be ollama.",
            config.embedder.provider
        );
    }
    if config.embedder.batch_size == 0 {
        anyhow::bail!("embedder.batch_size must be >= 1");
    }

    if config.vectordb.provider != "sqlite" {
        anyhow::bail!(
            "Unknown vectordb provider: '{}'. Must be sqlite.",
            config.vectordb.provider
        );
    }

    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        anyhow::bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }

    if config.retrieval.number_documents < 1 {
        anyhow::bail!("retrieval.number_documents must be >= 1");
    }

    if config.server.session_idle_secs == 0 {
        anyhow::bail!("server.session_idle_secs must be > 0");
    }

    Ok(())
}
