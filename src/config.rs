//! TOML configuration.
//!
//! Every section is optional and falls back to the defaults below, so an
//! empty file (or no file at all, see [`Config::default`]) gives a working
//! local setup: fastembed embeddings, Ollama at `localhost:11434`, and the
//! telemetry log in the working directory.
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:9000"
//! cors_origins = ["http://localhost:8080"]
//!
//! [chunking]
//! chunk_size = 500
//! overlap = 50
//!
//! [llm]
//! url = "http://localhost:11434"
//! model = "llama3.1:8b"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Origins allowed to call the API with credentials. Empty means any
    /// origin, without credentials.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:9000".to_string()
}
fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:8080".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// Below this many characters (after trimming) the text layer is
    /// considered missing and OCR is attempted.
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
    #[serde(default = "default_true")]
    pub ocr_enabled: bool,
    #[serde(default = "default_pdftoppm")]
    pub pdftoppm_bin: String,
    #[serde(default = "default_tesseract")]
    pub tesseract_bin: String,
    #[serde(default = "default_ocr_dpi")]
    pub ocr_dpi: u32,
    #[serde(default = "default_ocr_language")]
    pub ocr_language: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_text_chars: default_min_text_chars(),
            ocr_enabled: true,
            pdftoppm_bin: default_pdftoppm(),
            tesseract_bin: default_tesseract(),
            ocr_dpi: default_ocr_dpi(),
            ocr_language: default_ocr_language(),
        }
    }
}

fn default_min_text_chars() -> usize {
    50
}
fn default_true() -> bool {
    true
}
fn default_pdftoppm() -> String {
    "pdftoppm".to_string()
}
fn default_tesseract() -> String {
    "tesseract".to_string()
}
fn default_ocr_dpi() -> u32 {
    200
}
fn default_ocr_language() -> String {
    "eng".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Window length in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared by consecutive windows.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Chunks retrieved per chat query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Chunks sampled as context for flashcards and quizzes.
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            sample_size: default_sample_size(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_sample_size() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `local` (fastembed) or `ollama`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            timeout_secs: default_embed_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embed_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_url")]
    pub url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Transport timeout for a single model call.
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: default_llm_url(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout_secs(),
            temperature: None,
        }
    }
}

fn default_llm_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_llm_model() -> String {
    "llama3.1:8b".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ValidationConfig {
    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,
    /// Extra case-insensitive regex patterns, checked after the built-in
    /// prompt-injection phrases.
    #[serde(default)]
    pub extra_patterns: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_query_chars: default_max_query_chars(),
            extra_patterns: Vec::new(),
        }
    }
}

fn default_max_query_chars() -> usize {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Question/answer pairs kept per session.
    #[serde(default = "default_max_exchanges")]
    pub max_exchanges: usize,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_exchanges: default_max_exchanges(),
            idle_timeout_secs: default_idle_timeout_secs(),
            cookie_name: default_cookie_name(),
        }
    }
}

fn default_max_exchanges() -> usize {
    3
}
fn default_idle_timeout_secs() -> u64 {
    60 * 60 * 24
}
fn default_cookie_name() -> String {
    "study_session".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_telemetry_path")]
    pub path: PathBuf,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_telemetry_path(),
        }
    }
}

fn default_telemetry_path() -> PathBuf {
    PathBuf::from("telemetry_logs.jsonl")
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_max_upload_bytes")]
    pub max_bytes: usize,
    /// Where uploads are staged before ingestion. Defaults to the system
    /// temp directory.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_upload_bytes(),
            temp_dir: None,
        }
    }
}

fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        anyhow::bail!(
            "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.overlap,
            config.chunking.chunk_size
        );
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.sample_size == 0 {
        anyhow::bail!("retrieval.sample_size must be >= 1");
    }

    if config.validation.max_query_chars == 0 {
        anyhow::bail!("validation.max_query_chars must be > 0");
    }
    for pattern in &config.validation.extra_patterns {
        regex::Regex::new(pattern)
            .with_context(|| format!("validation.extra_patterns: invalid regex '{}'", pattern))?;
    }

    if config.session.max_exchanges == 0 {
        anyhow::bail!("session.max_exchanges must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "local" => {}
        "ollama" => {
            if config.embedding.model.is_none() {
                anyhow::bail!("embedding.model must be specified when provider is 'ollama'");
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be local or ollama.",
            other
        ),
    }

    if config.llm.model.trim().is_empty() {
        anyhow::bail!("llm.model must not be empty");
    }

    Ok(())
}
