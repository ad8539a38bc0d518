//! TOML configuration parsing and validation.
//!
//! Every tunable the indexer and retriever consume lives here. Only `[db]`
//! and `[vault]` are required; all other sections fall back to defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Directory names that are never indexed or watched, regardless of config.
pub const ALWAYS_SKIPPED_DIRS: &[&str] = &[".git", ".vidx"];

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub vault: VaultConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub watch: WatchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VaultConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub skip_dirs: Vec<String>,
    #[serde(default = "default_log_prefixes")]
    pub log_prefixes: Vec<String>,
}

impl VaultConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            include_globs: default_include_globs(),
            skip_dirs: Vec::new(),
            log_prefixes: default_log_prefixes(),
        }
    }

    /// Configured skip directories plus the ones that are always skipped.
    pub fn effective_skip_dirs(&self) -> Vec<String> {
        let mut dirs: Vec<String> = ALWAYS_SKIPPED_DIRS.iter().map(|d| d.to_string()).collect();
        for d in &self.skip_dirs {
            if !dirs.contains(d) {
                dirs.push(d.clone());
            }
        }
        dirs
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

fn default_log_prefixes() -> Vec<String> {
    vec!["logs/".to_string(), "journal/".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_threshold_chars")]
    pub threshold_chars: usize,
    #[serde(default = "default_max_embed_chars")]
    pub max_embed_chars: usize,
    #[serde(default = "default_max_snippet_chars")]
    pub max_snippet_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            threshold_chars: default_threshold_chars(),
            max_embed_chars: default_max_embed_chars(),
            max_snippet_chars: default_max_snippet_chars(),
        }
    }
}

fn default_threshold_chars() -> usize {
    1500
}
fn default_max_embed_chars() -> usize {
    8000
}
fn default_max_snippet_chars() -> usize {
    240
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_distance_threshold")]
    pub distance_threshold: f64,
    #[serde(default = "default_composite_threshold")]
    pub composite_threshold: f64,
    #[serde(default = "default_max_token_budget")]
    pub max_token_budget: usize,
    #[serde(default = "default_min_query_chars")]
    pub min_query_chars: usize,
    #[serde(default)]
    pub noise_paths: Vec<String>,
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    #[serde(default)]
    pub weights: ScoreWeights,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            distance_threshold: default_distance_threshold(),
            composite_threshold: default_composite_threshold(),
            max_token_budget: default_max_token_budget(),
            min_query_chars: default_min_query_chars(),
            noise_paths: Vec::new(),
            candidate_multiplier: default_candidate_multiplier(),
            weights: ScoreWeights::default(),
        }
    }
}

fn default_max_results() -> usize {
    5
}
fn default_distance_threshold() -> f64 {
    1.2
}
fn default_composite_threshold() -> f64 {
    0.2
}
fn default_max_token_budget() -> usize {
    2000
}
fn default_min_query_chars() -> usize {
    8
}
fn default_candidate_multiplier() -> usize {
    4
}

/// Weights of the default composite scorer.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ScoreWeights {
    #[serde(default = "default_w_similarity")]
    pub similarity: f64,
    #[serde(default = "default_w_confidence")]
    pub confidence: f64,
    #[serde(default = "default_w_usage")]
    pub usage: f64,
    /// Access count at which the usage term reaches 0.5.
    #[serde(default = "default_usage_saturation")]
    pub usage_saturation: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            similarity: default_w_similarity(),
            confidence: default_w_confidence(),
            usage: default_w_usage(),
            usage_saturation: default_usage_saturation(),
        }
    }
}

fn default_w_similarity() -> f64 {
    0.6
}
fn default_w_confidence() -> f64 {
    0.25
}
fn default_w_usage() -> f64 {
    0.15
}
fn default_usage_saturation() -> f64 {
    5.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for Ollama or an OpenAI-compatible endpoint.
    #[serde(default)]
    pub url: Option<String>,
    /// Environment variable holding the API key for remote providers.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            api_key_env: default_api_key_env(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    2
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
pub struct WatchConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    2000
}

pub const KNOWN_PROVIDERS: &[&str] = &[
    "auto",
    "ollama",
    "openai",
    "openai-compatible",
    "local",
    "disabled",
];

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check value ranges that serde cannot express.
pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.threshold_chars == 0 {
        anyhow::bail!("chunking.threshold_chars must be > 0");
    }
    if config.chunking.max_embed_chars == 0 {
        anyhow::bail!("chunking.max_embed_chars must be > 0");
    }

    let r = &config.retrieval;
    if r.max_results == 0 {
        anyhow::bail!("retrieval.max_results must be >= 1");
    }
    if r.max_token_budget == 0 {
        anyhow::bail!("retrieval.max_token_budget must be >= 1");
    }
    if !r.distance_threshold.is_finite() || r.distance_threshold < 0.0 {
        anyhow::bail!("retrieval.distance_threshold must be a finite value >= 0");
    }
    if !(0.0..=1.0).contains(&r.composite_threshold) {
        anyhow::bail!("retrieval.composite_threshold must be in [0.0, 1.0]");
    }
    if r.candidate_multiplier == 0 {
        anyhow::bail!("retrieval.candidate_multiplier must be >= 1");
    }
    let w = &r.weights;
    if w.similarity < 0.0 || w.confidence < 0.0 || w.usage < 0.0 {
        anyhow::bail!("retrieval.weights must be non-negative");
    }
    if w.similarity + w.confidence + w.usage <= 0.0 {
        anyhow::bail!("retrieval.weights must not all be zero");
    }
    if w.usage_saturation <= 0.0 {
        anyhow::bail!("retrieval.weights.usage_saturation must be > 0");
    }

    if !KNOWN_PROVIDERS.contains(&config.embedding.provider.as_str()) {
        anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be one of: {}",
            config.embedding.provider,
            KNOWN_PROVIDERS.join(", ")
        );
    }
    if config.embedding.dims == Some(0) {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    Ok(())
}
