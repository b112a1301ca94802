//! TOML configuration loading and validation.
//!
//! All runtime settings live in one TOML file with sections for the
//! corpus, retrieval, embedding, generation, and profile layers. Optional
//! fields carry serde defaults; [`load_config`] checks cross-field
//! constraints after parsing so a bad configuration fails before the
//! pipeline starts.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub profile: ProfileConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    /// Directory of source PDFs.
    pub documents_dir: PathBuf,
    /// Root directory for the persisted index cache.
    pub cache_dir: PathBuf,
    #[serde(default = "default_upload_max_bytes")]
    pub upload_max_bytes: u64,
}

fn default_upload_max_bytes() -> u64 {
    5 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_similarity_k")]
    pub similarity_k: usize,
    #[serde(default = "default_mmr_k")]
    pub mmr_k: usize,
    #[serde(default = "default_mmr_fetch_k")]
    pub mmr_fetch_k: usize,
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f32,
    #[serde(default = "default_similarity_weight")]
    pub similarity_weight: f64,
    #[serde(default = "default_mmr_weight")]
    pub mmr_weight: f64,
    /// Top documents consulted for coarse narrowing on large corpora.
    #[serde(default = "default_doc_k")]
    pub doc_k: usize,
    /// Document count above which coarse narrowing kicks in.
    #[serde(default = "default_doc_filter_threshold")]
    pub doc_filter_threshold: usize,
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
    /// Post-filter fused passages through relevance compression.
    #[serde(default = "default_compression")]
    pub compression: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_k: default_similarity_k(),
            mmr_k: default_mmr_k(),
            mmr_fetch_k: default_mmr_fetch_k(),
            mmr_lambda: default_mmr_lambda(),
            similarity_weight: default_similarity_weight(),
            mmr_weight: default_mmr_weight(),
            doc_k: default_doc_k(),
            doc_filter_threshold: default_doc_filter_threshold(),
            final_limit: default_final_limit(),
            compression: default_compression(),
        }
    }
}

fn default_similarity_k() -> usize {
    5
}
fn default_mmr_k() -> usize {
    5
}
fn default_mmr_fetch_k() -> usize {
    15
}
fn default_mmr_lambda() -> f32 {
    0.5
}
fn default_similarity_weight() -> f64 {
    0.6
}
fn default_mmr_weight() -> f64 {
    0.4
}
fn default_doc_k() -> usize {
    10
}
fn default_doc_filter_threshold() -> usize {
    20
}
fn default_final_limit() -> usize {
    8
}
fn default_compression() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// Model used for final answers.
    #[serde(default = "default_answer_model")]
    pub answer_model: String,
    /// Cheaper model used for summaries, compression, and classification.
    #[serde(default = "default_utility_model")]
    pub utility_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_gen_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            answer_model: default_answer_model(),
            utility_model: default_utility_model(),
            temperature: default_temperature(),
            timeout_secs: default_gen_timeout_secs(),
        }
    }
}

fn default_answer_model() -> String {
    "gpt-4-turbo".to_string()
}
fn default_utility_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_temperature() -> f64 {
    0.3
}
fn default_gen_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProfileConfig {
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
    /// Questionnaire schema file; created with the built-in default when absent.
    #[serde(default = "default_questionnaire_path")]
    pub questionnaire_path: PathBuf,
    /// Prior turns folded into the conversation context.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// JSON-lines file holding extracted certificate records.
    #[serde(default = "default_certificates_path")]
    pub certificates_path: PathBuf,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            questionnaire_path: default_questionnaire_path(),
            history_limit: default_history_limit(),
            certificates_path: default_certificates_path(),
        }
    }
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("./data/profiles")
}
fn default_questionnaire_path() -> PathBuf {
    PathBuf::from("./data/questionnaire.json")
}
fn default_history_limit() -> usize {
    5
}
fn default_certificates_path() -> PathBuf {
    PathBuf::from("./data/certificates.jsonl")
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate retrieval
    if config.retrieval.similarity_k == 0 || config.retrieval.mmr_k == 0 {
        anyhow::bail!("retrieval.similarity_k and retrieval.mmr_k must be >= 1");
    }
    if config.retrieval.mmr_fetch_k < config.retrieval.mmr_k {
        anyhow::bail!("retrieval.mmr_fetch_k must be >= retrieval.mmr_k");
    }
    if !(0.0..=1.0).contains(&config.retrieval.mmr_lambda) {
        anyhow::bail!("retrieval.mmr_lambda must be in [0.0, 1.0]");
    }
    if config.retrieval.similarity_weight + config.retrieval.mmr_weight <= 0.0 {
        anyhow::bail!("retrieval ensemble weights must sum to > 0");
    }
    if config.retrieval.final_limit == 0 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }

    // Validate embedding
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.model.trim().is_empty() {
        anyhow::bail!("embedding.model must be specified");
    }

    if config.corpus.upload_max_bytes == 0 {
        anyhow::bail!("corpus.upload_max_bytes must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> String {
        r#"
[corpus]
documents_dir = "./documents"
cache_dir = "./vectorstore"

[embedding]
model = "text-embedding-3-small"
dims = 1536
"#
        .to_string()
    }

    fn parse(toml_text: &str) -> Result<Config> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taxpilot.toml");
        std::fs::write(&path, toml_text).unwrap();
        load_config(&path)
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = parse(&minimal_toml()).unwrap();
        assert_eq!(cfg.retrieval.similarity_k, 5);
        assert_eq!(cfg.retrieval.mmr_fetch_k, 15);
        assert!((cfg.retrieval.similarity_weight - 0.6).abs() < 1e-9);
        assert_eq!(cfg.generation.answer_model, "gpt-4-turbo");
        assert_eq!(cfg.corpus.upload_max_bytes, 5 * 1024 * 1024);
        assert!(cfg.retrieval.compression);
    }

    #[test]
    fn zero_dims_rejected() {
        let toml_text = minimal_toml().replace("dims = 1536", "dims = 0");
        assert!(parse(&toml_text).is_err());
    }

    #[test]
    fn fetch_k_below_k_rejected() {
        let mut toml_text = minimal_toml();
        toml_text.push_str("\n[retrieval]\nmmr_k = 10\nmmr_fetch_k = 5\n");
        assert!(parse(&toml_text).is_err());
    }
}
