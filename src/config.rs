//! TOML-backed configuration, loaded once at startup.
//!
//! Mirrors the teacher's `config.rs` shape: one struct per concern, serde
//! defaults for everything optional, and a post-parse validation pass that
//! rejects out-of-range values with a descriptive error rather than a panic.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::IpRetrieveError;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub precedence: PrecedenceConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub citation_policy: CitationPolicyConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub composer: ComposerConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub normalizer: NormalizerConfig,
    #[serde(default)]
    pub boosts: ContentBoostConfig,
    /// Overrides the corpus-derived fingerprint for cache invalidation
    /// (§6 "index_fingerprint override for cache invalidation").
    #[serde(default)]
    pub index_fingerprint_override: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorpusConfig {
    #[serde(default = "default_corpus_path")]
    pub path: PathBuf,
    /// Optional path to a flat row-major `f32` embedding matrix, one row per
    /// chunk in the same order as `path` (§4.4). Dense search is skipped
    /// with a logged warning when unset.
    #[serde(default)]
    pub embeddings_path: Option<PathBuf>,
    /// Dimensionality of each row in `embeddings_path`. Required when
    /// `embeddings_path` is set.
    #[serde(default)]
    pub embedding_dims: Option<usize>,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self { path: default_corpus_path(), embeddings_path: None, embedding_dims: None }
    }
}

fn default_corpus_path() -> PathBuf {
    PathBuf::from("corpus.jsonl")
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Per-source candidate fan-out, reported in the cache key and
    /// observability records (§6). The literal per-source multipliers in
    /// §4.7 step 3 (8x/5x/2x `top_k`) drive actual candidate generation;
    /// this knob does not override them — see DESIGN.md.
    #[serde(default = "default_retrieve_m")]
    pub retrieve_m: usize,
    /// Reranker input size, reported in the cache key (§6). The literal
    /// `3·top_k` in §4.7 step 6 drives the actual rerank batch size.
    #[serde(default = "default_rerank_n")]
    pub rerank_n: usize,
    #[serde(default = "default_bm25_k1")]
    pub bm25_k1: f64,
    #[serde(default = "default_bm25_b")]
    pub bm25_b: f64,
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: u8,
    #[serde(default = "default_section_bonus")]
    pub section_bonus: f64,
    #[serde(default = "default_entity_bonus")]
    pub entity_bonus: f64,
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            retrieve_m: default_retrieve_m(),
            rerank_n: default_rerank_n(),
            bm25_k1: default_bm25_k1(),
            bm25_b: default_bm25_b(),
            fuzzy_threshold: default_fuzzy_threshold(),
            section_bonus: default_section_bonus(),
            entity_bonus: default_entity_bonus(),
            deadline_ms: default_deadline_ms(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_retrieve_m() -> usize {
    30
}
fn default_rerank_n() -> usize {
    10
}
fn default_bm25_k1() -> f64 {
    1.5
}
fn default_bm25_b() -> f64 {
    0.75
}
fn default_fuzzy_threshold() -> u8 {
    85
}
fn default_section_bonus() -> f64 {
    0.1
}
fn default_entity_bonus() -> f64 {
    0.1
}
fn default_deadline_ms() -> u64 {
    2_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrecedenceConfig {
    #[serde(default = "default_a1_recency_floor")]
    pub a1_recency_floor: f64,
}

impl Default for PrecedenceConfig {
    fn default() -> Self {
        Self { a1_recency_floor: default_a1_recency_floor() }
    }
}

fn default_a1_recency_floor() -> f64 {
    0.70
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: default_cache_capacity(), ttl_secs: default_cache_ttl_secs() }
    }
}

fn default_cache_capacity() -> usize {
    256
}
fn default_cache_ttl_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Deserialize)]
pub struct CitationPolicyConfig {
    #[serde(default = "default_max_citations")]
    pub max_citations: usize,
    #[serde(default = "default_allowed_doc_types")]
    pub allowed_doc_types: Vec<String>,
    /// Citations older than this year are dropped, unless a chunk's year is
    /// unknown (`0`), which always survives the check. `None` disables the
    /// filter.
    #[serde(default)]
    pub min_year: Option<i32>,
}

impl Default for CitationPolicyConfig {
    fn default() -> Self {
        Self {
            max_citations: default_max_citations(),
            allowed_doc_types: default_allowed_doc_types(),
            min_year: None,
        }
    }
}

fn default_max_citations() -> usize {
    10
}
fn default_allowed_doc_types() -> Vec<String> {
    vec![
        "guideline".to_string(),
        "systematic_review".to_string(),
        "rct".to_string(),
        "cohort".to_string(),
        "case_series".to_string(),
        "narrative_review".to_string(),
        "coding_update".to_string(),
        "journal_article".to_string(),
    ]
}

/// External query encoder backend (§4.5). Disabled by default; when
/// disabled, [`crate::encoders::NullEncoder`] is used and the dense
/// component of retrieval degrades with a `warnings` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct EncoderConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_encoder_dims")]
    pub dims: usize,
    #[serde(default = "default_encoder_max_retries")]
    pub max_retries: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            dims: default_encoder_dims(),
            max_retries: default_encoder_max_retries(),
        }
    }
}

fn default_encoder_dims() -> usize {
    384
}
fn default_encoder_max_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct RerankerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_reranker_endpoint")]
    pub endpoint: Option<String>,
    #[serde(default = "default_reranker_concurrency")]
    pub max_concurrency: usize,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_reranker_endpoint(),
            max_concurrency: default_reranker_concurrency(),
        }
    }
}

fn default_reranker_endpoint() -> Option<String> {
    None
}
fn default_reranker_concurrency() -> usize {
    4
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComposerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self { enabled: false, endpoint: None, token_budget: default_token_budget() }
    }
}

fn default_token_budget() -> usize {
    4_000
}

/// Overrides for the compiled-in synonym table / fuzzy vocabulary (§4.1).
/// Unset by default: normalization uses the compiled-in IP domain tables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NormalizerConfig {
    #[serde(default)]
    pub vocab_path: Option<PathBuf>,
    #[serde(default)]
    pub synonyms_path: Option<PathBuf>,
}

/// Content-boost multipliers (§4.7 step 5). Treated as tuned parameters
/// per the Open Question in §9, not fixed constants.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentBoostConfig {
    #[serde(default = "default_contraindication_boost")]
    pub contraindication: f64,
    #[serde(default = "default_table_boost")]
    pub table: f64,
    #[serde(default = "default_dose_boost")]
    pub dose: f64,
    #[serde(default = "default_a1_boost")]
    pub authority_a1: f64,
    #[serde(default = "default_a2_a3_boost")]
    pub authority_a2_a3: f64,
}

impl Default for ContentBoostConfig {
    fn default() -> Self {
        Self {
            contraindication: default_contraindication_boost(),
            table: default_table_boost(),
            dose: default_dose_boost(),
            authority_a1: default_a1_boost(),
            authority_a2_a3: default_a2_a3_boost(),
        }
    }
}

fn default_contraindication_boost() -> f64 {
    1.20
}
fn default_table_boost() -> f64 {
    1.15
}
fn default_dose_boost() -> f64 {
    1.15
}
fn default_a1_boost() -> f64 {
    1.10
}
fn default_a2_a3_boost() -> f64 {
    1.05
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}

/// Loads and validates configuration from a TOML file.
///
/// Validation failures are reported as [`IpRetrieveError::FatalConfig`]
/// since a misconfigured engine should refuse to start rather than run
/// with nonsensical weights.
pub fn load_config(path: &Path) -> Result<Config, IpRetrieveError> {
    let raw = std::fs::read_to_string(path).map_err(IpRetrieveError::Io)?;
    let config: Config = toml::from_str(&raw)
        .map_err(|e| IpRetrieveError::FatalConfig(format!("{path:?}: {e}")))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), IpRetrieveError> {
    if config.retrieval.bm25_b < 0.0 || config.retrieval.bm25_b > 1.0 {
        return Err(IpRetrieveError::FatalConfig(
            "retrieval.bm25_b must be in [0, 1]".to_string(),
        ));
    }
    if config.retrieval.bm25_k1 <= 0.0 {
        return Err(IpRetrieveError::FatalConfig(
            "retrieval.bm25_k1 must be positive".to_string(),
        ));
    }
    if config.retrieval.fuzzy_threshold > 100 {
        return Err(IpRetrieveError::FatalConfig(
            "retrieval.fuzzy_threshold must be in [0, 100]".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&config.precedence.a1_recency_floor) {
        return Err(IpRetrieveError::FatalConfig(
            "precedence.a1_recency_floor must be in [0, 1]".to_string(),
        ));
    }
    if config.retrieval.top_k == 0 {
        return Err(IpRetrieveError::FatalConfig(
            "retrieval.top_k must be greater than zero".to_string(),
        ));
    }
    if config.retrieval.retrieve_m < config.retrieval.top_k {
        return Err(IpRetrieveError::FatalConfig(
            "retrieval.retrieve_m must be >= retrieval.top_k".to_string(),
        ));
    }
    if config.encoder.dims == 0 {
        return Err(IpRetrieveError::FatalConfig("encoder.dims must be greater than zero".to_string()));
    }
    if config.corpus.embeddings_path.is_some() && config.corpus.embedding_dims.is_none() {
        return Err(IpRetrieveError::FatalConfig(
            "corpus.embedding_dims must be set when corpus.embeddings_path is set".to_string(),
        ));
    }
    if config.cache.capacity == 0 {
        return Err(IpRetrieveError::FatalConfig(
            "cache.capacity must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            corpus: CorpusConfig::default(),
            retrieval: RetrievalConfig::default(),
            precedence: PrecedenceConfig::default(),
            cache: CacheConfig::default(),
            citation_policy: CitationPolicyConfig::default(),
            encoder: EncoderConfig::default(),
            reranker: RerankerConfig::default(),
            composer: ComposerConfig::default(),
            server: ServerConfig::default(),
            normalizer: NormalizerConfig::default(),
            boosts: ContentBoostConfig::default(),
            index_fingerprint_override: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn rejects_out_of_range_bm25_b() {
        let mut config = Config::default();
        config.retrieval.bm25_b = 1.5;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_retrieve_m_smaller_than_top_k() {
        let mut config = Config::default();
        config.retrieval.retrieve_m = 2;
        config.retrieval.top_k = 10;
        assert!(validate(&config).is_err());
    }
}
