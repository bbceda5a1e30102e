//! Core data types that flow through the ingestion, retrieval, and
//! orchestration pipeline.
//!
//! Per the §9 redesign note "heterogeneous result containers used both as
//! API type and as internal scratch", [`CandidateAggregate`] (internal,
//! mutable, per-query) is kept distinct from [`RetrievalResult`]
//! (immutable, returned to callers).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::types::{AuthorityTier, DocType, EvidenceLevel, SectionType};

/// On-disk ingestion record shape (§6 "Ingestion input contract").
///
/// One of these is deserialized per line of the chunk corpus file. Fields
/// not present in a given line take the defaults documented in §3.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub doc_id: String,
    pub text: String,
    #[serde(default)]
    pub section_title: String,
    #[serde(default = "default_section_type")]
    pub section_type: String,
    #[serde(default = "default_authority")]
    pub authority_tier: String,
    #[serde(default = "default_evidence")]
    pub evidence_level: String,
    #[serde(default)]
    pub year: i32,
    #[serde(default = "default_doc_type")]
    pub doc_type: String,
    #[serde(default)]
    pub domain: Vec<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub journal: String,
    #[serde(default)]
    pub volume: String,
    #[serde(default)]
    pub issue: String,
    #[serde(default)]
    pub pages: String,
    #[serde(default)]
    pub doi: String,
    #[serde(default)]
    pub pmid: String,
    #[serde(default)]
    pub has_table: bool,
    #[serde(default)]
    pub has_contraindication: bool,
    #[serde(default)]
    pub has_dose_setting: bool,
    #[serde(default)]
    pub cpt_codes: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

fn default_section_type() -> String {
    "general".to_string()
}
fn default_authority() -> String {
    "A4".to_string()
}
fn default_evidence() -> String {
    "H3".to_string()
}
fn default_doc_type() -> String {
    "journal_article".to_string()
}

/// The closed, validated in-memory representation of a retrievable passage.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub text: String,
    pub section_title: String,
    pub section_type: SectionType,
    pub authority_tier: AuthorityTier,
    pub evidence_level: EvidenceLevel,
    /// 0 if unknown, per §3.
    pub year: i32,
    pub doc_type: DocType,
    pub domain: Vec<String>,
    pub authors: Vec<String>,
    pub journal: String,
    pub volume: String,
    pub issue: String,
    pub pages: String,
    pub doi: String,
    pub pmid: String,
    pub has_table: bool,
    pub has_contraindication: bool,
    pub has_dose_setting: bool,
    pub cpt_codes: Vec<String>,
    pub aliases: Vec<String>,
}

impl Chunk {
    /// Lower-cased section title, the primary domain tag (first entry,
    /// `"other"` if absent), used throughout scoring.
    pub fn primary_domain(&self) -> &str {
        self.domain.first().map(String::as_str).unwrap_or("other")
    }

    /// Rough token count, used by the boilerplate-length invariant and by
    /// the composer facade's token budget.
    pub fn token_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Per-candidate score components accumulated during merge (§4.7 step 4).
///
/// Mutable scratch space, thrown away once [`RetrievalResult`]s are built —
/// never exposed to callers.
#[derive(Debug, Clone, Default)]
pub struct CandidateAggregate {
    pub semantic: f64,
    pub bm25_raw: f64,
    pub exact: f64,
}

/// A single ranked retrieval result, as returned by the Hybrid Retriever
/// and embedded in the answer envelope.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub chunk_id: String,
    pub text: String,
    pub final_score: f64,
    pub doc_id: String,
    pub section_title: String,
    pub authority_tier: AuthorityTier,
    pub evidence_level: EvidenceLevel,
    pub year: i32,
    pub doc_type: DocType,
    pub precedence_score: f64,
    pub semantic_score: f64,
    pub bm25_score: f64,
    pub exact_match_score: f64,
    pub has_table: bool,
    pub has_contraindication: bool,
    pub has_dose_setting: bool,
    pub is_emergency: bool,
    pub authors: Vec<String>,
    pub journal: String,
    pub volume: String,
    pub issue: String,
    pub pages: String,
    pub doi: String,
    pub pmid: String,
}

/// A citation surfaced to the caller, built from a [`RetrievalResult`] that
/// survived the citation policy (§4.8 `select_citations`).
#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub doc_id: String,
    pub authors: Vec<String>,
    pub journal: String,
    pub year: i32,
    pub volume: String,
    pub pages: String,
    pub doi: String,
    pub pmid: String,
    pub score: f64,
}

/// Orchestrator state threaded through `classify -> retrieve ->
/// select_citations -> safety_check`. Discarded after the answer is
/// returned (§3 Lifecycle).
#[derive(Debug, Clone)]
pub struct AgentState {
    pub query: String,
    pub normalized_query: String,
    pub query_type: crate::types::QueryType,
    pub is_emergency: bool,
    pub safety_flags: HashSet<String>,
    pub filters: crate::dense::Filters,
    pub candidates: Vec<RetrievalResult>,
    pub citations: Vec<Citation>,
    pub confidence_score: f64,
    pub needs_review: bool,
    pub warnings: Vec<String>,
}

/// A fully assembled response to a query, matching §6's "Answer envelope".
#[derive(Debug, Clone, Serialize)]
pub struct AnswerEnvelope {
    pub query: String,
    pub normalized_query: String,
    pub query_type: String,
    pub is_emergency: bool,
    pub confidence_score: f64,
    pub safety_flags: Vec<String>,
    pub needs_review: bool,
    pub results: Vec<RetrievalResult>,
    pub citations: Vec<Citation>,
    pub answer_text: String,
    pub warnings: Vec<String>,
    pub model_used: Option<String>,
    pub index_fingerprint: String,
    pub latency_ms: u64,
}
