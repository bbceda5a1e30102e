//! Hybrid Retriever (§4.7) — the core of the engine.
//!
//! Orchestrates normalization, parallel candidate generation across BM25,
//! dense, and exact-match sources, hierarchy-aware merge scoring, and an
//! optional cross-encoder rerank pass. Within one query, dense and BM25
//! candidate generation fan out concurrently via `tokio::join!`; both are
//! CPU-bound scans so each runs inside `tokio::task::spawn_blocking`,
//! keeping the async runtime free while the (potentially network-bound)
//! query encoder is awaited — the suspension points named in §5.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::bm25::Bm25Index;
use crate::chunk_store::ChunkStore;
use crate::config::ContentBoostConfig;
use crate::dense::{DenseIndex, Filters};
use crate::encoders::{CrossEncoder, QueryEncoder};
use crate::models::{CandidateAggregate, RetrievalResult};
use crate::normalizer;
use crate::precedence;
use crate::safety;
use crate::types::AuthorityTier;

/// Tier-sensitive blend weight between the pre-rerank score and the
/// cross-encoder score (§4.7 step 6): `(weight_current, weight_rerank)`.
fn rerank_blend_weight(tier: AuthorityTier) -> (f64, f64) {
    match tier {
        AuthorityTier::A1 => (0.60, 0.40),
        AuthorityTier::A2 | AuthorityTier::A3 => (0.55, 0.45),
        AuthorityTier::A4 => (0.50, 0.50),
    }
}

/// Content-boost multipliers (§4.7 step 5), configurable per the "tuned
/// empirically" Open Question in §9.
#[derive(Debug, Clone, Copy)]
pub struct ContentBoosts {
    pub contraindication: f64,
    pub table: f64,
    pub dose: f64,
    pub authority_a1: f64,
    pub authority_a2_a3: f64,
}

impl From<&ContentBoostConfig> for ContentBoosts {
    fn from(cfg: &ContentBoostConfig) -> Self {
        Self {
            contraindication: cfg.contraindication,
            table: cfg.table,
            dose: cfg.dose,
            authority_a1: cfg.authority_a1,
            authority_a2_a3: cfg.authority_a2_a3,
        }
    }
}

/// Per-call parameters for [`HybridRetriever::retrieve`]. Everything here is
/// either request-supplied or a resolved config value — the retriever
/// itself holds no mutable state across calls.
#[derive(Debug, Clone)]
pub struct RetrieveParams {
    pub top_k: usize,
    pub use_reranker: bool,
    pub filters: Filters,
    pub current_year: i32,
    pub fuzzy_threshold: u8,
    pub a1_recency_floor: f64,
    pub section_bonus_value: f64,
    pub entity_bonus_value: f64,
    pub boosts: ContentBoosts,
}

/// What [`HybridRetriever::retrieve`] returns: the ranked list plus the
/// normalization/classification side-effects the orchestrator needs, and
/// any degradation warnings accrued along the way.
pub struct RetrieveOutcome {
    pub results: Vec<RetrievalResult>,
    pub normalized_query: String,
    pub is_emergency: bool,
    pub warnings: Vec<String>,
}

struct ScoredCandidate {
    chunk_id: String,
    base: f64,
    precedence: f64,
    semantic: f64,
    bm25_norm: f64,
    exact: f64,
}

pub struct HybridRetriever {
    store: Arc<ChunkStore>,
    bm25: Arc<Bm25Index>,
    dense: Option<Arc<DenseIndex>>,
    encoder: Arc<dyn QueryEncoder>,
    reranker: Arc<dyn CrossEncoder>,
    reranker_semaphore: Arc<Semaphore>,
    dense_warned: AtomicBool,
}

impl HybridRetriever {
    pub fn new(
        store: Arc<ChunkStore>,
        bm25: Arc<Bm25Index>,
        dense: Option<Arc<DenseIndex>>,
        encoder: Arc<dyn QueryEncoder>,
        reranker: Arc<dyn CrossEncoder>,
        reranker_concurrency: usize,
    ) -> Self {
        Self {
            store,
            bm25,
            dense,
            encoder,
            reranker,
            reranker_semaphore: Arc::new(Semaphore::new(reranker_concurrency.max(1))),
            dense_warned: AtomicBool::new(false),
        }
    }

    /// `retrieve(query, top_k, use_reranker, filters) -> [RetrievalResult...]` (§4.7).
    pub async fn retrieve(&self, query: &str, params: &RetrieveParams) -> RetrieveOutcome {
        let mut warnings = Vec::new();
        let top_k = params.top_k.max(1);
        let nq = normalizer::normalize(query, params.fuzzy_threshold);
        let is_emergency = safety::is_emergency(query) || safety::is_emergency(&nq);

        let dense_top = 8 * top_k;
        let bm25_top_norm = 5 * top_k;
        let bm25_top_raw = 2 * top_k;

        let encode_result = self.encoder.encode(&nq).await;

        if self.dense.is_none() && !self.dense_warned.swap(true, AtomicOrdering::Relaxed) {
            tracing::warn!("dense index not configured; semantic component skipped");
        }
        if self.dense.is_some() {
            if let Err(e) = &encode_result {
                warnings.push(format!("semantic component degraded: query encoder unavailable ({e})"));
            }
        }

        let dense_task = {
            let dense = self.dense.clone();
            let store = self.store.clone();
            let filters = params.filters.clone();
            let qv = encode_result.as_ref().ok().cloned();
            async move {
                match (dense, qv) {
                    (Some(dense), Some(qv)) => {
                        tokio::task::spawn_blocking(move || dense.search(&qv, dense_top, &filters, &store))
                            .await
                            .unwrap_or_default()
                    }
                    _ => Vec::new(),
                }
            }
        };

        let bm25_task = {
            let bm25 = self.bm25.clone();
            let nq_owned = nq.clone();
            let raw_owned = query.to_string();
            async move {
                tokio::task::spawn_blocking(move || {
                    let mut merged: HashMap<String, f64> = HashMap::new();
                    for (id, score) in bm25.search(&nq_owned, bm25_top_norm) {
                        let entry = merged.entry(id).or_insert(0.0);
                        *entry = entry.max(score);
                    }
                    if raw_owned.to_lowercase() != nq_owned {
                        for (id, score) in bm25.search(&raw_owned, bm25_top_raw) {
                            let entry = merged.entry(id).or_insert(0.0);
                            *entry = entry.max(score);
                        }
                    }
                    merged.into_iter().collect::<Vec<_>>()
                })
                .await
                .unwrap_or_default()
            }
        };

        let (dense_candidates, bm25_candidates) = tokio::join!(dense_task, bm25_task);

        // Exact match: 5-digit CPT runs score 1.0, known alias surface forms
        // score 0.8 (§4.7 step 3).
        let mut exact: HashMap<String, f64> = HashMap::new();
        for code in normalizer::extract_cpt_codes(&nq) {
            for id in self.store.chunk_ids_for_cpt(&code) {
                let entry = exact.entry(id.clone()).or_insert(0.0);
                *entry = entry.max(1.0);
            }
        }
        for alias in self.store.known_aliases() {
            if nq.contains(alias.as_str()) {
                for id in self.store.chunk_ids_for_alias(alias) {
                    let entry = exact.entry(id.clone()).or_insert(0.0);
                    *entry = entry.max(0.8);
                }
            }
        }

        let mut aggregates: HashMap<String, CandidateAggregate> = HashMap::new();
        for (id, score) in dense_candidates {
            let agg = aggregates.entry(id).or_default();
            agg.semantic = agg.semantic.max(score);
        }
        for (id, score) in bm25_candidates {
            let agg = aggregates.entry(id).or_default();
            agg.bm25_raw = agg.bm25_raw.max(score);
        }
        for (id, score) in exact {
            let agg = aggregates.entry(id).or_default();
            agg.exact = agg.exact.max(score);
        }

        let max_bm25 = aggregates.values().map(|a| a.bm25_raw).fold(0.0_f64, f64::max);
        let nq_tokens: Vec<&str> = nq.split_whitespace().collect();

        let mut scored = Vec::with_capacity(aggregates.len());
        for (chunk_id, agg) in &aggregates {
            let Some(chunk) = self.store.get(chunk_id) else { continue };
            if !params.filters.is_empty() && !params.filters.matches(chunk) {
                continue;
            }

            let precedence = precedence::precedence(chunk, params.current_year, params.a1_recency_floor);
            let title_lower = chunk.section_title.to_lowercase();
            let section_bonus = if nq_tokens.iter().any(|t| !t.is_empty() && title_lower.contains(t)) {
                params.section_bonus_value
            } else {
                0.0
            };
            let entity_bonus = if agg.exact > 0.0 { params.entity_bonus_value } else { 0.0 };
            let bm25_norm = if max_bm25 > 0.0 { agg.bm25_raw / max_bm25 } else { 0.0 };

            let base = if is_emergency {
                0.70 * precedence + 0.20 * agg.semantic + 0.05 * bm25_norm + 0.025 * section_bonus + 0.025 * entity_bonus
            } else {
                0.45 * precedence + 0.35 * agg.semantic + 0.10 * bm25_norm + 0.05 * section_bonus + 0.05 * entity_bonus
            };

            let mut boosted = base;
            if chunk.has_contraindication && nq.contains("contraindication") {
                boosted *= params.boosts.contraindication;
            }
            if chunk.has_table && ["table", "cpt", "code"].iter().any(|k| nq.contains(k)) {
                boosted *= params.boosts.table;
            }
            if chunk.has_dose_setting && ["dose", "setting", "energy"].iter().any(|k| nq.contains(k)) {
                boosted *= params.boosts.dose;
            }
            match chunk.authority_tier {
                AuthorityTier::A1 => boosted *= params.boosts.authority_a1,
                AuthorityTier::A2 | AuthorityTier::A3 => boosted *= params.boosts.authority_a2_a3,
                AuthorityTier::A4 => {}
            }

            scored.push(ScoredCandidate {
                chunk_id: chunk_id.clone(),
                base: boosted,
                precedence,
                semantic: agg.semantic,
                bm25_norm,
                exact: agg.exact,
            });
        }

        scored.sort_by(|a, b| {
            b.base.partial_cmp(&a.base).unwrap_or(Ordering::Equal).then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });

        let mut final_scores: HashMap<String, f64> =
            scored.iter().map(|c| (c.chunk_id.clone(), c.base)).collect();

        if params.use_reranker && !scored.is_empty() {
            let rerank_n = (3 * top_k).min(scored.len());
            let subset = &scored[..rerank_n];
            let pairs: Vec<(String, String)> = subset
                .iter()
                .filter_map(|c| self.store.get(&c.chunk_id).map(|chunk| (query.to_string(), chunk.text.clone())))
                .collect();

            let rerank_result = match self.reranker_semaphore.acquire().await {
                Ok(_permit) => self.reranker.rerank(&pairs).await,
                Err(_) => Err(crate::errors::IpRetrieveError::DependencyDegradation(
                    "reranker concurrency limiter unavailable".to_string(),
                )),
            };

            match rerank_result {
                Ok(rerank_scores) if rerank_scores.len() == pairs.len() => {
                    for (candidate, rerank_score) in subset.iter().zip(rerank_scores) {
                        if let Some(chunk) = self.store.get(&candidate.chunk_id) {
                            let (w_current, w_rerank) = rerank_blend_weight(chunk.authority_tier);
                            let blended = w_current * candidate.base + w_rerank * rerank_score;
                            final_scores.insert(candidate.chunk_id.clone(), blended);
                        }
                    }
                }
                Ok(_) => {
                    warnings.push(
                        "degraded-ranking: reranker returned a mismatched score count".to_string(),
                    );
                }
                Err(e) => {
                    warnings.push(format!("degraded-ranking: reranker unavailable ({e})"));
                }
            }
        }

        let mut ranked: Vec<(&ScoredCandidate, f64)> = scored
            .iter()
            .map(|c| (c, *final_scores.get(&c.chunk_id).unwrap_or(&c.base)))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then_with(|| a.0.chunk_id.cmp(&b.0.chunk_id))
        });
        ranked.truncate(top_k);

        let results = ranked
            .into_iter()
            .filter_map(|(c, final_score)| {
                let chunk = self.store.get(&c.chunk_id)?;
                Some(RetrievalResult {
                    chunk_id: chunk.chunk_id.clone(),
                    text: chunk.text.clone(),
                    final_score,
                    doc_id: chunk.doc_id.clone(),
                    section_title: chunk.section_title.clone(),
                    authority_tier: chunk.authority_tier,
                    evidence_level: chunk.evidence_level,
                    year: chunk.year,
                    doc_type: chunk.doc_type,
                    precedence_score: c.precedence,
                    semantic_score: c.semantic,
                    bm25_score: c.bm25_norm,
                    exact_match_score: c.exact,
                    has_table: chunk.has_table,
                    has_contraindication: chunk.has_contraindication,
                    has_dose_setting: chunk.has_dose_setting,
                    is_emergency,
                    authors: chunk.authors.clone(),
                    journal: chunk.journal.clone(),
                    volume: chunk.volume.clone(),
                    issue: chunk.issue.clone(),
                    pages: chunk.pages.clone(),
                    doi: chunk.doi.clone(),
                    pmid: chunk.pmid.clone(),
                })
            })
            .collect();

        RetrieveOutcome { results, normalized_query: nq, is_emergency, warnings }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoders::{NullEncoder, NullReranker};

    fn default_params(top_k: usize, use_reranker: bool) -> RetrieveParams {
        RetrieveParams {
            top_k,
            use_reranker,
            filters: Filters::default(),
            current_year: 2026,
            fuzzy_threshold: 85,
            a1_recency_floor: 0.70,
            section_bonus_value: 0.1,
            entity_bonus_value: 0.1,
            boosts: ContentBoosts {
                contraindication: 1.20,
                table: 1.15,
                dose: 1.15,
                authority_a1: 1.10,
                authority_a2_a3: 1.05,
            },
        }
    }

    fn sample_store() -> Arc<ChunkStore> {
        let records = [
            serde_json::json!({
                "chunk_id": "cpt-31633",
                "doc_id": "coding-guide",
                "text": "CPT code 31633 covers bronchoscopic transbronchial needle aspiration of an additional lobe, billing and reimbursement guidance for ablation procedures",
                "section_type": "coding",
                "authority_tier": "A2",
                "evidence_level": "H2",
                "year": 2024,
                "doc_type": "coding_update",
                "domain": ["coding_billing"],
                "has_table": true,
                "cpt_codes": ["31633"],
            }),
            serde_json::json!({
                "chunk_id": "hemoptysis-1",
                "doc_id": "emergency-guideline",
                "text": "Management of massive hemoptysis requires urgent rigid bronchoscopy and airway control in an unstable patient",
                "section_title": "Procedure Steps",
                "section_type": "procedure_steps",
                "authority_tier": "A1",
                "evidence_level": "H1",
                "year": 2010,
                "doc_type": "guideline",
                "domain": ["other"],
            }),
            serde_json::json!({
                "chunk_id": "unrelated-1",
                "doc_id": "unrelated-doc",
                "text": "Routine scheduling guidance for outpatient clinic staff rotations and administrative calendar planning tasks",
                "authority_tier": "A4",
                "evidence_level": "H4",
                "year": 2015,
                "doc_type": "journal_article",
                "domain": ["other"],
            }),
        ];
        let corpus = records.iter().map(|r| r.to_string()).collect::<Vec<_>>().join("\n");
        Arc::new(ChunkStore::load(&corpus).unwrap())
    }

    fn retriever(store: Arc<ChunkStore>) -> HybridRetriever {
        let bm25 = Arc::new(Bm25Index::build(&store, 1.5, 0.75));
        HybridRetriever::new(store, bm25, None, Arc::new(NullEncoder::new(8)), Arc::new(NullReranker), 4)
    }

    #[tokio::test]
    async fn cpt_exact_match_outranks_unrelated_chunks() {
        let store = sample_store();
        let retriever = retriever(store);
        let outcome = retriever.retrieve("CPT code 31633", &default_params(5, false)).await;
        assert_eq!(outcome.results[0].chunk_id, "cpt-31633");
        assert!(outcome.results[0].exact_match_score > 0.0);
    }

    #[tokio::test]
    async fn emergency_query_is_detected_and_flagged_on_every_result() {
        let store = sample_store();
        let retriever = retriever(store);
        let outcome = retriever.retrieve("massive hemoptysis >300 ml, unstable", &default_params(5, false)).await;
        assert!(outcome.is_emergency);
        assert!(outcome.results.iter().all(|r| r.is_emergency));
    }

    #[tokio::test]
    async fn authority_tier_filter_is_respected() {
        let store = sample_store();
        let retriever = retriever(store);
        let mut params = default_params(5, false);
        params.filters = Filters { authority_tier: Some(AuthorityTier::A1), ..Default::default() };
        let outcome = retriever.retrieve("bronchoscopy safety", &params).await;
        assert!(outcome.results.iter().all(|r| r.authority_tier == AuthorityTier::A1));
    }

    #[tokio::test]
    async fn has_table_filter_is_respected() {
        let store = sample_store();
        let retriever = retriever(store);
        let mut params = default_params(5, false);
        params.filters = Filters { has_table: Some(true), ..Default::default() };
        let outcome = retriever.retrieve("cpt code billing", &params).await;
        assert!(outcome.results.iter().all(|r| r.has_table));
    }

    #[tokio::test]
    async fn reranker_failure_degrades_rather_than_erroring() {
        let store = sample_store();
        let retriever = retriever(store);
        let outcome = retriever.retrieve("bronchoscopy complications", &default_params(5, true)).await;
        assert!(outcome.warnings.iter().any(|w| w.contains("degraded-ranking")));
    }

    #[tokio::test]
    async fn results_are_bounded_by_top_k() {
        let store = sample_store();
        let retriever = retriever(store);
        let outcome = retriever.retrieve("bronchoscopy", &default_params(1, false)).await;
        assert!(outcome.results.len() <= 1);
    }

    #[tokio::test]
    async fn deterministic_ordering_across_repeated_runs() {
        let store = sample_store();
        let retriever = retriever(store);
        let a = retriever.retrieve("bronchoscopy cpt code", &default_params(5, false)).await;
        let b = retriever.retrieve("bronchoscopy cpt code", &default_params(5, false)).await;
        let ids_a: Vec<&str> = a.results.iter().map(|r| r.chunk_id.as_str()).collect();
        let ids_b: Vec<&str> = b.results.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids_a, ids_b);
    }
}
