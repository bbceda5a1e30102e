//! End-to-end scenario tests (§8 E1-E6), exercised against a small
//! hand-crafted corpus through the public `ip_retrieve` API rather than a
//! spawned binary, since the engine has no on-disk state to stand up
//! beyond the corpus itself.

use std::sync::Arc;
use std::time::Duration;

use ip_retrieve::bm25::Bm25Index;
use ip_retrieve::cache::ResultCache;
use ip_retrieve::chunk_store::ChunkStore;
use ip_retrieve::composer::NullComposer;
use ip_retrieve::config::Config;
use ip_retrieve::dense::Filters;
use ip_retrieve::encoders::{NullEncoder, NullReranker};
use ip_retrieve::orchestrator::{QueryOrchestrator, QueryRequest};
use ip_retrieve::retriever::HybridRetriever;
use ip_retrieve::types::{AuthorityTier, SectionType};

fn fixture_corpus() -> Arc<ChunkStore> {
    let records = [
        serde_json::json!({
            "chunk_id": "cpt-31633",
            "doc_id": "coding-guide",
            "text": "CPT code 31633 covers bronchoscopic transbronchial needle aspiration of each additional lobe sampled, used for billing and reimbursement of ablation procedures",
            "section_title": "Coding Table",
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
            "chunk_id": "hemoptysis-procedure",
            "doc_id": "emergency-guideline",
            "text": "Management of massive hemoptysis in an unstable patient requires emergency rigid bronchoscopy, balloon tamponade, and airway control before any other intervention",
            "section_title": "Procedure Steps",
            "section_type": "procedure_steps",
            "authority_tier": "A1",
            "evidence_level": "H1",
            "year": 2015,
            "doc_type": "guideline",
            "domain": ["other"],
        }),
        serde_json::json!({
            "chunk_id": "contraindications-1",
            "doc_id": "safety-doc",
            "text": "Absolute contraindications for bronchoscopy include an uncooperative patient and severe refractory hypoxemia unresponsive to supplemental oxygen",
            "section_title": "Contraindications",
            "section_type": "contraindications",
            "authority_tier": "A3",
            "evidence_level": "H3",
            "year": 2022,
            "doc_type": "narrative_review",
            "domain": ["other"],
            "has_contraindication": true,
        }),
        serde_json::json!({
            "chunk_id": "fistula-mgmt",
            "doc_id": "fistula-review",
            "text": "Management of tracheoesophageal fistula involves covered stent placement, surgical repair referral, and nutritional support planning",
            "section_title": "Fistula Management",
            "section_type": "general",
            "authority_tier": "A4",
            "evidence_level": "H3",
            "year": 2023,
            "doc_type": "journal_article",
            "domain": ["other"],
        }),
        serde_json::json!({
            "chunk_id": "journal-a4-1",
            "doc_id": "journal-doc-1",
            "text": "A prospective cohort study of bronchoscopy complication rates across a multicenter registry of interventional pulmonology programs",
            "section_title": "Abstract",
            "section_type": "abstract",
            "authority_tier": "A4",
            "evidence_level": "H2",
            "year": 2023,
            "doc_type": "journal_article",
            "domain": ["other"],
            "authors": ["Nguyen T", "Okafor C"],
            "journal": "Journal of Bronchology",
        }),
        serde_json::json!({
            "chunk_id": "book-chapter-overview",
            "doc_id": "book-doc-1",
            "text": "Overview chapter covering general bronchoscopy complication rates, equipment setup, and the comprehensive history of the interventional pulmonology field",
            "section_title": "Complications",
            "section_type": "complications",
            "authority_tier": "A1",
            "evidence_level": "H3",
            "year": 2012,
            "doc_type": "book_chapter",
            "domain": ["other"],
        }),
        serde_json::json!({
            "chunk_id": "unrelated-scheduling",
            "doc_id": "admin-doc",
            "text": "Routine scheduling guidance for outpatient clinic staff rotations and administrative calendar planning tasks across the department",
            "section_title": "Admin",
            "section_type": "general",
            "authority_tier": "A4",
            "evidence_level": "H4",
            "year": 2018,
            "doc_type": "journal_article",
            "domain": ["other"],
        }),
    ];
    let corpus = records.iter().map(|r| r.to_string()).collect::<Vec<_>>().join("\n");
    Arc::new(ChunkStore::load(&corpus).unwrap())
}

fn build_orchestrator(store: Arc<ChunkStore>, reranker_enabled: bool) -> QueryOrchestrator {
    let bm25 = Arc::new(Bm25Index::build(&store, 1.5, 0.75));
    let retriever = Arc::new(HybridRetriever::new(
        store.clone(),
        bm25,
        None,
        Arc::new(NullEncoder::new(8)),
        Arc::new(NullReranker),
        4,
    ));
    let mut config = Config::default();
    config.reranker.enabled = reranker_enabled;
    let cache = Arc::new(ResultCache::new(config.cache.capacity, Duration::from_secs(config.cache.ttl_secs)));
    QueryOrchestrator::new(store, retriever, Arc::new(NullComposer), cache, Arc::new(config))
}

fn request(query: &str) -> QueryRequest {
    QueryRequest {
        query: query.to_string(),
        top_k: None,
        use_reranker: None,
        filters: Filters::default(),
        model_hint: None,
    }
}

/// E1 — CPT lookup.
#[tokio::test]
async fn e1_cpt_lookup_surfaces_coded_chunk_with_exact_match() {
    let store = fixture_corpus();
    let orchestrator = build_orchestrator(store, false);
    let envelope = orchestrator.process_query(request("CPT code 31633")).await;

    assert_eq!(envelope.query_type, "coding");
    let top = &envelope.results[0];
    assert_eq!(top.chunk_id, "cpt-31633");
    assert_eq!(top.exact_match_score, 1.0);
    assert!(top.has_table);
}

/// E2 — Emergency.
#[tokio::test]
async fn e2_emergency_query_routes_to_a1_procedure_chunk() {
    let store = fixture_corpus();
    let orchestrator = build_orchestrator(store, false);
    let envelope = orchestrator.process_query(request("massive hemoptysis >300 ml, unstable")).await;

    assert!(envelope.is_emergency);
    assert_eq!(envelope.query_type, "emergency");
    assert!(envelope.results.iter().all(|r| r.authority_tier == AuthorityTier::A1));
    let top = &envelope.results[0];
    assert_eq!(top.chunk_id, "hemoptysis-procedure");
    assert_eq!(top.doc_type, ip_retrieve::types::DocType::Guideline);
}

/// E3 — Safety / contraindications.
#[tokio::test]
async fn e3_contraindication_query_flags_safety_and_boosts_top_result() {
    let store = fixture_corpus();
    let orchestrator = build_orchestrator(store, false);
    let envelope = orchestrator.process_query(request("contraindications for bronchoscopy")).await;

    assert!(envelope.safety_flags.contains(&"contraindication".to_string()));
    let top = &envelope.results[0];
    assert_eq!(top.chunk_id, "contraindications-1");
    assert!(top.has_contraindication);
}

/// E4 — Normalization (abbreviation expansion + fuzzy correction).
#[tokio::test]
async fn e4_abbreviation_and_typo_still_find_fistula_chunk() {
    let store = fixture_corpus();
    let orchestrator = build_orchestrator(store, false);
    let envelope = orchestrator.process_query(request("tef managment")).await;

    assert!(envelope.normalized_query.contains("tracheoesophageal fistula"));
    assert!(envelope.normalized_query.contains("management"));
    assert!(envelope.results.iter().any(|r| r.chunk_id == "fistula-mgmt"));
}

/// E5 — Citation hiding: a book chapter can rank first but never becomes a
/// citation; the citation list is drawn only from permitted A4 doc types.
#[tokio::test]
async fn e5_book_chapter_never_appears_as_a_citation() {
    let store = fixture_corpus();
    let orchestrator = build_orchestrator(store, false);
    let envelope = orchestrator.process_query(request("bronchoscopy complication rates overview")).await;

    assert!(envelope.results.iter().any(|r| r.chunk_id == "book-chapter-overview"));
    assert!(envelope.citations.iter().all(|c| c.doc_id != "book-doc-1"));
    for citation in &envelope.citations {
        let matching = envelope.results.iter().find(|r| r.doc_id == citation.doc_id);
        if let Some(result) = matching {
            assert_eq!(result.authority_tier, AuthorityTier::A4);
        }
    }
}

/// E6 — Reranker degradation: forcing the reranker on with no backend
/// configured must degrade gracefully rather than error.
#[tokio::test]
async fn e6_reranker_failure_degrades_with_warning_and_respects_top_k() {
    let store = fixture_corpus();
    let orchestrator = build_orchestrator(store, true);
    let mut req = request("bronchoscopy complications");
    req.top_k = Some(3);
    let envelope = orchestrator.process_query(req).await;

    assert!(envelope.warnings.iter().any(|w| w.contains("degraded-ranking")));
    assert!(envelope.results.len() <= 3);
}

/// §8 invariant 7 — filter correctness end-to-end through the orchestrator.
#[tokio::test]
async fn invariant_filter_correctness_has_table() {
    let store = fixture_corpus();
    let orchestrator = build_orchestrator(store, false);
    let mut req = request("billing guidance");
    req.filters = Filters { has_table: Some(true), ..Default::default() };
    let envelope = orchestrator.process_query(req).await;

    assert!(envelope.results.iter().all(|r| r.has_table));
}

/// §8 invariant 10 — emergency routing takes precedence over every other
/// query_type classification regardless of co-occurring keywords.
#[tokio::test]
async fn invariant_emergency_routing_overrides_coding_keywords() {
    let store = fixture_corpus();
    let orchestrator = build_orchestrator(store, false);
    let envelope = orchestrator
        .process_query(request("cpt code billing during massive hemoptysis resuscitation"))
        .await;

    assert!(envelope.is_emergency);
    assert_eq!(envelope.query_type, "emergency");
}

/// Sanity check that the fixture's section-type parsing round-trips, used
/// as a guard against silently breaking the fixture above.
#[test]
fn fixture_section_types_parse_as_expected() {
    let store = fixture_corpus();
    let chunk = store.get("hemoptysis-procedure").unwrap();
    assert_eq!(chunk.section_type, SectionType::ProcedureSteps);
}
