//! # IP Retrieve
//!
//! **A hybrid retrieval engine for interventional-pulmonology literature.**
//!
//! IP Retrieve ingests a pre-chunked corpus of clinical literature, builds
//! lexical (BM25), dense (cosine), and exact-match (CPT code / alias)
//! indices over it, and answers natural-language queries with a ranked,
//! hierarchy-aware list of passages plus a citation-policy-filtered
//! reference list — exposed via a CLI and an HTTP server.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌─────────────┐   ┌───────────────┐
//! │  corpus   │──▶│ ChunkStore  │──▶│ Bm25 / Dense   │
//! │ (.jsonl)  │   │             │   │ / exact index  │
//! └───────────┘   └─────────────┘   └───────┬───────┘
//!                                           │
//!                query ──▶ normalizer ──▶ HybridRetriever
//!                                           │
//!                                           ▼
//!                                   QueryOrchestrator
//!                                 (classify/select/safety)
//!                                           │
//!                       ┌───────────────────┼───────────────────┐
//!                       ▼                   ▼                   ▼
//!                 ResultCache        Composer facade        CLI / HTTP
//! ```
//!
//! ## Data Flow
//!
//! 1. [`chunk_store`] loads a JSONL corpus into validated [`models::Chunk`]s,
//!    dropping boilerplate and content-duplicates, and computes an
//!    [`chunk_store::ChunkStore::index_fingerprint`] for cache invalidation.
//! 2. [`bm25`] and [`dense`] build sparse and dense indices over the store;
//!    [`precedence`] scores each chunk's editorial authority and recency.
//! 3. A query is normalized by [`normalizer`] (NFKC, ligature repair,
//!    synonym expansion, fuzzy correction) before retrieval.
//! 4. [`retriever`] fans out across BM25, dense, and exact-match candidate
//!    generation, merges and scores them, and optionally reranks with a
//!    cross-encoder ([`encoders`]).
//! 5. [`orchestrator`] drives `classify -> retrieve -> select_citations ->
//!    safety_check`, enforcing a per-query deadline and the citation policy.
//! 6. [`cache`] memoizes answer envelopes by corpus fingerprint and query
//!    shape; [`composer`] packages ranked chunks for an external LLM.
//! 7. Results are exposed via the **CLI** (`ipr`) and the **HTTP server**
//!    ([`server`]).
//!
//! ## Quick Start
//!
//! ```bash
//! ipr load --corpus corpus.jsonl       # validate and report corpus stats
//! ipr query "cpt code for ebus tbna"   # one-shot query from the CLI
//! ipr serve                            # start the HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`types`] | Closed enumerations: authority tier, evidence level, doc type, section type, query type, domain |
//! | [`models`] | Core data types: `Chunk`, `RetrievalResult`, `Citation`, `AgentState`, `AnswerEnvelope` |
//! | [`errors`] | Library error types (`thiserror`) |
//! | [`normalizer`] | Query normalization: NFKC, ligatures, synonyms, fuzzy correction |
//! | [`chunk_store`] | In-memory corpus store, ingestion and dedup |
//! | [`bm25`] | Okapi BM25 sparse lexical index |
//! | [`dense`] | Dense cosine-similarity index over chunk embeddings |
//! | [`precedence`] | Hierarchy-aware authority/evidence/recency scoring |
//! | [`safety`] | Emergency and safety-flag regex detection |
//! | [`encoders`] | Query encoder and cross-encoder reranker trait boundary |
//! | [`retriever`] | Hybrid Retriever: merge, score, rerank |
//! | [`orchestrator`] | Query Orchestrator state machine |
//! | [`cache`] | Bounded TTL + LRU result cache |
//! | [`composer`] | External LLM composer facade |
//! | [`server`] | HTTP server (Axum) with CORS |
//!
//! ## Configuration
//!
//! IP Retrieve is configured via a TOML file (default: `config.toml`). See
//! [`config`] for all available options and [`config::load_config`] for
//! validation rules.

pub mod bm25;
pub mod cache;
pub mod chunk_store;
pub mod composer;
pub mod config;
pub mod dense;
pub mod encoders;
pub mod errors;
pub mod models;
pub mod normalizer;
pub mod orchestrator;
pub mod precedence;
pub mod retriever;
pub mod safety;
pub mod server;
pub mod types;
