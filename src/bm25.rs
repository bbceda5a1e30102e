//! Sparse lexical scorer: Okapi BM25 over whitespace-tokenized, lowercased
//! chunk text (§4.3).
//!
//! Built once from the chunk store and held read-only; term-frequency scans
//! during `search` are parallelized across chunks with `rayon`, matching
//! the concurrency model in §5.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::chunk_store::ChunkStore;

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase().split_whitespace().map(|t| t.to_string()).collect()
}

struct DocEntry {
    chunk_id: String,
    term_freqs: HashMap<String, u32>,
    length: u32,
}

pub struct Bm25Index {
    docs: Vec<DocEntry>,
    /// term -> number of documents containing it.
    doc_freq: HashMap<String, u32>,
    avg_doc_len: f64,
    k1: f64,
    b: f64,
}

impl Bm25Index {
    pub fn build(store: &ChunkStore, k1: f64, b: f64) -> Self {
        let docs: Vec<DocEntry> = store
            .iter()
            .map(|chunk| {
                let tokens = tokenize(&chunk.text);
                let mut term_freqs = HashMap::new();
                for token in &tokens {
                    *term_freqs.entry(token.clone()).or_insert(0u32) += 1;
                }
                DocEntry { chunk_id: chunk.chunk_id.clone(), term_freqs, length: tokens.len() as u32 }
            })
            .collect();

        let mut doc_freq: HashMap<String, u32> = HashMap::new();
        for doc in &docs {
            for term in doc.term_freqs.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
        }

        let total_len: u64 = docs.iter().map(|d| d.length as u64).sum();
        let avg_doc_len = if docs.is_empty() { 0.0 } else { total_len as f64 / docs.len() as f64 };

        Self { docs, doc_freq, avg_doc_len, k1, b }
    }

    fn idf(&self, term: &str) -> f64 {
        let n = self.docs.len() as f64;
        let df = *self.doc_freq.get(term).unwrap_or(&0) as f64;
        // Standard BM25 IDF with +1 smoothing to keep it non-negative for
        // terms present in a majority of documents.
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Returns `(chunk_id, raw_score)` pairs sorted descending, zero-score
    /// entries excluded, truncated to `top_k`.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(String, f64)> {
        if self.docs.is_empty() {
            return Vec::new();
        }
        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return Vec::new();
        }

        let idfs: HashMap<String, f64> =
            query_terms.iter().map(|t| (t.clone(), self.idf(t))).collect();

        let mut scored: Vec<(String, f64)> = self
            .docs
            .par_iter()
            .filter_map(|doc| {
                let mut score = 0.0;
                for term in &query_terms {
                    let tf = *doc.term_freqs.get(term).unwrap_or(&0) as f64;
                    if tf == 0.0 {
                        continue;
                    }
                    let idf = idfs[term];
                    let numerator = tf * (self.k1 + 1.0);
                    let denominator =
                        tf + self.k1 * (1.0 - self.b + self.b * (doc.length as f64 / self.avg_doc_len));
                    score += idf * (numerator / denominator);
                }
                if score > 0.0 {
                    Some((doc.chunk_id.clone(), score))
                } else {
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(top_k);
        scored
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(texts: &[(&str, &str)]) -> ChunkStore {
        let corpus = texts
            .iter()
            .map(|(id, text)| {
                serde_json::to_string(&serde_json::json!({
                    "chunk_id": id,
                    "doc_id": "d1",
                    "text": text,
                }))
                .unwrap()
            })
            .collect::<Vec<_>>()
            .join("\n");
        ChunkStore::load(&corpus).unwrap()
    }

    #[test]
    fn relevant_document_outranks_irrelevant_one() {
        let store = store_with(&[
            ("c1", "massive hemoptysis requires urgent bronchoscopic intervention and airway control"),
            ("c2", "routine annual physical examination scheduling guidance for clinic staff members"),
        ]);
        let idx = Bm25Index::build(&store, 1.5, 0.75);
        let results = idx.search("massive hemoptysis bronchoscopy", 5);
        assert_eq!(results[0].0, "c1");
    }

    #[test]
    fn empty_corpus_returns_empty_results() {
        let idx = Bm25Index { docs: vec![], doc_freq: HashMap::new(), avg_doc_len: 0.0, k1: 1.5, b: 0.75 };
        assert!(idx.search("anything", 5).is_empty());
        assert!(idx.is_empty());
    }

    #[test]
    fn zero_score_results_are_excluded() {
        let store = store_with(&[("c1", "completely unrelated passage about scheduling logistics")]);
        let idx = Bm25Index::build(&store, 1.5, 0.75);
        assert!(idx.search("hemoptysis bronchoscopy", 5).is_empty());
    }
}
