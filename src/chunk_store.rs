//! In-memory Chunk Store (§4.2).
//!
//! Persistent transactional storage is explicitly out of scope; the store
//! is built once from a corpus file and held read-only behind an `Arc` for
//! the lifetime of the process. Chunks are kept in an ordered `Vec` so that
//! row index 0..N lines up with the dense embedding matrix (§3 "Exactly one
//! embedding row per chunk"); lookup by id is a `HashMap` into that vector.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::errors::{IndexError, IpRetrieveError};
use crate::models::{Chunk, ChunkRecord};
use crate::types::{AuthorityTier, DocType, EvidenceLevel, SectionType};

/// Chunks under this token count are candidates for boilerplate exclusion;
/// they are only dropped if they additionally match [`boilerplate_patterns`]
/// (§3 invariant: "<80 tokens AND matching a boilerplate regex set").
const BOILERPLATE_MAX_TOKENS: usize = 80;

fn boilerplate_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)^\s*$",
            r"(?i)all rights reserved",
            r"(?i)page \d+ of \d+",
            r"(?i)^\s*copyright\b",
            r"(?i)downloaded from\b.*\bon\b",
            r"(?i)for personal use only",
            r"(?i)^\s*table of contents\s*$",
            r"(?i)^\s*references\s*$",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static boilerplate pattern is valid"))
        .collect()
    })
}

fn is_boilerplate(text: &str) -> bool {
    let token_count = text.split_whitespace().count();
    if token_count > BOILERPLATE_MAX_TOKENS {
        return false;
    }
    text.trim().is_empty() || boilerplate_patterns().iter().any(|re| re.is_match(text))
}

/// Extracts 5-digit numeric runs from chunk text, used as the CPT-code
/// fallback when an ingestion record doesn't supply `cpt_codes` explicitly
/// (§4.2: "...or by extracting 5-digit numeric tokens when not supplied").
fn extract_cpt_like(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_ascii_digit())
        .filter(|s| s.len() == 5)
        .map(|s| s.to_string())
        .collect()
}

pub struct ChunkStore {
    chunks: Vec<Chunk>,
    id_to_row: HashMap<String, usize>,
    doc_to_rows: HashMap<String, Vec<usize>>,
    /// CPT code -> chunk ids containing it, insertion order preserved.
    cpt_index: HashMap<String, Vec<String>>,
    /// Lower-cased alias -> chunk ids containing it.
    alias_index: HashMap<String, Vec<String>>,
    /// Stable hash over the loaded corpus, used to invalidate the result
    /// cache whenever the store is rebuilt from a different corpus.
    index_fingerprint: String,
}

impl ChunkStore {
    /// Parses newline-delimited JSON records into validated [`Chunk`]s.
    ///
    /// Fails fatally on a duplicate `chunk_id` (ingestion invariant) but
    /// silently drops boilerplate chunks and chunks whose text content
    /// exactly duplicates one already loaded within the same `doc_id`
    /// (content-hash dedup, §3).
    pub fn load(corpus_jsonl: &str) -> Result<Self, IpRetrieveError> {
        let mut chunks = Vec::new();
        let mut id_to_row = HashMap::new();
        let mut doc_to_rows: HashMap<String, Vec<usize>> = HashMap::new();
        let mut cpt_index: HashMap<String, Vec<String>> = HashMap::new();
        let mut alias_index: HashMap<String, Vec<String>> = HashMap::new();
        // doc_id -> set of normalized-text hashes already seen for that doc.
        let mut seen_hashes_by_doc: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut fingerprint_hasher = Sha256::new();

        for (line_no, line) in corpus_jsonl.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record: ChunkRecord = serde_json::from_str(line).map_err(|source| {
                IpRetrieveError::Index(IndexError::RecordParse { line: line_no + 1, source })
            })?;

            if is_boilerplate(&record.text) {
                tracing::debug!(chunk_id = %record.chunk_id, "dropping boilerplate chunk");
                continue;
            }

            let normalized_hash =
                format!("{:x}", Sha256::digest(record.text.to_lowercase().as_bytes()));
            let doc_seen = seen_hashes_by_doc.entry(record.doc_id.clone()).or_default();
            if let Some(existing) = doc_seen.get(&normalized_hash) {
                tracing::debug!(
                    chunk_id = %record.chunk_id,
                    duplicate_of = %existing,
                    "dropping content-duplicate chunk within doc_id"
                );
                continue;
            }

            if id_to_row.contains_key(&record.chunk_id) {
                return Err(IpRetrieveError::Index(IndexError::DuplicateChunkId(
                    record.chunk_id,
                )));
            }

            fingerprint_hasher.update(record.chunk_id.as_bytes());
            fingerprint_hasher.update(normalized_hash.as_bytes());
            doc_seen.insert(normalized_hash, record.chunk_id.clone());

            let cpt_codes = if record.cpt_codes.is_empty() {
                extract_cpt_like(&record.text)
            } else {
                record.cpt_codes
            };

            let chunk = Chunk {
                chunk_id: record.chunk_id.clone(),
                doc_id: record.doc_id.clone(),
                text: record.text,
                section_title: record.section_title,
                section_type: record.section_type.parse::<SectionType>().unwrap(),
                authority_tier: record.authority_tier.parse::<AuthorityTier>().unwrap(),
                evidence_level: record.evidence_level.parse::<EvidenceLevel>().unwrap(),
                year: record.year,
                doc_type: record.doc_type.parse::<DocType>().unwrap(),
                domain: record.domain,
                authors: record.authors,
                journal: record.journal,
                volume: record.volume,
                issue: record.issue,
                pages: record.pages,
                doi: record.doi,
                pmid: record.pmid,
                has_table: record.has_table,
                has_contraindication: record.has_contraindication,
                has_dose_setting: record.has_dose_setting,
                cpt_codes,
                aliases: record.aliases,
            };

            let row = chunks.len();
            for cpt in &chunk.cpt_codes {
                cpt_index.entry(cpt.clone()).or_default().push(chunk.chunk_id.clone());
            }
            for alias in &chunk.aliases {
                alias_index
                    .entry(alias.to_lowercase())
                    .or_default()
                    .push(chunk.chunk_id.clone());
            }
            doc_to_rows.entry(record.doc_id).or_default().push(row);
            id_to_row.insert(record.chunk_id, row);
            chunks.push(chunk);
        }

        if chunks.is_empty() {
            return Err(IpRetrieveError::Index(IndexError::EmptyCorpus));
        }

        let index_fingerprint = format!("{:x}", fingerprint_hasher.finalize());

        Ok(Self { chunks, id_to_row, doc_to_rows, cpt_index, alias_index, index_fingerprint })
    }

    pub fn get(&self, chunk_id: &str) -> Option<&Chunk> {
        self.id_to_row.get(chunk_id).map(|&row| &self.chunks[row])
    }

    pub fn row_of(&self, chunk_id: &str) -> Option<usize> {
        self.id_to_row.get(chunk_id).copied()
    }

    pub fn chunk_at_row(&self, row: usize) -> Option<&Chunk> {
        self.chunks.get(row)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    pub fn rows(&self) -> impl Iterator<Item = (usize, &Chunk)> {
        self.chunks.iter().enumerate()
    }

    pub fn rows_for_doc(&self, doc_id: &str) -> &[usize] {
        self.doc_to_rows.get(doc_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn chunk_ids_for_cpt(&self, code: &str) -> &[String] {
        self.cpt_index.get(code).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn chunk_ids_for_alias(&self, alias: &str) -> &[String] {
        self.alias_index.get(&alias.to_lowercase()).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn known_aliases(&self) -> impl Iterator<Item = &String> {
        self.alias_index.keys()
    }

    /// Summarizes (corpus size, schema version) into an opaque fingerprint
    /// string. Combined with an embedding dimension by [`crate::dense::DenseIndex`]
    /// callers when building the full index fingerprint used for cache keys.
    pub fn index_fingerprint(&self) -> &str {
        &self.index_fingerprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(chunk_id: &str, text: &str) -> String {
        let padded_text =
            format!("{text} a sufficiently long clinical passage to clear the minimum length");
        format!(
            r#"{{"chunk_id":"{chunk_id}","doc_id":"d1","text":"{padded_text}","cpt_codes":["31622"],"aliases":["EBUS"]}}"#
        )
    }

    #[test]
    fn boilerplate_short_chunks_are_excluded() {
        let corpus = r#"{"chunk_id":"c1","doc_id":"d1","text":"Copyright 2020 All rights reserved"}"#;
        let err = ChunkStore::load(corpus).unwrap_err();
        assert!(matches!(err, IpRetrieveError::Index(IndexError::EmptyCorpus)));
    }

    #[test]
    fn short_non_boilerplate_text_is_kept() {
        let corpus = r#"{"chunk_id":"c1","doc_id":"d1","text":"massive hemoptysis protocol"}"#;
        let store = ChunkStore::load(corpus).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn duplicate_chunk_id_is_fatal() {
        let text = "about bronchoscopy safety";
        let corpus = format!(
            "{}\n{}",
            sample_record("dup", text),
            sample_record("dup", "a different passage about stent placement")
        );
        let err = ChunkStore::load(&corpus).unwrap_err();
        assert!(matches!(err, IpRetrieveError::Index(IndexError::DuplicateChunkId(_))));
    }

    #[test]
    fn content_duplicates_within_same_doc_are_dropped() {
        let text = "about bronchoscopy safety";
        let corpus = format!("{}\n{}", sample_record("c1", text), sample_record("c2", text));
        let store = ChunkStore::load(&corpus).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn duplicate_text_across_docs_is_kept() {
        let text = "about bronchoscopy safety";
        let c1 = sample_record("c1", text).replace("\"d1\"", "\"d1\"");
        let c2 = sample_record("c2", text).replace("\"d1\"", "\"d2\"");
        let corpus = format!("{c1}\n{c2}");
        let store = ChunkStore::load(&corpus).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn cpt_and_alias_indices_are_populated() {
        let text = "about bronchoscopy safety";
        let store = ChunkStore::load(&sample_record("c1", text)).unwrap();
        assert_eq!(store.chunk_ids_for_cpt("31622"), &["c1".to_string()]);
        assert_eq!(store.chunk_ids_for_alias("ebus"), &["c1".to_string()]);
    }

    #[test]
    fn cpt_fallback_extraction_from_text_when_unsupplied() {
        let corpus = r#"{"chunk_id":"c1","doc_id":"d1","text":"billing guidance for cpt code 31633 ablation procedures explained"}"#;
        let store = ChunkStore::load(corpus).unwrap();
        assert_eq!(store.chunk_ids_for_cpt("31633"), &["c1".to_string()]);
    }

    #[test]
    fn row_index_is_stable_and_zero_based() {
        let text = "about bronchoscopy safety";
        let corpus = format!("{}\n{}", sample_record("c1", text), sample_record("c2", "other"));
        let store = ChunkStore::load(&corpus).unwrap();
        assert_eq!(store.row_of("c1"), Some(0));
        assert_eq!(store.row_of("c2"), Some(1));
    }

    #[test]
    fn fingerprint_changes_when_corpus_changes() {
        let text_a = "about bronchoscopy safety";
        let text_b = "about stent placement";
        let a = ChunkStore::load(&sample_record("c1", text_a)).unwrap();
        let b = ChunkStore::load(&sample_record("c1", text_b)).unwrap();
        assert_ne!(a.index_fingerprint(), b.index_fingerprint());
    }
}
