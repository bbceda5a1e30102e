//! Query text normalization: lowercasing, synonym expansion, and
//! fuzzy correction against the IP domain vocabulary.
//!
//! The synonym table and base vocabulary are ported from the Python
//! original's `query_normalizer.py`. Digit runs (CPT codes in particular)
//! are never touched by fuzzy correction, and the whole pipeline is
//! idempotent: normalizing an already-normalized string is a no-op.

use std::collections::HashMap;
use std::sync::OnceLock;

use unicode_normalization::UnicodeNormalization;

/// Fixed ligature-repair table: common PDF-extraction ligatures and
/// typographic substitutes that should collapse to their plain-ASCII
/// expansion before tokenization. Applied after NFKC, since NFKC already
/// folds most standard Unicode ligatures (`ﬁ` -> `fi`) but leaves
/// typographic punctuation (smart quotes, en/em dashes) untouched.
fn ligature_table() -> &'static HashMap<char, &'static str> {
    static TABLE: OnceLock<HashMap<char, &'static str>> = OnceLock::new();
    TABLE.get_or_init(|| {
        HashMap::from([
            ('\u{2018}', "'"),
            ('\u{2019}', "'"),
            ('\u{201C}', "\""),
            ('\u{201D}', "\""),
            ('\u{2013}', "-"),
            ('\u{2014}', "-"),
            ('\u{00A0}', " "),
            ('\u{FB00}', "ff"),
            ('\u{FB01}', "fi"),
            ('\u{FB02}', "fl"),
            ('\u{FB03}', "ffi"),
            ('\u{FB04}', "ffl"),
        ])
    })
}

/// Repairs ligatures and typographic punctuation left over after NFKC
/// decomposition (§4.1 step (c)).
fn repair_ligatures(text: &str) -> String {
    let table = ligature_table();
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match table.get(&c) {
            Some(replacement) => out.push_str(replacement),
            None => out.push(c),
        }
    }
    out
}

/// Longest-surface-form-first synonym table: surface form -> canonical term.
fn synonym_table() -> &'static Vec<(&'static str, &'static str)> {
    static TABLE: OnceLock<Vec<(&'static str, &'static str)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut pairs: Vec<(&'static str, &'static str)> = vec![
            ("tef", "tracheoesophageal fistula"),
            ("tracheo-esophageal fistula", "tracheoesophageal fistula"),
            ("benign growth", "benign"),
            ("non-cancerous", "benign"),
            ("noncancerous", "benign"),
            ("cancerous", "malignant"),
            ("malignancy", "malignant"),
            ("airway stent", "stent"),
            ("tracheal stent", "stent"),
            ("endobronchial ultrasound", "ebus"),
            ("endobronchial ultrasound-guided transbronchial needle aspiration", "ebus-tbna"),
            ("transbronchial needle aspiration", "tbna"),
            ("electromagnetic navigation bronchoscopy", "enb"),
            ("navigational bronchoscopy", "enb"),
            ("bronchial thermoplasty", "blvr"),
            ("bronchoscopic lung volume reduction", "blvr"),
            ("chronic obstructive pulmonary disease", "copd"),
            ("percutaneous dilational tracheostomy", "pdt"),
            ("percutaneous tracheostomy", "pdt"),
            ("argon plasma coagulation", "apc"),
            ("foreign body aspiration", "foreign body"),
            ("aspirated object", "foreign body"),
            ("massive bleeding", "massive hemoptysis"),
            ("life-threatening hemoptysis", "massive hemoptysis"),
            ("airway closure", "closure"),
            ("fistula closure", "closure"),
            ("treatment approach", "management"),
            ("treatment plan", "management"),
            ("adverse events", "complications"),
            ("side effects", "complications"),
            ("contraindicated", "contraindications"),
            ("when not to use", "contraindications"),
            ("fiducial marker", "fiducial"),
            ("fiducial markers", "fiducial"),
            ("tumor ablation", "ablation"),
            ("radiofrequency ablation", "ablation"),
        ];
        // Longest surface form first so overlapping patterns don't get
        // partially matched by a shorter one.
        pairs.sort_by_key(|(surface, _)| std::cmp::Reverse(surface.len()));
        pairs
    })
}

/// Base medical vocabulary, used as the fuzzy-correction candidate set.
fn base_vocabulary() -> &'static Vec<&'static str> {
    static VOCAB: OnceLock<Vec<&'static str>> = OnceLock::new();
    VOCAB.get_or_init(|| {
        vec![
            "tracheoesophageal", "fistula", "benign", "malignant", "stent", "ebus", "tbna",
            "ebus-tbna", "enb", "blvr", "copd", "pdt", "apc", "foreign", "body", "massive",
            "hemoptysis", "closure", "management", "complications", "contraindications",
            "fiducial", "ablation", "bronchoscopy", "tracheostomy", "pneumothorax",
            "bronchoscope", "biopsy", "lavage", "dilation", "cryotherapy", "brachytherapy",
            "mediastinoscopy", "thoracoscopy", "pleurodesis", "thoracentesis", "navigation",
            "ultrasound", "aspiration", "airway", "obstruction", "tumor", "nodule", "lesion",
            "cpt", "coding", "billing", "reimbursement", "modifier", "eligibility", "dose",
            "cryobiopsy", "valve", "emphysema", "bronchiectasis", "hemorrhage", "granulation",
            "stricture", "malacia", "fibrosis", "sarcoidosis", "tuberculosis", "empyema",
            "chylothorax", "hemothorax", "effusion", "intubation", "tracheomalacia",
        ]
    })
}

fn expand_synonyms(text: &str) -> String {
    let mut result = text.to_string();
    for (surface, canonical) in synonym_table() {
        result = replace_word_boundary(&result, surface, canonical);
    }
    result
}

/// Replaces whole-word (or whole-phrase) occurrences of `pattern` with
/// `replacement`, case-insensitively, without pulling in `regex` for what
/// is a fixed, pre-validated table of ASCII medical terms.
fn replace_word_boundary(text: &str, pattern: &str, replacement: &str) -> String {
    let lower_text = text.to_lowercase();
    let lower_pattern = pattern.to_lowercase();
    if lower_pattern.is_empty() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;
    while let Some(rel_idx) = lower_text[cursor..].find(&lower_pattern) {
        let start = cursor + rel_idx;
        let end = start + lower_pattern.len();
        let before_ok = text[..start]
            .chars()
            .last()
            .map(|c| !c.is_alphanumeric())
            .unwrap_or(true);
        let after_ok = text[end..]
            .chars()
            .next()
            .map(|c| !c.is_alphanumeric())
            .unwrap_or(true);
        out.push_str(&text[cursor..start]);
        if before_ok && after_ok {
            out.push_str(replacement);
        } else {
            out.push_str(&text[start..end]);
        }
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    out
}

/// Levenshtein edit distance between two strings, used to derive the
/// fuzzy-match ratio below. Hand-rolled rather than pulling in `strsim`.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (la, lb) = (a.len(), b.len());
    if la == 0 {
        return lb;
    }
    if lb == 0 {
        return la;
    }
    let mut prev: Vec<usize> = (0..=lb).collect();
    let mut curr = vec![0usize; lb + 1];
    for i in 1..=la {
        curr[0] = i;
        for j in 1..=lb {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[lb]
}

/// Similarity ratio on a 0-100 scale, matching rapidfuzz's `fuzz.ratio`
/// formula: `100 * (1 - distance / (len_a + len_b))`.
fn fuzzy_ratio(a: &str, b: &str) -> u8 {
    let total_len = a.chars().count() + b.chars().count();
    if total_len == 0 {
        return 100;
    }
    let dist = levenshtein(a, b);
    let ratio = 100.0 * (1.0 - (2.0 * dist as f64) / total_len as f64);
    ratio.clamp(0.0, 100.0).round() as u8
}

/// Finds the closest vocabulary entry to `token`, returning it only if the
/// ratio meets `threshold`. A token that already matches a vocab entry
/// exactly is never "corrected" to something else.
fn fuzzy_fix_token(token: &str, threshold: u8) -> Option<&'static str> {
    let lower = token.to_lowercase();
    if base_vocabulary().contains(&lower.as_str()) {
        return None;
    }
    base_vocabulary()
        .iter()
        .map(|candidate| (*candidate, fuzzy_ratio(&lower, candidate)))
        .filter(|(_, ratio)| *ratio >= threshold)
        .max_by_key(|(_, ratio)| *ratio)
        .map(|(candidate, _)| candidate)
}

/// A token that must never be fuzzy-corrected: any run containing a digit,
/// not just 5-digit CPT codes, since partial numeric tokens (dosages,
/// years embedded in a token) must also survive untouched.
fn has_digit(token: &str) -> bool {
    token.chars().any(|c| c.is_ascii_digit())
}

/// Normalizes a raw query: lowercase, NFKC, ligature repair, synonym
/// expansion, and fuzzy-correct non-numeric tokens against the domain
/// vocabulary (§4.1 steps a-e).
///
/// Idempotent: `normalize(normalize(q)) == normalize(q)`, since NFKC and
/// ligature repair are themselves idempotent, the synonym table maps onto
/// already-canonical forms, and fuzzy correction never fires on a token
/// that is already in the vocabulary.
pub fn normalize(query: &str, fuzzy_threshold: u8) -> String {
    let lowered = query.to_lowercase();
    let nfkc: String = lowered.nfkc().collect();
    let repaired = repair_ligatures(&nfkc);
    let expanded = expand_synonyms(&repaired);
    expanded
        .split_whitespace()
        .map(|token| {
            let trimmed: String =
                token.chars().filter(|c| c.is_alphanumeric() || *c == '-').collect();
            if trimmed.is_empty() || has_digit(&trimmed) {
                return token.to_string();
            }
            match fuzzy_fix_token(&trimmed, fuzzy_threshold) {
                Some(fixed) => fixed.to_string(),
                None => token.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extracts 5-digit CPT-code-shaped tokens from a raw query, in order of
/// appearance.
pub fn extract_cpt_codes(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| s.len() == 5)
        .map(|s| s.to_string())
        .collect()
}
