//! External Composer Facade (§4.10).
//!
//! LLM answer composition is out of scope per §1 — this module packages
//! ranked chunks into a prompt context, invokes the external composer
//! through the [`Composer`] trait, and maps its output back into the
//! envelope. The facade never mutates `ranked_chunks`; it only selects and
//! truncates a view over them for the prompt.

use async_trait::async_trait;

use crate::errors::IpRetrieveError;
use crate::models::RetrievalResult;

/// What the composer returns, mapped directly into fields of the answer
/// envelope (§4.10 contract).
pub struct ComposerOutput {
    pub answer_text: String,
    pub used_citation_ids: Vec<String>,
    pub model_used: Option<String>,
}

/// `(query, ranked_chunks, safety_flags, is_emergency) -> answer` contract.
/// Implementer chooses the LLM; the facade holds only this trait boundary.
#[async_trait]
pub trait Composer: Send + Sync {
    async fn compose(
        &self,
        query: &str,
        context: &[PromptChunk],
        safety_flags: &[String],
        is_emergency: bool,
        model_hint: Option<&str>,
    ) -> Result<ComposerOutput, IpRetrieveError>;
}

/// A truncated, prompt-ready view of a ranked chunk. Distinct from
/// [`RetrievalResult`] so the facade's truncation never mutates the
/// original ranked list (§4.10: "must never alter ranked_chunks").
#[derive(Debug, Clone)]
pub struct PromptChunk {
    pub chunk_id: String,
    pub text: String,
    pub doc_id: String,
}

/// Builds the prompt context: top-N chunks truncated to a whitespace-token
/// budget. Truncation happens per-chunk from the front of the ranked list,
/// so higher-ranked chunks are represented first and in full where the
/// budget allows.
fn build_context(ranked: &[RetrievalResult], token_budget: usize) -> Vec<PromptChunk> {
    let mut remaining = token_budget;
    let mut out = Vec::new();
    for result in ranked {
        if remaining == 0 {
            break;
        }
        let tokens: Vec<&str> = result.text.split_whitespace().collect();
        let take = tokens.len().min(remaining);
        let text = tokens[..take].join(" ");
        remaining -= take;
        out.push(PromptChunk { chunk_id: result.chunk_id.clone(), text, doc_id: result.doc_id.clone() });
    }
    out
}

/// Safe fallback used both by [`NullComposer`] and when a configured
/// composer errors: a plain enumeration of the top chunk excerpts, so the
/// envelope's `answer_text` is never empty even when composition fails
/// (§4.10 "Errors from the composer are surfaced in warnings with the
/// envelope's textual answer being a safe fallback enumeration").
fn fallback_enumeration(ranked: &[RetrievalResult], max_chunks: usize) -> String {
    ranked
        .iter()
        .take(max_chunks)
        .enumerate()
        .map(|(i, r)| {
            let excerpt: String = r.text.split_whitespace().take(40).collect::<Vec<_>>().join(" ");
            format!("[{}] ({}) {excerpt}", i + 1, r.chunk_id)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Disabled-by-default stand-in: always produces the safe fallback
/// enumeration rather than calling out to an LLM.
pub struct NullComposer;

#[async_trait]
impl Composer for NullComposer {
    async fn compose(
        &self,
        _query: &str,
        context: &[PromptChunk],
        _safety_flags: &[String],
        _is_emergency: bool,
        _model_hint: Option<&str>,
    ) -> Result<ComposerOutput, IpRetrieveError> {
        let text = context
            .iter()
            .enumerate()
            .map(|(i, c)| format!("[{}] ({}) {}", i + 1, c.chunk_id, c.text))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(ComposerOutput {
            answer_text: text,
            used_citation_ids: context.iter().map(|c| c.chunk_id.clone()).collect(),
            model_used: None,
        })
    }
}

/// Thin `reqwest`-based adapter posting the assembled context to an
/// external composer service.
pub struct HttpComposer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpComposer {
    pub fn new(endpoint: impl Into<String>, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builds with a static configuration");
        Self { client, endpoint: endpoint.into() }
    }
}

#[derive(serde::Deserialize)]
struct ComposeResponse {
    answer_text: String,
    used_citation_ids: Vec<String>,
    model_used: Option<String>,
}

#[async_trait]
impl Composer for HttpComposer {
    async fn compose(
        &self,
        query: &str,
        context: &[PromptChunk],
        safety_flags: &[String],
        is_emergency: bool,
        model_hint: Option<&str>,
    ) -> Result<ComposerOutput, IpRetrieveError> {
        let body = serde_json::json!({
            "query": query,
            "context": context.iter().map(|c| serde_json::json!({
                "chunk_id": c.chunk_id, "text": c.text, "doc_id": c.doc_id,
            })).collect::<Vec<_>>(),
            "safety_flags": safety_flags,
            "is_emergency": is_emergency,
            "model_hint": model_hint,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| IpRetrieveError::DependencyDegradation(format!("composer request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(IpRetrieveError::DependencyDegradation(format!(
                "composer service returned {}",
                response.status()
            )));
        }

        let parsed: ComposeResponse = response
            .json()
            .await
            .map_err(|e| IpRetrieveError::DependencyDegradation(format!("malformed composer response: {e}")))?;

        Ok(ComposerOutput {
            answer_text: parsed.answer_text,
            used_citation_ids: parsed.used_citation_ids,
            model_used: parsed.model_used,
        })
    }
}

/// Runs the facade end-to-end: build the prompt context, invoke `composer`,
/// and degrade to the safe fallback enumeration on error. Always returns
/// `Ok`; composer failures are reported via the returned warning instead
/// of propagating, per §7's `DependencyDegradation` policy.
pub async fn compose_answer(
    composer: &dyn Composer,
    query: &str,
    ranked: &[RetrievalResult],
    safety_flags: &[String],
    is_emergency: bool,
    model_hint: Option<&str>,
    token_budget: usize,
    fallback_max_chunks: usize,
) -> (ComposerOutput, Option<String>) {
    let context = build_context(ranked, token_budget);
    match composer.compose(query, &context, safety_flags, is_emergency, model_hint).await {
        Ok(output) => (output, None),
        Err(err) => {
            let output = ComposerOutput {
                answer_text: fallback_enumeration(ranked, fallback_max_chunks),
                used_citation_ids: ranked.iter().take(fallback_max_chunks).map(|r| r.chunk_id.clone()).collect(),
                model_used: None,
            };
            (output, Some(format!("composer degraded: {err}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AuthorityTier, DocType, EvidenceLevel};

    fn sample_result(id: &str, text: &str) -> RetrievalResult {
        RetrievalResult {
            chunk_id: id.to_string(),
            text: text.to_string(),
            final_score: 0.9,
            doc_id: "d1".to_string(),
            section_title: String::new(),
            authority_tier: AuthorityTier::A4,
            evidence_level: EvidenceLevel::H3,
            year: 2020,
            doc_type: DocType::JournalArticle,
            precedence_score: 0.5,
            semantic_score: 0.5,
            bm25_score: 0.5,
            exact_match_score: 0.0,
            has_table: false,
            has_contraindication: false,
            has_dose_setting: false,
            is_emergency: false,
            authors: vec![],
            journal: String::new(),
            volume: String::new(),
            issue: String::new(),
            pages: String::new(),
            doi: String::new(),
            pmid: String::new(),
        }
    }

    #[tokio::test]
    async fn null_composer_enumerates_top_chunks() {
        let results = vec![sample_result("c1", "first chunk text"), sample_result("c2", "second chunk text")];
        let (output, warning) =
            compose_answer(&NullComposer, "q", &results, &[], false, None, 1000, 5).await;
        assert!(warning.is_none());
        assert!(output.answer_text.contains("c1"));
        assert!(output.answer_text.contains("c2"));
    }

    #[test]
    fn context_truncates_to_token_budget() {
        let results = vec![sample_result("c1", "one two three four five")];
        let context = build_context(&results, 3);
        assert_eq!(context[0].text, "one two three");
    }

    #[test]
    fn ranked_chunks_are_not_mutated_by_context_building() {
        let results = vec![sample_result("c1", "one two three four five")];
        let _ = build_context(&results, 3);
        assert_eq!(results[0].text, "one two three four five");
    }
}
