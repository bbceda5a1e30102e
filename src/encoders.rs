//! Encoder and reranker trait boundary (§4.5).
//!
//! Embedding model inference and reranker inference are out of scope per
//! §1 — this module holds only the contract. Two reference adapters ship
//! per backend: a `Null*` stand-in (used in tests and when no backend is
//! configured) and an `Http*` adapter that calls an external service,
//! mirroring `context_harness::embedding`'s `DisabledProvider`/`OpenAIProvider`
//! split and retry policy.

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::IpRetrieveError;

/// `text -> unit vector` contract. Implementer chooses the model; the
/// retriever holds only this trait boundary.
#[async_trait]
pub trait QueryEncoder: Send + Sync {
    async fn encode(&self, text: &str) -> Result<Vec<f32>, IpRetrieveError>;

    /// Output vector dimensionality, used to validate against the dense
    /// index at startup.
    fn dims(&self) -> usize;
}

/// `(query, passage) -> score` contract. Order of input is preserved in
/// output, per §4.5.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    async fn rerank(&self, pairs: &[(String, String)]) -> Result<Vec<f64>, IpRetrieveError>;
}

/// Disabled-by-default stand-in. Used in tests and whenever no encoder
/// backend is configured; the retriever treats its error as "skip the
/// semantic component" per §4.7's failure semantics.
pub struct NullEncoder {
    dims: usize,
}

impl NullEncoder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait]
impl QueryEncoder for NullEncoder {
    async fn encode(&self, _text: &str) -> Result<Vec<f32>, IpRetrieveError> {
        Err(IpRetrieveError::DependencyDegradation("query encoder not configured".to_string()))
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

/// Disabled-by-default cross-encoder stand-in.
pub struct NullReranker;

#[async_trait]
impl CrossEncoder for NullReranker {
    async fn rerank(&self, _pairs: &[(String, String)]) -> Result<Vec<f64>, IpRetrieveError> {
        Err(IpRetrieveError::DependencyDegradation("reranker not configured".to_string()))
    }
}

/// Thin `reqwest`-based adapter posting to a configured embedding service.
/// Retry/backoff mirrors `context_harness::embedding::embed_openai`: HTTP
/// 429/5xx and network errors retry with exponential backoff capped at
/// 32s; other 4xx responses fail fast.
pub struct HttpQueryEncoder {
    client: reqwest::Client,
    endpoint: String,
    dims: usize,
    max_retries: u32,
}

impl HttpQueryEncoder {
    pub fn new(endpoint: impl Into<String>, dims: usize, timeout: Duration, max_retries: u32) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builds with a static configuration");
        Self { client, endpoint: endpoint.into(), dims, max_retries }
    }
}

#[async_trait]
impl QueryEncoder for HttpQueryEncoder {
    async fn encode(&self, text: &str) -> Result<Vec<f32>, IpRetrieveError> {
        let body = serde_json::json!({ "text": text });
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self.client.post(&self.endpoint).json(&body).send().await;
            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed: EncodeResponse = response.json().await.map_err(|e| {
                            IpRetrieveError::DependencyDegradation(format!(
                                "malformed encoder response: {e}"
                            ))
                        })?;
                        return Ok(parsed.embedding);
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(format!("encoder service returned {status}"));
                        continue;
                    }
                    return Err(IpRetrieveError::DependencyDegradation(format!(
                        "encoder service returned {status}"
                    )));
                }
                Err(e) => {
                    last_err = Some(e.to_string());
                    continue;
                }
            }
        }

        Err(IpRetrieveError::DependencyDegradation(
            last_err.unwrap_or_else(|| "encoder request exhausted retries".to_string()),
        ))
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

#[derive(serde::Deserialize)]
struct EncodeResponse {
    embedding: Vec<f32>,
}

/// Thin `reqwest`-based adapter posting batched `(query, passage)` pairs to
/// a configured cross-encoder service, with the same retry policy as
/// [`HttpQueryEncoder`].
pub struct HttpCrossEncoder {
    client: reqwest::Client,
    endpoint: String,
    max_retries: u32,
}

impl HttpCrossEncoder {
    pub fn new(endpoint: impl Into<String>, timeout: Duration, max_retries: u32) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builds with a static configuration");
        Self { client, endpoint: endpoint.into(), max_retries }
    }
}

#[derive(serde::Deserialize)]
struct RerankResponse {
    scores: Vec<f64>,
}

#[async_trait]
impl CrossEncoder for HttpCrossEncoder {
    async fn rerank(&self, pairs: &[(String, String)]) -> Result<Vec<f64>, IpRetrieveError> {
        let body = serde_json::json!({
            "pairs": pairs.iter().map(|(q, p)| serde_json::json!({"query": q, "passage": p})).collect::<Vec<_>>(),
        });
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self.client.post(&self.endpoint).json(&body).send().await;
            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed: RerankResponse = response.json().await.map_err(|e| {
                            IpRetrieveError::DependencyDegradation(format!(
                                "malformed reranker response: {e}"
                            ))
                        })?;
                        if parsed.scores.len() != pairs.len() {
                            return Err(IpRetrieveError::DependencyDegradation(
                                "reranker returned a score count that doesn't match input"
                                    .to_string(),
                            ));
                        }
                        return Ok(parsed.scores);
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(format!("reranker service returned {status}"));
                        continue;
                    }
                    return Err(IpRetrieveError::DependencyDegradation(format!(
                        "reranker service returned {status}"
                    )));
                }
                Err(e) => {
                    last_err = Some(e.to_string());
                    continue;
                }
            }
        }

        Err(IpRetrieveError::DependencyDegradation(
            last_err.unwrap_or_else(|| "reranker request exhausted retries".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_encoder_degrades_rather_than_panics() {
        let encoder = NullEncoder::new(384);
        let err = encoder.encode("query").await.unwrap_err();
        assert!(matches!(err, IpRetrieveError::DependencyDegradation(_)));
        assert_eq!(encoder.dims(), 384);
    }

    #[tokio::test]
    async fn null_reranker_degrades_rather_than_panics() {
        let reranker = NullReranker;
        let err = reranker.rerank(&[("q".into(), "p".into())]).await.unwrap_err();
        assert!(matches!(err, IpRetrieveError::DependencyDegradation(_)));
    }
}
