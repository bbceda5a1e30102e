//! Error types for the retrieval engine.
//!
//! Library code returns [`IpRetrieveError`] via `thiserror`; the CLI
//! boundary in `main.rs` wraps these in `anyhow::Result` for display.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IpRetrieveError {
    #[error("invalid input: {0}")]
    Input(String),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("dependency degraded: {0}")]
    DependencyDegradation(String),

    #[error("fatal configuration error: {0}")]
    FatalConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures specific to building or querying the in-memory chunk/BM25/dense
/// indices. Kept separate from [`IpRetrieveError`] so index construction
/// code can be tested without pulling in the whole error surface.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("duplicate chunk_id '{0}' encountered while loading corpus")]
    DuplicateChunkId(String),

    #[error("failed to parse corpus record on line {line}: {source}")]
    RecordParse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("embedding matrix row count ({rows}) does not match chunk count ({chunks})")]
    EmbeddingShapeMismatch { rows: usize, chunks: usize },

    #[error("corpus is empty, cannot build an index")]
    EmptyCorpus,
}

pub type Result<T> = std::result::Result<T, IpRetrieveError>;
