//! Dense vector index over chunk embeddings (§4.4).
//!
//! A row-major `Vec<f32>` matrix, one row per chunk, aligned by row index
//! to the [`crate::chunk_store::ChunkStore`] ordering. Cosine similarity is
//! computed via brute-force scan, parallelized with `rayon` across rows —
//! this corpus is small enough (thousands, not millions, of chunks) that an
//! ANN index would be premature; a brute-force scan stays exact and simple.

use rayon::prelude::*;

use crate::chunk_store::ChunkStore;
use crate::errors::{IndexError, IpRetrieveError};
use crate::types::AuthorityTier;

/// Conjunctive equality filters evaluated against chunk metadata (§4.4).
/// Every `Some` field must match for a candidate to survive; `None` fields
/// impose no constraint.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    pub authority_tier: Option<AuthorityTier>,
    pub has_table: Option<bool>,
    pub has_contraindication: Option<bool>,
    pub has_dose_setting: Option<bool>,
}

impl Filters {
    pub fn is_empty(&self) -> bool {
        self.authority_tier.is_none()
            && self.has_table.is_none()
            && self.has_contraindication.is_none()
            && self.has_dose_setting.is_none()
    }

    pub(crate) fn matches(&self, chunk: &crate::models::Chunk) -> bool {
        if let Some(tier) = self.authority_tier {
            if chunk.authority_tier != tier {
                return false;
            }
        }
        if let Some(v) = self.has_table {
            if chunk.has_table != v {
                return false;
            }
        }
        if let Some(v) = self.has_contraindication {
            if chunk.has_contraindication != v {
                return false;
            }
        }
        if let Some(v) = self.has_dose_setting {
            if chunk.has_dose_setting != v {
                return false;
            }
        }
        true
    }
}

pub struct DenseIndex {
    /// Row-major matrix: `vectors[row * dims .. (row + 1) * dims]`.
    vectors: Vec<f32>,
    dims: usize,
    rows: usize,
}

impl DenseIndex {
    /// Builds a dense index from a flat row-major matrix already aligned to
    /// the chunk store's row ordering. Each row is L2-normalized so cosine
    /// similarity reduces to a dot product.
    pub fn from_rows(mut vectors: Vec<f32>, dims: usize) -> Result<Self, IpRetrieveError> {
        if dims == 0 || vectors.len() % dims != 0 {
            return Err(IpRetrieveError::Index(IndexError::EmbeddingShapeMismatch {
                rows: vectors.len(),
                chunks: dims,
            }));
        }
        let rows = vectors.len() / dims;
        for row in 0..rows {
            let slice = &mut vectors[row * dims..(row + 1) * dims];
            let norm = slice.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
            if norm > 1e-12 {
                for x in slice.iter_mut() {
                    *x = (*x as f64 / norm) as f32;
                }
            }
        }
        Ok(Self { vectors, dims, rows })
    }

    pub fn validate_against(&self, store: &ChunkStore) -> Result<(), IpRetrieveError> {
        if self.rows != store.len() {
            return Err(IpRetrieveError::Index(IndexError::EmbeddingShapeMismatch {
                rows: self.rows,
                chunks: store.len(),
            }));
        }
        Ok(())
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    fn row(&self, row: usize) -> &[f32] {
        &self.vectors[row * self.dims..(row + 1) * self.dims]
    }

    /// Top-k cosine-similarity search against a (unit-norm) query vector,
    /// with optional conjunctive metadata filters evaluated before scoring
    /// to avoid wasted dot products on rows that can't survive anyway.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filters: &Filters,
        store: &ChunkStore,
    ) -> Vec<(String, f64)> {
        if query.len() != self.dims {
            tracing::warn!(
                query_dims = query.len(),
                index_dims = self.dims,
                "dense query vector dimension mismatch; returning no candidates"
            );
            return Vec::new();
        }

        let mut scored: Vec<(String, f64)> = (0..self.rows)
            .into_par_iter()
            .filter_map(|row| {
                let chunk = store.chunk_at_row(row)?;
                if !filters.is_empty() && !filters.matches(chunk) {
                    return None;
                }
                let vec_row = self.row(row);
                let score: f64 =
                    vec_row.iter().zip(query.iter()).map(|(a, b)| (*a as f64) * (*b as f64)).sum();
                Some((chunk.chunk_id.clone(), score))
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(top_k);
        scored
    }
}
