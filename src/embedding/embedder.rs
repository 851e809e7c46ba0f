// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared, validated access to an embedding provider.

use std::sync::{Mutex, PoisonError};

use crate::errors::{RagError, Result};

use super::provider::EmbeddingProvider;

/// Text embedded once at startup when a provider does not declare its dimension.
pub const DIMENSION_SAMPLE: &str = "dimension probe";

/// Added to the L2 norm before dividing so zero vectors stay finite.
pub const NORM_EPSILON: f32 = 1e-10;

/// Wraps a provider with the dimension discovered at startup.
///
/// Every vector returned by [`Embedder::embed`] has exactly [`Embedder::dimension`]
/// components and unit L2 norm (or is all zeros when the provider returned zeros).
/// The provider sits behind a mutex so one `Embedder` can serve concurrent callers.
/// Providers take `&mut self` (the builtin fastembed model requires it), so
/// embedding calls are serialized: concurrent searches score and rank in
/// parallel but wait on each other while their queries are embedded.
pub struct Embedder {
    provider: Mutex<Box<dyn EmbeddingProvider>>,
    model_id: String,
    dimension: usize,
}

impl Embedder {
    /// Discovers the dimension from the provider's declaration, or by probing.
    pub fn new(mut provider: Box<dyn EmbeddingProvider>) -> Result<Self> {
        let dimension = match provider.dimension() {
            Some(dimension) => dimension,
            None => {
                let sample = provider
                    .embed_one(DIMENSION_SAMPLE)
                    .map_err(|e| RagError::embedding_unavailable(format!("{:#}", e)))?;
                sample.len()
            }
        };
        if dimension == 0 {
            return Err(RagError::embedding_unavailable(
                "embedding model reports zero dimensions",
            ));
        }

        let model_id = provider.model_id().to_string();
        tracing::debug!(model = %model_id, dimension, "embedder initialized");
        Ok(Self {
            provider: Mutex::new(provider),
            model_id,
            dimension,
        })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embeds `texts` in order, one unit-normalized vector per text.
    ///
    /// Fails with [`RagError::EmbeddingUnavailable`] if the provider errors,
    /// returns the wrong number of vectors, or returns a vector of the wrong length.
    pub fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut vectors = {
            let mut provider = self
                .provider
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            provider
                .embed_texts(texts)
                .map_err(|e| RagError::embedding_unavailable(format!("{:#}", e)))?
        };

        if vectors.len() != texts.len() {
            return Err(RagError::embedding_unavailable(format!(
                "expected {} vectors, provider returned {}",
                texts.len(),
                vectors.len()
            )));
        }
        if let Some((idx, bad)) = vectors
            .iter()
            .enumerate()
            .find(|(_, v)| v.len() != self.dimension)
        {
            return Err(RagError::embedding_unavailable(format!(
                "vector {} has {} dimensions, expected {}",
                idx,
                bad.len(),
                self.dimension
            )));
        }
        if vectors.iter().flatten().any(|v| !v.is_finite()) {
            return Err(RagError::embedding_unavailable(
                "provider returned non-finite values",
            ));
        }

        for vector in vectors.iter_mut() {
            l2_normalize(vector);
        }
        Ok(vectors)
    }

    /// Embeds a single query string.
    pub fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[query.to_string()])?;
        vectors
            .pop()
            .ok_or_else(|| RagError::embedding_unavailable("no embedding returned for query"))
    }
}

/// Scales `vector` by `1 / (‖vector‖ + NORM_EPSILON)`.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt() + NORM_EPSILON;
    for value in vector.iter_mut() {
        *value /= norm;
    }
}
