// SPDX-License-Identifier: MIT OR Apache-2.0

//! Top-k similarity search over a [`Corpus`].

use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::embedding::Embedder;
use crate::errors::{RagError, Result};
use crate::store::{ChunkRecord, Corpus};

/// One ranked result, the chunk's fields flattened next to its rank and score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// 1-based position in the result list
    pub rank: usize,
    /// Cosine similarity to the query
    pub score: f32,
    #[serde(flatten)]
    pub chunk: ChunkRecord,
}

pub struct RetrievalEngine {
    corpus: Arc<Corpus>,
    embedder: Arc<Embedder>,
    default_top_k: usize,
}

impl RetrievalEngine {
    pub fn new(corpus: Arc<Corpus>, embedder: Arc<Embedder>, default_top_k: usize) -> Result<Self> {
        if default_top_k == 0 {
            return Err(RagError::invalid("default top_k must be greater than 0"));
        }
        if corpus.dimension() != embedder.dimension() {
            return Err(RagError::invalid(format!(
                "embedder produces {} dimensions but the store holds {}",
                embedder.dimension(),
                corpus.dimension()
            )));
        }
        Ok(Self {
            corpus,
            embedder,
            default_top_k,
        })
    }

    /// Returns up to `top_k` chunks ranked by similarity to `query`.
    ///
    /// `None` uses the configured default. Equal scores rank in insertion
    /// order. A ranked id without a metadata row is reported as `CorruptStore`.
    pub fn search(&self, query: &str, top_k: Option<usize>) -> Result<Vec<SearchHit>> {
        let top_k = top_k.unwrap_or(self.default_top_k);
        if top_k == 0 {
            return Err(RagError::invalid("top_k must be greater than 0"));
        }

        // Ids seen under the read lock were committed to the metadata table too.
        let snapshot = {
            let _guard = self.corpus.read();
            self.corpus.observe(self.corpus.vectors().load())?
        };
        if snapshot.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed_query(query)?;
        let scores = snapshot.matrix.scores(&query_vector);
        let ranked = rank_top_k(&scores, top_k);

        let metadata = self.corpus.reader()?;
        let mut hits = Vec::with_capacity(ranked.len());
        for (position, index) in ranked.into_iter().enumerate() {
            let id = &snapshot.ids[index];
            let found = match &metadata {
                Some(metadata) => metadata.get(id),
                None => Err(RagError::NotFound { id: id.clone() }),
            };
            let chunk = match found {
                Ok(chunk) => chunk,
                Err(RagError::NotFound { id }) => {
                    return self.corpus.observe(Err(RagError::corrupt(format!(
                        "vector row {} has id {} but no metadata row",
                        index, id
                    ))));
                }
                Err(err) => return self.corpus.observe(Err(err)),
            };
            hits.push(SearchHit {
                rank: position + 1,
                score: scores[index],
                chunk,
            });
        }

        if let Some(top) = hits.first() {
            tracing::debug!(
                results = hits.len(),
                top_score = top.score,
                top_source = %top.chunk.source,
                "search complete"
            );
        }
        Ok(hits)
    }
}

/// Indices of the `k` highest scores, best first, ties in ascending index order.
fn rank_top_k(scores: &[f32], k: usize) -> Vec<usize> {
    let key = |index: usize| {
        let score = scores[index];
        if score.is_nan() {
            f32::NEG_INFINITY
        } else {
            score
        }
    };
    let by_rank = |a: &usize, b: &usize| {
        key(*b)
            .partial_cmp(&key(*a))
            .unwrap_or(Ordering::Equal)
            .then(a.cmp(b))
    };

    let mut order: Vec<usize> = (0..scores.len()).collect();
    if k < order.len() {
        order.select_nth_unstable_by(k - 1, by_rank);
        order.truncate(k);
    }
    order.sort_by(by_rank);
    order
}
