// SPDX-License-Identifier: MIT OR Apache-2.0

//! One-stop wiring of provider, embedder, corpus, ingestion and retrieval.

use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::{create_provider, ChunkConfig, Embedder, EmbeddingProvider};
use crate::errors::{RagError, Result};
use crate::ingest::{IngestOutcome, IngestionPipeline};
use crate::retrieve::{RetrievalEngine, SearchHit};
use crate::store::{ChunkMeta, Corpus, CorpusStats};

/// Shares one embedder and one corpus between ingestion and retrieval.
///
/// `Engine` is `Sync`; wrap it in an `Arc` to serve concurrent callers.
pub struct Engine {
    corpus: Arc<Corpus>,
    embedder: Arc<Embedder>,
    pipeline: IngestionPipeline,
    retrieval: RetrievalEngine,
}

impl Engine {
    /// Builds the configured provider and opens the store in `store_dir`.
    pub fn from_config(config: &Config, store_dir: &Path) -> Result<Self> {
        let provider = create_provider(config.embeddings())
            .map_err(|e| RagError::embedding_unavailable(format!("{:#}", e)))?;
        let chunking = ChunkConfig::new(config.chunking().size(), config.chunking().overlap())?;
        Self::new(store_dir, provider, chunking, config.search().top_k())
    }

    pub fn new(
        store_dir: &Path,
        provider: Box<dyn EmbeddingProvider>,
        chunking: ChunkConfig,
        default_top_k: usize,
    ) -> Result<Self> {
        let embedder = Arc::new(Embedder::new(provider)?);
        let corpus = Arc::new(Corpus::open(store_dir, embedder.dimension())?);
        let pipeline =
            IngestionPipeline::new(Arc::clone(&corpus), Arc::clone(&embedder), chunking)?;
        let retrieval =
            RetrievalEngine::new(Arc::clone(&corpus), Arc::clone(&embedder), default_top_k)?;
        Ok(Self {
            corpus,
            embedder,
            pipeline,
            retrieval,
        })
    }

    pub fn ingest(&self, source: &str, raw_text: &str, meta: &ChunkMeta) -> Result<IngestOutcome> {
        self.pipeline.ingest(source, raw_text, meta)
    }

    pub fn search(&self, query: &str, top_k: Option<usize>) -> Result<Vec<SearchHit>> {
        self.retrieval.search(query, top_k)
    }

    pub fn stats(&self) -> Result<CorpusStats> {
        self.corpus.stats()
    }

    pub fn verify(&self) -> Result<CorpusStats> {
        self.corpus.verify()
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    pub fn model_id(&self) -> &str {
        self.embedder.model_id()
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }
}
