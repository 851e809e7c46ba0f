// SPDX-License-Identifier: MIT OR Apache-2.0

//! Document ingestion: clean, chunk, embed, then persist both stores together.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::embedding::{ChunkConfig, Chunker, Embedder};
use crate::errors::{RagError, Result};
use crate::store::{ChunkMeta, ChunkRecord, Corpus};
use crate::utils::{clean_text, new_chunk_id};

/// Result of one [`IngestionPipeline::ingest`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    pub added: usize,
    pub source: String,
}

/// Adds documents to a [`Corpus`].
pub struct IngestionPipeline {
    corpus: Arc<Corpus>,
    embedder: Arc<Embedder>,
    chunker: Chunker,
}

impl IngestionPipeline {
    pub fn new(corpus: Arc<Corpus>, embedder: Arc<Embedder>, chunking: ChunkConfig) -> Result<Self> {
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
            chunker: Chunker::new(chunking),
        })
    }

    /// Chunks and embeds `raw_text`, then records every chunk under `source`.
    ///
    /// Text that cleans to nothing adds zero chunks and leaves the stores
    /// untouched. Embedding runs before the writer lock is taken; if it fails
    /// nothing is written. The metadata transaction commits only after the
    /// vector files have been replaced, and a failed commit restores the
    /// previous vector files.
    pub fn ingest(&self, source: &str, raw_text: &str, meta: &ChunkMeta) -> Result<IngestOutcome> {
        if source.trim().is_empty() {
            return Err(RagError::invalid("source must not be empty"));
        }

        let text = clean_text(raw_text);
        let chunks: Vec<String> = self.chunker.chunk(&text).map(|chunk| chunk.text).collect();
        debug!(source, chunks = chunks.len(), "chunked document");
        if chunks.is_empty() {
            return Ok(IngestOutcome {
                added: 0,
                source: source.to_string(),
            });
        }

        self.corpus.ensure_writable()?;
        let vectors = self.embedder.embed(&chunks)?;

        let records: Vec<ChunkRecord> = chunks
            .into_iter()
            .enumerate()
            .map(|(chunk_index, text)| ChunkRecord {
                id: new_chunk_id(),
                source: source.to_string(),
                chunk_index,
                text,
                meta: meta.clone(),
            })
            .collect();

        let _guard = self.corpus.write()?;
        let result = self.persist(&records, &vectors);
        self.corpus.observe(result)?;

        info!(source, added = records.len(), "ingested document");
        Ok(IngestOutcome {
            added: records.len(),
            source: source.to_string(),
        })
    }

    /// Caller must hold the corpus writer lock.
    fn persist(&self, records: &[ChunkRecord], vectors: &[Vec<f32>]) -> Result<()> {
        let store = self.corpus.vectors();
        let mut snapshot = store.load()?;
        let mut metadata = self.corpus.metadata()?;
        let rows = metadata.count()?;
        if rows != snapshot.len() as u64 {
            return Err(RagError::corrupt(format!(
                "store at {} holds {} vectors but {} metadata rows; refusing to append",
                self.corpus.layout().dir.display(),
                snapshot.len(),
                rows
            )));
        }

        let previous_len = snapshot.len();
        let ids = records.iter().map(|record| record.id.clone()).collect();
        snapshot.extend(ids, vectors)?;

        let mut vectors_touched = false;
        let result = metadata.insert_then(records, || {
            vectors_touched = true;
            store.persist(&snapshot)
        });

        let Err(err) = result else {
            return Ok(());
        };
        if !vectors_touched {
            return Err(err);
        }

        snapshot.truncate(previous_len);
        match store.persist(&snapshot) {
            Ok(()) => Err(err),
            Err(restore) => Err(RagError::corrupt(format!(
                "ingestion failed ({}) and the vector store could not be restored: {}",
                err, restore
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{DummyProvider, EmbeddingProvider};
    use tempfile::tempdir;

    struct Unreachable;

    impl EmbeddingProvider for Unreachable {
        fn model_id(&self) -> &str {
            "unreachable"
        }

        fn batch_size(&self) -> usize {
            16
        }

        fn dimension(&self) -> Option<usize> {
            Some(4)
        }

        fn embed_texts(&mut self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            anyhow::bail!("connection refused")
        }
    }

    fn pipeline(dir: &std::path::Path, provider: Box<dyn EmbeddingProvider>) -> IngestionPipeline {
        let embedder = Arc::new(Embedder::new(provider).unwrap());
        let corpus = Arc::new(Corpus::open(dir, embedder.dimension()).unwrap());
        IngestionPipeline::new(corpus, embedder, ChunkConfig::new(4, 1).unwrap()).unwrap()
    }

    #[test]
    fn empty_text_touches_nothing() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline(dir.path(), Box::new(DummyProvider::new(4)));

        let outcome = pipeline.ingest("doc", " \n\t ", &ChunkMeta::new()).unwrap();
        assert_eq!(
            outcome,
            IngestOutcome {
                added: 0,
                source: "doc".to_string()
            }
        );
        assert!(!pipeline.corpus.layout().matrix_path.exists());
        assert!(!pipeline.corpus.layout().ids_path.exists());
        assert!(pipeline.corpus.reader().unwrap().is_none());
    }

    #[test]
    fn empty_source_is_invalid() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline(dir.path(), Box::new(DummyProvider::new(4)));
        let err = pipeline.ingest("  ", "text", &ChunkMeta::new()).unwrap_err();
        assert_eq!(err.status_code(), "INVALID_INPUT");
    }

    #[test]
    fn records_chunks_with_batch_positions_and_meta() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline(dir.path(), Box::new(DummyProvider::new(4)));
        let mut meta = ChunkMeta::new();
        meta.insert("filename".to_string(), serde_json::json!("notes.txt"));

        // 10 tokens, size 4, step 3: starts 0, 3, 6, 9
        let text = "t0 t1 t2\nt3 t4 t5 t6 t7 t8 t9";
        let outcome = pipeline.ingest("notes", text, &meta).unwrap();
        assert_eq!(outcome.added, 4);

        let snapshot = pipeline.corpus.vectors().load().unwrap();
        assert_eq!(snapshot.len(), 4);
        let metadata = pipeline.corpus.metadata().unwrap();
        for (position, id) in snapshot.ids.iter().enumerate() {
            let record = metadata.get(id).unwrap();
            assert_eq!(record.chunk_index, position);
            assert_eq!(record.source, "notes");
            assert_eq!(record.meta, meta);
        }
        assert_eq!(metadata.get(&snapshot.ids[0]).unwrap().text, "t0 t1 t2 t3");
        assert_eq!(metadata.get(&snapshot.ids[3]).unwrap().text, "t9");
    }

    #[test]
    fn reingesting_restarts_chunk_index() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline(dir.path(), Box::new(DummyProvider::new(4)));
        pipeline.ingest("doc", "a b c", &ChunkMeta::new()).unwrap();
        pipeline.ingest("doc", "a b c", &ChunkMeta::new()).unwrap();

        let snapshot = pipeline.corpus.vectors().load().unwrap();
        assert_eq!(snapshot.len(), 2);
        let metadata = pipeline.corpus.metadata().unwrap();
        assert_eq!(metadata.get(&snapshot.ids[0]).unwrap().chunk_index, 0);
        assert_eq!(metadata.get(&snapshot.ids[1]).unwrap().chunk_index, 0);
        assert_ne!(snapshot.ids[0], snapshot.ids[1]);
    }

    #[test]
    fn failed_embedding_writes_nothing() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline(dir.path(), Box::new(Unreachable));
        let err = pipeline.ingest("doc", "some text", &ChunkMeta::new()).unwrap_err();
        assert!(err.is_recoverable());
        assert!(!pipeline.corpus.layout().matrix_path.exists());
        assert!(pipeline.corpus.reader().unwrap().is_none());
        assert!(!pipeline.corpus.is_poisoned());
    }

    #[test]
    fn corrupt_store_poisons_pipeline() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline(dir.path(), Box::new(DummyProvider::new(4)));
        pipeline.ingest("doc", "a b c", &ChunkMeta::new()).unwrap();
        std::fs::write(&pipeline.corpus.layout().ids_path, b"[]").unwrap();

        let err = pipeline.ingest("doc", "d e f", &ChunkMeta::new()).unwrap_err();
        assert!(err.is_corrupt());
        assert!(pipeline.corpus.is_poisoned());

        // Refused before the store is even read.
        std::fs::remove_file(&pipeline.corpus.layout().ids_path).unwrap();
        let err = pipeline.ingest("doc", "g h", &ChunkMeta::new()).unwrap_err();
        assert!(err.is_corrupt());
    }

    #[test]
    fn unrecorded_vector_blocks_append() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline(dir.path(), Box::new(DummyProvider::new(4)));
        pipeline.ingest("doc", "a b c", &ChunkMeta::new()).unwrap();
        pipeline
            .corpus
            .vectors()
            .append(vec!["stray".to_string()], &[vec![0.0; 4]])
            .unwrap();
        let before = std::fs::read(&pipeline.corpus.layout().ids_path).unwrap();

        let err = pipeline.ingest("doc2", "e f", &ChunkMeta::new()).unwrap_err();
        assert!(err.is_corrupt());
        assert!(err.to_string().contains("2 vectors but 1 metadata rows"), "{}", err);
        assert!(pipeline.corpus.is_poisoned());
        assert_eq!(std::fs::read(&pipeline.corpus.layout().ids_path).unwrap(), before);
        assert_eq!(pipeline.corpus.metadata().unwrap().count().unwrap(), 1);
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        let dir = tempdir().unwrap();
        let embedder = Arc::new(Embedder::new(Box::new(DummyProvider::new(4))).unwrap());
        let corpus = Arc::new(Corpus::open(dir.path(), 8).unwrap());
        assert!(IngestionPipeline::new(corpus, embedder, ChunkConfig::default()).is_err());
    }
}
