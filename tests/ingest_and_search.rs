// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests for ingestion and retrieval through the library API.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;

use docrag::embedding::{ChunkConfig, EmbeddingProvider};
use docrag::store::ChunkMeta;
use docrag::{Engine, RagError};
use tempfile::tempdir;

const DIM: usize = 16;

/// Bag-of-words embedding: each token adds 1.0 to a hashed bucket.
/// Records every batch it receives; fails on any text containing `FAIL`.
struct BagOfWords {
    batches: Arc<Mutex<Vec<Vec<String>>>>,
}

impl EmbeddingProvider for BagOfWords {
    fn model_id(&self) -> &str {
        "bag-of-words"
    }

    fn batch_size(&self) -> usize {
        32
    }

    fn dimension(&self) -> Option<usize> {
        Some(DIM)
    }

    fn embed_texts(&mut self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.batches.lock().unwrap().push(texts.to_vec());
        if texts.iter().any(|t| t.contains("FAIL")) {
            anyhow::bail!("backend unreachable");
        }
        Ok(texts.iter().map(|t| bag_of_words(t)).collect())
    }
}

fn bag_of_words(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0; DIM];
    for token in text.split_whitespace() {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        vector[(hasher.finish() % DIM as u64) as usize] += 1.0;
    }
    vector
}

struct Harness {
    dir: tempfile::TempDir,
    engine: Arc<Engine>,
    batches: Arc<Mutex<Vec<Vec<String>>>>,
}

fn harness(size: usize, overlap: usize) -> Harness {
    let dir = tempdir().unwrap();
    let batches = Arc::new(Mutex::new(Vec::new()));
    let provider = BagOfWords {
        batches: Arc::clone(&batches),
    };
    let engine = Engine::new(
        dir.path(),
        Box::new(provider),
        ChunkConfig::new(size, overlap).unwrap(),
        4,
    )
    .unwrap();
    Harness {
        dir,
        engine: Arc::new(engine),
        batches,
    }
}

fn store_files(dir: &Path) -> (Vec<u8>, Vec<u8>) {
    (
        std::fs::read(dir.join("embeddings.npy")).unwrap(),
        std::fs::read(dir.join("ids.json")).unwrap(),
    )
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[test]
fn three_windows_end_to_end() {
    let h = harness(1200, 200);
    let text = (0..2500)
        .map(|i| format!("w{}", i))
        .collect::<Vec<_>>()
        .join(" ");

    let outcome = h.engine.ingest("doc1", &text, &ChunkMeta::new()).unwrap();
    assert_eq!(outcome.added, 3);
    assert_eq!(outcome.source, "doc1");

    {
        let batches = h.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(batch.len(), 3);
        assert!(batch[0].starts_with("w0 "));
        assert!(batch[1].starts_with("w1000 "));
        assert!(batch[2].starts_with("w2000 "));
        assert_eq!(batch[2].split_whitespace().count(), 500);
    }

    let hits = h.engine.search("related query", Some(2)).unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].rank, 1);
    assert_eq!(hits[1].rank, 2);
    for hit in &hits {
        assert_eq!(hit.chunk.source, "doc1");
        assert!(hit.chunk.chunk_index <= 2);
    }
    assert_ne!(hits[0].chunk.id, hits[1].chunk.id);
}

#[test]
fn top_k_larger_than_store_returns_everything() {
    let h = harness(3, 0);
    h.engine
        .ingest("doc", "alpha beta gamma delta", &ChunkMeta::new())
        .unwrap();
    assert_eq!(h.engine.stats().unwrap().vectors, 2);

    let hits = h.engine.search("alpha", Some(10)).unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits.iter().map(|h| h.rank).collect::<Vec<_>>(), vec![1, 2]);
}

#[test]
fn empty_input_leaves_stores_unchanged() {
    let h = harness(5, 1);
    h.engine
        .ingest("doc", "one two three", &ChunkMeta::new())
        .unwrap();
    let before = store_files(h.dir.path());
    let calls_before = h.batches.lock().unwrap().len();

    let outcome = h.engine.ingest("empty", "", &ChunkMeta::new()).unwrap();
    assert_eq!(outcome.added, 0);
    assert_eq!(outcome.source, "empty");

    assert_eq!(store_files(h.dir.path()), before);
    assert_eq!(h.batches.lock().unwrap().len(), calls_before);
    assert_eq!(h.engine.stats().unwrap().chunks, 1);
}

#[test]
fn stored_vectors_are_unit_norm() {
    let h = harness(4, 1);
    h.engine
        .ingest(
            "doc",
            "the quick brown fox jumps over the lazy dog again and again",
            &ChunkMeta::new(),
        )
        .unwrap();

    let snapshot = h.engine.corpus().vectors().load().unwrap();
    assert!(!snapshot.is_empty());
    for row in snapshot.matrix.iter_rows() {
        let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6, "norm was {}", norm);
    }
}

#[test]
fn ranking_matches_brute_force() {
    let h = harness(3, 1);
    let docs = [
        ("a", "apple banana cherry apple banana"),
        ("b", "dog cat mouse"),
        ("c", "apple banana cherry apple banana"),
        ("d", "banana split sundae cherry"),
        ("e", "apple"),
    ];
    for (source, text) in docs {
        h.engine.ingest(source, text, &ChunkMeta::new()).unwrap();
    }

    let snapshot = h.engine.corpus().vectors().load().unwrap();
    let mut query = bag_of_words("apple banana");
    let norm = query.iter().map(|v| v * v).sum::<f32>().sqrt() + 1e-10;
    query.iter_mut().for_each(|v| *v /= norm);

    let mut expected: Vec<(usize, f32)> = snapshot
        .matrix
        .iter_rows()
        .map(|row| dot(row, &query))
        .enumerate()
        .collect();
    expected.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then(a.0.cmp(&b.0)));

    let hits = h.engine.search("apple banana", Some(snapshot.len())).unwrap();
    assert_eq!(hits.len(), snapshot.len());
    for (hit, (row, score)) in hits.iter().zip(&expected) {
        assert_eq!(hit.chunk.id, snapshot.ids[*row]);
        assert_eq!(hit.score, *score);
    }

    // Identical documents tie exactly; the earlier one ranks first.
    let a = hits.iter().position(|h| h.chunk.source == "a").unwrap();
    let c = hits.iter().position(|h| h.chunk.source == "c").unwrap();
    assert!(a < c);
}

#[test]
fn stores_stay_consistent_across_ingests() {
    let h = harness(4, 2);
    for i in 0..6 {
        let text = format!("document {} has some words and more words for chunk {}", i, i);
        let mut meta = ChunkMeta::new();
        meta.insert("n".to_string(), serde_json::json!(i));
        h.engine.ingest(&format!("src{}", i % 3), &text, &meta).unwrap();
    }

    let stats = h.engine.verify().unwrap();
    assert_eq!(stats.vectors, stats.chunks);
    assert_eq!(stats.sources, 3);

    let snapshot = h.engine.corpus().vectors().load().unwrap();
    let metadata = h.engine.corpus().metadata().unwrap();
    for id in &snapshot.ids {
        assert_eq!(&metadata.get(id).unwrap().id, id);
    }
}

#[test]
fn failed_embedding_writes_nothing() {
    let h = harness(4, 0);
    h.engine
        .ingest("good", "some good words here", &ChunkMeta::new())
        .unwrap();
    let before = store_files(h.dir.path());

    let err = h
        .engine
        .ingest("bad", "this chunk will FAIL to embed", &ChunkMeta::new())
        .unwrap_err();
    assert!(matches!(err, RagError::EmbeddingUnavailable { .. }));
    assert!(err.is_recoverable());

    assert_eq!(store_files(h.dir.path()), before);
    assert_eq!(h.engine.stats().unwrap().chunks, 1);
    assert!(!h.engine.corpus().is_poisoned());

    // Recoverable: the next ingest goes through.
    h.engine
        .ingest("retry", "different words entirely", &ChunkMeta::new())
        .unwrap();
    assert_eq!(h.engine.verify().unwrap().chunks, 2);
}

#[test]
fn divergence_is_reported_and_blocks_writes() {
    let h = harness(2, 0);
    h.engine
        .ingest("doc", "alpha beta gamma delta", &ChunkMeta::new())
        .unwrap();

    let conn = rusqlite::Connection::open(h.dir.path().join("meta.sqlite")).unwrap();
    conn.execute(
        "DELETE FROM chunks WHERE id = (SELECT id FROM chunks ORDER BY chunk_index LIMIT 1)",
        [],
    )
    .unwrap();

    let err = h.engine.search("alpha beta", Some(10)).unwrap_err();
    assert!(err.is_corrupt());
    assert_eq!(err.status_code(), "CORRUPT_STORE");

    let err = h
        .engine
        .ingest("more", "epsilon zeta", &ChunkMeta::new())
        .unwrap_err();
    assert!(err.is_corrupt());
    assert!(h.engine.verify().is_err());
}

#[test]
fn interrupted_ingest_is_detected_on_reopen() {
    let dir = tempdir().unwrap();
    let open = || {
        Engine::new(
            dir.path(),
            Box::new(BagOfWords {
                batches: Arc::new(Mutex::new(Vec::new())),
            }),
            ChunkConfig::new(4, 0).unwrap(),
            4,
        )
        .unwrap()
    };

    let engine = open();
    engine.ingest("doc", "a b c d", &ChunkMeta::new()).unwrap();
    // Vector files replaced, metadata never committed.
    engine
        .corpus()
        .vectors()
        .append(vec!["orphan".to_string()], &[bag_of_words("x")])
        .unwrap();
    drop(engine);
    let before = store_files(dir.path());

    let engine = open();
    assert!(engine.corpus().is_poisoned());
    let err = engine.ingest("doc2", "e f", &ChunkMeta::new()).unwrap_err();
    assert!(err.is_corrupt());
    assert_eq!(store_files(dir.path()), before);

    let err = engine.verify().unwrap_err();
    assert!(err.to_string().contains("orphan"), "{}", err);
    assert_eq!(engine.stats().unwrap().chunks, 1);
}

#[test]
fn searches_run_while_ingesting() {
    let h = harness(3, 1);
    h.engine
        .ingest("seed", "initial seed document text", &ChunkMeta::new())
        .unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&h.engine);
            thread::spawn(move || {
                for _ in 0..25 {
                    let hits = engine.search("document text", Some(3)).unwrap();
                    assert!(!hits.is_empty());
                    assert!(hits.len() <= 3);
                }
            })
        })
        .collect();

    for i in 0..10 {
        h.engine
            .ingest(
                &format!("doc{}", i),
                &format!("document {} text with several extra tokens", i),
                &ChunkMeta::new(),
            )
            .unwrap();
    }
    for reader in readers {
        reader.join().unwrap();
    }

    let stats = h.engine.verify().unwrap();
    assert_eq!(stats.vectors, stats.chunks);
    assert_eq!(stats.sources, 11);
}
