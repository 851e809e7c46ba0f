// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable storage for chunks - vector matrix plus metadata table
//!
//! The two stores are only ever written together, under the [`Corpus`]
//! writer lock. A `Corpus` that has seen them disagree refuses further writes.

pub mod metadata;
pub mod vectors;

pub use metadata::{ChunkMeta, ChunkRecord, MetadataStore};
pub use vectors::{VectorMatrix, VectorSnapshot, VectorStore};

use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::errors::{RagError, Result};

/// File name of the vector matrix inside the store directory.
pub const MATRIX_FILE: &str = "embeddings.npy";
/// File name of the ordered id list.
pub const IDS_FILE: &str = "ids.json";
/// File name of the metadata database.
pub const METADATA_FILE: &str = "meta.sqlite";

const DIMENSION_KEY: &str = "dimension";

/// Paths of the persisted files under one store directory.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    pub dir: PathBuf,
    pub matrix_path: PathBuf,
    pub ids_path: PathBuf,
    pub metadata_path: PathBuf,
}

impl StoreLayout {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        Self {
            matrix_path: dir.join(MATRIX_FILE),
            ids_path: dir.join(IDS_FILE),
            metadata_path: dir.join(METADATA_FILE),
            dir,
        }
    }
}

/// Row counts reported by [`Corpus::stats`] and [`Corpus::verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CorpusStats {
    pub vectors: u64,
    pub chunks: u64,
    pub sources: u64,
    pub dimension: usize,
}

/// Jointly consistent vector and metadata stores under one directory.
pub struct Corpus {
    layout: StoreLayout,
    dimension: usize,
    lock: RwLock<()>,
    poisoned: AtomicBool,
}

impl Corpus {
    /// Opens the store in an existing directory for vectors of `dimension` components.
    ///
    /// Nothing is written here. A store whose recorded dimension differs
    /// fails with `CorruptStore`; one whose vector and metadata row counts
    /// disagree opens poisoned, so reads still work and writes are refused.
    pub fn open(dir: impl AsRef<Path>, dimension: usize) -> Result<Self> {
        let dir = dir.as_ref();
        if dimension == 0 {
            return Err(RagError::invalid("store dimension must be greater than 0"));
        }
        if !dir.is_dir() {
            return Err(RagError::invalid(format!(
                "store directory {} does not exist",
                dir.display()
            )));
        }

        let corpus = Self {
            layout: StoreLayout::new(dir),
            dimension,
            lock: RwLock::new(()),
            poisoned: AtomicBool::new(false),
        };

        if let Some(metadata) = corpus.reader()? {
            if let Some(stored) = metadata.get_meta(DIMENSION_KEY)? {
                corpus.check_dimension(&stored)?;
            }
        }
        match corpus.check_row_counts() {
            Err(err) if err.is_corrupt() => {
                let _ = corpus.observe::<()>(Err(err));
            }
            other => other?,
        }

        Ok(corpus)
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn vectors(&self) -> VectorStore {
        VectorStore::new(
            self.layout.matrix_path.clone(),
            self.layout.ids_path.clone(),
            self.dimension,
        )
    }

    /// Opens a writable connection to the metadata table.
    ///
    /// Creates the database on first use and records the store dimension.
    pub fn metadata(&self) -> Result<MetadataStore> {
        let metadata = MetadataStore::open(&self.layout.metadata_path)?;
        match metadata.get_meta(DIMENSION_KEY)? {
            Some(stored) => self.check_dimension(&stored)?,
            None => metadata.set_meta(DIMENSION_KEY, &self.dimension.to_string())?,
        }
        Ok(metadata)
    }

    /// Opens a read-only connection, or `None` if nothing was ever ingested.
    pub fn reader(&self) -> Result<Option<MetadataStore>> {
        MetadataStore::open_read_only(&self.layout.metadata_path)
    }

    fn check_dimension(&self, stored: &str) -> Result<()> {
        if stored == self.dimension.to_string() {
            return Ok(());
        }
        Err(RagError::corrupt(format!(
            "store at {} was built with dimension {}, embedder produces {}",
            self.layout.dir.display(),
            stored,
            self.dimension
        )))
    }

    /// Compares the number of vector ids with the number of metadata rows.
    ///
    /// Cheaper than [`Corpus::verify`]; catches a crash between the vector
    /// write and the metadata commit.
    pub fn check_row_counts(&self) -> Result<()> {
        let vectors = self.vectors().load_ids()?.len() as u64;
        let chunks = match self.reader()? {
            Some(metadata) => metadata.count()?,
            None => 0,
        };
        if vectors != chunks {
            return Err(RagError::corrupt(format!(
                "store at {} holds {} vectors but {} metadata rows",
                self.layout.dir.display(),
                vectors,
                chunks
            )));
        }
        Ok(())
    }

    /// Shared lock for readers.
    pub fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive lock for the append-then-persist sequence.
    ///
    /// Fails without blocking once the corpus is poisoned.
    pub fn write(&self) -> Result<RwLockWriteGuard<'_, ()>> {
        self.ensure_writable()?;
        let guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);
        self.ensure_writable()?;
        Ok(guard)
    }

    pub fn ensure_writable(&self) -> Result<()> {
        if self.is_poisoned() {
            return Err(RagError::corrupt(format!(
                "store at {} diverged earlier; refusing writes until it is repaired",
                self.layout.dir.display()
            )));
        }
        Ok(())
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    /// Passes `result` through, poisoning the corpus if it is a `CorruptStore`.
    pub fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_corrupt() && !self.poisoned.swap(true, Ordering::SeqCst) {
                tracing::warn!(store = %self.layout.dir.display(), "store divergence detected: {}", err);
            }
        }
        result
    }

    /// Row counts without cross-checking ids.
    pub fn stats(&self) -> Result<CorpusStats> {
        let _guard = self.read();
        let snapshot = self.observe(self.vectors().load())?;
        let (chunks, sources) = match self.reader()? {
            Some(metadata) => (metadata.count()?, metadata.count_sources()?),
            None => (0, 0),
        };
        Ok(CorpusStats {
            vectors: snapshot.len() as u64,
            chunks,
            sources,
            dimension: self.dimension,
        })
    }

    /// Checks that every vector id has exactly one metadata row and vice versa.
    pub fn verify(&self) -> Result<CorpusStats> {
        let _guard = self.read();
        let result = self.verify_locked();
        self.observe(result)
    }

    fn verify_locked(&self) -> Result<CorpusStats> {
        let snapshot = self.vectors().load()?;
        let metadata = self.reader()?;

        let mut vector_ids = HashSet::with_capacity(snapshot.len());
        for id in &snapshot.ids {
            if !vector_ids.insert(id.as_str()) {
                return Err(RagError::corrupt(format!(
                    "id {} appears more than once in the vector store",
                    id
                )));
            }
        }

        let metadata_ids: HashSet<String> = match &metadata {
            Some(metadata) => metadata.ids()?.into_iter().collect(),
            None => HashSet::new(),
        };
        if let Some(missing) = snapshot.ids.iter().find(|id| !metadata_ids.contains(*id)) {
            return Err(RagError::corrupt(format!(
                "chunk {} has a vector but no metadata row",
                missing
            )));
        }
        if let Some(orphan) = metadata_ids
            .iter()
            .find(|id| !vector_ids.contains(id.as_str()))
        {
            return Err(RagError::corrupt(format!(
                "chunk {} has a metadata row but no vector",
                orphan
            )));
        }

        Ok(CorpusStats {
            vectors: snapshot.len() as u64,
            chunks: metadata_ids.len() as u64,
            sources: match &metadata {
                Some(metadata) => metadata.count_sources()?,
                None => 0,
            },
            dimension: self.dimension,
        })
    }
}
