// SPDX-License-Identifier: MIT OR Apache-2.0

//! Append-only vector matrix persisted as a `.npy` file plus a JSON id list.
//!
//! The matrix file is a NumPy v1.0 array (`<f4`, C order, shape `(rows, D)`),
//! so it is self-describing and readable by other tools. Row `i` of the matrix
//! belongs to `ids[i]`; the position is used only to find the id.
//!
//! Both files are replaced atomically: the new contents go to a temporary file
//! in the same directory, are synced, then renamed over the old file.

use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::errors::{RagError, Result};

const NPY_MAGIC: &[u8] = b"\x93NUMPY";
const NPY_ALIGN: usize = 64;
const F32_DESCR: &str = "<f4";

static DESCR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'descr'\s*:\s*'([^']*)'").expect("static regex"));
static FORTRAN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'fortran_order'\s*:\s*(True|False)").expect("static regex"));
static SHAPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"'shape'\s*:\s*\(\s*(\d+)\s*,\s*(\d+)\s*,?\s*\)").expect("static regex")
});

/// Dense row-major matrix of `f32` with a fixed column count.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatrix {
    dimension: usize,
    data: Vec<f32>,
}

impl VectorMatrix {
    /// A matrix with zero rows.
    pub fn empty(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    /// Builds a matrix from rows, all of which must have `dimension` components.
    pub fn from_rows(dimension: usize, rows: &[Vec<f32>]) -> Result<Self> {
        let mut matrix = Self::empty(dimension);
        for row in rows {
            matrix.push_row(row)?;
        }
        Ok(matrix)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn rows(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        let start = index.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimension.max(1))
    }

    /// Row-major backing storage.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn push_row(&mut self, row: &[f32]) -> Result<()> {
        if row.len() != self.dimension {
            return Err(RagError::invalid(format!(
                "vector has {} dimensions, store expects {}",
                row.len(),
                self.dimension
            )));
        }
        self.data.extend_from_slice(row);
        Ok(())
    }

    fn truncate_rows(&mut self, rows: usize) {
        self.data.truncate(rows * self.dimension);
    }

    /// Dot product of `query` with every row, in row order.
    pub fn scores(&self, query: &[f32]) -> Vec<f32> {
        if self.dimension == 0 || query.len() != self.dimension {
            return Vec::new();
        }
        self.data
            .par_chunks_exact(self.dimension)
            .map(|row| dot(row, query))
            .collect()
    }

    fn to_npy(&self) -> Vec<u8> {
        let dict = format!(
            "{{'descr': '{}', 'fortran_order': False, 'shape': ({}, {}), }}",
            F32_DESCR,
            self.rows(),
            self.dimension
        );
        // magic + version (2) + header length (2) + dict + trailing newline
        let unpadded = NPY_MAGIC.len() + 2 + 2 + dict.len() + 1;
        let padding = (NPY_ALIGN - unpadded % NPY_ALIGN) % NPY_ALIGN;
        let header_len = dict.len() + padding + 1;

        let mut bytes = Vec::with_capacity(unpadded + padding + self.data.len() * 4);
        bytes.extend_from_slice(NPY_MAGIC);
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header_len as u16).to_le_bytes());
        bytes.extend_from_slice(dict.as_bytes());
        bytes.extend(std::iter::repeat(b' ').take(padding));
        bytes.push(b'\n');
        bytes.extend(self.data.iter().flat_map(|f| f.to_le_bytes()));
        bytes
    }

    fn from_npy(bytes: &[u8]) -> std::result::Result<Self, String> {
        if bytes.len() < NPY_MAGIC.len() + 4 || !bytes.starts_with(NPY_MAGIC) {
            return Err("missing NumPy magic header".to_string());
        }
        let major = bytes[NPY_MAGIC.len()];
        let (header_len, header_start) = match major {
            1 => {
                let at = NPY_MAGIC.len() + 2;
                (u16::from_le_bytes([bytes[at], bytes[at + 1]]) as usize, at + 2)
            }
            2 | 3 => {
                let at = NPY_MAGIC.len() + 2;
                if bytes.len() < at + 4 {
                    return Err("truncated header length".to_string());
                }
                let len = u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
                (len as usize, at + 4)
            }
            other => return Err(format!("unsupported NumPy format version {}", other)),
        };

        let data_start = header_start + header_len;
        let header = bytes
            .get(header_start..data_start)
            .and_then(|h| std::str::from_utf8(h).ok())
            .ok_or_else(|| "truncated or non-text header".to_string())?;

        let descr = DESCR_RE
            .captures(header)
            .map(|c| c[1].to_string())
            .ok_or_else(|| "header has no dtype".to_string())?;
        if descr != F32_DESCR {
            return Err(format!("dtype {} is not {}", descr, F32_DESCR));
        }
        if FORTRAN_RE.captures(header).map(|c| c[1].to_string()).as_deref() != Some("False") {
            return Err("only C-ordered matrices are supported".to_string());
        }
        let shape = SHAPE_RE
            .captures(header)
            .ok_or_else(|| "header has no two-dimensional shape".to_string())?;
        let rows: usize = shape[1].parse().map_err(|_| "bad row count".to_string())?;
        let cols: usize = shape[2].parse().map_err(|_| "bad column count".to_string())?;

        let payload = &bytes[data_start..];
        let expected = rows
            .checked_mul(cols)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| "shape overflows".to_string())?;
        if payload.len() != expected {
            return Err(format!(
                "payload is {} bytes, shape ({}, {}) needs {}",
                payload.len(),
                rows,
                cols,
                expected
            ));
        }

        let data = payload
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(Self {
            dimension: cols,
            data,
        })
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Matrix and id list as loaded at one moment.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSnapshot {
    pub matrix: VectorMatrix,
    pub ids: Vec<String>,
}

impl VectorSnapshot {
    pub fn empty(dimension: usize) -> Self {
        Self {
            matrix: VectorMatrix::empty(dimension),
            ids: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Appends rows in order. Nothing is appended if any row is rejected.
    pub fn extend(&mut self, ids: Vec<String>, vectors: &[Vec<f32>]) -> Result<()> {
        if ids.len() != vectors.len() {
            return Err(RagError::invalid(format!(
                "{} ids for {} vectors",
                ids.len(),
                vectors.len()
            )));
        }
        let rows_before = self.matrix.rows();
        for vector in vectors {
            if let Err(err) = self.matrix.push_row(vector) {
                self.matrix.truncate_rows(rows_before);
                return Err(err);
            }
        }
        self.ids.extend(ids);
        Ok(())
    }

    /// Drops every row at or after `len`.
    pub fn truncate(&mut self, len: usize) {
        self.matrix.truncate_rows(len);
        self.ids.truncate(len);
    }
}

/// File-backed vector store.
#[derive(Debug, Clone)]
pub struct VectorStore {
    matrix_path: PathBuf,
    ids_path: PathBuf,
    dimension: usize,
}

impl VectorStore {
    pub fn new(matrix_path: PathBuf, ids_path: PathBuf, dimension: usize) -> Self {
        Self {
            matrix_path,
            ids_path,
            dimension,
        }
    }

    /// Reads the persisted matrix and id list.
    ///
    /// Missing files read as empty. Fails with `CorruptStore` when the matrix
    /// has the wrong column count or its row count differs from the id count.
    pub fn load(&self) -> Result<VectorSnapshot> {
        let matrix = match self.read_matrix()? {
            Some(matrix) => matrix,
            None => VectorMatrix::empty(self.dimension),
        };
        let ids = self.read_ids()?.unwrap_or_default();

        if matrix.dimension() != self.dimension {
            return Err(RagError::corrupt(format!(
                "{} has {} columns, expected {}",
                self.matrix_path.display(),
                matrix.dimension(),
                self.dimension
            )));
        }
        if matrix.rows() != ids.len() {
            return Err(RagError::corrupt(format!(
                "{} has {} rows but {} lists {} ids",
                self.matrix_path.display(),
                matrix.rows(),
                self.ids_path.display(),
                ids.len()
            )));
        }

        tracing::debug!(rows = ids.len(), "loaded vector store");
        Ok(VectorSnapshot { matrix, ids })
    }

    /// Loads the current state, appends `ids`/`vectors` in order and persists.
    pub fn append(&self, ids: Vec<String>, vectors: &[Vec<f32>]) -> Result<VectorSnapshot> {
        let mut snapshot = self.load()?;
        snapshot.extend(ids, vectors)?;
        self.persist(&snapshot)?;
        Ok(snapshot)
    }

    /// Atomically replaces both files with `snapshot`.
    pub fn persist(&self, snapshot: &VectorSnapshot) -> Result<()> {
        if snapshot.matrix.dimension() != self.dimension {
            return Err(RagError::invalid(format!(
                "snapshot has dimension {}, store expects {}",
                snapshot.matrix.dimension(),
                self.dimension
            )));
        }
        if snapshot.matrix.rows() != snapshot.ids.len() {
            return Err(RagError::invalid(format!(
                "snapshot has {} rows for {} ids",
                snapshot.matrix.rows(),
                snapshot.ids.len()
            )));
        }

        write_atomic(&self.matrix_path, &snapshot.matrix.to_npy())?;
        write_atomic(&self.ids_path, &serde_json::to_vec(&snapshot.ids)?)?;
        Ok(())
    }

    fn read_matrix(&self) -> Result<Option<VectorMatrix>> {
        let bytes = match std::fs::read(&self.matrix_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RagError::io(&self.matrix_path, e)),
        };
        VectorMatrix::from_npy(&bytes)
            .map(Some)
            .map_err(|reason| {
                RagError::corrupt(format!("{}: {}", self.matrix_path.display(), reason))
            })
    }

    /// Reads only the id list; a missing file reads as empty.
    pub fn load_ids(&self) -> Result<Vec<String>> {
        Ok(self.read_ids()?.unwrap_or_default())
    }

    fn read_ids(&self) -> Result<Option<Vec<String>>> {
        let bytes = match std::fs::read(&self.ids_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RagError::io(&self.ids_path, e)),
        };
        serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            RagError::corrupt(format!("{}: {}", self.ids_path.display(), e))
        })
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| RagError::io(dir, e))?;
    tmp.write_all(bytes).map_err(|e| RagError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| RagError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| RagError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(dir: &Path, dimension: usize) -> VectorStore {
        VectorStore::new(
            dir.join("embeddings.npy"),
            dir.join("ids.json"),
            dimension,
        )
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn load_without_files_is_empty() {
        let dir = tempdir().unwrap();
        let snapshot = store_in(dir.path(), 384).load().unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.matrix.rows(), 0);
        assert_eq!(snapshot.matrix.dimension(), 384);
    }

    #[test]
    fn append_round_trips_bit_identical() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), 3);
        let first = vec![vec![0.1f32, -0.2, 0.3], vec![f32::MIN_POSITIVE, 1.0, -0.0]];
        let second = vec![vec![0.5773503f32, 0.5773503, 0.5773503]];

        store.append(ids(&["a", "b"]), &first).unwrap();
        store.append(ids(&["c"]), &second).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.ids, ids(&["a", "b", "c"]));
        let expected: Vec<u32> = first
            .iter()
            .chain(second.iter())
            .flatten()
            .map(|f| f.to_bits())
            .collect();
        let actual: Vec<u32> = loaded.matrix.as_slice().iter().map(|f| f.to_bits()).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn npy_header_is_aligned_and_self_describing() {
        let matrix = VectorMatrix::from_rows(2, &[vec![1.0, 2.0]]).unwrap();
        let bytes = matrix.to_npy();
        assert!(bytes.starts_with(NPY_MAGIC));
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % 64, 0);
        let header = std::str::from_utf8(&bytes[10..10 + header_len]).unwrap();
        assert!(header.contains("'shape': (1, 2)"));
        assert!(header.ends_with('\n'));
        assert_eq!(bytes.len(), 10 + header_len + 8);
    }

    #[test]
    fn wrong_column_count_is_corrupt() {
        let dir = tempdir().unwrap();
        store_in(dir.path(), 4)
            .append(ids(&["a"]), &[vec![1.0, 0.0, 0.0, 0.0]])
            .unwrap();

        let err = store_in(dir.path(), 3).load().unwrap_err();
        assert!(err.is_corrupt(), "{}", err);
        assert!(err.to_string().contains("4 columns, expected 3"));
    }

    #[test]
    fn row_id_mismatch_is_corrupt() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), 2);
        store
            .append(ids(&["a", "b"]), &[vec![1.0, 0.0], vec![0.0, 1.0]])
            .unwrap();
        std::fs::write(dir.path().join("ids.json"), r#"["a"]"#).unwrap();

        let err = store.load().unwrap_err();
        assert!(err.is_corrupt());
        assert!(err.to_string().contains("2 rows"));
    }

    #[test]
    fn missing_id_file_with_rows_is_corrupt() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), 2);
        store.append(ids(&["a"]), &[vec![1.0, 0.0]]).unwrap();
        std::fs::remove_file(dir.path().join("ids.json")).unwrap();
        assert!(store.load().unwrap_err().is_corrupt());
    }

    #[test]
    fn garbage_matrix_is_corrupt() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("embeddings.npy"), b"not a matrix").unwrap();
        assert!(store_in(dir.path(), 2).load().unwrap_err().is_corrupt());
    }

    #[test]
    fn empty_matrix_file_is_corrupt() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("embeddings.npy"), b"").unwrap();
        std::fs::write(dir.path().join("ids.json"), b"[]").unwrap();
        let err = store_in(dir.path(), 2).load().unwrap_err();
        assert!(err.to_string().contains("magic header"), "{}", err);
    }

    #[test]
    fn ids_load_without_matrix() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), 2);
        assert!(store.load_ids().unwrap().is_empty());
        store.append(ids(&["a", "b"]), &[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        assert_eq!(store.load_ids().unwrap(), ids(&["a", "b"]));
    }

    #[test]
    fn truncated_payload_is_corrupt() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), 2);
        store.append(ids(&["a"]), &[vec![1.0, 0.0]]).unwrap();
        let path = dir.path().join("embeddings.npy");
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 2);
        std::fs::write(&path, bytes).unwrap();
        assert!(store.load().unwrap_err().is_corrupt());
    }

    #[test]
    fn rejected_row_leaves_snapshot_unchanged() {
        let mut snapshot = VectorSnapshot::empty(2);
        let err = snapshot
            .extend(ids(&["a", "b"]), &[vec![1.0, 0.0], vec![1.0]])
            .unwrap_err();
        assert_eq!(err.status_code(), "INVALID_INPUT");
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.matrix.rows(), 0);
    }

    #[test]
    fn no_temp_files_left_behind() {
        let dir = tempdir().unwrap();
        store_in(dir.path(), 1)
            .append(ids(&["a"]), &[vec![1.0]])
            .unwrap();
        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["embeddings.npy", "ids.json"]);
    }

    #[test]
    fn scores_are_dot_products_in_row_order() {
        let matrix =
            VectorMatrix::from_rows(2, &[vec![1.0, 0.0], vec![0.0, 1.0], vec![0.6, 0.8]]).unwrap();
        assert_eq!(matrix.scores(&[1.0, 0.0]), vec![1.0, 0.0, 0.6]);
        assert!(matrix.scores(&[1.0]).is_empty());
        assert_eq!(matrix.row(2), Some(&[0.6f32, 0.8][..]));
        assert_eq!(matrix.row(3), None);
        assert_eq!(matrix.iter_rows().count(), 3);
    }
}
