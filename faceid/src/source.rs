use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::FaceIdError;
use crate::npy::read_npy_vector;

/// Yields the gallery: one `(label, embedding)` pair per identity.
///
/// The order of the returned pairs becomes the position order of the
/// vector set built from them, so implementations should be deterministic.
pub trait EmbeddingSource: Send + Sync {
    fn entries(&self) -> Result<Vec<(String, Vec<f32>)>, FaceIdError>;
}

/// Directory of `<label>.npy` files, one embedding per identity.
///
/// Files are read in file-name order; anything without an `.npy`
/// extension is skipped.
pub struct NpyDirSource {
    dir: PathBuf,
}

impl NpyDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl EmbeddingSource for NpyDirSource {
    fn entries(&self) -> Result<Vec<(String, Vec<f32>)>, FaceIdError> {
        let read_dir =
            fs::read_dir(&self.dir).map_err(|e| FaceIdError::malformed(&self.dir, e.to_string()))?;

        let mut files: Vec<PathBuf> = Vec::new();
        for entry in read_dir {
            let path = entry
                .map_err(|e| FaceIdError::malformed(&self.dir, e.to_string()))?
                .path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "npy") {
                files.push(path);
            }
        }
        files.sort();

        let mut out = Vec::with_capacity(files.len());
        for path in files {
            let label = label_of(&path)?;
            out.push((label, read_npy_vector(&path)?));
        }
        debug!(dir = %self.dir.display(), identities = out.len(), "faceid: read embeddings");
        Ok(out)
    }
}

fn label_of(path: &Path) -> Result<String, FaceIdError> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| FaceIdError::malformed(path, "file name is not a usable label"))
}

/// JSON object mapping labels to embeddings, e.g.
/// `{"alice": [0.1, 0.2], "bob": [0.3, 0.4]}`. Labels are taken in sorted
/// order.
pub struct JsonSource {
    path: PathBuf,
}

impl JsonSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl EmbeddingSource for JsonSource {
    fn entries(&self) -> Result<Vec<(String, Vec<f32>)>, FaceIdError> {
        let data =
            fs::read(&self.path).map_err(|e| FaceIdError::malformed(&self.path, e.to_string()))?;
        let map: BTreeMap<String, Vec<f32>> = serde_json::from_slice(&data)
            .map_err(|e| FaceIdError::malformed(&self.path, e.to_string()))?;
        Ok(map.into_iter().collect())
    }
}

/// In-memory gallery, returned in the order given.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    entries: Vec<(String, Vec<f32>)>,
}

impl MemorySource {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<f32>)>,
        S: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(|(l, v)| (l.into(), v)).collect(),
        }
    }
}

impl EmbeddingSource for MemorySource {
    fn entries(&self) -> Result<Vec<(String, Vec<f32>)>, FaceIdError> {
        Ok(self.entries.clone())
    }
}
