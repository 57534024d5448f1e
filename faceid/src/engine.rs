use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use facematch_rpforest::{
    ForestError, ForestIndex, VectorSet, ensure_compatible, load_forest_file, save_forest_file,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::FaceIdError;
use crate::source::EmbeddingSource;

/// Match is one ranked candidate identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    /// Identity label from the gallery.
    pub label: String,

    /// Angular distance to the query. Lower is more similar.
    pub distance: f32,
}

/// QueryEngine answers "who is this?" for query embeddings against a
/// gallery of labeled embeddings.
///
/// The engine is a long-lived object owned by the caller. It holds one
/// immutable forest at a time; [`refresh`](Self::refresh) and
/// [`rebuild`](Self::rebuild) prepare a replacement off to the side and
/// publish it with a single pointer swap, so queries never observe a
/// partially built index and never wait on disk I/O.
///
/// Thread-safe: all methods can be called concurrently.
pub struct QueryEngine {
    cfg: EngineConfig,
    // None when the gallery is empty.
    index: RwLock<Option<Arc<ForestIndex>>>,
    save_lock: Mutex<()>,
}

impl QueryEngine {
    /// Load the gallery from `source` and make its index ready.
    ///
    /// With `cfg.index_path` set, a persisted forest is reused when it was
    /// built over exactly this gallery with the same tree parameters;
    /// otherwise a fresh forest is built and persisted there. An empty
    /// gallery is not an error: the engine opens and every query returns
    /// no candidates.
    pub fn open(source: &dyn EmbeddingSource, cfg: EngineConfig) -> Result<Self, FaceIdError> {
        let cfg = cfg.with_defaults();
        let save_lock = Mutex::new(());
        let index = prepare(&cfg, source, &save_lock, true)?;
        Ok(Self {
            cfg,
            index: RwLock::new(index),
            save_lock,
        })
    }

    /// Labels of the nearest identities, most similar first, at most `k`.
    pub fn resolve(&self, query: &[f32], k: usize) -> Result<Vec<String>, FaceIdError> {
        Ok(self
            .resolve_matches(query, k)?
            .into_iter()
            .map(|m| m.label)
            .collect())
    }

    /// Like [`resolve`](Self::resolve), keeping each candidate's distance.
    pub fn resolve_matches(&self, query: &[f32], k: usize) -> Result<Vec<Match>, FaceIdError> {
        let Some(index) = self.snapshot() else {
            return Ok(Vec::new());
        };
        let set = index.vectors();
        Ok(index
            .search(query, k)?
            .into_iter()
            .filter_map(|n| {
                set.label_of(n.index).map(|label| Match {
                    label: label.to_string(),
                    distance: n.distance,
                })
            })
            .collect())
    }

    /// Resolve the first of the faces found in an image. No faces means no
    /// candidates.
    pub fn resolve_first(&self, faces: &[Vec<f32>], k: usize) -> Result<Vec<String>, FaceIdError> {
        match faces.first() {
            Some(face) => self.resolve(face, k),
            None => Ok(Vec::new()),
        }
    }

    /// The single most similar identity, if any.
    pub fn best_match(&self, query: &[f32]) -> Result<Option<String>, FaceIdError> {
        Ok(self.resolve(query, 1)?.into_iter().next())
    }

    /// Reload the gallery from `source`, reusing or rebuilding the index as
    /// [`open`](Self::open) does, then swap it in.
    pub fn refresh(&self, source: &dyn EmbeddingSource) -> Result<(), FaceIdError> {
        let next = prepare(&self.cfg, source, &self.save_lock, true)?;
        self.publish(next);
        Ok(())
    }

    /// Build a fresh forest over the current gallery, ignoring anything
    /// persisted, and swap it in.
    pub fn rebuild(&self) -> Result<(), FaceIdError> {
        let Some(current) = self.snapshot() else {
            return Ok(());
        };
        let next = load_or_build(&self.cfg, current.vectors().clone(), &self.save_lock, false)?;
        self.publish(Some(Arc::new(next)));
        Ok(())
    }

    /// The index queries currently run against.
    pub fn snapshot(&self) -> Option<Arc<ForestIndex>> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    /// Default number of candidates from the configuration.
    pub fn top_k(&self) -> usize {
        self.cfg.top_k
    }

    /// Number of identities in the gallery.
    pub fn len(&self) -> usize {
        self.snapshot().map_or(0, |index| index.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Embedding dimensionality, or `None` for an empty gallery.
    pub fn dimension(&self) -> Option<usize> {
        self.snapshot().map(|index| index.dimension())
    }

    fn publish(&self, next: Option<Arc<ForestIndex>>) {
        let identities = next.as_ref().map_or(0, |index| index.len());
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = next;
        info!(identities, "faceid: published index");
    }
}

fn prepare(
    cfg: &EngineConfig,
    source: &dyn EmbeddingSource,
    save_lock: &Mutex<()>,
    reuse_persisted: bool,
) -> Result<Option<Arc<ForestIndex>>, FaceIdError> {
    let set = match VectorSet::load(source.entries()?) {
        Ok(set) => Arc::new(set),
        Err(ForestError::EmptySet) => {
            warn!("faceid: gallery is empty, queries will return no candidates");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };
    let index = load_or_build(cfg, set, save_lock, reuse_persisted)?;
    info!(
        identities = index.len(),
        dim = index.dimension(),
        trees = index.trees().len(),
        "faceid: gallery ready"
    );
    Ok(Some(Arc::new(index)))
}

fn load_or_build(
    cfg: &EngineConfig,
    set: Arc<VectorSet>,
    save_lock: &Mutex<()>,
    reuse_persisted: bool,
) -> Result<ForestIndex, FaceIdError> {
    let Some(path) = cfg.index_path.as_deref() else {
        return Ok(ForestIndex::build(set, cfg.forest.clone())?);
    };

    if reuse_persisted && path.exists() {
        let loaded = load_forest_file(path)?;
        match stale_reason(cfg, &loaded, &set) {
            None => return Ok(loaded.with_search_k(cfg.forest.search_k)),
            Some(reason) => {
                warn!(
                    path = %path.display(),
                    reason = %reason,
                    "faceid: persisted index is stale, rebuilding"
                );
            }
        }
    }

    let index = ForestIndex::build(set, cfg.forest.clone())?;
    persist(&index, path, save_lock)?;
    Ok(index)
}

/// Why a persisted forest cannot serve `set` under `cfg`, if it cannot.
fn stale_reason(cfg: &EngineConfig, loaded: &ForestIndex, set: &VectorSet) -> Option<String> {
    if let Err(e) = ensure_compatible(loaded, set) {
        return Some(e.to_string());
    }
    if loaded.vectors().as_ref() != set {
        return Some("gallery changed".into());
    }
    let built = loaded.config();
    if built.num_trees != cfg.forest.num_trees || built.leaf_size != cfg.forest.leaf_size {
        return Some(format!(
            "built with {} trees and leaf size {}, configured {} and {}",
            built.num_trees, built.leaf_size, cfg.forest.num_trees, cfg.forest.leaf_size
        ));
    }
    None
}

fn persist(index: &ForestIndex, path: &Path, save_lock: &Mutex<()>) -> Result<(), FaceIdError> {
    let _guard = save_lock.lock().unwrap_or_else(PoisonError::into_inner);
    save_forest_file(index, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use facematch_rpforest::ForestConfig;

    use super::*;
    use crate::source::MemorySource;

    fn people() -> MemorySource {
        MemorySource::new([
            ("alice", vec![1.0, 0.0, 0.0]),
            ("bob", vec![0.0, 1.0, 0.0]),
            ("carol", vec![0.99, 0.01, 0.0]),
        ])
    }

    fn forest(seed: u64) -> ForestConfig {
        ForestConfig {
            num_trees: 8,
            leaf_size: 1,
            search_k: 0,
            seed,
        }
    }

    fn in_memory() -> EngineConfig {
        EngineConfig {
            forest: forest(42),
            ..Default::default()
        }
    }

    fn persisted(path: &Path, seed: u64) -> EngineConfig {
        EngineConfig {
            index_path: Some(path.to_path_buf()),
            forest: forest(seed),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_people() {
        let engine = QueryEngine::open(&people(), in_memory()).unwrap();
        assert_eq!(engine.len(), 3);
        assert_eq!(engine.dimension(), Some(3));
        assert_eq!(engine.top_k(), 5);

        let labels = engine.resolve(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(labels, ["alice", "carol"]);
        assert_eq!(
            engine.best_match(&[0.0, 1.0, 0.0]).unwrap().as_deref(),
            Some("bob")
        );
    }

    #[test]
    fn test_resolve_matches_ranked() {
        let engine = QueryEngine::open(&people(), in_memory()).unwrap();
        let matches = engine.resolve_matches(&[1.0, 0.0, 0.0], 3).unwrap();
        assert_eq!(matches.len(), 3);
        assert_eq!(matches[2].label, "bob");
        assert!(matches.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn test_empty_gallery() {
        let empty = MemorySource::default();
        let engine = QueryEngine::open(&empty, in_memory()).unwrap();
        assert!(engine.is_empty());
        assert_eq!(engine.dimension(), None);
        assert!(engine.resolve(&[1.0, 0.0], 5).unwrap().is_empty());
        assert_eq!(engine.best_match(&[1.0]).unwrap(), None);
        engine.rebuild().unwrap();
    }

    #[test]
    fn test_resolve_first() {
        let engine = QueryEngine::open(&people(), in_memory()).unwrap();
        assert!(engine.resolve_first(&[], 3).unwrap().is_empty());
        let faces = vec![vec![0.0, 1.0, 0.0], vec![1.0, 0.0, 0.0]];
        assert_eq!(engine.resolve_first(&faces, 1).unwrap(), ["bob"]);
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let engine = QueryEngine::open(&people(), in_memory()).unwrap();
        let err = engine.resolve(&[1.0, 0.0], 2).unwrap_err();
        assert!(matches!(
            err,
            FaceIdError::Index(ForestError::DimensionMismatch { got: 2, want: 3 })
        ));
    }

    #[test]
    fn test_inconsistent_gallery_is_an_error() {
        let bad = MemorySource::new([("a", vec![1.0, 0.0]), ("b", vec![1.0])]);
        assert!(matches!(
            QueryEngine::open(&bad, in_memory()),
            Err(FaceIdError::Index(ForestError::DimensionMismatch { .. }))
        ));
    }

    #[test]
    fn test_builds_and_persists_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faces.rpf");

        let engine = QueryEngine::open(&people(), persisted(&path, 1)).unwrap();
        assert!(path.exists());
        let on_disk = load_forest_file(&path).unwrap();
        assert_eq!(on_disk.trees(), engine.snapshot().unwrap().trees());
    }

    #[test]
    fn test_reuses_persisted_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faces.rpf");
        QueryEngine::open(&people(), persisted(&path, 1)).unwrap();
        let first = load_forest_file(&path).unwrap();

        // A different seed alone does not invalidate the stored forest.
        let engine = QueryEngine::open(&people(), persisted(&path, 2)).unwrap();
        assert_eq!(engine.snapshot().unwrap().trees(), first.trees());
        assert_eq!(engine.resolve(&[1.0, 0.0, 0.0], 2).unwrap(), ["alice", "carol"]);
    }

    #[test]
    fn test_rebuilds_when_gallery_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faces.rpf");
        QueryEngine::open(&people(), persisted(&path, 1)).unwrap();

        let grown = MemorySource::new([
            ("alice", vec![1.0, 0.0, 0.0]),
            ("bob", vec![0.0, 1.0, 0.0]),
            ("carol", vec![0.99, 0.01, 0.0]),
            ("dave", vec![0.0, 0.0, 1.0]),
        ]);
        let engine = QueryEngine::open(&grown, persisted(&path, 1)).unwrap();
        assert_eq!(engine.best_match(&[0.0, 0.1, 1.0]).unwrap().as_deref(), Some("dave"));
        assert_eq!(load_forest_file(&path).unwrap().len(), 4);
    }

    #[test]
    fn test_rebuilds_when_dimension_differs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faces.rpf");
        let flat = MemorySource::new([("alice", vec![1.0, 0.0]), ("bob", vec![0.0, 1.0])]);
        QueryEngine::open(&flat, persisted(&path, 1)).unwrap();

        let engine = QueryEngine::open(&people(), persisted(&path, 1)).unwrap();
        assert_eq!(engine.dimension(), Some(3));
        assert_eq!(load_forest_file(&path).unwrap().dimension(), 3);
    }

    #[test]
    fn test_rebuilds_when_tree_count_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faces.rpf");
        QueryEngine::open(&people(), persisted(&path, 1)).unwrap();

        let mut cfg = persisted(&path, 1);
        cfg.forest.num_trees = 3;
        let engine = QueryEngine::open(&people(), cfg).unwrap();
        assert_eq!(engine.snapshot().unwrap().trees().len(), 3);
    }

    #[test]
    fn test_corrupt_persisted_index_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faces.rpf");
        fs::write(&path, b"RPFT\x09\x00\x00\x00").unwrap();
        assert!(matches!(
            QueryEngine::open(&people(), persisted(&path, 1)),
            Err(FaceIdError::Index(ForestError::CorruptIndex(_)))
        ));
    }

    #[test]
    fn test_refresh_swaps_gallery() {
        let engine = QueryEngine::open(&people(), in_memory()).unwrap();
        let held = engine.snapshot().unwrap();

        engine
            .refresh(&MemorySource::new([("erin", vec![0.0, 0.0, 1.0])]))
            .unwrap();
        assert_eq!(engine.resolve(&[1.0, 0.0, 0.0], 5).unwrap(), ["erin"]);
        // Earlier snapshots stay usable.
        assert_eq!(held.len(), 3);

        engine.refresh(&MemorySource::default()).unwrap();
        assert!(engine.is_empty());
    }

    #[test]
    fn test_rebuild_rewrites_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faces.rpf");
        let engine = QueryEngine::open(&people(), persisted(&path, 1)).unwrap();

        fs::remove_file(&path).unwrap();
        engine.rebuild().unwrap();
        assert_eq!(load_forest_file(&path).unwrap().len(), 3);
    }

    #[test]
    fn test_concurrent_queries() {
        let engine = QueryEngine::open(&people(), in_memory()).unwrap();
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..100 {
                        let labels = engine.resolve(&[1.0, 0.0, 0.0], 2).unwrap();
                        assert_eq!(labels, ["alice", "carol"]);
                    }
                });
            }
            s.spawn(|| engine.refresh(&people()).unwrap());
        });
    }
}
