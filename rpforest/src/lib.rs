//! Approximate nearest-neighbor search over labeled embeddings with a forest
//! of random projection trees.
//!
//! Each [`ProjectionTree`] recursively splits the positions of a
//! [`VectorSet`] by hyperplanes placed between two randomly chosen anchors,
//! down to small leaves. A [`ForestIndex`] builds several trees in parallel
//! and answers a query by walking all of them from one shared priority
//! frontier, so branches the query nearly fell into are visited too. The
//! union of visited leaves is then ranked by exact angular distance.
//!
//! ```
//! use std::sync::Arc;
//! use facematch_rpforest::{ForestConfig, ForestIndex, VectorSet};
//!
//! let set = VectorSet::load([
//!     ("alice", vec![1.0, 0.0, 0.0]),
//!     ("bob", vec![0.0, 1.0, 0.0]),
//!     ("carol", vec![0.99, 0.01, 0.0]),
//! ])?;
//! let index = ForestIndex::build(Arc::new(set), ForestConfig { seed: 7, ..Default::default() })?;
//!
//! let hits = index.search(&[1.0, 0.0, 0.0], 2)?;
//! let labels: Vec<_> = hits.iter().filter_map(|n| index.vectors().label_of(n.index)).collect();
//! assert_eq!(labels, ["alice", "carol"]);
//! # Ok::<(), facematch_rpforest::ForestError>(())
//! ```
//!
//! Forests persist with [`save_forest_file`] / [`load_forest_file`].

pub mod cosine;
pub mod error;
pub mod forest;
pub mod forest_io;
pub mod tree;
pub mod vectors;

pub use cosine::cosine_distance;
pub use error::ForestError;
pub use forest::{ForestConfig, ForestIndex, Neighbor};
pub use forest_io::{
    ensure_compatible, load as load_forest, load_file as load_forest_file, save as save_forest,
    save_file as save_forest_file,
};
pub use tree::{Hyperplane, Node, ProjectionTree};
pub use vectors::VectorSet;
