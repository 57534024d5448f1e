//! Face identification against a gallery of labeled embeddings.
//!
//! A gallery is read from an [`EmbeddingSource`] (a directory of `.npy`
//! files, a JSON map, or memory), indexed with a random projection forest
//! from `facematch-rpforest`, and queried through a [`QueryEngine`]:
//!
//! ```
//! use facematch_faceid::{EngineConfig, MemorySource, QueryEngine};
//!
//! let gallery = MemorySource::new([
//!     ("alice", vec![1.0, 0.0, 0.0]),
//!     ("bob", vec![0.0, 1.0, 0.0]),
//!     ("carol", vec![0.99, 0.01, 0.0]),
//! ]);
//! let engine = QueryEngine::open(&gallery, EngineConfig::default())?;
//! assert_eq!(engine.resolve(&[1.0, 0.0, 0.0], 2)?, ["alice", "carol"]);
//! # Ok::<(), facematch_faceid::FaceIdError>(())
//! ```
//!
//! With [`EngineConfig::index_path`] set, the built forest is persisted and
//! reused by later opens as long as the gallery has not changed.

pub mod config;
pub mod engine;
pub mod error;
pub mod npy;
pub mod source;

pub use config::EngineConfig;
pub use engine::{Match, QueryEngine};
pub use error::FaceIdError;
pub use npy::{encode_npy, parse_npy, read_npy_vector};
pub use source::{EmbeddingSource, JsonSource, MemorySource, NpyDirSource};
