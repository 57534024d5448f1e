use std::fs;
use std::path::{Path, PathBuf};

use facematch_rpforest::ForestConfig;
use serde::{Deserialize, Serialize};

use crate::error::FaceIdError;

/// Controls the query engine.
///
/// ```yaml
/// index_path: data/faces.rpf
/// top_k: 5
/// forest:
///   num_trees: 10
///   leaf_size: 16
///   seed: 42
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Where the built forest is persisted. Without it every open builds a
    /// fresh forest in memory.
    pub index_path: Option<PathBuf>,

    /// Number of candidates returned when the caller does not say.
    /// Default: 5.
    pub top_k: usize,

    /// Forest build and search parameters.
    pub forest: ForestConfig,
}

impl EngineConfig {
    pub fn with_defaults(mut self) -> Self {
        if self.top_k == 0 {
            self.top_k = 5;
        }
        self.forest = self.forest.with_defaults();
        self
    }

    /// Read a YAML (`.yaml`, `.yml`) or JSON (`.json`) config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FaceIdError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .map_err(|e| FaceIdError::Config(format!("read {}: {e}", path.display())))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let cfg: Self = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&data)
                .map_err(|e| FaceIdError::Config(format!("{}: {e}", path.display())))?,
            "json" => serde_json::from_str(&data)
                .map_err(|e| FaceIdError::Config(format!("{}: {e}", path.display())))?,
            other => {
                return Err(FaceIdError::Config(format!(
                    "{}: unsupported config extension {other:?}",
                    path.display()
                )));
            }
        };
        Ok(cfg.with_defaults())
    }
}
