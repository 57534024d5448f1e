use std::path::PathBuf;

use facematch_rpforest::ForestError;
use thiserror::Error;

/// Errors returned by faceid operations.
#[derive(Debug, Error)]
pub enum FaceIdError {
    #[error(transparent)]
    Index(#[from] ForestError),

    #[error("faceid: embedding source {}: {reason}", path.display())]
    Source { path: PathBuf, reason: String },

    #[error("faceid: config: {0}")]
    Config(String),
}

impl FaceIdError {
    pub(crate) fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Source {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
