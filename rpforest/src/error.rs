use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForestError {
    #[error("rpforest: empty vector set")]
    EmptySet,

    #[error("rpforest: dimension mismatch: got {got}, want {want}")]
    DimensionMismatch { got: usize, want: usize },

    #[error("rpforest: invalid dimension {0}")]
    InvalidDimension(usize),

    #[error("rpforest: duplicate label {0:?}")]
    DuplicateLabel(String),

    #[error("rpforest: corrupt index: {0}")]
    CorruptIndex(String),

    #[error("rpforest: {0}")]
    Io(#[from] std::io::Error),
}
