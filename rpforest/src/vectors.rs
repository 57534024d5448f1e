use std::collections::HashSet;
use std::fmt;

use crate::error::ForestError;

/// VectorSet is an immutable, ordered collection of labeled vectors that all
/// share one dimensionality.
///
/// Insertion order defines the position of each vector; those positions are
/// what trees store and what searches return. Labels are unique.
#[derive(Clone, PartialEq)]
pub struct VectorSet {
    dim: usize,
    labels: Vec<String>,
    // Row-major, `labels.len() * dim` values.
    data: Vec<f32>,
}

impl VectorSet {
    /// Build a set from `(label, vector)` pairs, keeping their order.
    ///
    /// Fails with [`ForestError::EmptySet`] when the source yields nothing,
    /// [`ForestError::InvalidDimension`] when the first vector is empty,
    /// [`ForestError::DimensionMismatch`] when lengths disagree and
    /// [`ForestError::DuplicateLabel`] when a label repeats.
    pub fn load<I, S>(source: I) -> Result<Self, ForestError>
    where
        I: IntoIterator<Item = (S, Vec<f32>)>,
        S: Into<String>,
    {
        let mut dim = None;
        let mut labels = Vec::new();
        let mut data = Vec::new();
        let mut seen = HashSet::new();

        for (label, vector) in source {
            let want = *dim.get_or_insert(vector.len());
            if want == 0 {
                return Err(ForestError::InvalidDimension(0));
            }
            if vector.len() != want {
                return Err(ForestError::DimensionMismatch {
                    got: vector.len(),
                    want,
                });
            }
            let label = label.into();
            if !seen.insert(label.clone()) {
                return Err(ForestError::DuplicateLabel(label));
            }
            labels.push(label);
            data.extend_from_slice(&vector);
        }

        match dim {
            None => Err(ForestError::EmptySet),
            Some(dim) => Ok(Self { dim, labels, data }),
        }
    }

    /// Reassemble a set from already-validated flat storage.
    pub(crate) fn from_parts(dim: usize, labels: Vec<String>, data: Vec<f32>) -> Self {
        debug_assert_eq!(labels.len() * dim, data.len());
        Self { dim, labels, data }
    }

    /// Dimensionality shared by every vector.
    pub fn dimension(&self) -> usize {
        self.dim
    }

    /// Number of vectors.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Vector at `index`, or `None` if out of range.
    pub fn get(&self, index: usize) -> Option<&[f32]> {
        (index < self.len()).then(|| self.row(index))
    }

    /// Label at `index`, or `None` if out of range.
    pub fn label_of(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Iterate `(label, vector)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.labels
            .iter()
            .map(String::as_str)
            .zip(self.data.chunks_exact(self.dim))
    }

    pub(crate) fn row(&self, index: usize) -> &[f32] {
        &self.data[index * self.dim..(index + 1) * self.dim]
    }
}

impl fmt::Debug for VectorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorSet")
            .field("dim", &self.dim)
            .field("len", &self.len())
            .finish()
    }
}
