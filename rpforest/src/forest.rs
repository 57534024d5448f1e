use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cosine::cosine_distance;
use crate::error::ForestError;
use crate::tree::{Node, ProjectionTree};
use crate::vectors::VectorSet;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// ForestConfig configures how a [`ForestIndex`] is built and searched.
///
/// Zero values mean "use the default" except for `seed`, where zero is an
/// ordinary seed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    /// Number of trees. More trees raise recall and build cost.
    /// Default: 10.
    pub num_trees: usize,
    /// Largest partition that is stored as a leaf instead of split.
    /// Default: 16.
    pub leaf_size: usize,
    /// Leaf entries to visit across the whole forest per query.
    /// Default: `num_trees * k`.
    pub search_k: usize,
    /// Seed for anchor selection. Equal seeds build equal forests.
    pub seed: u64,
}

impl ForestConfig {
    pub fn with_defaults(mut self) -> Self {
        if self.num_trees == 0 {
            self.num_trees = 10;
        }
        if self.leaf_size == 0 {
            self.leaf_size = 16;
        }
        self
    }

    fn budget(&self, k: usize) -> usize {
        let search_k = if self.search_k == 0 {
            self.num_trees.saturating_mul(k)
        } else {
            self.search_k
        };
        search_k.max(k)
    }
}

/// Neighbor is one search hit: a position in the [`VectorSet`] and its exact
/// angular distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub distance: f32,
}

// ---------------------------------------------------------------------------
// Search frontier
// ---------------------------------------------------------------------------

/// An unexplored subtree, ranked by how far the query sat from the nearest
/// hyperplane on the way down. Max-heap: the most confident branch first.
struct Pending {
    priority: f32,
    tree: u32,
    node: u32,
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .partial_cmp(&other.priority)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.tree.cmp(&self.tree))
            .then_with(|| other.node.cmp(&self.node))
    }
}
impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for Pending {}

// ---------------------------------------------------------------------------
// ForestIndex
// ---------------------------------------------------------------------------

/// ForestIndex is an ensemble of [`ProjectionTree`]s over one [`VectorSet`].
///
/// Immutable once built; searches take `&self` and may run concurrently.
#[derive(Debug)]
pub struct ForestIndex {
    cfg: ForestConfig,
    set: Arc<VectorSet>,
    trees: Vec<ProjectionTree>,
}

impl ForestIndex {
    /// Build `cfg.num_trees` trees over `set` in parallel.
    ///
    /// Each tree draws from its own RNG derived from `cfg.seed` and its
    /// ordinal, so the result does not depend on thread scheduling.
    pub fn build(set: Arc<VectorSet>, cfg: ForestConfig) -> Result<Self, ForestError> {
        if set.dimension() == 0 {
            return Err(ForestError::InvalidDimension(0));
        }
        let cfg = cfg.with_defaults();
        let started = Instant::now();

        let trees: Vec<ProjectionTree> = (0..cfg.num_trees)
            .into_par_iter()
            .map(|ordinal| {
                let mut rng = StdRng::seed_from_u64(tree_seed(cfg.seed, ordinal as u64));
                ProjectionTree::build(&set, cfg.leaf_size, &mut rng)
            })
            .collect();

        info!(
            trees = trees.len(),
            vectors = set.len(),
            dim = set.dimension(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rpforest: built forest"
        );

        Ok(Self { cfg, set, trees })
    }

    /// Assemble an index from parts that the caller has already validated.
    pub(crate) fn from_parts(
        set: Arc<VectorSet>,
        cfg: ForestConfig,
        trees: Vec<ProjectionTree>,
    ) -> Self {
        Self { cfg, set, trees }
    }

    /// Return up to `k` approximate nearest neighbors of `query`, closest
    /// first, using the configured search budget.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, ForestError> {
        self.search_with_budget(query, k, self.cfg.budget(k))
    }

    /// Like [`search`](Self::search) with an explicit number of leaf entries
    /// to visit. Candidates are ranked by exact distance; only candidate
    /// generation is approximate.
    pub fn search_with_budget(
        &self,
        query: &[f32],
        k: usize,
        search_k: usize,
    ) -> Result<Vec<Neighbor>, ForestError> {
        if query.len() != self.set.dimension() {
            return Err(ForestError::DimensionMismatch {
                got: query.len(),
                want: self.set.dimension(),
            });
        }
        if k == 0 || self.set.is_empty() {
            return Ok(vec![]);
        }

        let candidates = self.candidates(query, search_k.max(k));

        let mut results: Vec<Neighbor> = candidates
            .into_iter()
            .map(|index| Neighbor {
                index,
                distance: cosine_distance(query, self.set.row(index)),
            })
            .collect();
        results.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.index.cmp(&b.index))
        });
        results.truncate(k);
        Ok(results)
    }

    /// Walk all trees from one shared frontier until `search_k` leaf entries
    /// have been visited or nothing is left, returning the distinct positions
    /// seen.
    fn candidates(&self, query: &[f32], search_k: usize) -> Vec<usize> {
        let mut frontier: BinaryHeap<Pending> = (0..self.trees.len() as u32)
            .map(|tree| Pending {
                priority: f32::INFINITY,
                tree,
                node: 0,
            })
            .collect();

        let mut seen = vec![false; self.set.len()];
        let mut found = Vec::new();
        let mut visited = 0usize;

        while visited < search_k {
            let Some(next) = frontier.pop() else {
                break;
            };
            match self.trees[next.tree as usize].node(next.node) {
                Node::Leaf(items) => {
                    visited += items.len();
                    for &i in items {
                        let i = i as usize;
                        if !seen[i] {
                            seen[i] = true;
                            found.push(i);
                        }
                    }
                }
                Node::Split { plane, left, right } => {
                    let margin = plane.margin(query);
                    frontier.push(Pending {
                        priority: next.priority.min(margin),
                        tree: next.tree,
                        node: *left,
                    });
                    frontier.push(Pending {
                        priority: next.priority.min(-margin),
                        tree: next.tree,
                        node: *right,
                    });
                }
            }
        }

        debug!(
            visited,
            candidates = found.len(),
            budget = search_k,
            "rpforest: collected candidates"
        );
        found
    }

    /// Override the search budget, e.g. for an index loaded from disk.
    /// Zero restores the default of `num_trees * k`.
    pub fn with_search_k(mut self, search_k: usize) -> Self {
        self.cfg.search_k = search_k;
        self
    }

    pub fn config(&self) -> &ForestConfig {
        &self.cfg
    }

    pub fn vectors(&self) -> &Arc<VectorSet> {
        &self.set
    }

    pub fn trees(&self) -> &[ProjectionTree] {
        &self.trees
    }

    pub fn dimension(&self) -> usize {
        self.set.dimension()
    }

    /// Number of indexed vectors.
    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

/// SplitMix64 over the forest seed and tree ordinal.
fn tree_seed(seed: u64, ordinal: u64) -> u64 {
    let mut z = seed ^ ordinal.wrapping_mul(0x9e3779b97f4a7c15);
    z = z.wrapping_add(0x9e3779b97f4a7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::collections::HashSet;

    fn cfg(num_trees: usize, leaf_size: usize, seed: u64) -> ForestConfig {
        ForestConfig {
            num_trees,
            leaf_size,
            search_k: 0,
            seed,
        }
    }

    fn rand_unit_vec(rng: &mut impl Rng, dim: usize) -> Vec<f32> {
        let v: Vec<f32> = (0..dim).map(|_| rng.r#gen::<f32>() - 0.5).collect();
        let norm: f64 = v.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>().sqrt();
        if norm > 0.0 {
            v.into_iter().map(|x| x / norm as f32).collect()
        } else {
            v
        }
    }

    fn random_set(n: usize, dim: usize, seed: u64) -> Arc<VectorSet> {
        let mut rng = StdRng::seed_from_u64(seed);
        Arc::new(
            VectorSet::load((0..n).map(|i| (format!("v-{i}"), rand_unit_vec(&mut rng, dim))))
                .unwrap(),
        )
    }

    fn people() -> Arc<VectorSet> {
        Arc::new(
            VectorSet::load([
                ("alice", vec![1.0, 0.0, 0.0]),
                ("bob", vec![0.0, 1.0, 0.0]),
                ("carol", vec![0.99, 0.01, 0.0]),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn test_defaults() {
        let c = ForestConfig::default().with_defaults();
        assert_eq!(c.num_trees, 10);
        assert_eq!(c.leaf_size, 16);
        assert_eq!(c.budget(5), 50);
        assert_eq!(ForestConfig { search_k: 3, ..c }.budget(5), 5);
    }

    #[test]
    fn test_people_scenario() {
        let index = ForestIndex::build(people(), cfg(10, 1, 42)).unwrap();
        let hits = index.search(&[1.0, 0.0, 0.0], 2).unwrap();
        let labels: Vec<&str> = hits
            .iter()
            .map(|n| index.vectors().label_of(n.index).unwrap())
            .collect();
        assert_eq!(labels, ["alice", "carol"]);
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[test]
    fn test_results_bounded_and_sorted() {
        let set = random_set(300, 16, 1);
        let index = ForestIndex::build(set.clone(), cfg(8, 8, 2)).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        for k in [1usize, 5, 20, 1000] {
            let q = rand_unit_vec(&mut rng, 16);
            let hits = index.search(&q, k).unwrap();
            assert!(hits.len() <= k.min(set.len()));
            assert!(!hits.is_empty());
            for w in hits.windows(2) {
                assert!(w[0].distance <= w[1].distance);
            }
            let distinct: HashSet<usize> = hits.iter().map(|n| n.index).collect();
            assert_eq!(distinct.len(), hits.len());
        }
    }

    #[test]
    fn test_fewer_candidates_than_k() {
        let index = ForestIndex::build(people(), cfg(3, 16, 0)).unwrap();
        let hits = index.search(&[0.0, 0.0, 1.0], 10).unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn test_k_zero() {
        let index = ForestIndex::build(people(), cfg(3, 1, 0)).unwrap();
        assert!(index.search(&[1.0, 0.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let set = random_set(50, 128, 4);
        let index = ForestIndex::build(set, cfg(4, 8, 5)).unwrap();
        let err = index.search(&vec![0.1; 64], 3).unwrap_err();
        assert!(matches!(
            err,
            ForestError::DimensionMismatch { got: 64, want: 128 }
        ));
    }

    #[test]
    fn test_stored_vector_is_found() {
        let set = random_set(2000, 32, 6);
        let index = ForestIndex::build(set.clone(), cfg(20, 16, 7)).unwrap();
        for i in (0..2000).step_by(97) {
            let hits = index.search(set.row(i), 5).unwrap();
            assert_eq!(hits[0].index, i, "vector {i} did not rank itself first");
            assert!(hits[0].distance.abs() < 1e-5);
        }
    }

    #[test]
    fn test_duplicates_share_distance() {
        let set = Arc::new(
            VectorSet::load([
                ("twin-a", vec![0.6, 0.8, 0.0]),
                ("twin-b", vec![0.6, 0.8, 0.0]),
                ("other", vec![0.0, 0.0, 1.0]),
            ])
            .unwrap(),
        );
        let index = ForestIndex::build(set, cfg(5, 1, 8)).unwrap();
        let hits = index.search(&[0.6, 0.8, 0.0], 2).unwrap();
        let found: HashSet<usize> = hits.iter().map(|n| n.index).collect();
        assert_eq!(found, HashSet::from([0, 1]));
        assert_eq!(hits[0].distance, hits[1].distance);
    }

    #[test]
    fn test_same_seed_same_forest() {
        let set = random_set(400, 12, 9);
        let a = ForestIndex::build(set.clone(), cfg(6, 8, 1234)).unwrap();
        let b = ForestIndex::build(set.clone(), cfg(6, 8, 1234)).unwrap();
        assert_eq!(a.trees(), b.trees());
        let c = ForestIndex::build(set, cfg(6, 8, 4321)).unwrap();
        assert_ne!(a.trees(), c.trees());
    }

    #[test]
    fn test_larger_budget_sees_more() {
        let set = random_set(1000, 16, 10);
        let index = ForestIndex::build(set, cfg(10, 8, 11)).unwrap();
        let q = rand_unit_vec(&mut StdRng::seed_from_u64(12), 16);
        let small = index.candidates(&q, 8).len();
        let large = index.candidates(&q, 400).len();
        assert!(large > small, "budget 400 gave {large}, budget 8 gave {small}");
    }

    #[test]
    fn test_recall() {
        let dim = 32;
        let n = 2000;
        let queries = 50;
        let top_k = 10;

        let set = random_set(n, dim, 13);
        let index = ForestIndex::build(
            set.clone(),
            ForestConfig {
                num_trees: 20,
                leaf_size: 16,
                search_k: 4000,
                seed: 14,
            },
        )
        .unwrap();

        let mut rng = StdRng::seed_from_u64(15);
        let mut total_recall = 0.0;
        for _ in 0..queries {
            let query = rand_unit_vec(&mut rng, dim);

            // Brute-force ground truth.
            let mut truth: Vec<(usize, f32)> = set
                .iter()
                .enumerate()
                .map(|(i, (_, v))| (i, cosine_distance(&query, v)))
                .collect();
            truth.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
            let truth_set: HashSet<usize> = truth.iter().take(top_k).map(|(i, _)| *i).collect();

            let hits = index.search(&query, top_k).unwrap();
            let found = hits.iter().filter(|n| truth_set.contains(&n.index)).count();
            total_recall += found as f64 / top_k as f64;
        }

        let avg_recall = total_recall / queries as f64;
        assert!(
            avg_recall >= 0.80,
            "recall {avg_recall:.3} is below 0.80 threshold"
        );
    }
}
