use rand::Rng;
use tracing::debug;

use crate::cosine::{dot, norm};
use crate::vectors::VectorSet;

/// Anchor pairs tried before a node that will not split becomes a leaf.
pub(crate) const MAX_SPLIT_ATTEMPTS: usize = 8;

/// Hyperplane separating the vectors closer (by angle) to one anchor from
/// those closer to the other.
///
/// For non-zero anchors `a` and `b`, `angle(x, a) < angle(x, b)` holds exactly
/// when `x · (a/|a| - b/|b|) > 0`, so the normal is the difference of the
/// unit anchors and the offset is zero. A zero `x` lands on the right, as
/// it is equally (maximally) far from both anchors.
#[derive(Debug, Clone, PartialEq)]
pub struct Hyperplane {
    pub normal: Vec<f32>,
    pub offset: f32,
}

impl Hyperplane {
    /// Returns `None` when the anchors cannot define a plane: either is a
    /// zero vector, or they point the same way.
    pub(crate) fn between(a: &[f32], b: &[f32]) -> Option<Self> {
        let (na, nb) = (norm(a), norm(b));
        if na == 0.0 || nb == 0.0 {
            return None;
        }
        let normal: Vec<f32> = a
            .iter()
            .zip(b)
            .map(|(&x, &y)| (x as f64 / na - y as f64 / nb) as f32)
            .collect();
        if normal.iter().all(|&v| v == 0.0) {
            return None;
        }
        Some(Self {
            normal,
            offset: 0.0,
        })
    }

    /// Signed distance-like margin of `v`; positive means the left side.
    pub fn margin(&self, v: &[f32]) -> f32 {
        dot(&self.normal, v) + self.offset
    }
}

/// A tree node. Children always sit at higher positions than their parent.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf(Vec<u32>),
    Split {
        plane: Hyperplane,
        left: u32,
        right: u32,
    },
}

/// ProjectionTree partitions every position of a [`VectorSet`] into leaves
/// by recursive random hyperplane splits. The root is node 0.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionTree {
    nodes: Vec<Node>,
}

impl ProjectionTree {
    /// Build a tree over all of `set`. Partitions holding at most
    /// `leaf_size` positions become leaves.
    pub fn build(set: &VectorSet, leaf_size: usize, rng: &mut impl Rng) -> Self {
        let leaf_size = leaf_size.max(1);
        let mut nodes = vec![Node::Leaf(Vec::new())];
        let mut pending: Vec<(usize, Vec<u32>)> = vec![(0, (0..set.len() as u32).collect())];

        while let Some((slot, items)) = pending.pop() {
            if items.len() <= leaf_size {
                nodes[slot] = Node::Leaf(items);
                continue;
            }
            match split(set, &items, rng) {
                Some((plane, left_items, right_items)) => {
                    let left = nodes.len();
                    let right = left + 1;
                    nodes.push(Node::Leaf(Vec::new()));
                    nodes.push(Node::Leaf(Vec::new()));
                    nodes[slot] = Node::Split {
                        plane,
                        left: left as u32,
                        right: right as u32,
                    };
                    pending.push((right, right_items));
                    pending.push((left, left_items));
                }
                None => {
                    debug!(items = items.len(), "rpforest: no usable split, forcing leaf");
                    nodes[slot] = Node::Leaf(items);
                }
            }
        }

        Self { nodes }
    }

    /// Wrap nodes that the caller has already validated.
    pub(crate) fn from_nodes(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub(crate) fn node(&self, id: u32) -> &Node {
        &self.nodes[id as usize]
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf(_)))
            .count()
    }

    /// Length of the longest root-to-leaf path, counting the root as 1.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(0u32, 1usize)];
        while let Some((id, d)) = stack.pop() {
            deepest = deepest.max(d);
            if let Node::Split { left, right, .. } = self.node(id) {
                stack.push((*left, d + 1));
                stack.push((*right, d + 1));
            }
        }
        deepest
    }

    /// Follow the query's side of every hyperplane down to a single leaf.
    pub fn descend(&self, query: &[f32]) -> &[u32] {
        let mut id = 0;
        loop {
            match self.node(id) {
                Node::Leaf(items) => return items,
                Node::Split { plane, left, right } => {
                    id = if plane.margin(query) > 0.0 { *left } else { *right };
                }
            }
        }
    }
}

/// Pick random anchor pairs until one splits `items` into two non-empty sides.
fn split(
    set: &VectorSet,
    items: &[u32],
    rng: &mut impl Rng,
) -> Option<(Hyperplane, Vec<u32>, Vec<u32>)> {
    for _ in 0..MAX_SPLIT_ATTEMPTS {
        let i = rng.gen_range(0..items.len());
        let mut j = rng.gen_range(0..items.len() - 1);
        if j >= i {
            j += 1;
        }

        let Some(plane) = Hyperplane::between(
            set.row(items[i] as usize),
            set.row(items[j] as usize),
        ) else {
            continue;
        };

        let (left, right): (Vec<u32>, Vec<u32>) = items
            .iter()
            .partition(|&&x| plane.margin(set.row(x as usize)) > 0.0);
        if !left.is_empty() && !right.is_empty() {
            return Some((plane, left, right));
        }
    }
    None
}
