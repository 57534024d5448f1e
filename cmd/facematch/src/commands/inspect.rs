//! Inspect command: describe a persisted forest.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use facematch_rpforest::{ForestIndex, load_forest_file};
use serde::Serialize;

use super::print_json;
use crate::Cli;

/// Print the structure of a persisted index.
#[derive(Args)]
pub struct InspectCommand {
    /// Persisted index file
    #[arg(long)]
    pub index: PathBuf,
}

#[derive(Serialize)]
struct TreeSummary {
    nodes: usize,
    leaves: usize,
    depth: usize,
}

#[derive(Serialize)]
struct IndexSummary {
    dimension: usize,
    identities: usize,
    leaf_size: usize,
    seed: u64,
    trees: Vec<TreeSummary>,
}

impl IndexSummary {
    fn of(index: &ForestIndex) -> Self {
        Self {
            dimension: index.dimension(),
            identities: index.len(),
            leaf_size: index.config().leaf_size,
            seed: index.config().seed,
            trees: index
                .trees()
                .iter()
                .map(|t| TreeSummary {
                    nodes: t.nodes().len(),
                    leaves: t.leaf_count(),
                    depth: t.depth(),
                })
                .collect(),
        }
    }
}

impl InspectCommand {
    pub fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let index = load_forest_file(&self.index)
            .with_context(|| format!("load index {}", self.index.display()))?;
        let summary = IndexSummary::of(&index);

        if cli.json {
            return print_json(&summary);
        }
        println!("Index:      {}", self.index.display());
        println!("Dimension:  {}", summary.dimension);
        println!("Identities: {}", summary.identities);
        println!("Trees:      {}", summary.trees.len());
        println!("Leaf size:  {}", summary.leaf_size);
        println!("Seed:       {}", summary.seed);
        for (i, t) in summary.trees.iter().enumerate() {
            println!(
                "  tree {i:>3}: {} nodes, {} leaves, depth {}",
                t.nodes, t.leaves, t.depth
            );
        }
        Ok(())
    }
}
