//! Utility functions for CLI commands.

use std::path::{Path, PathBuf};

use clap::Args;
use facematch_faceid::{EmbeddingSource, EngineConfig, JsonSource, NpyDirSource};

use crate::Cli;

/// Gallery and index options shared by `build` and `query`.
#[derive(Args, Debug, Clone)]
pub struct GalleryArgs {
    /// Directory of <label>.npy embeddings, or a JSON file of label -> vector
    #[arg(long)]
    pub embeddings: PathBuf,

    /// Persisted index file (overrides config file)
    #[arg(long)]
    pub index: Option<PathBuf>,

    /// Number of trees (overrides config file)
    #[arg(long)]
    pub trees: Option<usize>,

    /// Build seed (overrides config file)
    #[arg(long)]
    pub seed: Option<u64>,
}

/// Loads the engine config from `--config` and applies command-line
/// overrides on top.
pub fn engine_config(cli: &Cli, args: &GalleryArgs) -> anyhow::Result<EngineConfig> {
    let mut cfg = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(index) = &args.index {
        cfg.index_path = Some(index.clone());
    }
    if let Some(trees) = args.trees {
        cfg.forest.num_trees = trees;
    }
    if let Some(seed) = args.seed {
        cfg.forest.seed = seed;
    }
    Ok(cfg.with_defaults())
}

/// Picks the embedding source for a gallery path.
pub fn gallery_source(path: &Path) -> anyhow::Result<Box<dyn EmbeddingSource>> {
    if path.is_dir() {
        return Ok(Box::new(NpyDirSource::new(path)));
    }
    if path.extension().is_some_and(|ext| ext == "json") {
        return Ok(Box::new(JsonSource::new(path)));
    }
    anyhow::bail!(
        "{}: expected a directory of .npy files or a .json file",
        path.display()
    )
}

/// Prints a value as pretty JSON on stdout.
pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
