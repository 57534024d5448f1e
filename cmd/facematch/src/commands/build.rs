//! Build command: index a gallery and persist the forest.

use std::time::Instant;

use anyhow::Context;
use clap::Args;
use facematch_faceid::QueryEngine;
use serde::Serialize;

use super::{GalleryArgs, engine_config, gallery_source, print_json};
use crate::Cli;

/// Build (or refresh) the persisted index for a gallery.
#[derive(Args)]
pub struct BuildCommand {
    #[command(flatten)]
    pub gallery: GalleryArgs,

    /// Rebuild even if the persisted index is up to date
    #[arg(long)]
    pub force: bool,
}

#[derive(Serialize)]
struct BuildReport {
    identities: usize,
    dimension: Option<usize>,
    trees: usize,
    index: Option<String>,
    elapsed_ms: u64,
}

impl BuildCommand {
    pub fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let cfg = engine_config(cli, &self.gallery)?;
        if cfg.index_path.is_none() {
            anyhow::bail!("no index file to write, use --index or set index_path in --config");
        }
        let source = gallery_source(&self.gallery.embeddings)?;

        let started = Instant::now();
        let engine = QueryEngine::open(source.as_ref(), cfg).with_context(|| {
            format!("open gallery {}", self.gallery.embeddings.display())
        })?;
        if self.force {
            engine.rebuild().context("rebuild index")?;
        }

        let report = BuildReport {
            identities: engine.len(),
            dimension: engine.dimension(),
            trees: engine.snapshot().map_or(0, |index| index.trees().len()),
            index: engine
                .config()
                .index_path
                .as_ref()
                .map(|p| p.display().to_string()),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        if cli.json {
            return print_json(&report);
        }
        if report.identities == 0 {
            println!("Gallery is empty, nothing indexed.");
            return Ok(());
        }
        println!(
            "Indexed {} identities ({}-d) into {} trees: {}",
            report.identities,
            report.dimension.unwrap_or(0),
            report.trees,
            report.index.as_deref().unwrap_or("-"),
        );
        println!("Execution time: {} ms", report.elapsed_ms);
        Ok(())
    }
}
