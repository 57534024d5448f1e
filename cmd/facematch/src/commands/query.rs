//! Query command: rank gallery identities for one query embedding.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::Args;
use facematch_faceid::{Match, QueryEngine, read_npy_vector};
use serde::Serialize;

use super::{GalleryArgs, engine_config, gallery_source, print_json};
use crate::Cli;

/// Rank gallery identities by similarity to a query embedding.
#[derive(Args)]
pub struct QueryCommand {
    #[command(flatten)]
    pub gallery: GalleryArgs,

    /// Query embedding (.npy)
    #[arg(long)]
    pub query: PathBuf,

    /// Number of candidates (default from config, else 5)
    #[arg(short = 'k', long)]
    pub k: Option<usize>,
}

#[derive(Serialize)]
struct QueryReport {
    matches: Vec<Match>,
    best: Option<String>,
    elapsed_ms: f64,
}

impl QueryCommand {
    pub fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let cfg = engine_config(cli, &self.gallery)?;
        let source = gallery_source(&self.gallery.embeddings)?;
        let engine = QueryEngine::open(source.as_ref(), cfg).with_context(|| {
            format!("open gallery {}", self.gallery.embeddings.display())
        })?;
        let query = read_npy_vector(&self.query).context("read query embedding")?;
        let k = self.k.unwrap_or(engine.top_k());

        let started = Instant::now();
        let matches = engine.resolve_matches(&query, k)?;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let report = QueryReport {
            best: matches.first().map(|m| m.label.clone()),
            matches,
            elapsed_ms,
        };

        if cli.json {
            return print_json(&report);
        }
        if report.matches.is_empty() {
            println!("No candidates.");
        }
        for (rank, m) in report.matches.iter().enumerate() {
            println!("{:>3}. {:<32} {:.4}", rank + 1, m.label, m.distance);
        }
        if let Some(best) = &report.best {
            println!("Most similar: {best}");
        }
        println!("Execution time: {:.3} ms", report.elapsed_ms);
        Ok(())
    }
}
