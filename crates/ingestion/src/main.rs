//! PubTrack Ingestion CLI
//!
//! Subcommands:
//! - `ingest`: load a directory of `.bib` files into the database
//! - `fetch`: download per-faculty bibliographies from DBLP
//! - `reconcile`: find (and optionally merge) spelling-variant authors
//! - `stats`: print database statistics

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use pubtrack_common::{
    config::AppConfig, db::DbPool, jobs::InMemoryJobStore, telemetry, Repository, VERSION,
};
use pubtrack_ingestion::reconcile::{self, FuzzyMatcher, NameMatcher, VariantMatcher};
use pubtrack_ingestion::{DblpFetcher, IngestionPipeline};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "ingestion", version, about = "PubTrack ingestion tools")]
struct Cli {
    /// Configuration file (defaults to config/default + APP__ environment)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a directory of BibTeX files
    Ingest {
        #[arg(long, value_name = "DIR")]
        source_dir: Option<PathBuf>,

        #[arg(long, value_name = "FILE")]
        roster: Option<PathBuf>,
    },
    /// Download one BibTeX file per roster person id
    Fetch {
        #[arg(long, value_name = "FILE")]
        roster: Option<PathBuf>,

        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },
    /// Propose merges of spelling-variant authors into faculty authors
    Reconcile {
        #[arg(long, value_enum, default_value_t = MatcherKind::Variant)]
        matcher: MatcherKind,

        /// Similarity threshold for the fuzzy matcher
        #[arg(long, default_value_t = 0.92)]
        threshold: f64,

        /// Perform the merges instead of listing them
        #[arg(long)]
        apply: bool,
    },
    /// Print database statistics as JSON
    Stats,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum MatcherKind {
    Variant,
    Fuzzy,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::load(),
    }
    .context("Failed to load configuration")?;

    telemetry::init_tracing(&config.observability)
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    info!("Starting PubTrack ingestion v{}", VERSION);

    match cli.command {
        Command::Ingest { source_dir, roster } => {
            let db = DbPool::new(&config.database).await?;
            let source_dir = source_dir.unwrap_or_else(|| config.ingestion.source_dir.clone());
            let roster = roster.unwrap_or_else(|| config.ingestion.roster_path.clone());

            let pipeline = IngestionPipeline::new(
                db.primary.clone(),
                Arc::new(InMemoryJobStore::new()),
                &config.ingestion,
            );
            let report = pipeline.run_from_files(&source_dir, &roster).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Command::Fetch { roster, output_dir } => {
            let mut dblp = config.dblp.clone();
            if let Some(dir) = output_dir {
                dblp.output_dir = dir;
            }
            let roster = roster.unwrap_or_else(|| config.ingestion.roster_path.clone());

            let fetcher = DblpFetcher::new(dblp)?;
            let report = fetcher.run(&InMemoryJobStore::new(), &roster).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Command::Reconcile { matcher, threshold, apply } => {
            let db = DbPool::new(&config.database).await?;
            let matcher: Box<dyn NameMatcher> = match matcher {
                MatcherKind::Variant => Box::new(VariantMatcher),
                MatcherKind::Fuzzy => Box::new(FuzzyMatcher { threshold }),
            };

            let candidates = reconcile::find_merge_candidates(db.conn(), matcher.as_ref()).await?;
            for candidate in &candidates {
                println!(
                    "{:>5} {:<40} <- {:>5} {:<40} ({:.3})",
                    candidate.canonical.id,
                    candidate.canonical.name,
                    candidate.duplicate.id,
                    candidate.duplicate.name,
                    candidate.score
                );
                if apply {
                    let report = reconcile::merge_authors(
                        db.conn(),
                        candidate.canonical.id,
                        candidate.duplicate.id,
                    )
                    .await?;
                    println!("      {}", serde_json::to_string(&report)?);
                }
            }
            if !apply && !candidates.is_empty() {
                println!("Run again with --apply to merge {} author(s)", candidates.len());
            }
        }

        Command::Stats => {
            let db = DbPool::new(&config.database).await?;
            let stats = Repository::new(db).stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}
