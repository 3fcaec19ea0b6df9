/// # feed-source CLI Interface (Module)
///
/// Command parsing and orchestration for the `feed-source` binary. All
/// parsing, paging and selector logic lives in [`feed_source_core`]; this
/// module loads the config, builds a fetcher and a [`DataSource`], and
/// writes results to stdout.
///
/// ## How To Use
/// - From a shell: `feed-source rows --config source.yaml --limit 10`.
/// - Programmatically: call [`run`] with a constructed [`Cli`] and a writer.
use crate::load_config::load_config;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use feed_source_core::fetcher;
use feed_source_core::source::DataSource;
use std::io::Write;
use std::path::{Path, PathBuf};

/// CLI for feed-source: pull rows out of paginated JSON and XML feeds.
#[derive(Parser)]
#[clap(
    name = "feed-source",
    version,
    about = "Iterate rows out of paginated JSON and XML feeds"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print every row of the configured source as one JSON object per line
    Rows {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Stop after this many rows
        #[clap(long)]
        limit: Option<usize>,
    },
    /// Print the number of rows the configured source yields
    Count {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
}

fn open_source(config: &Path) -> Result<DataSource> {
    let config = load_config(config)?;
    let fetcher = fetcher::from_config(&config.source)
        .map_err(|e| anyhow::Error::msg(format!("Failed to build fetcher: {e}")))?;
    DataSource::from_config(&config.source, fetcher).context("Failed to build data source")
}

/// Async entrypoint shared by `main` and the integration tests.
pub async fn run<W: Write>(cli: Cli, out: &mut W) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Rows { config, limit } => {
            let mut source = open_source(&config)?;
            tracing::info!(command = "rows", ?limit, "Reading rows");
            let rows = source.rows(limit).await.map_err(|e| {
                tracing::error!(command = "rows", error = %e, "Reading rows failed");
                anyhow::Error::new(e)
            })?;
            for row in &rows {
                writeln!(out, "{}", serde_json::to_string(row)?)?;
            }
            tracing::info!(command = "rows", rows = rows.len(), "Rows written");
        }
        Commands::Count { config } => {
            let mut source = open_source(&config)?;
            let count = source.count().await.map_err(|e| {
                tracing::error!(command = "count", error = %e, "Counting rows failed");
                anyhow::Error::new(e)
            })?;
            writeln!(out, "{count}")?;
            tracing::info!(command = "count", count, "Count complete");
        }
    }
    Ok(())
}
