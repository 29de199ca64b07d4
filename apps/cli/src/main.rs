//! SiteMiner CLI — crawl websites into a deduplicated, queryable store.
//!
//! Crawled content is partitioned by site; questions are answered from
//! retrieved chunks with source attribution.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
