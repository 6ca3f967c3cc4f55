//! hrdocs CLI: HR document bulk-load builder.
//!
//! Classifies scanned HR documents with a generative model and packages
//! them, together with a pipe-delimited metadata file, for bulk ingestion.

mod commands;

use std::process::ExitCode;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(cli.verbose, &cli.log_format);
    commands::run(cli).await
}
