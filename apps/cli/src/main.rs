//! docbuilder CLI: build documentation sites for every package in a registry.
//!
//! Each package version is built in its own worker process (the hidden
//! `worker` subcommand of this same binary).

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
