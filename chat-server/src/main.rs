use anyhow::Result;
use clap::Parser;
use tracing::*;

mod commands;
mod config;
mod logging;

use config::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(&cli)?;

    if let Err(error) = commands::run::command(&cli).await {
        error!(?error, "fatal error");
        std::process::exit(1);
    }

    Ok(())
}
