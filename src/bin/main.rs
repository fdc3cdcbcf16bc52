//! catalogd binary.
//!
//! Entry point for syncing the metadata store from a catalog mirror and
//! serving it over HTTP.

use anyhow::Context;
use catalogd_core::{
    cli::{handle_reindex, handle_serve, handle_sync, init_logging, Commands, LoggingArgs},
    config::{GlobalArgs, Settings},
};
use clap::Parser;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load(&cli.global).context("Failed to load configuration")?;
    let _guard = init_logging(&cli.logging, &settings.logging)?;

    info!(store = %settings.store.path.display(), catalog = %settings.catalog.dir.display(), "catalogd starting");

    match cli.command {
        Commands::Sync(cmd) => handle_sync(settings, cmd).await?,
        Commands::Serve(cmd) => handle_serve(settings, cmd).await?,
        Commands::Reindex(_) => handle_reindex(settings)?,
    }

    Ok(())
}
