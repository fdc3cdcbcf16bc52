use clap::{ArgAction, Args, Subcommand};
use std::net::SocketAddr;
use tracing::Level;

#[derive(Subcommand)]
pub enum Commands {
    /// Bring the metadata store in line with the catalog manifest
    Sync(SyncCommand),
    /// Serve the HTTP API from the metadata store
    Serve(ServeCommand),
    /// Rebuild the full-text index over variables
    Reindex(ReindexCommand),
}

#[derive(Debug, Clone, Default, Args)]
pub struct SyncCommand {
    /// Only sync datasets whose path matches this regular expression
    #[arg(long, value_name = "REGEX")]
    pub include: Option<String>,

    /// Recreate every dataset even if its checksum is unchanged
    #[arg(long)]
    pub force: bool,

    /// Skip rebuilding the full-text index after the pass
    #[arg(long)]
    pub no_full_text_search: bool,
}

#[derive(Debug, Clone, Default, Args)]
pub struct ServeCommand {
    /// Address to listen on, overriding `server.host` and `server.port`
    #[arg(long, value_name = "HOST:PORT")]
    pub listen: Option<SocketAddr>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct ReindexCommand {}

/// Logging verbosity, shared by every subcommand
#[derive(Debug, Clone, Default, Args)]
pub struct LoggingArgs {
    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log filter directives, e.g. `catalogd_core=debug,tower_http=info`
    #[arg(long, env = "RUST_LOG", global = true, value_name = "FILTER")]
    pub log_filter: Option<String>,
}

impl LoggingArgs {
    pub fn get_effective_level(&self) -> Level {
        match self.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}
