use crate::catalog::LocalCatalog;
use crate::cli::commands::{LoggingArgs, ServeCommand, SyncCommand};
use crate::config::{LoggingConfig, Settings};
use crate::server::{start_server, state::ServerState};
use crate::storage::{self, fts, metadata};
use crate::sync::{SyncEngine, SyncOptions};
use anyhow::{bail, Context, Result};
use std::net::SocketAddr;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

/// Install the global subscriber: stderr always, plus a daily-rotated file
/// when `logging.dir` is set. Keep the returned guard alive until exit so
/// buffered file output is flushed.
pub fn init_logging(args: &LoggingArgs, config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    LogTracer::init().context("Failed to initialize log tracer")?;

    let filter = EnvFilter::builder()
        .with_default_directive(args.get_effective_level().into())
        .parse_lossy(args.log_filter.as_deref().unwrap_or_default());

    let (file_layer, guard) = match &config.dir {
        Some(dir) => {
            let appender = rolling::daily(dir, "catalogd.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(fmt::time::ChronoUtc::rfc_3339())
                .with_thread_names(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global tracing subscriber")?;

    Ok(guard)
}

/// Run one sync pass against the local catalog mirror.
pub async fn handle_sync(settings: Settings, cmd: SyncCommand) -> Result<()> {
    let conn = storage::open_writer(&settings.store).context("Failed to open metadata store")?;
    let source = LocalCatalog::new(settings.catalog.dir.clone(), settings.catalog.manifest.clone());
    let mut engine =
        SyncEngine::new(source, conn, &settings.catalog).context("Failed to prepare sync")?;

    let options = SyncOptions {
        include: cmd.include,
        force: cmd.force,
        full_text_search: settings.sync.full_text_search && !cmd.no_full_text_search,
    };
    let report = engine.run(&options).await.context("Sync failed")?;

    let (datasets, tables, variables) = metadata::row_counts(engine.connection())?;
    info!(datasets, tables, variables, "duckdb.size");

    for skipped in &report.skipped_tables {
        warn!(path = %skipped.path, reason = %skipped.reason, "table.skipped");
    }
    if !report.is_clean() {
        let failed: Vec<&str> = report
            .failed_datasets
            .iter()
            .map(|f| f.path.as_str())
            .collect();
        bail!("{} dataset(s) failed to sync: {}", failed.len(), failed.join(", "));
    }
    Ok(())
}

/// Serve the HTTP API until interrupted.
pub async fn handle_serve(settings: Settings, cmd: ServeCommand) -> Result<()> {
    let addr: SocketAddr = match cmd.listen {
        Some(addr) => addr,
        None => format!("{}:{}", settings.server.host, settings.server.port)
            .parse()
            .context("Invalid listen address")?,
    };
    let state = ServerState::new(&settings).context("Failed to open metadata store")?;
    start_server(addr, state).await.context("Server error")
}

/// Rebuild the full-text index without syncing.
pub fn handle_reindex(settings: Settings) -> Result<()> {
    let conn = storage::open_writer(&settings.store).context("Failed to open metadata store")?;
    fts::rebuild_index(&conn).context("Failed to rebuild full-text index")?;
    Ok(())
}
