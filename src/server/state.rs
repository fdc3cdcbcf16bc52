//! Server state management

use crate::config::Settings;
use crate::error::Result;
use crate::query::QueryTranslator;
use crate::search::SearchService;
use crate::storage::{self, WorkerPool};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub use crate::config::{CorsConfig, ServerConfig};

/// Shared server state
#[derive(Clone)]
pub struct ServerState {
    /// Metadata lookups and data queries
    pub translator: QueryTranslator,

    /// Full-text search over variables
    pub search: SearchService,

    /// Server configuration
    pub config: Arc<ServerConfig>,
}

impl ServerState {
    /// Open the store read-only and start one worker per configured connection.
    pub fn new(settings: &Settings) -> Result<Self> {
        let (conn, facts_schema) = storage::open_reader(&settings.store, &settings.facts)?;
        let pool = Arc::new(WorkerPool::new(conn, settings.store.worker_count())?);
        info!(
            workers = pool.size(),
            facts = facts_schema.unwrap_or("main"),
            "server.state.ready"
        );
        Ok(Self::from_pool(
            pool,
            settings.catalog.dir.clone(),
            facts_schema,
            settings.server.clone(),
        ))
    }

    pub fn from_pool(
        pool: Arc<WorkerPool>,
        catalog_root: PathBuf,
        facts_schema: Option<&'static str>,
        config: ServerConfig,
    ) -> Self {
        Self {
            translator: QueryTranslator::new(Arc::clone(&pool), catalog_root, facts_schema),
            search: SearchService::new(pool, config.url_prefix.clone()),
            config: Arc::new(config),
        }
    }
}
