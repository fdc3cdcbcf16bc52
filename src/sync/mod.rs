//! Catalog synchronization.
//!
//! One pass: load and filter the manifest, plan against the stored
//! checksums, ingest and replace every dataset that changed, delete the
//! datasets that disappeared and rebuild the full-text index.
//!
//! Passes must not run concurrently against the same store.

pub mod ingest;
pub mod planner;
pub mod writer;

pub use ingest::{DatasetBatch, SkippedTable};
pub use planner::{plan, SyncPlan};

use crate::catalog::manifest::{dataset_checksums, group_by_dataset};
use crate::catalog::{CatalogSource, ManifestFilter};
use crate::config::CatalogConfig;
use crate::error::Result;
use crate::storage::{fts, metadata};
use duckdb::Connection;
use std::time::Instant;
use tracing::{error, info, warn};

/// Options of one sync pass
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Only datasets whose path matches this regular expression
    pub include: Option<String>,
    /// Recreate every dataset regardless of checksums
    pub force: bool,
    /// Rebuild the full-text index at the end
    pub full_text_search: bool,
}

/// A dataset whose ingestion or write failed; its previous rows are kept
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDataset {
    pub path: String,
    pub error: String,
}

/// What a pass did
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub deleted: Vec<String>,
    pub created: Vec<String>,
    pub skipped_tables: Vec<SkippedTable>,
    pub failed_datasets: Vec<FailedDataset>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failed_datasets.is_empty()
    }
}

/// Runs sync passes against one metadata store
pub struct SyncEngine<S> {
    source: S,
    conn: Connection,
    channels: Vec<String>,
    exclude: Vec<String>,
}

impl<S: CatalogSource> SyncEngine<S> {
    pub fn new(source: S, conn: Connection, catalog: &CatalogConfig) -> Result<Self> {
        metadata::init_schema(&conn)?;
        Ok(Self {
            source,
            conn,
            channels: catalog.channels.clone(),
            exclude: catalog.exclude.clone(),
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }

    /// Compute the plan of a pass without applying it.
    pub async fn plan(&self, options: &SyncOptions) -> Result<SyncPlan> {
        let filter = self.filter(options)?;
        let rows = filter.apply(self.source.manifest().await?);
        let manifest = dataset_checksums(&rows);
        let local = metadata::dataset_checksums(&self.conn)?;
        Ok(plan(&manifest, &local, options.force, filter.is_narrowed()))
    }

    fn filter(&self, options: &SyncOptions) -> Result<ManifestFilter> {
        ManifestFilter::new(
            self.channels.clone(),
            self.exclude.clone(),
            options.include.as_deref(),
        )
    }

    /// Run one pass.
    ///
    /// Errors of a single dataset are reported and the pass goes on; only an
    /// unreachable catalog entry (or a failure of the store itself outside a
    /// dataset) aborts it.
    pub async fn run(&mut self, options: &SyncOptions) -> Result<SyncReport> {
        let started = Instant::now();
        let filter = self.filter(options)?;
        let rows = filter.apply(self.source.manifest().await?);
        let manifest = dataset_checksums(&rows);
        let local = metadata::dataset_checksums(&self.conn)?;
        let plan = plan(&manifest, &local, options.force, filter.is_narrowed());

        info!(
            delete_datasets = plan.to_delete.len(),
            create_datasets = plan.to_create.len(),
            "duckdb.actions"
        );

        let mut report = SyncReport::default();
        let groups = group_by_dataset(&rows);
        let total = plan.to_create.len();

        for (i, dataset_path) in plan.to_create.iter().enumerate() {
            let Some(dataset_rows) = groups.get(dataset_path) else {
                continue;
            };
            let checksum = manifest
                .get(dataset_path)
                .map(String::as_str)
                .unwrap_or_default();
            info!(path = %dataset_path, progress = %format!("{}/{}", i + 1, total), "dataset.create");

            let batch = match ingest::ingest_dataset(
                &self.conn,
                &self.source,
                dataset_path,
                dataset_rows,
                checksum,
            )
            .await
            {
                Ok(batch) => batch,
                Err(err) if err.is_fatal_for_sync() => {
                    error!(path = %dataset_path, error = %err, "sync.aborted");
                    return Err(err);
                }
                Err(err) => {
                    error!(path = %dataset_path, error = %err, "dataset.failed");
                    report.failed_datasets.push(FailedDataset {
                        path: dataset_path.clone(),
                        error: err.to_string(),
                    });
                    continue;
                }
            };

            report.skipped_tables.extend(batch.skipped.iter().cloned());
            let delete_first = plan.to_delete.contains(dataset_path);

            if let Err(err) = writer::replace_dataset(&mut self.conn, &batch, delete_first) {
                error!(path = %dataset_path, error = %err, "dataset.write_failed");
                report.failed_datasets.push(FailedDataset {
                    path: dataset_path.clone(),
                    error: err.to_string(),
                });
                continue;
            }

            if delete_first {
                report.deleted.push(dataset_path.clone());
            }
            if batch.dataset.is_some() {
                report.created.push(dataset_path.clone());
            } else {
                warn!(path = %dataset_path, "dataset.all_tables_skipped");
            }
        }

        let remaining: Vec<String> = plan.delete_only().cloned().collect();
        writer::delete_datasets(&mut self.conn, &remaining)?;
        report.deleted.extend(remaining);

        if options.full_text_search {
            fts::rebuild_index(&self.conn)?;
        }

        info!(
            deleted = report.deleted.len(),
            created = report.created.len(),
            skipped_tables = report.skipped_tables.len(),
            failed_datasets = report.failed_datasets.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sync.finished"
        );
        Ok(report)
    }
}
