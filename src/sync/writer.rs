//! Transactional writer: replaces the stored rows of a dataset as one unit.

use super::ingest::DatasetBatch;
use crate::error::Result;
use crate::storage::metadata;
use duckdb::Connection;
use tracing::{debug, info};

/// Replace everything stored for `batch.path` with the batch contents.
///
/// The delete (when `delete_first`) and all inserts run in one transaction,
/// so a failure leaves the previous rows in place. A batch without a dataset
/// record (every table skipped) only deletes.
pub fn replace_dataset(conn: &mut Connection, batch: &DatasetBatch, delete_first: bool) -> Result<()> {
    let tx = conn.transaction()?;

    if delete_first {
        metadata::delete_dataset(&tx, &batch.path)?;
        debug!(path = %batch.path, "dataset.delete");
    }

    if let Some(dataset) = &batch.dataset {
        metadata::insert_dataset(&tx, dataset)?;
        for (table, data_file) in &batch.tables {
            metadata::insert_table(&tx, table)?;
            metadata::create_table_view(&tx, &table.path, data_file)?;
        }
        for variable in &batch.variables {
            metadata::insert_variable(&tx, variable)?;
        }
    }

    tx.commit()?;
    info!(
        path = %batch.path,
        tables = batch.tables.len(),
        variables = batch.variables.len(),
        "dataset.replaced"
    );
    Ok(())
}

/// Delete several datasets in one transaction.
pub fn delete_datasets<'a, I>(conn: &mut Connection, paths: I) -> Result<usize>
where
    I: IntoIterator<Item = &'a String>,
{
    let tx = conn.transaction()?;
    let mut n = 0;
    for path in paths {
        metadata::delete_dataset(&tx, path)?;
        n += 1;
    }
    tx.commit()?;
    if n > 0 {
        info!(n, "dataset.delete_datasets");
    }
    Ok(n)
}
