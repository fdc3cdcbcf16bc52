//! DuckDB-backed storage for the catalog.
//!
//! This module provides:
//! - the metadata store (datasets, tables, variables)
//! - the full-text index over variables
//! - the identifier sanitizer every generated statement goes through
//! - the worker pool used by the serving layer

pub mod fts;
pub mod metadata;
pub mod pool;
pub mod sanitize;

pub use pool::WorkerPool;

use crate::config::{FactsConfig, StoreConfig};
use crate::error::Result;
use crate::storage::sanitize::file_literal;
use duckdb::{AccessMode, Config, Connection};
use std::path::Path;
use tracing::{debug, info};

/// Schema alias under which an external fact database is attached
pub const FACTS_SCHEMA: &str = "facts";

/// Open the metadata store for a sync pass (read-write).
pub fn open_writer(store: &StoreConfig) -> Result<Connection> {
    let config = Config::default()
        .access_mode(AccessMode::ReadWrite)?
        .max_memory(&store.memory_limit)?;
    let conn = Connection::open_with_flags(&store.path, config)?;
    metadata::init_schema(&conn)?;
    info!(path = %store.path.display(), "duckdb.open_writer");
    Ok(conn)
}

/// Open the metadata store for serving.
///
/// Returns the connection and the schema the fact tables live in: the
/// attached fact database if one is configured, the main database otherwise.
pub fn open_reader(
    store: &StoreConfig,
    facts: &FactsConfig,
) -> Result<(Connection, Option<&'static str>)> {
    let mode = if store.read_only {
        AccessMode::ReadOnly
    } else {
        AccessMode::ReadWrite
    };
    let config = Config::default()
        .access_mode(mode)?
        .max_memory(&store.memory_limit)?;
    let conn = Connection::open_with_flags(&store.path, config)?;
    info!(path = %store.path.display(), read_only = store.read_only, "duckdb.open_reader");

    let schema = match &facts.path {
        Some(path) => {
            attach_facts(&conn, path)?;
            Some(FACTS_SCHEMA)
        }
        None => None,
    };
    Ok((conn, schema))
}

/// Attach a fact database read-only under [`FACTS_SCHEMA`].
pub fn attach_facts(conn: &Connection, path: &Path) -> Result<()> {
    conn.execute_batch(&format!(
        "ATTACH {} AS {FACTS_SCHEMA} (READ_ONLY)",
        file_literal(path)?
    ))?;
    debug!(path = %path.display(), "duckdb.attach_facts");
    Ok(())
}

/// Create empty fact tables (`data_values`, `entities`).
///
/// Used to seed a fact database; serving only ever reads these tables.
pub fn init_fact_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS entities (
            id BIGINT NOT NULL,
            name VARCHAR,
            code VARCHAR
        );
        CREATE TABLE IF NOT EXISTS data_values (
            variableId BIGINT NOT NULL,
            entityId BIGINT NOT NULL,
            year BIGINT NOT NULL,
            value VARCHAR
        );
        "#,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn store_config(path: PathBuf, read_only: bool) -> StoreConfig {
        StoreConfig {
            path,
            memory_limit: "512MB".to_string(),
            workers: 1,
            read_only,
        }
    }

    #[test]
    fn test_writer_then_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("duck.db");
        {
            let conn = open_writer(&store_config(path.clone(), false)).unwrap();
            assert!(metadata::dataset_checksums(&conn).unwrap().is_empty());
        }
        let (conn, schema) =
            open_reader(&store_config(path, true), &FactsConfig::default()).unwrap();
        assert!(schema.is_none());
        assert_eq!(metadata::row_counts(&conn).unwrap(), (0, 0, 0));
        // read-only store rejects writes
        assert!(conn.execute_batch("CREATE TABLE x (a INT)").is_err());
    }

    #[test]
    fn test_attach_facts() {
        let dir = tempfile::tempdir().unwrap();
        let facts_path = dir.path().join("facts.db");
        {
            let facts = Connection::open(&facts_path).unwrap();
            init_fact_schema(&facts).unwrap();
            facts
                .execute_batch("INSERT INTO entities VALUES (1, 'France', 'FRA')")
                .unwrap();
        }
        let conn = Connection::open_in_memory().unwrap();
        attach_facts(&conn, &facts_path).unwrap();
        let name: String = conn
            .query_row("SELECT name FROM facts.entities WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(name, "France");
    }
}
