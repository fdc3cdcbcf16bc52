//! Metadata store: datasets, tables and variables in DuckDB.
//!
//! All functions take a plain `&Connection` so they run the same way on the
//! sync engine's owned connection, inside a transaction (which derefs to a
//! connection) and on a serving worker.
//!
//! The tables carry no primary-key constraints. Rows are replaced by
//! delete + insert inside one transaction, and uniqueness of the path keys is
//! checked on read instead ([`Error::InternalConsistency`]).

use crate::error::{Error, Result};
use crate::models::{Dataset, DimensionValues, Display, License, Source, Table, Variable};
use crate::storage::sanitize::{file_literal, table_identifier};
use duckdb::{params, Connection};
use std::collections::BTreeMap;
use std::path::Path;

pub const DATASETS_TABLE: &str = "meta_datasets";
pub const TABLES_TABLE: &str = "meta_tables";
pub const VARIABLES_TABLE: &str = "meta_variables";

// Note: nested fields are VARCHAR holding JSON rather than the JSON type so
// the json extension is not required; serde does the encoding.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS meta_datasets (
    path VARCHAR NOT NULL,
    channel VARCHAR NOT NULL,
    namespace VARCHAR NOT NULL,
    short_name VARCHAR NOT NULL,
    title VARCHAR,
    description VARCHAR,
    sources VARCHAR NOT NULL,
    licenses VARCHAR NOT NULL,
    is_public BOOLEAN NOT NULL,
    checksum VARCHAR NOT NULL,
    source_checksum VARCHAR,
    version VARCHAR NOT NULL,
    legacy_metadata VARCHAR
);
CREATE TABLE IF NOT EXISTS meta_tables (
    path VARCHAR NOT NULL,
    dataset_path VARCHAR NOT NULL,
    table_name VARCHAR NOT NULL,
    dataset_name VARCHAR NOT NULL,
    version VARCHAR NOT NULL,
    namespace VARCHAR NOT NULL,
    channel VARCHAR NOT NULL,
    dimensions VARCHAR NOT NULL,
    format VARCHAR NOT NULL,
    is_public BOOLEAN NOT NULL,
    dimension_values VARCHAR NOT NULL
);
CREATE TABLE IF NOT EXISTS meta_variables (
    path VARCHAR NOT NULL,
    title VARCHAR,
    description VARCHAR,
    licenses VARCHAR NOT NULL,
    sources VARCHAR NOT NULL,
    unit VARCHAR,
    short_unit VARCHAR,
    display VARCHAR NOT NULL,
    legacy_metadata VARCHAR,
    legacy_id BIGINT,
    short_name VARCHAR NOT NULL,
    table_path VARCHAR NOT NULL,
    dataset_path VARCHAR NOT NULL,
    dataset_short_name VARCHAR NOT NULL,
    variable_type VARCHAR NOT NULL
);
"#;

const DATASET_COLUMNS: &str = "path, channel, namespace, short_name, title, description, \
    sources, licenses, is_public, checksum, source_checksum, version, legacy_metadata";

const TABLE_COLUMNS: &str = "path, dataset_path, table_name, dataset_name, version, namespace, \
    channel, dimensions, format, is_public, dimension_values";

const VARIABLE_COLUMNS: &str = "path, title, description, licenses, sources, unit, short_unit, \
    display, legacy_metadata, legacy_id, short_name, table_path, dataset_path, \
    dataset_short_name, variable_type";

/// Create the metadata tables if they do not exist yet.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM information_schema.tables WHERE table_name = ?",
        params![name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Current `path -> checksum` of every stored dataset.
///
/// A store that has never been synced has no dataset table; that reads as empty.
pub fn dataset_checksums(conn: &Connection) -> Result<BTreeMap<String, String>> {
    if !table_exists(conn, DATASETS_TABLE)? {
        return Ok(BTreeMap::new());
    }
    let mut stmt = conn.prepare("SELECT path, checksum FROM meta_datasets")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
    let mut checksums = BTreeMap::new();
    for row in rows {
        let (path, checksum) = row?;
        checksums.insert(path, checksum);
    }
    Ok(checksums)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn opt_to_json(value: &Option<serde_json::Value>) -> Result<Option<String>> {
    value.as_ref().map(to_json).transpose()
}

pub fn insert_dataset(conn: &Connection, ds: &Dataset) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO meta_datasets ({DATASET_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ),
        params![
            ds.path,
            ds.channel,
            ds.namespace,
            ds.short_name,
            ds.title,
            ds.description,
            to_json(&ds.sources)?,
            to_json(&ds.licenses)?,
            ds.is_public,
            ds.checksum,
            ds.source_checksum,
            ds.version,
            opt_to_json(&ds.legacy_metadata)?,
        ],
    )?;
    Ok(())
}

pub fn insert_table(conn: &Connection, t: &Table) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO meta_tables ({TABLE_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ),
        params![
            t.path,
            t.dataset_path,
            t.table_name,
            t.dataset_name,
            t.version,
            t.namespace,
            t.channel,
            to_json(&t.dimensions)?,
            t.format,
            t.is_public,
            to_json(&t.dimension_values)?,
        ],
    )?;
    Ok(())
}

pub fn insert_variable(conn: &Connection, v: &Variable) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO meta_variables ({VARIABLE_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ),
        params![
            v.path,
            v.title,
            v.description,
            to_json(&v.licenses)?,
            to_json(&v.sources)?,
            v.unit,
            v.short_unit,
            to_json(&v.display)?,
            opt_to_json(&v.legacy_metadata)?,
            v.legacy_id,
            v.short_name,
            v.table_path,
            v.dataset_path,
            v.dataset_short_name,
            v.variable_type,
        ],
    )?;
    Ok(())
}

/// Remove every row that belongs to `dataset_path`, plus the table views.
pub fn delete_dataset(conn: &Connection, dataset_path: &str) -> Result<()> {
    for table_path in table_paths(conn, dataset_path)? {
        drop_table_view(conn, &table_path)?;
    }
    conn.execute("DELETE FROM meta_variables WHERE dataset_path = ?", params![dataset_path])?;
    conn.execute("DELETE FROM meta_tables WHERE dataset_path = ?", params![dataset_path])?;
    conn.execute("DELETE FROM meta_datasets WHERE path = ?", params![dataset_path])?;
    Ok(())
}

fn table_paths(conn: &Connection, dataset_path: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT path FROM meta_tables WHERE dataset_path = ?")?;
    let rows = stmt.query_map(params![dataset_path], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

/// Expose a table's data file as a view named after its sanitized path.
pub fn create_table_view(conn: &Connection, table_path: &str, data_file: &Path) -> Result<()> {
    let sql = format!(
        "CREATE OR REPLACE VIEW {} AS SELECT * FROM read_parquet({})",
        table_identifier(table_path)?,
        file_literal(data_file)?
    );
    conn.execute_batch(&sql)?;
    Ok(())
}

pub fn drop_table_view(conn: &Connection, table_path: &str) -> Result<()> {
    conn.execute_batch(&format!("DROP VIEW IF EXISTS {}", table_identifier(table_path)?))?;
    Ok(())
}

struct RawDataset {
    path: String,
    channel: String,
    namespace: String,
    short_name: String,
    title: Option<String>,
    description: Option<String>,
    sources: String,
    licenses: String,
    is_public: bool,
    checksum: String,
    source_checksum: Option<String>,
    version: String,
    legacy_metadata: Option<String>,
}

impl RawDataset {
    fn from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            path: row.get(0)?,
            channel: row.get(1)?,
            namespace: row.get(2)?,
            short_name: row.get(3)?,
            title: row.get(4)?,
            description: row.get(5)?,
            sources: row.get(6)?,
            licenses: row.get(7)?,
            is_public: row.get(8)?,
            checksum: row.get(9)?,
            source_checksum: row.get(10)?,
            version: row.get(11)?,
            legacy_metadata: row.get(12)?,
        })
    }

    fn decode(self) -> Result<Dataset> {
        Ok(Dataset {
            path: self.path,
            channel: self.channel,
            namespace: self.namespace,
            short_name: self.short_name,
            title: self.title,
            description: self.description,
            sources: serde_json::from_str::<Vec<Source>>(&self.sources)?,
            licenses: serde_json::from_str::<Vec<License>>(&self.licenses)?,
            is_public: self.is_public,
            checksum: self.checksum,
            source_checksum: self.source_checksum,
            version: self.version,
            legacy_metadata: self
                .legacy_metadata
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
        })
    }
}

struct RawTable {
    path: String,
    dataset_path: String,
    table_name: String,
    dataset_name: String,
    version: String,
    namespace: String,
    channel: String,
    dimensions: String,
    format: String,
    is_public: bool,
    dimension_values: String,
}

impl RawTable {
    fn from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            path: row.get(0)?,
            dataset_path: row.get(1)?,
            table_name: row.get(2)?,
            dataset_name: row.get(3)?,
            version: row.get(4)?,
            namespace: row.get(5)?,
            channel: row.get(6)?,
            dimensions: row.get(7)?,
            format: row.get(8)?,
            is_public: row.get(9)?,
            dimension_values: row.get(10)?,
        })
    }

    fn decode(self) -> Result<Table> {
        Ok(Table {
            path: self.path,
            dataset_path: self.dataset_path,
            table_name: self.table_name,
            dataset_name: self.dataset_name,
            version: self.version,
            namespace: self.namespace,
            channel: self.channel,
            dimensions: serde_json::from_str(&self.dimensions)?,
            format: self.format,
            is_public: self.is_public,
            dimension_values: serde_json::from_str::<DimensionValues>(&self.dimension_values)?,
        })
    }
}

struct RawVariable {
    path: String,
    title: Option<String>,
    description: Option<String>,
    licenses: String,
    sources: String,
    unit: Option<String>,
    short_unit: Option<String>,
    display: String,
    legacy_metadata: Option<String>,
    legacy_id: Option<i64>,
    short_name: String,
    table_path: String,
    dataset_path: String,
    dataset_short_name: String,
    variable_type: String,
}

impl RawVariable {
    fn from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            path: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            licenses: row.get(3)?,
            sources: row.get(4)?,
            unit: row.get(5)?,
            short_unit: row.get(6)?,
            display: row.get(7)?,
            legacy_metadata: row.get(8)?,
            legacy_id: row.get(9)?,
            short_name: row.get(10)?,
            table_path: row.get(11)?,
            dataset_path: row.get(12)?,
            dataset_short_name: row.get(13)?,
            variable_type: row.get(14)?,
        })
    }

    fn decode(self) -> Result<Variable> {
        Ok(Variable {
            path: self.path,
            title: self.title,
            description: self.description,
            licenses: serde_json::from_str(&self.licenses)?,
            sources: serde_json::from_str(&self.sources)?,
            unit: self.unit,
            short_unit: self.short_unit,
            display: serde_json::from_str::<Display>(&self.display)?,
            legacy_metadata: self
                .legacy_metadata
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            legacy_id: self.legacy_id,
            short_name: self.short_name,
            table_path: self.table_path,
            dataset_path: self.dataset_path,
            dataset_short_name: self.dataset_short_name,
            variable_type: self.variable_type,
        })
    }
}

/// Collect at most one row; more than one means the sync broke a key invariant.
fn at_most_one<T>(mut rows: Vec<T>, what: impl FnOnce() -> String) -> Result<Option<T>> {
    match rows.len() {
        0 => Ok(None),
        1 => Ok(rows.pop()),
        n => {
            let what = what();
            tracing::error!(rows = n, key = %what, "metadata.duplicate_key");
            Err(Error::InternalConsistency(format!(
                "{n} rows found for {what}, expected at most one"
            )))
        }
    }
}

fn query_datasets(conn: &Connection, filter: &str, args: &[&dyn duckdb::ToSql]) -> Result<Vec<Dataset>> {
    let mut stmt = conn.prepare(&format!("SELECT {DATASET_COLUMNS} FROM meta_datasets {filter}"))?;
    let rows = stmt.query_map(args, RawDataset::from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?.decode()?);
    }
    Ok(out)
}

fn query_tables(conn: &Connection, filter: &str, args: &[&dyn duckdb::ToSql]) -> Result<Vec<Table>> {
    let mut stmt = conn.prepare(&format!("SELECT {TABLE_COLUMNS} FROM meta_tables {filter}"))?;
    let rows = stmt.query_map(args, RawTable::from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?.decode()?);
    }
    Ok(out)
}

fn query_variables(conn: &Connection, filter: &str, args: &[&dyn duckdb::ToSql]) -> Result<Vec<Variable>> {
    let mut stmt = conn.prepare(&format!("SELECT {VARIABLE_COLUMNS} FROM meta_variables {filter}"))?;
    let rows = stmt.query_map(args, RawVariable::from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?.decode()?);
    }
    Ok(out)
}

pub fn get_dataset(conn: &Connection, path: &str) -> Result<Option<Dataset>> {
    let rows = query_datasets(conn, "WHERE path = ?", &[&path])?;
    at_most_one(rows, || format!("dataset `{path}`"))
}

pub fn get_table(conn: &Connection, path: &str) -> Result<Option<Table>> {
    let rows = query_tables(conn, "WHERE path = ?", &[&path])?;
    at_most_one(rows, || format!("table `{path}`"))
}

pub fn tables_for_dataset(conn: &Connection, dataset_path: &str) -> Result<Vec<Table>> {
    query_tables(conn, "WHERE dataset_path = ? ORDER BY path", &[&dataset_path])
}

pub fn get_variable_by_path(conn: &Connection, path: &str) -> Result<Option<Variable>> {
    let rows = query_variables(conn, "WHERE path = ?", &[&path])?;
    at_most_one(rows, || format!("variable `{path}`"))
}

pub fn get_variable_by_legacy_id(conn: &Connection, legacy_id: i64) -> Result<Option<Variable>> {
    let rows = query_variables(conn, "WHERE legacy_id = ?", &[&legacy_id])?;
    at_most_one(rows, || format!("variable id {legacy_id}"))
}

pub fn variables_for_table(conn: &Connection, table_path: &str) -> Result<Vec<Variable>> {
    query_variables(conn, "WHERE table_path = ? ORDER BY path", &[&table_path])
}

pub fn variables_for_dataset(conn: &Connection, dataset_path: &str) -> Result<Vec<Variable>> {
    query_variables(conn, "WHERE dataset_path = ? ORDER BY path", &[&dataset_path])
}

/// Titles of all datasets
pub fn dataset_titles(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT title FROM meta_datasets WHERE title IS NOT NULL ORDER BY title")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

/// Level of the catalog tree to list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogLevel {
    Channel,
    Namespace,
    Version,
    Dataset,
    Table,
}

impl CatalogLevel {
    fn column(self) -> &'static str {
        match self {
            CatalogLevel::Channel => "channel",
            CatalogLevel::Namespace => "namespace",
            CatalogLevel::Version => "version",
            CatalogLevel::Dataset => "dataset_name",
            CatalogLevel::Table => "table_name",
        }
    }

    /// The level reached after fixing `n` leading path components
    pub fn after(n: usize) -> Option<Self> {
        match n {
            0 => Some(CatalogLevel::Channel),
            1 => Some(CatalogLevel::Namespace),
            2 => Some(CatalogLevel::Version),
            3 => Some(CatalogLevel::Dataset),
            4 => Some(CatalogLevel::Table),
            _ => None,
        }
    }
}

/// Distinct values at the next level below `prefix` (channel, namespace, ...).
pub fn list_catalog_level(conn: &Connection, prefix: &[&str]) -> Result<Vec<String>> {
    let level = CatalogLevel::after(prefix.len())
        .ok_or_else(|| Error::not_found(format!("catalog level below `{}`", prefix.join("/"))))?;
    let filters = ["channel", "namespace", "version", "dataset_name"];
    let conditions: Vec<String> = filters
        .iter()
        .take(prefix.len())
        .map(|c| format!("{c} = ?"))
        .collect();
    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    let column = level.column();
    let mut stmt = conn.prepare(&format!(
        "SELECT DISTINCT {column} FROM meta_tables {where_clause} ORDER BY {column}"
    ))?;
    let args: Vec<&dyn duckdb::ToSql> = prefix.iter().map(|p| p as &dyn duckdb::ToSql).collect();
    let rows = stmt.query_map(args.as_slice(), |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

/// Number of rows in each metadata table, for logging.
pub fn row_counts(conn: &Connection) -> Result<(i64, i64, i64)> {
    let count = |table: &str| -> Result<i64> {
        Ok(conn.query_row(&format!("SELECT count(*) FROM {table}"), [], |r| r.get(0))?)
    };
    Ok((
        count(DATASETS_TABLE)?,
        count(TABLES_TABLE)?,
        count(VARIABLES_TABLE)?,
    ))
}
