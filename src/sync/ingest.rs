//! Metadata ingestion: turn manifest rows, pipeline metadata and physical
//! data into dataset, table and variable records.

use crate::catalog::{CatalogSource, DatasetMetadata, ManifestRow, TableMetadata, VariableMetadata};
use crate::error::{Error, FetchFailure, Result};
use crate::models::dimensions::{collapse_entities, has_entity_triple};
use crate::models::{
    infer_variable_type, Dataset, DimensionValues, EntityTriple, Table, Variable,
    ENTITY_DIMENSIONS, ENTITY_ZIP,
};
use crate::storage::sanitize::{column_identifier, file_literal};
use duckdb::Connection;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Channel of datasets backported from the legacy database
pub const BACKPORT_CHANNEL: &str = "backport";

/// Dimensions every backported table must carry
pub const BACKPORT_DIMENSIONS: [&str; 4] = ["year", "entity_id", "entity_name", "entity_code"];

/// Physical encoding tables are ingested from
pub const DATA_FORMAT: &str = "parquet";

/// A table left out of the pass, with the reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTable {
    pub path: String,
    pub reason: String,
}

/// Records of one successfully ingested table
#[derive(Debug, Clone)]
pub struct IngestedTable {
    pub dataset: Dataset,
    pub table: Table,
    pub variables: Vec<Variable>,
    pub data_file: PathBuf,
}

pub enum TableOutcome {
    Ingested(Box<IngestedTable>),
    Skipped(SkippedTable),
}

/// Everything that will replace the stored rows of one dataset
#[derive(Debug, Clone, Default)]
pub struct DatasetBatch {
    pub path: String,
    /// Taken from the first table that ingested; `None` when every table was skipped
    pub dataset: Option<Dataset>,
    pub tables: Vec<(Table, PathBuf)>,
    pub variables: Vec<Variable>,
    pub skipped: Vec<SkippedTable>,
}

impl DatasetBatch {
    fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            ..Default::default()
        }
    }

    fn push(&mut self, ingested: IngestedTable) {
        if self.dataset.is_none() {
            self.dataset = Some(ingested.dataset);
        }
        self.tables.push((ingested.table, ingested.data_file));
        self.variables.extend(ingested.variables);
    }
}

/// Physical columns of a data file with their DuckDB types, in file order
pub fn describe_columns(conn: &Connection, file: &Path) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(&format!(
        "DESCRIBE SELECT * FROM read_parquet({})",
        file_literal(file)?
    ))?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

/// Integer column types whose values always fit a signed 64-bit integer
fn fits_i64(column_type: &str) -> bool {
    matches!(
        column_type.trim().to_uppercase().as_str(),
        "TINYINT" | "SMALLINT" | "INTEGER" | "INT" | "BIGINT" | "UTINYINT" | "USMALLINT"
            | "UINTEGER"
    )
}

/// JSON number for an unsigned or 128-bit integer, text when it exceeds u64.
fn wide_int_value(text: &str) -> JsonValue {
    text.parse::<i64>()
        .map(JsonValue::from)
        .or_else(|_| text.parse::<u64>().map(JsonValue::from))
        .unwrap_or_else(|_| JsonValue::String(text.to_string()))
}

fn column_type<'a>(columns: &'a [(String, String)], name: &str) -> Option<&'a str> {
    columns
        .iter()
        .find(|(column, _)| column == name)
        .map(|(_, ty)| ty.as_str())
}

/// Distinct values of every declared dimension.
///
/// When the dimensions contain the whole entity triple, the three columns are
/// read jointly and replaced by one `entity_zip` dimension.
pub fn extract_dimension_values(
    conn: &Connection,
    file: &Path,
    dimensions: &[String],
    columns: &[(String, String)],
) -> Result<DimensionValues> {
    let source = format!("read_parquet({})", file_literal(file)?);
    let mut values = DimensionValues::new();
    let collapse = has_entity_triple(dimensions);

    if collapse {
        let sql = format!(
            "SELECT DISTINCT CAST(entity_id AS VARCHAR), CAST(entity_name AS VARCHAR), \
             CAST(entity_code AS VARCHAR) FROM {source} WHERE entity_id IS NOT NULL"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(EntityTriple::new(
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;
        let triples = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        let zip = collapse_entities(triples);
        values.insert(ENTITY_ZIP, zip.into_iter().map(JsonValue::String).collect());
    }

    for dimension in dimensions {
        if collapse && ENTITY_DIMENSIONS.contains(&dimension.as_str()) {
            continue;
        }
        let column = column_identifier(dimension)?;
        let physical = column_type(columns, dimension).unwrap_or_default();
        let kind = infer_variable_type(physical);
        // native sort order of the column; the cast only normalizes the row type
        let (cast, key) = match kind.as_str() {
            "int" if !fits_i64(physical) => ("VARCHAR", "wide_int"),
            "int" => ("BIGINT", kind.as_str()),
            "float" => ("DOUBLE", kind.as_str()),
            "bool" => ("BOOLEAN", kind.as_str()),
            _ => ("VARCHAR", "string"),
        };
        let sql = format!(
            "SELECT CAST({column} AS {cast}) AS v FROM {source} \
             WHERE {column} IS NOT NULL GROUP BY {column} ORDER BY {column}"
        );
        let mut stmt = conn.prepare(&sql)?;
        let distinct: Vec<JsonValue> = match key {
            "int" => stmt
                .query_map([], |row| row.get::<_, i64>(0))?
                .map(|v| v.map(JsonValue::from))
                .collect::<std::result::Result<_, _>>()?,
            "float" => stmt
                .query_map([], |row| row.get::<_, f64>(0))?
                .map(|v| v.map(JsonValue::from))
                .collect::<std::result::Result<_, _>>()?,
            "bool" => stmt
                .query_map([], |row| row.get::<_, bool>(0))?
                .map(|v| v.map(JsonValue::from))
                .collect::<std::result::Result<_, _>>()?,
            "wide_int" => stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .map(|v| v.map(|text| wide_int_value(&text)))
                .collect::<std::result::Result<_, _>>()?,
            _ => stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .map(|v| v.map(JsonValue::from))
                .collect::<std::result::Result<_, _>>()?,
        };
        values.insert(dimension.clone(), distinct);
    }

    Ok(values)
}

fn dataset_record(
    dataset_path: &str,
    row: &ManifestRow,
    meta: &DatasetMetadata,
    version: &str,
    namespace: &str,
    checksum: &str,
) -> Dataset {
    Dataset {
        path: dataset_path.to_string(),
        channel: row.channel.clone(),
        namespace: namespace.to_string(),
        short_name: meta.short_name.clone().unwrap_or_else(|| row.dataset.clone()),
        title: meta.title.clone(),
        description: meta.description.clone(),
        sources: meta.sources.clone(),
        licenses: meta.licenses.clone(),
        is_public: meta.is_public,
        checksum: checksum.to_string(),
        source_checksum: meta.source_checksum.clone(),
        version: version.to_string(),
        legacy_metadata: meta.grapher_meta().cloned(),
    }
}

fn variable_record(
    short_name: &str,
    meta: &VariableMetadata,
    table: &Table,
    dataset_short_name: &str,
    variable_type: String,
) -> Variable {
    // legacy ids are only trusted on backported datasets; elsewhere they
    // would collide with the originals
    let (legacy_metadata, legacy_id) = if table.channel == BACKPORT_CHANNEL {
        let grapher_meta = meta.grapher_meta().cloned();
        let legacy_id = grapher_meta
            .as_ref()
            .and_then(|m| m.get("id"))
            .and_then(JsonValue::as_i64);
        (grapher_meta, legacy_id)
    } else {
        (None, None)
    };

    Variable {
        path: Variable::variable_path(&table.path, short_name),
        title: meta.title.clone(),
        description: meta.description.clone(),
        licenses: meta.licenses.clone(),
        sources: meta.sources.clone(),
        unit: meta.effective_unit(),
        short_unit: meta.short_unit.clone(),
        display: meta.display.clone().unwrap_or_default(),
        legacy_metadata,
        legacy_id,
        short_name: short_name.to_string(),
        table_path: table.path.clone(),
        dataset_path: table.dataset_path.clone(),
        dataset_short_name: dataset_short_name.to_string(),
        variable_type,
    }
}

fn skip(path: &str, reason: impl Into<String>) -> TableOutcome {
    TableOutcome::Skipped(SkippedTable {
        path: path.to_string(),
        reason: reason.into(),
    })
}

/// Build the records of one table from its manifest row, metadata and data file.
pub fn ingest_table(
    conn: &Connection,
    row: &ManifestRow,
    meta: &TableMetadata,
    data_file: &Path,
    dataset_checksum: &str,
) -> Result<TableOutcome> {
    let is_backport = row.channel == BACKPORT_CHANNEL;

    if is_backport {
        let missing: Vec<String> = BACKPORT_DIMENSIONS
            .iter()
            .filter(|d| !row.dimensions.iter().any(|x| x == *d))
            .map(|d| d.to_string())
            .collect();
        if !missing.is_empty() {
            let err = Error::MissingDimension {
                table: row.path.clone(),
                missing,
            };
            warn!(path = %row.path, error = %err, "table.missing_dimensions");
            return Ok(skip(&row.path, err.to_string()));
        }
    }

    // backported datasets carry no version and live under one namespace
    let (version, namespace) = if is_backport {
        (Some("latest".to_string()), "owid".to_string())
    } else {
        (
            meta.dataset.version.clone().filter(|v| !v.is_empty()),
            meta.dataset
                .namespace
                .clone()
                .unwrap_or_else(|| row.namespace.clone()),
        )
    };
    let Some(version) = version else {
        error!(path = %row.path, "missing.version");
        return Ok(skip(&row.path, "dataset metadata has no version"));
    };

    let columns = describe_columns(conn, data_file)?;
    let absent: Vec<String> = row
        .dimensions
        .iter()
        .filter(|d| column_type(&columns, d).is_none())
        .cloned()
        .collect();
    if !absent.is_empty() {
        let err = Error::MissingDimension {
            table: row.path.clone(),
            missing: absent,
        };
        warn!(path = %row.path, error = %err, "table.missing_dimensions");
        return Ok(skip(&row.path, err.to_string()));
    }

    info!(path = %row.path, "table.extract_dimension_values");
    let dimension_values = extract_dimension_values(conn, data_file, &row.dimensions, &columns)?;
    let missing = dimension_values.missing_from(&row.dimensions);
    if !missing.is_empty() {
        return Err(Error::InternalConsistency(format!(
            "dimension values of `{}` lack {}",
            row.path,
            missing.join(", ")
        )));
    }

    let dataset_path = row.dataset_path().to_string();
    let table = Table {
        path: row.path.clone(),
        dataset_path: dataset_path.clone(),
        table_name: row.table.clone(),
        dataset_name: row.dataset.clone(),
        version: row.version.clone(),
        namespace: row.namespace.clone(),
        channel: row.channel.clone(),
        dimensions: row.dimensions.clone(),
        format: DATA_FORMAT.to_string(),
        is_public: row.is_public,
        dimension_values,
    };
    info!(path = %table.path, "table.create");

    let dataset = dataset_record(
        &dataset_path,
        row,
        &meta.dataset,
        &version,
        &namespace,
        dataset_checksum,
    );

    let default_meta = VariableMetadata::default();
    let variables = columns
        .iter()
        .filter(|(name, _)| !table.dimensions.contains(name))
        .map(|(name, ty)| {
            let var_meta = meta.fields.get(name).unwrap_or(&default_meta);
            info!(variable = %name, "table.variable.create");
            variable_record(name, var_meta, &table, &dataset.short_name, infer_variable_type(ty))
        })
        .collect();

    Ok(TableOutcome::Ingested(Box::new(IngestedTable {
        dataset,
        table,
        variables,
        data_file: data_file.to_path_buf(),
    })))
}

/// Ingest every table of one dataset.
///
/// Tables without a parquet representation, private tables and tables that
/// lack required dimensions are skipped. An unreachable catalog entry is
/// returned as an error, which the caller treats as fatal for the pass.
pub async fn ingest_dataset<S: CatalogSource + ?Sized>(
    conn: &Connection,
    source: &S,
    dataset_path: &str,
    rows: &[&ManifestRow],
    dataset_checksum: &str,
) -> Result<DatasetBatch> {
    let mut batch = DatasetBatch::new(dataset_path);

    for row in rows {
        if !row.formats.iter().any(|f| f == DATA_FORMAT) {
            warn!(path = %row.path, formats = ?row.formats, "table.unsupported_format");
            batch.skipped.push(SkippedTable {
                path: row.path.clone(),
                reason: Error::UnsupportedFormat(row.formats.join(",")).to_string(),
            });
            continue;
        }

        info!(path = %row.path, "table.read_metadata");
        let fetched = async {
            let meta = source.table_metadata(&row.path).await?;
            let file = source.data_file(&row.path, DATA_FORMAT).await?;
            Ok::<_, Error>((meta, file))
        }
        .await;

        let (meta, file) = match fetched {
            Ok(fetched) => fetched,
            Err(
                err @ Error::RemoteFetch {
                    kind: FetchFailure::Forbidden,
                    ..
                },
            ) => {
                warn!(path = %row.path, error = %err, "table.forbidden");
                batch.skipped.push(SkippedTable {
                    path: row.path.clone(),
                    reason: err.to_string(),
                });
                continue;
            }
            Err(err) => return Err(err),
        };

        match ingest_table(conn, row, &meta, &file, dataset_checksum)? {
            TableOutcome::Ingested(ingested) => batch.push(*ingested),
            TableOutcome::Skipped(skipped) => batch.skipped.push(skipped),
        }
    }

    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::manifest::row;
    use serde_json::json;

    fn write_parquet(dir: &Path, select: &str) -> PathBuf {
        let file = dir.join("t.parquet");
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&format!(
            "COPY ({select}) TO {} (FORMAT PARQUET)",
            file_literal(&file).unwrap()
        ))
        .unwrap();
        file
    }

    const LONG_TABLE: &str = "SELECT * FROM (VALUES \
        (2000, 1, 'A', 'c1', 1.5::DOUBLE), (2001, 1, 'A', 'c1', 2.5::DOUBLE), \
        (2000, 2, 'B', 'c2', 3.5::DOUBLE), (2001, 3, 'C', NULL, 4.5::DOUBLE)) \
        t(year, entity_id, entity_name, entity_code, population)";

    fn dims() -> Vec<String> {
        BACKPORT_DIMENSIONS.iter().map(|d| d.to_string()).collect()
    }

    fn table_meta() -> TableMetadata {
        serde_json::from_value(json!({
            "dataset": {"short_name": "y", "namespace": "x", "version": "1", "title": "Y",
                        "additional_info": {"grapher_meta": {"id": 7}}},
            "fields": {"population": {
                "title": "Population", "unit": "",
                "display": {"unit": "people"},
                "additional_info": {"grapher_meta": {"id": 42}}
            }}
        }))
        .unwrap()
    }

    #[test]
    fn test_extract_dimension_values() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_parquet(dir.path(), LONG_TABLE);
        let conn = Connection::open_in_memory().unwrap();
        let columns = describe_columns(&conn, &file).unwrap();

        let values = extract_dimension_values(&conn, &file, &dims(), &columns).unwrap();
        assert_eq!(values.get("year").unwrap(), &[json!(2000), json!(2001)]);
        assert_eq!(
            values.get(ENTITY_ZIP).unwrap(),
            &[json!("1|A|c1"), json!("2|B|c2"), json!("3|C|")]
        );
        assert!(values.get("entity_id").is_none());
        assert!(values.missing_from(&dims()).is_empty());
    }

    #[test]
    fn test_wide_integer_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_parquet(
            dir.path(),
            "SELECT * FROM (VALUES \
             (18446744073709551615::UBIGINT, 1::UBIGINT, 1.0::DOUBLE), \
             (5::UBIGINT, 2::UBIGINT, 2.0::DOUBLE)) t(code, bucket, value)",
        );
        let conn = Connection::open_in_memory().unwrap();
        let columns = describe_columns(&conn, &file).unwrap();
        let dimensions = vec!["code".to_string(), "bucket".to_string()];

        let values = extract_dimension_values(&conn, &file, &dimensions, &columns).unwrap();
        assert_eq!(
            values.get("code").unwrap(),
            &[json!(5), json!(18446744073709551615u64)]
        );
        assert_eq!(values.get("bucket").unwrap(), &[json!(1), json!(2)]);
    }

    #[test]
    fn test_wide_int_value() {
        assert_eq!(wide_int_value("-3"), json!(-3));
        assert_eq!(wide_int_value("18446744073709551615"), json!(18446744073709551615u64));
        assert_eq!(
            wide_int_value("18446744073709551616"),
            json!("18446744073709551616")
        );
    }

    #[test]
    fn test_ingest_garden_table() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_parquet(dir.path(), LONG_TABLE);
        let conn = Connection::open_in_memory().unwrap();
        let manifest_row = row("garden/x/1/y/z", "v1");

        let TableOutcome::Ingested(ingested) =
            ingest_table(&conn, &manifest_row, &table_meta(), &file, "v1").unwrap()
        else {
            panic!("table was skipped");
        };

        assert_eq!(ingested.dataset.path, "garden/x/1/y");
        assert_eq!(ingested.dataset.checksum, "v1");
        assert_eq!(ingested.dataset.legacy_metadata, Some(json!({"id": 7})));
        assert_eq!(ingested.table.path, "garden/x/1/y/z");
        assert_eq!(ingested.variables.len(), 1);

        let variable = &ingested.variables[0];
        assert_eq!(variable.path, "garden/x/1/y/z/population");
        assert_eq!(variable.unit.as_deref(), Some("people"));
        assert_eq!(variable.variable_type, "float");
        // legacy ids are dropped outside the backport channel
        assert_eq!(variable.legacy_id, None);
        assert!(variable.legacy_metadata.is_none());
    }

    #[test]
    fn test_ingest_backport_table() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_parquet(dir.path(), LONG_TABLE);
        let conn = Connection::open_in_memory().unwrap();
        let manifest_row = row("backport/owid/latest/dataset_1/dataset_1", "b1");
        let mut meta = table_meta();
        meta.dataset.version = None;
        meta.dataset.namespace = Some("something_else".into());

        let TableOutcome::Ingested(ingested) =
            ingest_table(&conn, &manifest_row, &meta, &file, "b1").unwrap()
        else {
            panic!("table was skipped");
        };
        assert_eq!(ingested.dataset.version, "latest");
        assert_eq!(ingested.dataset.namespace, "owid");
        assert_eq!(ingested.variables[0].legacy_id, Some(42));
    }

    #[test]
    fn test_backport_table_without_entity_triple_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_parquet(dir.path(), LONG_TABLE);
        let conn = Connection::open_in_memory().unwrap();
        let mut manifest_row = row("backport/owid/latest/d/d", "b1");
        manifest_row.dimensions = vec!["year".into(), "entity_id".into()];

        match ingest_table(&conn, &manifest_row, &table_meta(), &file, "b1").unwrap() {
            TableOutcome::Skipped(skipped) => {
                assert!(skipped.reason.contains("entity_code"));
                assert!(skipped.reason.contains("entity_name"));
            }
            TableOutcome::Ingested(_) => panic!("table should be skipped"),
        }
    }

    #[test]
    fn test_missing_version_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_parquet(dir.path(), LONG_TABLE);
        let conn = Connection::open_in_memory().unwrap();
        let mut meta = table_meta();
        meta.dataset.version = None;

        let outcome = ingest_table(&conn, &row("garden/x/1/y/z", "v1"), &meta, &file, "v1").unwrap();
        assert!(matches!(outcome, TableOutcome::Skipped(_)));
    }

    #[test]
    fn test_declared_dimension_absent_from_data_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_parquet(dir.path(), "SELECT 2000 AS year, 1.0::DOUBLE AS value");
        let conn = Connection::open_in_memory().unwrap();
        let mut manifest_row = row("garden/x/1/y/z", "v1");
        manifest_row.dimensions = vec!["year".into(), "country".into()];

        let outcome = ingest_table(&conn, &manifest_row, &table_meta(), &file, "v1").unwrap();
        assert!(matches!(outcome, TableOutcome::Skipped(s) if s.reason.contains("country")));
    }
}
