//! Physical backends and the statements generated for them.
//!
//! Every identifier spliced into a statement comes out of the sanitizer;
//! values (ids, limits) are always bound as parameters.

use crate::error::{Error, Result};
use crate::models::Variable;
use crate::storage::sanitize::{column_identifier, file_literal, schema_prefix};
use std::path::Path;

/// Where the values of a variable live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBackend {
    /// Long `data_values` table keyed by legacy variable id, joined to `entities`
    FactTable,
    /// Column of the table's parquet file named after the variable
    ColumnarFile,
}

impl DataBackend {
    pub fn of(variable: &Variable) -> Self {
        if variable.legacy_id.is_some() {
            DataBackend::FactTable
        } else {
            DataBackend::ColumnarFile
        }
    }

    /// Backend shared by all variables of a dataset.
    ///
    /// `None` for a dataset without variables; a dataset split across both
    /// backends is an error rather than something to merge.
    pub fn for_dataset(dataset_path: &str, variables: &[Variable]) -> Result<Option<Self>> {
        let mut backends = variables.iter().map(Self::of);
        let Some(first) = backends.next() else {
            return Ok(None);
        };
        if backends.any(|b| b != first) {
            tracing::error!(dataset = %dataset_path, "query.mixed_data_source");
            return Err(Error::MixedDataSource {
                dataset: dataset_path.to_string(),
            });
        }
        Ok(Some(first))
    }

    pub fn name(self) -> &'static str {
        match self {
            DataBackend::FactTable => "fact_table",
            DataBackend::ColumnarFile => "columnar_file",
        }
    }
}

/// A generated statement and its bound integer parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<i64>,
}

impl SqlQuery {
    fn new(sql: String) -> Self {
        Self {
            sql,
            params: Vec::new(),
        }
    }

    fn bind(mut self, value: i64) -> Self {
        self.params.push(value);
        self
    }

    fn limit(self, limit: Option<usize>) -> Self {
        match limit {
            Some(limit) => {
                let sql = format!("{} LIMIT ?", self.sql);
                let params = self.params;
                SqlQuery { sql, params }.bind(i64::try_from(limit).unwrap_or(i64::MAX))
            }
            None => self,
        }
    }
}

/// Value expression of a fact row; values are stored as text
fn fact_value(variable_type: &str) -> &'static str {
    match variable_type {
        "string" => "dv.value",
        "int" => "TRY_CAST(dv.value AS BIGINT)",
        _ => "TRY_CAST(dv.value AS DOUBLE)",
    }
}

/// Rows of one legacy variable, ordered by year.
pub fn fact_variable_query(
    schema: Option<&str>,
    legacy_id: i64,
    variable_type: &str,
    limit: Option<usize>,
) -> Result<SqlQuery> {
    let prefix = schema_prefix(schema)?;
    let value = fact_value(variable_type);
    let sql = format!(
        "SELECT dv.year AS years, dv.entityId AS entities, e.name AS entity_names, \
         e.code AS entity_codes, {value} AS \"values\" \
         FROM {prefix}data_values AS dv \
         LEFT JOIN {prefix}entities AS e ON dv.entityId = e.id \
         WHERE dv.variableId = ? ORDER BY dv.year ASC, dv.entityId"
    );
    Ok(SqlQuery::new(sql).bind(legacy_id).limit(limit))
}

/// Rows of a set of legacy variables in long format.
pub fn fact_table_query(
    schema: Option<&str>,
    variables: &[(i64, &str)],
    limit: Option<usize>,
) -> Result<SqlQuery> {
    let prefix = schema_prefix(schema)?;
    if variables.is_empty() {
        return Err(Error::not_found("variables of table"));
    }
    // short names go through the sanitizer because they end up in a CASE label
    let mut labels = String::new();
    for (_, short_name) in variables {
        column_identifier(short_name)?;
        labels.push_str(&format!(" WHEN ? THEN '{short_name}'"));
    }
    let placeholders = vec!["?"; variables.len()].join(", ");
    let sql = format!(
        "SELECT dv.year AS year, dv.entityId AS entity_id, e.name AS entity_name, \
         e.code AS entity_code, CASE dv.variableId{labels} END AS variable, \
         dv.value AS value \
         FROM {prefix}data_values AS dv \
         LEFT JOIN {prefix}entities AS e ON dv.entityId = e.id \
         WHERE dv.variableId IN ({placeholders}) ORDER BY dv.year ASC, dv.variableId, dv.entityId"
    );
    let mut query = SqlQuery::new(sql);
    for (id, _) in variables {
        query = query.bind(*id);
    }
    for (id, _) in variables {
        query = query.bind(*id);
    }
    Ok(query.limit(limit))
}

/// Non-null values of one column of a parquet file with year and entity id.
///
/// `dimensions` are the table's other dimension columns (`sex`, `age`, ...);
/// they are selected between the entity id and the value so rows that share
/// a year and entity stay distinguishable.
pub fn columnar_variable_query(
    file: &Path,
    short_name: &str,
    dimensions: &[String],
    limit: Option<usize>,
) -> Result<SqlQuery> {
    let column = column_identifier(short_name)?;
    let dimensions = dimensions
        .iter()
        .map(|d| column_identifier(d))
        .collect::<Result<Vec<_>>>()?;
    let (select_dims, order_dims): (String, String) = dimensions
        .iter()
        .map(|d| (format!("{d}, "), format!(", {d}")))
        .unzip();
    let sql = format!(
        "SELECT \"year\" AS years, \"entity_id\" AS entities, {select_dims}{column} AS \"values\" \
         FROM read_parquet({}) WHERE {column} IS NOT NULL \
         ORDER BY \"year\", \"entity_id\"{order_dims}",
        file_literal(file)?
    );
    Ok(SqlQuery::new(sql).limit(limit))
}

/// Selected columns (all when `columns` is `None`) of a parquet file.
pub fn columnar_table_query(
    file: &Path,
    columns: Option<&[String]>,
    limit: Option<usize>,
) -> Result<SqlQuery> {
    let projection = match columns {
        Some(columns) if !columns.is_empty() => columns
            .iter()
            .map(|c| column_identifier(c))
            .collect::<Result<Vec<_>>>()?
            .join(", "),
        _ => "*".to_string(),
    };
    let sql = format!(
        "SELECT {projection} FROM read_parquet({})",
        file_literal(file)?
    );
    Ok(SqlQuery::new(sql).limit(limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::metadata::fixtures::{table, variable};

    #[test]
    fn test_backend_resolution() {
        let t = table("backport/owid/latest/d", "d");
        let fact = variable(&t, "a", Some(1));
        let columnar = variable(&t, "b", None);
        assert_eq!(DataBackend::of(&fact), DataBackend::FactTable);
        assert_eq!(DataBackend::of(&columnar), DataBackend::ColumnarFile);

        assert_eq!(
            DataBackend::for_dataset("d", &[fact.clone()]).unwrap(),
            Some(DataBackend::FactTable)
        );
        assert_eq!(DataBackend::for_dataset("d", &[]).unwrap(), None);
        assert!(matches!(
            DataBackend::for_dataset("d", &[fact, columnar]),
            Err(Error::MixedDataSource { .. })
        ));
    }

    #[test]
    fn test_fact_variable_query() {
        let q = fact_variable_query(Some("facts"), 42, "float", Some(10)).unwrap();
        assert!(q.sql.contains("FROM \"facts\".data_values AS dv"));
        assert!(q.sql.contains("LEFT JOIN \"facts\".entities AS e"));
        assert!(q.sql.contains("ORDER BY dv.year ASC, dv.entityId LIMIT ?"));
        assert_eq!(q.params, vec![42, 10]);

        let q = fact_variable_query(None, 42, "string", None).unwrap();
        assert!(q.sql.contains("FROM data_values AS dv"));
        assert!(q.sql.contains("dv.value AS \"values\""));
        assert_eq!(q.params, vec![42]);
    }

    #[test]
    fn test_fact_table_query() {
        let q = fact_table_query(None, &[(1, "a"), (2, "b")], None).unwrap();
        assert!(q.sql.contains("CASE dv.variableId WHEN ? THEN 'a' WHEN ? THEN 'b' END"));
        assert!(q.sql.contains("IN (?, ?)"));
        assert_eq!(q.params, vec![1, 2, 1, 2]);
        assert!(fact_table_query(None, &[(1, "a'b")], None).is_err());
    }

    #[test]
    fn test_columnar_queries_sanitize_identifiers() {
        let file = Path::new("/data/garden/x/1/y/z.parquet");
        let q = columnar_variable_query(file, "gdp", &[], Some(5)).unwrap();
        assert_eq!(
            q.sql,
            "SELECT \"year\" AS years, \"entity_id\" AS entities, \"gdp\" AS \"values\" \
             FROM read_parquet('/data/garden/x/1/y/z.parquet') WHERE \"gdp\" IS NOT NULL \
             ORDER BY \"year\", \"entity_id\" LIMIT ?"
        );
        assert_eq!(q.params, vec![5]);

        assert!(columnar_variable_query(file, "gdp\" FROM x; --", &[], None).is_err());

        let dims = vec!["sex".to_string(), "age".to_string()];
        let q = columnar_variable_query(file, "deaths", &dims, None).unwrap();
        assert_eq!(
            q.sql,
            "SELECT \"year\" AS years, \"entity_id\" AS entities, \"sex\", \"age\", \
             \"deaths\" AS \"values\" FROM read_parquet('/data/garden/x/1/y/z.parquet') \
             WHERE \"deaths\" IS NOT NULL ORDER BY \"year\", \"entity_id\", \"sex\", \"age\""
        );
        let bad = vec!["sex; --".to_string()];
        assert!(columnar_variable_query(file, "deaths", &bad, None).is_err());

        let cols = vec!["year".to_string(), "gdp".to_string()];
        let q = columnar_table_query(file, Some(&cols), None).unwrap();
        assert!(q.sql.starts_with("SELECT \"year\", \"gdp\" FROM"));
        assert!(q.params.is_empty());
        let q = columnar_table_query(file, None, Some(3)).unwrap();
        assert!(q.sql.starts_with("SELECT * FROM"));
    }
}
