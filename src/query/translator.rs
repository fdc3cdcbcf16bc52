//! Query translator: metadata lookups and data queries, run on the worker pool.

use super::backend::{
    columnar_table_query, columnar_variable_query, fact_table_query, fact_variable_query,
    DataBackend, SqlQuery,
};
use super::{TableRef, TabularResult, VariableRef};
use crate::error::{Error, Result};
use crate::models::{Dataset, Table, Variable};
use crate::storage::metadata;
use crate::storage::sanitize::catalog_file;
use crate::storage::WorkerPool;
use crate::sync::ingest::describe_columns;
use arrow::array::{Array, ArrayRef, StringArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use duckdb::{params_from_iter, Connection};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// A variable with the table and dataset it belongs to
#[derive(Debug, Clone)]
pub struct VariableContext {
    pub variable: Variable,
    pub table: Table,
    pub dataset: Dataset,
    pub backend: DataBackend,
}

/// A table with its dataset and variables
#[derive(Debug, Clone)]
pub struct TableContext {
    pub dataset: Dataset,
    pub table: Table,
    pub variables: Vec<Variable>,
    /// `None` when the dataset has no variables
    pub backend: Option<DataBackend>,
}

/// Entity id -> (name, code)
type EntityLookup = HashMap<String, (Option<String>, Option<String>)>;

/// Columns of the variable data shape that are not passed through as
/// additional dimensions
const ENTITY_COLUMNS: [&str; 4] = ["year", "entity_id", "entity_name", "entity_code"];

/// Translates logical references into queries against the store
#[derive(Clone)]
pub struct QueryTranslator {
    pool: Arc<WorkerPool>,
    catalog_root: PathBuf,
    facts_schema: Option<&'static str>,
}

impl QueryTranslator {
    pub fn new(pool: Arc<WorkerPool>, catalog_root: PathBuf, facts_schema: Option<&'static str>) -> Self {
        Self {
            pool,
            catalog_root,
            facts_schema,
        }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Look a variable up together with its table, dataset and backend.
    pub async fn resolve_variable(&self, reference: VariableRef) -> Result<VariableContext> {
        self.pool
            .run(move |conn| {
                let variable = match &reference {
                    VariableRef::LegacyId(id) => metadata::get_variable_by_legacy_id(conn, *id)?,
                    VariableRef::Path(path) => metadata::get_variable_by_path(conn, path)?,
                }
                .ok_or_else(|| Error::not_found(reference.to_string()))?;

                let table = metadata::get_table(conn, &variable.table_path)?.ok_or_else(|| {
                    Error::InternalConsistency(format!(
                        "variable `{}` points to missing table `{}`",
                        variable.path, variable.table_path
                    ))
                })?;
                let dataset = metadata::get_dataset(conn, &table.dataset_path)?.ok_or_else(|| {
                    Error::InternalConsistency(format!(
                        "table `{}` points to missing dataset `{}`",
                        table.path, table.dataset_path
                    ))
                })?;

                let siblings = metadata::variables_for_dataset(conn, &dataset.path)?;
                let backend = DataBackend::for_dataset(&dataset.path, &siblings)?
                    .unwrap_or_else(|| DataBackend::of(&variable));

                Ok(VariableContext {
                    variable,
                    table,
                    dataset,
                    backend,
                })
            })
            .await
    }

    /// Look a table up together with its dataset and variables.
    pub async fn resolve_table(&self, reference: TableRef) -> Result<TableContext> {
        self.pool
            .run(move |conn| {
                let path = reference.path();
                let table = metadata::get_table(conn, &path)?
                    .ok_or_else(|| Error::not_found(format!("table `{path}`")))?;
                let dataset = metadata::get_dataset(conn, &table.dataset_path)?
                    .ok_or_else(|| Error::not_found(format!("dataset `{}`", reference.dataset_path())))?;
                let variables = metadata::variables_for_table(conn, &path)?;
                let siblings = metadata::variables_for_dataset(conn, &dataset.path)?;
                let backend = DataBackend::for_dataset(&dataset.path, &siblings)?;

                Ok(TableContext {
                    dataset,
                    table,
                    variables,
                    backend,
                })
            })
            .await
    }

    /// `years, entities, entity_names, entity_codes, values` of one variable.
    pub async fn variable_data(
        &self,
        context: &VariableContext,
        limit: Option<usize>,
    ) -> Result<TabularResult> {
        debug!(
            variable = %context.variable.path,
            backend = context.backend.name(),
            "query.variable_data"
        );
        match context.backend {
            DataBackend::FactTable => {
                let legacy_id = context.variable.legacy_id.ok_or_else(|| {
                    Error::InternalConsistency(format!(
                        "variable `{}` has no legacy id",
                        context.variable.path
                    ))
                })?;
                let query = fact_variable_query(
                    self.facts_schema,
                    legacy_id,
                    &context.variable.variable_type,
                    limit,
                )?;
                self.pool.run(move |conn| execute(conn, &query)).await
            }
            DataBackend::ColumnarFile => {
                let table = &context.table;
                for required in ["year", "entity_id"] {
                    if !table.dimensions.iter().any(|d| d == required) {
                        return Err(Error::NotImplemented(format!(
                            "variable data of table `{}` without `{required}` dimension",
                            table.path
                        )));
                    }
                }
                let file = catalog_file(&self.catalog_root, &table.path, &table.format)?;
                let dimensions: Vec<String> = table
                    .dimensions
                    .iter()
                    .filter(|d| !ENTITY_COLUMNS.contains(&d.as_str()))
                    .cloned()
                    .collect();
                let query = columnar_variable_query(
                    &file,
                    &context.variable.short_name,
                    &dimensions,
                    limit,
                )?;
                let lookup = entity_lookup(table)?;
                let result = self.pool.run(move |conn| execute(conn, &query)).await?;
                attach_entity_names(result, &lookup)
            }
        }
    }

    /// Rows of a table, optionally restricted to `columns`.
    ///
    /// Unknown columns are `NotFound`. The limit applies after filtering.
    pub async fn table_data(
        &self,
        context: &TableContext,
        columns: Option<Vec<String>>,
        limit: Option<usize>,
    ) -> Result<TabularResult> {
        let backend = context.backend.unwrap_or(DataBackend::ColumnarFile);
        debug!(table = %context.table.path, backend = backend.name(), "query.table_data");

        match backend {
            DataBackend::FactTable => {
                let selected: Vec<&Variable> = match &columns {
                    Some(columns) => columns
                        .iter()
                        .map(|c| {
                            context
                                .variables
                                .iter()
                                .find(|v| v.short_name == *c)
                                .ok_or_else(|| Error::not_found(format!("column `{c}`")))
                        })
                        .collect::<Result<_>>()?,
                    None => context.variables.iter().collect(),
                };
                let ids: Vec<(i64, &str)> = selected
                    .iter()
                    .filter_map(|v| v.legacy_id.map(|id| (id, v.short_name.as_str())))
                    .collect();
                let query = fact_table_query(self.facts_schema, &ids, limit)?;
                self.pool.run(move |conn| execute(conn, &query)).await
            }
            DataBackend::ColumnarFile => {
                let file = catalog_file(&self.catalog_root, &context.table.path, &context.table.format)?;
                self.pool
                    .run(move |conn| {
                        if let Some(columns) = &columns {
                            let physical = describe_columns(conn, &file)?;
                            if let Some(unknown) = columns
                                .iter()
                                .find(|c| !physical.iter().any(|(name, _)| name == *c))
                            {
                                return Err(Error::not_found(format!("column `{unknown}`")));
                            }
                        }
                        let query = columnar_table_query(&file, columns.as_deref(), limit)?;
                        execute(conn, &query)
                    })
                    .await
            }
        }
    }

    /// Distinct names at the catalog level below `prefix`.
    pub async fn list_level(&self, prefix: Vec<String>) -> Result<Vec<String>> {
        self.pool
            .run(move |conn| {
                let prefix: Vec<&str> = prefix.iter().map(String::as_str).collect();
                metadata::list_catalog_level(conn, &prefix)
            })
            .await
    }

    pub async fn dataset_titles(&self) -> Result<Vec<String>> {
        self.pool.run(metadata::dataset_titles).await
    }
}

/// Run a generated statement into Arrow batches.
pub fn execute(conn: &Connection, query: &SqlQuery) -> Result<TabularResult> {
    let mut stmt = conn.prepare(&query.sql)?;
    let arrow = stmt.query_arrow(params_from_iter(query.params.iter()))?;
    let schema = arrow.get_schema();
    let batches: Vec<RecordBatch> = arrow.collect();
    Ok(TabularResult { schema, batches })
}

/// Entity metadata of a table, from its `entity_zip` dimension.
///
/// An id that appears with two different names or codes cannot be resolved
/// to one row and is reported as an inconsistency.
fn entity_lookup(table: &Table) -> Result<EntityLookup> {
    let Some(entities) = table.dimension_values.entities() else {
        return Ok(EntityLookup::new());
    };
    let mut lookup = EntityLookup::new();
    for entity in entities? {
        let details = (entity.name, entity.code);
        if let Some(previous) = lookup.get(&entity.id) {
            if *previous != details {
                return Err(Error::InternalConsistency(format!(
                    "entity `{}` of table `{}` has several names or codes",
                    entity.id, table.path
                )));
            }
            continue;
        }
        lookup.insert(entity.id, details);
    }
    Ok(lookup)
}

/// Insert `entity_names` and `entity_codes` after the `entities` column.
///
/// The input is `years, entities, <dimensions...>, values`.
fn attach_entity_names(result: TabularResult, lookup: &EntityLookup) -> Result<TabularResult> {
    let fields = result.schema.fields();
    if fields.len() < 3 {
        return Err(Error::InternalConsistency(format!(
            "expected at least 3 columns, got {}",
            fields.len()
        )));
    }
    let mut output_fields: Vec<Field> = vec![
        fields[0].as_ref().clone(),
        fields[1].as_ref().clone(),
        Field::new("entity_names", DataType::Utf8, true),
        Field::new("entity_codes", DataType::Utf8, true),
    ];
    output_fields.extend(fields[2..].iter().map(|f| f.as_ref().clone()));
    let schema = Arc::new(Schema::new(output_fields));

    let mut batches = Vec::with_capacity(result.batches.len());
    for batch in &result.batches {
        let ids = cast(batch.column(1), &DataType::Utf8)?;
        let ids = ids
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| Error::InternalConsistency("entity ids are not text".to_string()))?;

        let entry = |i: usize| (!ids.is_null(i)).then(|| lookup.get(ids.value(i))).flatten();
        let names: StringArray = (0..ids.len())
            .map(|i| entry(i).and_then(|(name, _)| name.clone()))
            .collect();
        let codes: StringArray = (0..ids.len())
            .map(|i| entry(i).and_then(|(_, code)| code.clone()))
            .collect();

        let mut columns: Vec<ArrayRef> = vec![
            batch.column(0).clone(),
            batch.column(1).clone(),
            Arc::new(names),
            Arc::new(codes),
        ];
        columns.extend(batch.columns()[2..].iter().cloned());
        batches.push(RecordBatch::try_new(schema.clone(), columns)?);
    }

    Ok(TabularResult { schema, batches })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::metadata::fixtures::table;
    use arrow::array::{Float64Array, Int64Array};
    use serde_json::json;

    #[test]
    fn test_entity_lookup() {
        let t = table("garden/x/1/y", "z");
        let lookup = entity_lookup(&t).unwrap();
        assert_eq!(
            lookup.get("1"),
            Some(&(Some("A".to_string()), Some("c1".to_string())))
        );
        assert_eq!(lookup.len(), 2);
    }

    #[test]
    fn test_conflicting_entity_names_are_inconsistent() {
        let mut t = table("garden/x/1/y", "z");
        t.dimension_values.insert(
            "entity_zip",
            vec![json!("1|A|c1"), json!("1|Renamed|c1"), json!("2|B|c2")],
        );
        assert!(matches!(entity_lookup(&t), Err(Error::InternalConsistency(_))));
    }

    #[test]
    fn test_extra_dimensions_are_carried_through() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("years", DataType::Int64, false),
            Field::new("entities", DataType::Int64, false),
            Field::new("sex", DataType::Utf8, true),
            Field::new("values", DataType::Float64, true),
        ]));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from(vec![2000, 2000])),
            Arc::new(Int64Array::from(vec![1, 1])),
            Arc::new(StringArray::from(vec!["female", "male"])),
            Arc::new(Float64Array::from(vec![2.0, 1.0])),
        ];
        let batch = RecordBatch::try_new(schema.clone(), columns).unwrap();
        let lookup = entity_lookup(&table("garden/x/1/y", "z")).unwrap();

        let result = attach_entity_names(
            TabularResult {
                schema,
                batches: vec![batch],
            },
            &lookup,
        )
        .unwrap();

        assert_eq!(
            result.column_names(),
            vec!["years", "entities", "entity_names", "entity_codes", "sex", "values"]
        );
        let batch = &result.batches[0];
        let names = batch.column(2).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(names.value(0), "A");
        let sex = batch.column(4).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!((sex.value(0), sex.value(1)), ("female", "male"));
    }
}
