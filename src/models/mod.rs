//! Catalog records persisted in the metadata store.
//!
//! Three normalized record types are kept: [`Dataset`], [`Table`] and
//! [`Variable`]. Nested fields (sources, licenses, display hints, dimension
//! values) are typed here and stored as JSON text; they are validated by
//! serde when written and decoded once when read back.

pub mod dimensions;

pub use dimensions::{DimensionValues, EntityTriple, ENTITY_DIMENSIONS, ENTITY_ZIP};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Origin of the data behind a dataset or variable
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Source {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_data_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_accessed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher_source: Option<String>,
    /// Fields the pipeline emits that we do not interpret
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct License {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Presentation hints attached to a variable
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Display {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_unit: Option<String>,
    /// Multiplier applied to raw values before presenting them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_decimal_places: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_projection: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_in_table: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_is_day: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zero_day: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// A dataset, keyed by `channel/namespace/version/short_name`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub path: String,
    pub channel: String,
    pub namespace: String,
    pub short_name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub sources: Vec<Source>,
    pub licenses: Vec<License>,
    pub is_public: bool,
    /// Content hash of the dataset as a whole; the only staleness signal
    pub checksum: String,
    pub source_checksum: Option<String>,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_metadata: Option<JsonValue>,
}

/// A table, keyed by `dataset_path/table_name`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub path: String,
    pub dataset_path: String,
    pub table_name: String,
    pub dataset_name: String,
    pub version: String,
    pub namespace: String,
    pub channel: String,
    pub dimensions: Vec<String>,
    pub format: String,
    pub is_public: bool,
    pub dimension_values: DimensionValues,
}

/// A single value column of a table, keyed by `table_path/short_name`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub path: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub licenses: Vec<License>,
    pub sources: Vec<Source>,
    pub unit: Option<String>,
    pub short_unit: Option<String>,
    pub display: Display,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_metadata: Option<JsonValue>,
    /// Integer id used by older consumers; only backported variables carry one
    pub legacy_id: Option<i64>,
    pub short_name: String,
    pub table_path: String,
    pub dataset_path: String,
    pub dataset_short_name: String,
    pub variable_type: String,
}

impl Variable {
    pub fn variable_path(table_path: &str, short_name: &str) -> String {
        format!("{table_path}/{short_name}")
    }
}

/// Storage type of a variable inferred from its physical column type.
pub fn infer_variable_type(column_type: &str) -> String {
    let upper = column_type.trim().to_uppercase();
    match upper.as_str() {
        "DOUBLE" | "FLOAT" | "REAL" | "FLOAT4" | "FLOAT8" => "float".to_string(),
        "TINYINT" | "SMALLINT" | "INTEGER" | "INT" | "BIGINT" | "HUGEINT" | "UTINYINT"
        | "USMALLINT" | "UINTEGER" | "UBIGINT" => "int".to_string(),
        "VARCHAR" | "TEXT" | "STRING" => "string".to_string(),
        "BOOLEAN" | "BOOL" => "bool".to_string(),
        _ if upper.starts_with("DECIMAL") => "float".to_string(),
        _ if upper.starts_with("ENUM") => "string".to_string(),
        _ => column_type.trim().to_lowercase(),
    }
}
