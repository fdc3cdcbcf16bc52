//! Catalog sources.
//!
//! A catalog source supplies the manifest (which datasets and tables exist,
//! with checksums), the per-table metadata produced by the data pipeline and
//! the location of each table's physical data file.

pub mod local;
pub mod manifest;

pub use local::LocalCatalog;
pub use manifest::{ManifestFilter, ManifestRow};

use crate::error::Result;
use crate::models::{Display, License, Source};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Key of the legacy metadata block inside `additional_info`
pub const GRAPHER_META: &str = "grapher_meta";

/// Provider of the catalog manifest and table files
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// All manifest rows, unfiltered
    async fn manifest(&self) -> Result<Vec<ManifestRow>>;

    /// Pipeline metadata of one table
    async fn table_metadata(&self, table_path: &str) -> Result<TableMetadata>;

    /// Local file holding the table's data in `format`
    async fn data_file(&self, table_path: &str, format: &str) -> Result<PathBuf>;
}

/// Metadata of a table as written by the pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableMetadata {
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub dataset: DatasetMetadata,
    /// Per-column metadata, dimensions included
    #[serde(default)]
    pub fields: BTreeMap<String, VariableMetadata>,
}

/// Dataset block embedded in every table's metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetMetadata {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub licenses: Vec<License>,
    #[serde(default = "default_public")]
    pub is_public: bool,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub source_checksum: Option<String>,
    #[serde(default)]
    pub additional_info: Option<Map<String, JsonValue>>,
}

fn default_public() -> bool {
    true
}

impl DatasetMetadata {
    pub fn grapher_meta(&self) -> Option<&JsonValue> {
        self.additional_info.as_ref()?.get(GRAPHER_META)
    }
}

/// Metadata of one column
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariableMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub licenses: Vec<License>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub short_unit: Option<String>,
    #[serde(default)]
    pub display: Option<Display>,
    #[serde(default)]
    pub additional_info: Option<Map<String, JsonValue>>,
}

impl VariableMetadata {
    pub fn grapher_meta(&self) -> Option<&JsonValue> {
        self.additional_info.as_ref()?.get(GRAPHER_META)
    }

    /// Declared unit, or the unit of the display hints when none is declared
    pub fn effective_unit(&self) -> Option<String> {
        match self.unit.as_deref() {
            Some(unit) if !unit.is_empty() => Some(unit.to_string()),
            _ => self.display.as_ref().and_then(|d| d.unit.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_table_metadata_from_pipeline_json() {
        let meta: TableMetadata = serde_json::from_value(json!({
            "short_name": "population",
            "dataset": {
                "namespace": "un",
                "short_name": "wpp",
                "title": "World Population Prospects",
                "version": "2022-07-11",
                "sources": [{"name": "UN", "url": "https://population.un.org"}],
                "licenses": [{"name": "CC BY 3.0 IGO"}]
            },
            "fields": {
                "population": {
                    "title": "Population",
                    "unit": "",
                    "display": {"unit": "people", "numDecimalPlaces": 0},
                    "additional_info": {"grapher_meta": {"id": 525709}}
                },
                "year": {}
            }
        }))
        .unwrap();

        assert!(meta.dataset.is_public);
        assert_eq!(meta.dataset.version.as_deref(), Some("2022-07-11"));
        assert_eq!(meta.dataset.sources[0].url.as_deref(), Some("https://population.un.org"));
        let population = &meta.fields["population"];
        assert_eq!(population.effective_unit().as_deref(), Some("people"));
        assert_eq!(population.grapher_meta(), Some(&json!({"id": 525709})));
        assert!(meta.fields["year"].effective_unit().is_none());
    }

    #[test]
    fn test_declared_unit_wins_over_display() {
        let meta = VariableMetadata {
            unit: Some("tonnes".into()),
            display: Some(Display {
                unit: Some("kg".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(meta.effective_unit().as_deref(), Some("tonnes"));
    }
}
