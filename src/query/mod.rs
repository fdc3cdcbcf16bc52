//! Query layer: resolve logical references to a physical backend and run
//! the generated query into an Arrow result.

pub mod backend;
pub mod translator;

pub use backend::DataBackend;
pub use translator::{QueryTranslator, TableContext, VariableContext};

use crate::error::{Error, Result};
use crate::storage::sanitize::validate_catalog_path;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use std::fmt;
use std::str::FromStr;

/// Reference to a variable as it appears in a URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableRef {
    /// Integer id of a backported variable
    LegacyId(i64),
    /// Catalog path, `channel/namespace/version/dataset/table/variable`
    Path(String),
}

impl FromStr for VariableRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(id) = s.parse::<i64>() {
            return Ok(VariableRef::LegacyId(id));
        }
        let segments = validate_catalog_path(s)?;
        if segments.len() != 6 {
            return Err(Error::InvalidIdentifier(s.to_string()));
        }
        Ok(VariableRef::Path(s.to_string()))
    }
}

impl fmt::Display for VariableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableRef::LegacyId(id) => write!(f, "variable id {id}"),
            VariableRef::Path(path) => write!(f, "variable `{path}`"),
        }
    }
}

/// Reference to a table, `channel/namespace/version/dataset/table`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub channel: String,
    pub namespace: String,
    pub version: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(
        channel: &str,
        namespace: &str,
        version: &str,
        dataset: &str,
        table: &str,
    ) -> Result<Self> {
        let table_ref = Self {
            channel: channel.to_string(),
            namespace: namespace.to_string(),
            version: version.to_string(),
            dataset: dataset.to_string(),
            table: table.to_string(),
        };
        validate_catalog_path(&table_ref.path())?;
        Ok(table_ref)
    }

    pub fn path(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.channel, self.namespace, self.version, self.dataset, self.table
        )
    }

    pub fn dataset_path(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.channel, self.namespace, self.version, self.dataset
        )
    }
}

/// Backend-agnostic query result
#[derive(Debug, Clone)]
pub struct TabularResult {
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
}

impl TabularResult {
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.schema.fields().iter().map(|f| f.name().as_str()).collect()
    }
}
