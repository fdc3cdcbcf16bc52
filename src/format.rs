//! Wire formats for tabular results.

use crate::error::{Error, Result};
use crate::query::TabularResult;
use arrow::csv::WriterBuilder as CsvWriterBuilder;
use arrow::ipc::writer::FileWriter;
use arrow::json::ArrayWriter;
use bytes::Bytes;
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::str::FromStr;

/// Encoding requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Csv,
    /// Column-oriented object: `{"column": [values...]}`
    Json,
    /// Arrow IPC file (feather v2)
    ColumnarIpc,
}

impl FromStr for WireFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "csv" => Ok(WireFormat::Csv),
            "json" => Ok(WireFormat::Json),
            "feather" => Ok(WireFormat::ColumnarIpc),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl WireFormat {
    pub fn extension(self) -> &'static str {
        match self {
            WireFormat::Csv => "csv",
            WireFormat::Json => "json",
            WireFormat::ColumnarIpc => "feather",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            WireFormat::Csv => "text/csv",
            WireFormat::Json => "application/json",
            WireFormat::ColumnarIpc => "application/octet-stream",
        }
    }

    /// Binary formats are sent as attachments
    pub fn is_attachment(self) -> bool {
        matches!(self, WireFormat::ColumnarIpc)
    }
}

/// Serialize `result` in `format`.
pub fn encode(result: &TabularResult, format: WireFormat) -> Result<Bytes> {
    let body = match format {
        WireFormat::Csv => encode_csv(result)?,
        WireFormat::Json => encode_json(result)?,
        WireFormat::ColumnarIpc => encode_ipc(result)?,
    };
    Ok(Bytes::from(body))
}

fn encode_csv(result: &TabularResult) -> Result<Vec<u8>> {
    if result.batches.is_empty() {
        // the writer only emits a header together with a batch
        let mut header = result.column_names().join(",");
        header.push('\n');
        return Ok(header.into_bytes());
    }
    let mut writer = CsvWriterBuilder::new().with_header(true).build(Vec::new());
    for batch in &result.batches {
        writer.write(batch)?;
    }
    Ok(writer.into_inner())
}

/// Pivot the row objects written by arrow into one array per column, in
/// schema order.
fn encode_json(result: &TabularResult) -> Result<Vec<u8>> {
    let mut writer = ArrayWriter::new(Vec::new());
    for batch in &result.batches {
        writer.write(batch)?;
    }
    writer.finish()?;
    let rows_json = writer.into_inner();
    let rows: Vec<Map<String, JsonValue>> = if rows_json.is_empty() {
        Vec::new()
    } else {
        serde_json::from_slice(&rows_json)?
    };

    let mut out = Vec::with_capacity(rows_json.len());
    out.push(b'{');
    for (i, name) in result.column_names().into_iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        serde_json::to_writer(&mut out, name)?;
        out.push(b':');
        let column: Vec<&JsonValue> = rows
            .iter()
            .map(|row| row.get(name).unwrap_or(&JsonValue::Null))
            .collect();
        serde_json::to_writer(&mut out, &column)?;
    }
    out.push(b'}');
    Ok(out)
}

fn encode_ipc(result: &TabularResult) -> Result<Vec<u8>> {
    let mut writer = FileWriter::try_new(Vec::new(), &result.schema)?;
    for batch in &result.batches {
        writer.write(batch)?;
    }
    writer.finish()?;
    Ok(writer.into_inner()?)
}
