//! API route handlers and the response helpers they share.

pub mod datasets;
pub mod search;
pub mod variables;

use crate::cache::CacheValidator;
use crate::error::Result;
use crate::format::{self, WireFormat};
use crate::query::TabularResult;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

/// `limit` and `format` query parameters of data endpoints
#[derive(Debug, Default, Deserialize)]
pub struct DataParams {
    pub limit: Option<usize>,
    pub format: Option<String>,
    /// Comma-separated column names
    pub columns: Option<String>,
}

impl DataParams {
    /// Requested columns; `None` selects every column.
    pub fn column_list(&self) -> Option<Vec<String>> {
        let columns: Vec<String> = self
            .columns
            .as_deref()?
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
        (!columns.is_empty()).then_some(columns)
    }
}

/// Empty 304 carrying the current validators
pub(crate) fn not_modified(validator: &CacheValidator) -> Response {
    (StatusCode::NOT_MODIFIED, validator.response_headers()).into_response()
}

/// Encode `result` and attach content type, validators and, for binary
/// formats, a download file name.
pub(crate) fn tabular_response(
    result: &TabularResult,
    format: WireFormat,
    name: &str,
    validator: &CacheValidator,
) -> Result<Response> {
    let body = format::encode(result, format)?;
    let mut headers = validator.response_headers();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(format.content_type()));
    if format.is_attachment() {
        let disposition = format!("attachment; filename={name}.{}", format.extension());
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            headers.insert(CONTENT_DISPOSITION, value);
        }
    }
    Ok((StatusCode::OK, headers, body).into_response())
}

/// JSON body with validators attached
pub(crate) fn validated_json<T: Serialize>(value: T, validator: &CacheValidator) -> Response {
    (StatusCode::OK, validator.response_headers(), Json(value)).into_response()
}
