//! Table data, table metadata and catalog browsing

use super::{not_modified, tabular_response, validated_json, DataParams};
use crate::cache::{CacheDecision, CacheValidator};
use crate::error::{Error, Result};
use crate::format::WireFormat;
use crate::models::{Dataset, Table, Variable};
use crate::query::TableRef;
use crate::server::state::ServerState;
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};

/// Create dataset router
pub fn create_router() -> Router<ServerState> {
    Router::new()
        .route("/data", get(list_channels))
        .route("/data/:channel", get(list_namespaces))
        .route("/data/:channel/:namespace", get(list_versions))
        .route("/data/:channel/:namespace/:version", get(list_datasets))
        .route("/data/:channel/:namespace/:version/:dataset", get(list_tables))
        .route(
            "/data/:channel/:namespace/:version/:dataset/:table",
            get(table_data),
        )
        .route(
            "/metadata/:channel/:namespace/:version/:dataset/:table",
            get(table_metadata),
        )
}

/// `{dataset, table, variables}` of one table
#[derive(Debug, Serialize)]
pub struct TableMetadataResponse {
    pub dataset: Dataset,
    pub table: Table,
    pub variables: Vec<Variable>,
}

/// `gdp.csv` -> (`gdp`, `csv`); the split is on the last dot.
fn split_format(segment: &str) -> Result<(&str, WireFormat)> {
    match segment.rsplit_once('.') {
        Some((table, format)) if !table.is_empty() => Ok((table, format.parse()?)),
        _ => Err(Error::UnsupportedFormat(segment.to_string())),
    }
}

async fn table_data(
    State(state): State<ServerState>,
    Path((channel, namespace, version, dataset, file)): Path<(String, String, String, String, String)>,
    Query(params): Query<DataParams>,
    headers: HeaderMap,
) -> Result<Response> {
    let (table, format) = split_format(&file)?;
    let reference = TableRef::new(&channel, &namespace, &version, &dataset, table)?;

    let context = state.translator.resolve_table(reference).await?;
    let validator = CacheValidator::new(context.dataset.checksum.clone());
    if validator.check(&headers) == CacheDecision::NotModified {
        return Ok(not_modified(&validator));
    }

    let result = state
        .translator
        .table_data(&context, params.column_list(), params.limit)
        .await?;
    tabular_response(&result, format, &context.table.table_name, &validator)
}

async fn table_metadata(
    State(state): State<ServerState>,
    Path((channel, namespace, version, dataset, table)): Path<(String, String, String, String, String)>,
    headers: HeaderMap,
) -> Result<Response> {
    let reference = TableRef::new(&channel, &namespace, &version, &dataset, &table)?;
    let context = state.translator.resolve_table(reference).await?;
    let validator = CacheValidator::new(context.dataset.checksum.clone());
    if validator.check(&headers) == CacheDecision::NotModified {
        return Ok(not_modified(&validator));
    }

    Ok(validated_json(
        TableMetadataResponse {
            dataset: context.dataset,
            table: context.table,
            variables: context.variables,
        },
        &validator,
    ))
}

async fn list(state: &ServerState, key: &str, prefix: Vec<String>) -> Result<Json<JsonValue>> {
    let values = state.translator.list_level(prefix).await?;
    let mut body = Map::new();
    body.insert(key.to_string(), json!(values));
    Ok(Json(JsonValue::Object(body)))
}

async fn list_channels(State(state): State<ServerState>) -> Result<Json<JsonValue>> {
    list(&state, "channels", vec![]).await
}

async fn list_namespaces(
    State(state): State<ServerState>,
    Path(channel): Path<String>,
) -> Result<Json<JsonValue>> {
    list(&state, "namespaces", vec![channel]).await
}

async fn list_versions(
    State(state): State<ServerState>,
    Path((channel, namespace)): Path<(String, String)>,
) -> Result<Json<JsonValue>> {
    list(&state, "versions", vec![channel, namespace]).await
}

async fn list_datasets(
    State(state): State<ServerState>,
    Path((channel, namespace, version)): Path<(String, String, String)>,
) -> Result<Json<JsonValue>> {
    list(&state, "datasets", vec![channel, namespace, version]).await
}

async fn list_tables(
    State(state): State<ServerState>,
    Path((channel, namespace, version, dataset)): Path<(String, String, String, String)>,
) -> Result<Json<JsonValue>> {
    list(&state, "tables", vec![channel, namespace, version, dataset]).await
}

/// Titles of every dataset
pub async fn list_dataset_titles(State(state): State<ServerState>) -> Result<Json<JsonValue>> {
    let titles = state.translator.dataset_titles().await?;
    Ok(Json(json!({ "datasets": titles })))
}
