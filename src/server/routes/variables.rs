//! Variable endpoints

use super::{not_modified, tabular_response, validated_json, DataParams};
use crate::cache::{CacheDecision, CacheValidator};
use crate::error::Result;
use crate::format::WireFormat;
use crate::models::dimensions::Dimension;
use crate::models::{Display, License, Source};
use crate::query::{VariableContext, VariableRef};
use crate::server::state::ServerState;
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Response,
    routing::get,
    Router,
};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Create variable router
pub fn create_router() -> Router<ServerState> {
    Router::new()
        .route("/:id/data", get(variable_data))
        .route("/:id/metadata", get(variable_metadata))
}

/// Joined variable, table and dataset metadata
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableMetadataResponse {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub short_name: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub unit: Option<String>,
    pub short_unit: Option<String>,
    #[serde(rename = "type")]
    pub variable_type: String,
    pub display: Display,
    pub sources: Vec<Source>,
    pub licenses: Vec<License>,
    pub table_path: String,
    pub dataset_path: String,
    pub dataset_name: Option<String>,
    pub non_redistributable: bool,
    pub dimensions: BTreeMap<String, Dimension>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_metadata: Option<JsonValue>,
}

impl VariableMetadataResponse {
    pub fn from_context(context: VariableContext) -> Result<Self> {
        let dimensions = context.table.dimension_values.to_api_dimensions()?;
        let non_redistributable = context
            .dataset
            .legacy_metadata
            .as_ref()
            .and_then(|meta| meta.get("nonRedistributable"))
            .map(|flag| match flag {
                JsonValue::Bool(b) => *b,
                JsonValue::String(s) => s == "true",
                _ => false,
            })
            .unwrap_or(false);
        let variable = context.variable;

        Ok(Self {
            path: variable.path,
            id: variable.legacy_id,
            short_name: variable.short_name,
            name: variable.title,
            description: variable.description,
            unit: variable.unit,
            short_unit: variable.short_unit,
            variable_type: variable.variable_type,
            display: variable.display,
            sources: variable.sources,
            licenses: variable.licenses,
            table_path: variable.table_path,
            dataset_path: context.dataset.path,
            dataset_name: context.dataset.title,
            non_redistributable,
            dimensions,
            legacy_metadata: variable.legacy_metadata,
        })
    }
}

/// `years, entities, entity_names, entity_codes, values` of one variable
async fn variable_data(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Query(params): Query<DataParams>,
    headers: HeaderMap,
) -> Result<Response> {
    let reference: VariableRef = id.parse()?;
    let format: WireFormat = params.format.as_deref().unwrap_or("json").parse()?;

    let context = state.translator.resolve_variable(reference).await?;
    let validator = CacheValidator::new(context.dataset.checksum.clone());
    if validator.check(&headers) == CacheDecision::NotModified {
        return Ok(not_modified(&validator));
    }

    let result = state.translator.variable_data(&context, params.limit).await?;
    tabular_response(&result, format, &context.variable.short_name, &validator)
}

async fn variable_metadata(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let reference: VariableRef = id.parse()?;
    let context = state.translator.resolve_variable(reference).await?;
    let validator = CacheValidator::new(context.dataset.checksum.clone());
    if validator.check(&headers) == CacheDecision::NotModified {
        return Ok(not_modified(&validator));
    }

    let response = VariableMetadataResponse::from_context(context)?;
    Ok(validated_json(response, &validator))
}
