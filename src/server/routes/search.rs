//! Search endpoint

use crate::error::Result;
use crate::search::{SearchQuery, SearchTarget, DEFAULT_LIMIT};
use crate::server::state::ServerState;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub term: String,
    #[serde(rename = "type", default)]
    pub target: SearchTarget,
    /// Comma-separated channel names
    pub channels: Option<String>,
    pub limit: Option<usize>,
}

impl From<SearchParams> for SearchQuery {
    fn from(params: SearchParams) -> Self {
        let channels = params
            .channels
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
        SearchQuery {
            term: params.term,
            target: params.target,
            channels,
            limit: params.limit.unwrap_or(DEFAULT_LIMIT),
        }
    }
}

/// `{results: [...]}` ranked by descending relevance
pub async fn search(
    State(state): State<ServerState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<JsonValue>> {
    let hits = state.search.search(params.into()).await?;
    Ok(Json(json!({ "results": hits })))
}
