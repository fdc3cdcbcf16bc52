//! HTTP serving layer.
//!
//! All API routes are mounted under the configured URL prefix (`/v1` by
//! default):
//! - variable data and metadata at `/variable/{id}`
//! - table data, table metadata and catalog browsing at `/dataset`
//! - full-text search at `/search`

use crate::error::Error;
use anyhow::Result;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, warn};

pub mod middleware;
pub mod routes;
pub mod state;

use state::ServerState;

/// Create the main application router
pub fn create_app(state: ServerState) -> Router {
    let cors_config = state.config.cors.clone();
    let timeout_duration = Duration::from_secs(state.config.request_timeout_secs);
    let prefix = normalize_prefix(&state.config.url_prefix);

    let api = Router::new()
        .nest("/variable", routes::variables::create_router())
        .nest("/dataset", routes::datasets::create_router())
        .route("/datasets", get(routes::datasets::list_dataset_titles))
        .route("/search", get(routes::search::search));

    let api = if prefix.is_empty() {
        api
    } else {
        Router::new().nest(&prefix, api)
    };

    let mut app = Router::new()
        .route("/health", get(health_check))
        .merge(api)
        .layer(TimeoutLayer::new(timeout_duration))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if cors_config.enabled {
        app = app.layer(middleware::cors_layer(&cors_config));
    }

    app
}

/// `/v1/` -> `/v1`, `/` -> ``
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "catalogd",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Start the HTTP server
pub async fn start_server(addr: SocketAddr, state: ServerState) -> Result<()> {
    let prefix = normalize_prefix(&state.config.url_prefix);
    let app = create_app(state);

    info!("Starting catalogd server on {}", addr);
    info!("API available at http://{}{}", addr, prefix);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::UnsupportedFormat(_) | Error::InvalidIdentifier(_) | Error::InvalidPattern(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            Error::InternalConsistency(_) | Error::MixedDataSource { .. } => {
                error!(kind = self.kind(), error = %self, "request.failed")
            }
            _ if status.is_server_error() => {
                warn!(kind = self.kind(), error = %self, "request.failed")
            }
            _ => {}
        }
        let body = Json(json!({
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
            }
        }));
        (status, body).into_response()
    }
}
