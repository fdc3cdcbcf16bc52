mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use catalogd_core::server::{create_app, state::ServerState};
use catalogd_core::sync::SyncOptions;
use common::{backport_meta, garden_meta, pool, server_config, CatalogFixture, GDP_TABLE};
use serde_json::{json, Value as JsonValue};
use tower::ServiceExt;

const PPP_TABLE: &str = "SELECT * FROM (VALUES \
    (2000, 1, 'France', 'FRA', 10.0::DOUBLE)) \
    t(year, entity_id, entity_name, entity_code, gdp_ppp)";

/// Store synced with the full-text index over a garden gdp variable and a
/// backported gdp_ppp variable.
async fn indexed_app() -> (Router, CatalogFixture) {
    let mut catalog = CatalogFixture::new();

    let mut garden = garden_meta("Dataset Y", &[("gdp", "$"), ("population", "people")]);
    garden["fields"]["gdp"]["description"] =
        json!("GDP and GDP per capita. Gross domestic product (GDP) with GDP growth.");
    catalog.add_table("garden/x/2022/y/z", "v1", GDP_TABLE, garden);
    catalog.add_table(
        "backport/owid/latest/legacy/legacy",
        "b1",
        PPP_TABLE,
        backport_meta("Purchasing power parity output", &[("gdp_ppp", Some(43))]),
    );

    let mut engine = catalog.engine();
    let report = engine
        .run(&SyncOptions {
            include: None,
            force: false,
            full_text_search: true,
        })
        .await
        .unwrap();
    assert!(report.is_clean());
    assert_eq!(report.created.len(), 2);

    let state = ServerState::from_pool(
        pool(engine.into_connection()),
        catalog.root().to_path_buf(),
        None,
        server_config(),
    );
    (create_app(state), catalog)
}

async fn search(app: &Router, query: &str) -> Vec<JsonValue> {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/v1/search?{query}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: JsonValue = serde_json::from_slice(&body).unwrap();
    body["results"].as_array().unwrap().clone()
}

fn names(hits: &[JsonValue]) -> Vec<&str> {
    hits.iter()
        .map(|hit| hit["variable_name"].as_str().unwrap())
        .collect()
}

#[tokio::test]
async fn test_search_ranks_variables() {
    let (app, _catalog) = indexed_app().await;
    let hits = search(&app, "term=gdp").await;

    // population never mentions the term
    assert_eq!(names(&hits), vec!["gdp", "gdp_ppp"]);
    let scores: Vec<f64> = hits.iter().map(|h| h["match"].as_f64().unwrap()).collect();
    assert!(scores[0] >= scores[1], "scores {scores:?}");
    assert!(scores[1] > 0.0);

    let top = &hits[0];
    assert_eq!(top["channel"], "garden");
    assert_eq!(top["table_name"], "z");
    assert_eq!(top["dataset_title"], "Dataset Y");
    assert_eq!(top["variable_title"], "GDP");
    assert_eq!(top["variable_unit"], "$");
    assert_eq!(top["metadata_url"], "/v1/dataset/metadata/garden/x/2022/y/z");
    assert_eq!(top["data_url"], "/v1/dataset/data/garden/x/2022/y/z");

    let legacy = &hits[1];
    assert_eq!(legacy["channel"], "backport");
    assert_eq!(legacy["dataset_title"], "Purchasing power parity output");
    assert_eq!(
        legacy["metadata_url"],
        "/v1/dataset/metadata/backport/owid/latest/legacy/legacy"
    );
    assert_eq!(
        legacy["data_url"],
        "/v1/dataset/data/backport/owid/latest/legacy/legacy"
    );
}

#[tokio::test]
async fn test_search_filters_and_limits() {
    let (app, _catalog) = indexed_app().await;

    let hits = search(&app, "term=gdp&channels=backport").await;
    assert_eq!(names(&hits), vec!["gdp_ppp"]);

    let hits = search(&app, "term=gdp&limit=1").await;
    assert_eq!(names(&hits), vec!["gdp"]);

    let hits = search(&app, "term=population").await;
    assert_eq!(names(&hits), vec!["population"]);

    assert!(search(&app, "term=rainfall").await.is_empty());
}
