use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::{
    config::Config,
    links::HtmlDocument,
    self_test::run_self_test,
    store::RuleStore,
    stripper::Stripper,
};

#[derive(Clone)]
pub struct AppState {
    pub store: RuleStore,
    pub config: Config,
}

#[derive(Deserialize)]
struct StripQuery {
    url: String,
}

#[derive(Deserialize)]
struct StripBatch {
    urls: Vec<String>,
}

#[derive(Serialize)]
struct StripResult {
    original: String,
    stripped: String,
    changed: bool,
}

impl StripResult {
    fn new(stripper: &Stripper, original: String) -> Self {
        let stripped = stripper.strip_url(&original);
        Self {
            changed: stripped != original,
            original,
            stripped,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/strip", get(strip_one).post(strip_batch))
        .route("/strip/html", post(strip_html))
        .route("/rules", get(current_rules))
        .route("/rules/refresh", post(refresh_rules))
        .route("/self-test", get(self_test))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let addr = state.config.server_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Stripper API listening on {}", addr);
    axum::serve(listener, create_app(state)).await?;
    Ok(())
}

async fn strip_one(
    State(state): State<AppState>,
    Query(query): Query<StripQuery>,
) -> Json<StripResult> {
    Json(StripResult::new(&state.store.stripper(), query.url))
}

async fn strip_batch(
    State(state): State<AppState>,
    Json(batch): Json<StripBatch>,
) -> Json<Vec<StripResult>> {
    let stripper = state.store.stripper();
    Json(
        batch
            .urls
            .into_iter()
            .map(|url| StripResult::new(&stripper, url))
            .collect(),
    )
}

async fn strip_html(State(state): State<AppState>, body: String) -> Html<String> {
    let mut document = HtmlDocument::parse(&body);
    let changed = state.store.stripper().strip_links(&mut document);
    tracing::debug!(changed, "Stripped links in HTML document");
    Html(document.render())
}

async fn current_rules(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.store.snapshot().to_json())
}

async fn refresh_rules(State(state): State<AppState>) -> Response {
    match state.store.refresh().await {
        Ok(hosts) => Json(json!({ "hosts": hosts })).into_response(),
        Err(e) => {
            error!("Failed to refresh rules: {:#}", e);
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": format!("{:#}", e) })),
            )
                .into_response()
        }
    }
}

async fn self_test(State(state): State<AppState>) -> Json<serde_json::Value> {
    let outcomes = run_self_test(&state.store.stripper());
    let passed = outcomes.iter().all(|o| o.passed);
    Json(json!({ "passed": passed, "cases": outcomes }))
}
