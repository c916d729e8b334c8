//! HTTP surface.
//!
//! GET  /          health check
//! GET  /stream    start a crawl, SSE of record / page / end events
//! POST /stop      request the active crawl to stop
//! GET  /chart     Top-N table for the current session
//! GET  /status    session guard state

pub mod events;

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::models::{ChartKind, CrawlParameters, SearchMode};
use crate::pipeline::{Crawler, StartError};
use crate::session::SessionStatus;

#[derive(Clone)]
pub struct AppState {
    pub crawler: Arc<Crawler>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/stream", get(stream_handler))
        .route("/stop", post(stop_handler))
        .route("/chart", get(chart_handler))
        .route("/status", get(status_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(config: &ServerConfig, crawler: Arc<Crawler>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, router(AppState { crawler }))
        .await
        .context("HTTP server error")
}

// ── Errors ────────────────────────────────────────────────────────────────────

impl IntoResponse for StartError {
    fn into_response(self) -> Response {
        let status = match &self {
            StartError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            StartError::SessionConflict => StatusCode::CONFLICT,
        };
        warn!("Crawl rejected: {}", self);
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

async fn health() -> &'static str {
    "OK"
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    mode: SearchMode,
    #[serde(default)]
    surname: String,
    #[serde(default)]
    place_birth: String,
    max_pages: Option<u32>,
}

async fn stream_handler(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StartError> {
    let params = CrawlParameters {
        mode: query.mode,
        surname: query.surname,
        birthplace: query.place_birth,
        max_pages: query.max_pages.unwrap_or_else(|| state.crawler.default_max_pages()),
    };

    let rx = state.crawler.start(params)?;
    Ok(Sse::new(events::event_stream(rx)).keep_alive(KeepAlive::default()))
}

async fn stop_handler(State(state): State<AppState>) -> StatusCode {
    state.crawler.request_stop();
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
pub struct ChartQuery {
    #[serde(default)]
    mode: SearchMode,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChartResponse {
    labels: Vec<String>,
    data: Vec<u64>,
}

async fn chart_handler(
    State(state): State<AppState>,
    Query(query): Query<ChartQuery>,
) -> Json<ChartResponse> {
    // birthplace mode has a single chart, so `type` is optional there
    let kind = match (query.mode, query.kind.as_deref()) {
        (SearchMode::Birthplace, None) => Some(ChartKind::Surnames),
        (_, Some(name)) => name.parse::<ChartKind>().ok(),
        (SearchMode::Surname, None) => None,
    };

    let entries = kind
        .map(|kind| state.crawler.chart(query.mode, kind))
        .unwrap_or_default();

    Json(ChartResponse {
        labels: entries.iter().map(|e| e.label.clone()).collect(),
        data: entries.iter().map(|e| e.count).collect(),
    })
}

async fn status_handler(State(state): State<AppState>) -> Json<SessionStatus> {
    Json(state.crawler.status())
}
