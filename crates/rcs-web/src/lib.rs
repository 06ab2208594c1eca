//! Operator HTTP surface for the catalog sync engine.
//!
//! Health, sync status and a trigger endpoint. Purge is deliberately absent;
//! it is only reachable from the CLI.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rcs_sync::{SyncConfig, SyncEngine, SyncError, SyncOptions, SyncReport};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{error, info};

pub const CRATE_NAME: &str = "rcs-web";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SyncEngine>,
}

impl AppState {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SyncRequest {
    #[serde(default)]
    dry_run: bool,
    #[serde(default)]
    skip_knowledge_base: bool,
    /// Return 202 immediately and run in the background.
    #[serde(default)]
    background: bool,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    running: bool,
}

#[derive(Debug, Serialize)]
struct Accepted {
    accepted: bool,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/sync/status", get(status_handler))
        .route("/sync", post(sync_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = SyncConfig::from_env();
    let engine = Arc::new(rcs_sync::engine_from_config(&config).await?);

    let scheduler = rcs_sync::maybe_build_scheduler(&config, Arc::clone(&engine)).await?;
    if let Some(sched) = &scheduler {
        sched.start().await.context("starting scheduler")?;
        info!(cron = %config.sync_cron, "sync scheduler started");
    }

    let listener = TcpListener::bind(("0.0.0.0", config.web_port))
        .await
        .with_context(|| format!("binding port {}", config.web_port))?;
    info!(port = config.web_port, "operator API listening");
    axum::serve(listener, app(AppState::new(engine))).await?;
    Ok(())
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Health> {
    Json(Health {
        status: "ok",
        running: state.engine.is_running(),
    })
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.engine.status().await {
        Ok(status) => Json(status).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn sync_handler(State(state): State<Arc<AppState>>, body: Option<Json<SyncRequest>>) -> Response {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let options = SyncOptions {
        dry_run: request.dry_run,
        skip_knowledge_base: request.skip_knowledge_base,
        on_progress: None,
    };

    if request.background {
        if state.engine.is_running() {
            return busy(None);
        }
        let engine = Arc::clone(&state.engine);
        tokio::spawn(async move {
            engine.run_sync(options).await;
        });
        return (StatusCode::ACCEPTED, Json(Accepted { accepted: true })).into_response();
    }

    let report = state.engine.run_sync(options).await;
    if is_busy(&report) {
        return busy(Some(report));
    }
    Json(report).into_response()
}

fn is_busy(report: &SyncReport) -> bool {
    let busy = SyncError::Busy.to_string();
    report.phases.is_empty() && report.fatal_errors().iter().any(|e| e.ends_with(&busy))
}

fn busy(report: Option<SyncReport>) -> Response {
    match report {
        Some(report) => (StatusCode::CONFLICT, Json(report)).into_response(),
        None => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "error": SyncError::Busy.to_string() })),
        )
            .into_response(),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    error!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": format!("{err:#}") })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use rcs_source::InMemorySource;
    use rcs_storage::MemoryStore;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn state() -> AppState {
        let source = InMemorySource::new()
            .with(
                "v1/product/purchases/units/measure",
                vec![json!({"id": 7, "name": "Kilogramo", "abbreviation": "kg"})],
            )
            .with("v1/recipes/categories", vec![json!({"id": 1, "name": "Principales"})]);
        let store = Arc::new(MemoryStore::new());
        AppState::new(Arc::new(SyncEngine::new(Arc::new(source), store.clone(), store)))
    }

    async fn json_body(resp: Response) -> Value {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn healthz_reports_idle_engine() {
        let resp = app(state())
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["running"], false);
    }

    #[tokio::test]
    async fn post_sync_returns_the_report_and_status_reflects_it() {
        let app = app(state());
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sync")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"skip_knowledge_base": true}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let report = json_body(resp).await;
        assert_eq!(report["dry_run"], false);
        assert_eq!(report["phases"].as_array().unwrap().len(), 7);
        assert_eq!(report["phases"][0]["created"], 1);

        let resp = app
            .oneshot(Request::builder().uri("/sync/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let status = json_body(resp).await;
        assert_eq!(status["synced_rows"]["measure_unit"], 1);
        assert_eq!(status["synced_rows"]["recipe_category"], 1);
        assert_eq!(status["knowledge"]["documents"], 0);
        assert!(status["last_report"]["run_id"].is_string());
    }

    #[tokio::test]
    async fn post_sync_without_body_runs_with_defaults() {
        let resp = app(state())
            .oneshot(Request::builder().method("POST").uri("/sync").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let report = json_body(resp).await;
        assert_eq!(report["phases"].as_array().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn purge_is_not_routed() {
        let resp = app(state())
            .oneshot(Request::builder().method("POST").uri("/purge").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
