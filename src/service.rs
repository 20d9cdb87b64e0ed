use crate::config::ServerSettings;
use crate::metrics::round_to;
use crate::model::{ArtifactError, ForecastError, ModelArtifact};
use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info, warn};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt::Write as FmtWrite;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use tower_http::cors::{Any, CorsLayer};

pub const DEFAULT_FORECAST_DAYS: usize = 7;
const DATE_FORMAT: &str = "%d/%m/%Y";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(#[from] ArtifactError),

    #[error("Prediction failed: {0}")]
    Prediction(#[from] ForecastError),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ModelUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Prediction(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

/// One day of the forecast as returned by `POST /predict`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ForecastEntry {
    pub data: String,
    pub previsao_fechamento: f64,
}

struct CachedModel {
    modified: Option<SystemTime>,
    artifact: Arc<ModelArtifact>,
}

/// Lazily loaded model artifact, re-read when the file's modification time changes.
pub struct ModelStore {
    path: PathBuf,
    reload_always: bool,
    cached: RwLock<Option<CachedModel>>,
}

impl ModelStore {
    pub fn new(path: impl Into<PathBuf>, reload_always: bool) -> Self {
        Self {
            path: path.into(),
            reload_always,
            cached: RwLock::new(None),
        }
    }

    pub fn current(&self) -> Result<Arc<ModelArtifact>, ArtifactError> {
        let modified = fs::metadata(&self.path)
            .and_then(|metadata| metadata.modified())
            .ok();
        if modified.is_none() && !self.path.exists() {
            return Err(ArtifactError::NotFound(self.path.clone()));
        }

        if !self.reload_always && modified.is_some() {
            let guard = self
                .cached
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(cached) = guard.as_ref().filter(|cached| cached.modified == modified) {
                return Ok(Arc::clone(&cached.artifact));
            }
        }

        let artifact = Arc::new(ModelArtifact::load(&self.path)?);
        info!(
            "Loaded model artifact {} (trained {}, last observation {})",
            self.path.display(),
            artifact.trained_at.to_rfc3339(),
            artifact.model.last_date()
        );
        let mut guard = self
            .cached
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(CachedModel {
            modified,
            artifact: Arc::clone(&artifact),
        });
        Ok(artifact)
    }
}

#[derive(Default)]
pub struct ServiceMetrics {
    predict_requests: AtomicU64,
    predict_bad_requests: AtomicU64,
    predict_failures: AtomicU64,
    forecast_points: AtomicU64,
}

impl ServiceMetrics {
    fn render(&self) -> String {
        let counters = [
            (
                "forecaster_predict_requests_total",
                "Prediction requests received.",
                &self.predict_requests,
            ),
            (
                "forecaster_predict_bad_requests_total",
                "Prediction requests rejected as invalid.",
                &self.predict_bad_requests,
            ),
            (
                "forecaster_predict_failures_total",
                "Prediction requests that failed with a server error.",
                &self.predict_failures,
            ),
            (
                "forecaster_forecast_points_total",
                "Forecast days returned.",
                &self.forecast_points,
            ),
        ];
        let mut body = String::new();
        for (name, help, counter) in counters {
            let _ = writeln!(&mut body, "# HELP {} {}", name, help);
            let _ = writeln!(&mut body, "# TYPE {} counter", name);
            let _ = writeln!(&mut body, "{} {}", name, counter.load(Ordering::Relaxed));
        }
        body
    }
}

#[derive(Clone)]
pub struct ServiceState {
    store: Arc<ModelStore>,
    metrics: Arc<ServiceMetrics>,
    max_forecast_days: u32,
}

impl ServiceState {
    pub fn new(store: ModelStore, max_forecast_days: u32) -> Self {
        Self {
            store: Arc::new(store),
            metrics: Arc::new(ServiceMetrics::default()),
            max_forecast_days,
        }
    }
}

pub fn build_router(state: ServiceState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/predict", post(predict))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/docs", get(docs))
        .route("/openapi.json", get(openapi))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(settings: &ServerSettings, model_path: &Path) -> Result<()> {
    let addr = settings.socket_addr()?;
    let state = ServiceState::new(
        ModelStore::new(model_path, settings.reload),
        settings.max_forecast_days,
    );
    if let Err(err) = state.store.current() {
        warn!("Starting without a usable model: {}", err);
    }

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(
        "Forecast service v{} listening on {} (docs at /docs)",
        env!("CARGO_PKG_VERSION"),
        addr
    );
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Forecast service terminated unexpectedly")?;
    info!("Forecast service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", err);
    }
}

async fn predict(
    State(state): State<ServiceState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Vec<ForecastEntry>>, ApiError> {
    state.metrics.predict_requests.fetch_add(1, Ordering::Relaxed);
    let outcome = run_prediction(&state, payload);
    match &outcome {
        Ok(entries) => {
            state
                .metrics
                .forecast_points
                .fetch_add(entries.len() as u64, Ordering::Relaxed);
        }
        Err(err @ ApiError::BadRequest(_)) => {
            state
                .metrics
                .predict_bad_requests
                .fetch_add(1, Ordering::Relaxed);
            warn!("Rejected prediction request: {}", err);
        }
        Err(err) => {
            state.metrics.predict_failures.fetch_add(1, Ordering::Relaxed);
            error!("Prediction failed: {}", err);
        }
    }
    outcome.map(Json)
}

fn run_prediction(
    state: &ServiceState,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Vec<ForecastEntry>, ApiError> {
    let Json(body) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let days = parse_days(&body, state.max_forecast_days)?;
    info!("Forecast requested for {} day(s)", days);

    let artifact = state.store.current()?;
    let forecast = artifact.model.forecast(days)?;
    Ok(forecast
        .into_iter()
        .map(|point| ForecastEntry {
            data: point.date.format(DATE_FORMAT).to_string(),
            previsao_fechamento: round_to(point.value, 2),
        })
        .collect())
}

/// `days` must be a JSON integer in `1..=max_days`; omitted means the default horizon.
pub fn parse_days(body: &Value, max_days: u32) -> Result<usize, ApiError> {
    let Value::Object(fields) = body else {
        return Err(ApiError::BadRequest(
            "Request body must be a JSON object like {\"days\": 7}".to_string(),
        ));
    };
    let Some(raw) = fields.get("days") else {
        return Ok(DEFAULT_FORECAST_DAYS.min(max_days as usize));
    };

    let days = match raw {
        Value::Number(number) if number.is_i64() || number.is_u64() => {
            number.as_i64().unwrap_or(i64::MAX)
        }
        _ => {
            return Err(ApiError::BadRequest(format!(
                "days must be an integer (got {})",
                raw
            )))
        }
    };
    if days <= 0 {
        return Err(ApiError::BadRequest(format!(
            "days must be a positive integer (got {})",
            days
        )));
    }
    if days > max_days as i64 {
        return Err(ApiError::BadRequest(format!(
            "days must be at most {} (got {})",
            max_days, days
        )));
    }
    Ok(days as usize)
}

async fn health(State(state): State<ServiceState>) -> Json<Value> {
    let (model, last_trained) = match state.store.current() {
        Ok(artifact) => ("loaded", artifact.trained_at.to_rfc3339()),
        Err(_) => ("missing", "unknown".to_string()),
    };
    Json(json!({
        "api": "healthy",
        "model": model,
        "last_trained": last_trained,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics(State(state): State<ServiceState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

async fn openapi(State(state): State<ServiceState>) -> Json<Value> {
    Json(openapi_document(state.max_forecast_days))
}

async fn docs() -> Html<&'static str> {
    Html(SWAGGER_UI_PAGE)
}

fn openapi_document(max_days: u32) -> Value {
    let error_body = json!({
        "type": "object",
        "properties": { "detail": { "type": "string" } },
        "required": ["detail"]
    });
    json!({
        "openapi": "3.0.3",
        "info": {
            "title": "Stock price forecaster",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Daily closing price forecasts from the trained model."
        },
        "paths": {
            "/predict": {
                "post": {
                    "summary": "Forecast the closing price for the next days",
                    "requestBody": {
                        "required": true,
                        "content": {
                            "application/json": {
                                "schema": {
                                    "type": "object",
                                    "properties": {
                                        "days": {
                                            "type": "integer",
                                            "minimum": 1,
                                            "maximum": max_days,
                                            "default": DEFAULT_FORECAST_DAYS
                                        }
                                    }
                                }
                            }
                        }
                    },
                    "responses": {
                        "200": {
                            "description": "One entry per forecast day",
                            "content": {
                                "application/json": {
                                    "schema": {
                                        "type": "array",
                                        "items": {
                                            "type": "object",
                                            "properties": {
                                                "data": { "type": "string", "example": "19/06/2025" },
                                                "previsao_fechamento": { "type": "number", "example": 152.37 }
                                            },
                                            "required": ["data", "previsao_fechamento"]
                                        }
                                    }
                                }
                            }
                        },
                        "400": {
                            "description": "Invalid days value or malformed body",
                            "content": { "application/json": { "schema": error_body.clone() } }
                        },
                        "500": {
                            "description": "Model missing, corrupt or failed to predict",
                            "content": { "application/json": { "schema": error_body } }
                        }
                    }
                }
            },
            "/health": {
                "get": {
                    "summary": "Service and model status",
                    "responses": { "200": { "description": "Status document" } }
                }
            },
            "/metrics": {
                "get": {
                    "summary": "Prometheus counters",
                    "responses": { "200": { "description": "Text exposition format" } }
                }
            }
        }
    })
}

const SWAGGER_UI_PAGE: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Stock price forecaster - API docs</title>
<link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css">
</head>
<body>
<div id="swagger-ui"></div>
<script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
<script>
window.onload = () => {
  window.ui = SwaggerUIBundle({ url: "/openapi.json", dom_id: "#swagger-ui" });
};
</script>
</body>
</html>
"##;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docs_page_points_swagger_at_the_openapi_document() {
        assert!(SWAGGER_UI_PAGE.contains(r##"dom_id: "#swagger-ui""##));
        assert!(SWAGGER_UI_PAGE.contains("url: \"/openapi.json\""));
        assert!(SWAGGER_UI_PAGE.trim_end().ends_with("</html>"));
    }

    #[test]
    fn days_must_be_positive_integer_within_limit() {
        assert_eq!(parse_days(&json!({"days": 5}), 30).unwrap(), 5);
        assert_eq!(parse_days(&json!({}), 30).unwrap(), DEFAULT_FORECAST_DAYS);
        assert_eq!(parse_days(&json!({"days": 30}), 30).unwrap(), 30);

        for invalid in [
            json!({"days": 0}),
            json!({"days": -3}),
            json!({"days": 2.5}),
            json!({"days": 5.0}),
            json!({"days": "5"}),
            json!({"days": null}),
            json!({"days": 31}),
            json!({"days": u64::MAX}),
            json!([5]),
        ] {
            assert!(
                matches!(parse_days(&invalid, 30), Err(ApiError::BadRequest(_))),
                "{} should be rejected",
                invalid
            );
        }
    }

    #[test]
    fn metrics_render_prometheus_counters() {
        let metrics = ServiceMetrics::default();
        metrics.predict_requests.fetch_add(3, Ordering::Relaxed);
        let body = metrics.render();
        assert!(body.contains("# TYPE forecaster_predict_requests_total counter"));
        assert!(body.contains("forecaster_predict_requests_total 3"));
        assert!(body.contains("forecaster_forecast_points_total 0"));
    }

    #[test]
    fn missing_artifact_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path().join("model.bin"), false);
        assert!(matches!(store.current(), Err(ArtifactError::NotFound(_))));
    }
}
