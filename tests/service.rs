use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{Duration, NaiveDate};
use forecaster::config::ModelConfig;
use forecaster::dataset::TrainingDataset;
use forecaster::model::{ForecastModel, ModelArtifact};
use forecaster::models::PriceRecord;
use forecaster::service::{build_router, ModelStore, ServiceState};
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;
use tower::ServiceExt;

const MAX_DAYS: u32 = 30;

fn save_model(path: &Path, last_date: NaiveDate, rows: i64) {
    let records = (0..rows)
        .map(|idx| {
            let date = last_date - Duration::days(rows - 1 - idx);
            PriceRecord {
                symbol: Some("PG".to_string()),
                ..PriceRecord::new(date, 140.0 + 0.1 * idx as f64)
            }
        })
        .collect();
    let dataset = TrainingDataset::from_records(records).unwrap();
    let model = ForecastModel::fit(&dataset, &ModelConfig::trend_only()).unwrap();
    ModelArtifact::new(Some("PG".to_string()), model)
        .save(path)
        .unwrap();
}

fn trained_router(reload: bool) -> (TempDir, Router) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model").join("forecast_model.bin");
    save_model(&path, NaiveDate::from_ymd_opt(2025, 6, 18).unwrap(), 200);
    let router = build_router(ServiceState::new(ModelStore::new(path, reload), MAX_DAYS));
    (dir, router)
}

async fn post_predict(router: &Router, body: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/predict")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn get(router: &Router, uri: &str) -> (StatusCode, String) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

fn dates_of(entries: &Value) -> Vec<String> {
    entries
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["data"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn predict_returns_consecutive_days_after_training_end() {
    let (_dir, router) = trained_router(false);
    let (status, body) = post_predict(&router, r#"{"days": 5}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        dates_of(&body),
        vec!["19/06/2025", "20/06/2025", "21/06/2025", "22/06/2025", "23/06/2025"]
    );
    for entry in body.as_array().unwrap() {
        let value = entry["previsao_fechamento"].as_f64().unwrap();
        assert!(value > 150.0 && value < 170.0, "unexpected forecast {}", value);
        assert!(((value * 100.0).round() - value * 100.0).abs() < 1e-6);
    }
}

#[tokio::test]
async fn every_valid_horizon_returns_that_many_increasing_dates() {
    let (_dir, router) = trained_router(false);
    let last_training_day = NaiveDate::from_ymd_opt(2025, 6, 18).unwrap();
    for days in [1, 7, 13, MAX_DAYS] {
        let (status, body) = post_predict(&router, &format!(r#"{{"days": {}}}"#, days)).await;
        assert_eq!(status, StatusCode::OK);
        let dates: Vec<NaiveDate> = dates_of(&body)
            .iter()
            .map(|raw| NaiveDate::parse_from_str(raw, "%d/%m/%Y").unwrap())
            .collect();
        assert_eq!(dates.len(), days as usize);
        assert!(dates[0] > last_training_day);
        assert!(dates.windows(2).all(|pair| pair[1] == pair[0] + Duration::days(1)));
    }
}

#[tokio::test]
async fn omitted_days_defaults_to_a_week() {
    let (_dir, router) = trained_router(false);
    let (status, body) = post_predict(&router, "{}").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 7);
}

#[tokio::test]
async fn invalid_days_are_rejected_with_detail() {
    let (_dir, router) = trained_router(false);
    for body in [
        r#"{"days": 0}"#,
        r#"{"days": -3}"#,
        r#"{"days": 2.5}"#,
        r#"{"days": "abc"}"#,
        r#"{"days": 31}"#,
        r#"{"days": 5"#,
        "not json",
    ] {
        let (status, response) = post_predict(&router, body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body {}", body);
        assert!(
            response["detail"].as_str().map(|detail| !detail.is_empty()).unwrap_or(false),
            "missing detail for {}",
            body
        );
    }
}

#[tokio::test]
async fn repeated_requests_are_deterministic() {
    let (_dir, router) = trained_router(false);
    let (_, first) = post_predict(&router, r#"{"days": 10}"#).await;
    let (_, second) = post_predict(&router, r#"{"days": 10}"#).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn missing_or_corrupt_model_is_a_server_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("forecast_model.bin");
    let router = build_router(ServiceState::new(ModelStore::new(path.clone(), false), MAX_DAYS));

    let (status, body) = post_predict(&router, r#"{"days": 3}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["detail"].as_str().unwrap().contains("Model unavailable"));

    std::fs::write(&path, b"definitely not a model").unwrap();
    let (status, body) = post_predict(&router, r#"{"days": 3}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["detail"].is_string());

    let (status, health) = get(&router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    let health: Value = serde_json::from_str(&health).unwrap();
    assert_eq!(health["model"], "missing");
    assert_eq!(health["last_trained"], "unknown");
}

#[tokio::test]
async fn reload_mode_picks_up_retrained_model() {
    let (dir, router) = trained_router(true);
    let (_, before) = post_predict(&router, r#"{"days": 1}"#).await;
    assert_eq!(dates_of(&before), vec!["19/06/2025"]);

    let path = dir.path().join("model").join("forecast_model.bin");
    save_model(&path, NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(), 200);
    let (_, after) = post_predict(&router, r#"{"days": 1}"#).await;
    assert_eq!(dates_of(&after), vec!["01/07/2025"]);
}

#[tokio::test]
async fn health_metrics_and_docs_are_served() {
    let (_dir, router) = trained_router(false);
    post_predict(&router, r#"{"days": 2}"#).await;
    post_predict(&router, r#"{"days": 0}"#).await;

    let (status, health) = get(&router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    let health: Value = serde_json::from_str(&health).unwrap();
    assert_eq!(health["api"], "healthy");
    assert_eq!(health["model"], "loaded");
    assert!(health["last_trained"].is_string());

    let (status, metrics) = get(&router, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(metrics.contains("forecaster_predict_requests_total 2"));
    assert!(metrics.contains("forecaster_predict_bad_requests_total 1"));
    assert!(metrics.contains("forecaster_forecast_points_total 2"));

    let (status, openapi) = get(&router, "/openapi.json").await;
    assert_eq!(status, StatusCode::OK);
    let openapi: Value = serde_json::from_str(&openapi).unwrap();
    assert_eq!(
        openapi["paths"]["/predict"]["post"]["requestBody"]["content"]["application/json"]
            ["schema"]["properties"]["days"]["maximum"],
        MAX_DAYS
    );

    let (status, docs) = get(&router, "/docs").await;
    assert_eq!(status, StatusCode::OK);
    assert!(docs.contains("swagger-ui"));
}
