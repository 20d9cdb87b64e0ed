use chrono::{Datelike, Duration, NaiveDate, Weekday};
use forecaster::commands::{evaluate, train};
use forecaster::config::AppSettings;
use forecaster::context::AppContext;
use forecaster::dataset::{write_price_history, DatasetError};
use forecaster::logging;
use forecaster::model::ModelArtifact;
use forecaster::models::PriceRecord;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Weekday closes on a straight line with a small deterministic wiggle.
fn linear_history(rows: usize) -> Vec<PriceRecord> {
    let mut date = NaiveDate::from_ymd_opt(2023, 11, 1).unwrap();
    let mut records = Vec::with_capacity(rows);
    while records.len() < rows {
        if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            let idx = records.len() as f64;
            records.push(PriceRecord {
                open: Some(100.0 + 0.08 * idx),
                high: Some(101.0 + 0.08 * idx),
                low: Some(99.0 + 0.08 * idx),
                volume: Some(5_000_000.0 + (records.len() % 11) as f64 * 25_000.0),
                symbol: Some("PG".to_string()),
                bias_adjust: Some(1.0),
                ..PriceRecord::new(date, 100.0 + 0.08 * idx + 0.3 * (idx / 5.0).sin())
            });
        }
        date += Duration::days(1);
    }
    records
}

fn app_in(dir: &Path) -> AppContext {
    let mut settings = HashMap::new();
    for (key, file) in [
        ("DATA_PATH", "data/stock_data.csv"),
        ("MODEL_PATH", "model/forecast_model.bin"),
        ("METRICS_PATH", "model/metrics.json"),
        ("EVALUATION_PATH", "model/evaluation.json"),
        ("PLOT_DIR", "model"),
        ("TRAINING_LOG_PATH", "model_training.log"),
    ] {
        settings.insert(key.to_string(), dir.join(file).display().to_string());
    }
    AppContext::with_settings(AppSettings::from_settings_map(&settings).unwrap())
}

#[test]
fn training_run_writes_model_report_plot_and_log() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_in(dir.path());
    let settings = app.settings().clone();
    logging::init(Some(&settings.training_log_path)).unwrap();

    let records = linear_history(420);
    let last_date = records[records.len() - 1].date;
    write_price_history(&settings.data_path, &records).unwrap();

    let report = train::run(&app, &settings.data_path, None, &settings.model_path).unwrap();

    assert!(
        report.validation_metrics.mape < 5.0,
        "validation MAPE {}",
        report.validation_metrics.mape
    );
    assert!(report.test_metrics.mape.is_finite());
    assert!(report.test_metrics.rmse.is_finite());
    assert_eq!(report.validation.row_count, 60);
    assert_eq!(report.test.row_count, 30);
    assert_eq!(report.train.row_count, 330);
    assert_eq!(report.grid.len(), 4);
    assert!(report.grid.iter().any(|result| result.validation_mape.is_some()));

    let artifact = ModelArtifact::load(&settings.model_path).unwrap();
    assert_eq!(artifact.symbol.as_deref(), Some("PG"));
    assert_eq!(artifact.model.last_date(), last_date);
    assert_eq!(
        artifact.model.config().changepoint_prior_scale,
        report.params.changepoint_prior_scale
    );

    let metrics: Value =
        serde_json::from_str(&fs::read_to_string(&settings.metrics_path).unwrap()).unwrap();
    assert_eq!(metrics["runId"], Value::String(report.run_id.clone()));
    assert!(metrics["testMetrics"]["mape"].is_number());
    assert!(metrics["explanations"]["mape"].as_str().unwrap().contains('%'));
    assert_eq!(metrics["params"]["seasonalityMode"], "multiplicative");

    let plot = fs::read_to_string(settings.plot_dir.join("forecast_plot.svg")).unwrap();
    assert!(plot.contains("<polyline"));

    let log = fs::read_to_string(&settings.training_log_path).unwrap();
    assert!(log.contains(" - INFO - "));
    assert!(log.contains(&report.run_id));

    let evaluation = evaluate::run(&app, &settings.data_path, &settings.model_path, Some(20)).unwrap();
    assert_eq!(evaluation.test.row_count, 20);
    assert_eq!(evaluation.fitted_on.row_count, 400);
    assert!(evaluation.metrics.mape < 5.0, "evaluation MAPE {}", evaluation.metrics.mape);
    assert!(settings.evaluation_path.exists());
}

#[test]
fn too_short_history_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_in(dir.path());
    let settings = app.settings().clone();
    write_price_history(&settings.data_path, &linear_history(100)).unwrap();

    let err = train::run(&app, &settings.data_path, None, &settings.model_path).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DatasetError>(),
        Some(DatasetError::InsufficientRows { required: 120, actual: 100 })
    ));
    assert!(!settings.model_path.exists());
}

#[test]
fn missing_regressor_column_fails_training() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_in(dir.path());
    let settings = app.settings().clone();
    let records: Vec<PriceRecord> = linear_history(200)
        .into_iter()
        .map(|record| PriceRecord {
            volume: None,
            ..record
        })
        .collect();
    write_price_history(&settings.data_path, &records).unwrap();

    let config_path = dir.path().join("training.json");
    fs::write(&config_path, r#"{"grid": []}"#).unwrap();

    let err = train::run(
        &app,
        &settings.data_path,
        Some(&config_path),
        &settings.model_path,
    )
    .unwrap_err();
    assert!(format!("{:#}", err).contains("volume"));
}

#[test]
fn single_missing_volume_names_the_row() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_in(dir.path());
    let settings = app.settings().clone();
    let mut records = linear_history(300);
    records[150].volume = None;
    let gap_date = records[150].date;
    write_price_history(&settings.data_path, &records).unwrap();

    let err = train::run(&app, &settings.data_path, None, &settings.model_path).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DatasetError>(),
        Some(DatasetError::MissingValue { column, date }) if column == "volume" && *date == gap_date
    ));
    assert!(!settings.model_path.exists());
}
