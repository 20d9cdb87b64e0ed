use crate::config::{GridPoint, ModelConfig, TrainingConfig};
use crate::context::AppContext;
use crate::dataset::{DatasetSplit, TrainingDataset};
use crate::metrics::{round_to, MetricExplanations};
use crate::model::{ForecastModel, ModelArtifact};
use crate::models::AccuracyMetrics;
use crate::report::{
    plot_path, write_forecast_plot, write_json, ArtifactPaths, DatasetSummary, GridResult,
    SelectedParams, TrainingReport, TrainingSummary,
};
use anyhow::{anyhow, Result};
use log::{error, info, warn};
use rayon::prelude::*;
use std::path::Path;
use std::time::Instant;
use uuid::Uuid;

pub fn run(
    app: &AppContext,
    data_path: &Path,
    config_path: Option<&Path>,
    model_path: &Path,
) -> Result<TrainingReport> {
    match train(app, data_path, config_path, model_path) {
        Ok(report) => Ok(report),
        Err(err) => {
            error!("Training failed: {:#}", err);
            Err(err)
        }
    }
}

fn train(
    app: &AppContext,
    data_path: &Path,
    config_path: Option<&Path>,
    model_path: &Path,
) -> Result<TrainingReport> {
    let settings = app.settings();
    let started = Instant::now();
    let run_id = Uuid::new_v4().to_string();
    let config = app.training_config(config_path)?;
    info!("Starting training run {} on {}", run_id, data_path.display());

    let dataset = TrainingDataset::load_csv(data_path)?.with_event_peaks(&config.event_peak);
    let split = dataset.split(config.validation_days, config.test_days)?;
    info!(
        "Chronological split: {} train, {} validation, {} test rows",
        split.train.len(),
        split.validation.len(),
        split.test.len()
    );

    let grid = search_grid(&split, &config);
    let selected = select_best(&grid);
    let model_config = match selected {
        Some(point) => config.model.with_grid_point(&point),
        None if config.grid.is_empty() => config.model.clone(),
        None => {
            return Err(anyhow!(
                "Every grid point failed to fit; see the training log for details"
            ))
        }
    };
    info!(
        "Selected changepoint_prior_scale={} seasonality_prior_scale={}",
        model_config.changepoint_prior_scale, model_config.seasonality_prior_scale
    );

    let validation_metrics = score_holdout(&split.train, &split.validation, &model_config)?;
    let train_and_validation = dataset.without_tail(config.test_days);
    let test_metrics = score_holdout(&train_and_validation, &split.test, &model_config)?;
    info!(
        "Test metrics: MAPE {:.2}%, RMSE {:.4}, R² {:.4}",
        test_metrics.mape, test_metrics.rmse, test_metrics.r2
    );

    let model = ForecastModel::fit(&dataset, &model_config)?;
    let artifact = ModelArtifact::new(dataset.symbol().map(str::to_string), model);
    artifact.save(model_path)?;

    let plot_file = plot_path(&settings.plot_dir);
    let plot = match write_tail_plot(
        &plot_file,
        &artifact.model,
        &dataset,
        config.plot_tail_days,
    ) {
        Ok(()) => {
            info!("Plot written to {}", plot_file.display());
            Some(plot_file.display().to_string())
        }
        Err(err) => {
            warn!("Failed to write plot {}: {:#}", plot_file.display(), err);
            None
        }
    };

    let report = TrainingReport {
        run_id,
        symbol: artifact.symbol.clone(),
        trained_at: artifact.trained_at.to_rfc3339(),
        duration_seconds: round_to(started.elapsed().as_secs_f64(), 3),
        params: selected_params(&model_config),
        grid,
        dataset: DatasetSummary::of(&dataset),
        train: DatasetSummary::of(&split.train),
        validation: DatasetSummary::of(&split.validation),
        test: DatasetSummary::of(&split.test),
        validation_metrics: validation_metrics.rounded(),
        test_metrics: test_metrics.rounded(),
        explanations: MetricExplanations::describe(&test_metrics),
        artifacts: ArtifactPaths {
            model: model_path.display().to_string(),
            metrics: settings.metrics_path.display().to_string(),
            plot,
            log: settings.training_log_path.display().to_string(),
        },
    };
    write_json(&settings.metrics_path, &report)?;
    info!(
        "Training run {} finished in {:.1}s; metrics written to {}",
        report.run_id,
        report.duration_seconds,
        settings.metrics_path.display()
    );

    match serde_json::to_string(&TrainingSummary::from(&report)) {
        Ok(payload) => println!("FORECASTER_TRAIN_SUMMARY={payload}"),
        Err(err) => warn!("Failed to serialize training summary: {err}"),
    }

    Ok(report)
}

/// Fits on `fit_on` and scores forecasts for the hold-out dates (regressors at their future values).
pub fn score_holdout(
    fit_on: &TrainingDataset,
    holdout: &TrainingDataset,
    config: &ModelConfig,
) -> Result<AccuracyMetrics> {
    let model = ForecastModel::fit(fit_on, config)?;
    let predicted = model.predict_dates(holdout.dates())?;
    AccuracyMetrics::compute(holdout.targets(), &predicted)
}

fn search_grid(split: &DatasetSplit, config: &TrainingConfig) -> Vec<GridResult> {
    config
        .grid
        .par_iter()
        .map(|point| {
            let candidate = config.model.with_grid_point(point);
            let outcome = score_holdout(&split.train, &split.validation, &candidate);
            match outcome {
                Ok(metrics) if metrics.mape.is_finite() => {
                    info!(
                        "Grid point cps={} sps={}: validation MAPE {:.4}%",
                        point.changepoint_prior_scale, point.seasonality_prior_scale, metrics.mape
                    );
                    GridResult {
                        changepoint_prior_scale: point.changepoint_prior_scale,
                        seasonality_prior_scale: point.seasonality_prior_scale,
                        validation_mape: Some(round_to(metrics.mape, 4)),
                        error: None,
                    }
                }
                Ok(_) => grid_failure(point, "validation MAPE is undefined".to_string()),
                Err(err) => grid_failure(point, format!("{:#}", err)),
            }
        })
        .collect()
}

fn grid_failure(point: &GridPoint, message: String) -> GridResult {
    warn!(
        "Grid point cps={} sps={} failed: {}",
        point.changepoint_prior_scale, point.seasonality_prior_scale, message
    );
    GridResult {
        changepoint_prior_scale: point.changepoint_prior_scale,
        seasonality_prior_scale: point.seasonality_prior_scale,
        validation_mape: None,
        error: Some(message),
    }
}

/// Lowest validation MAPE; ties keep the earlier grid point.
fn select_best(results: &[GridResult]) -> Option<GridPoint> {
    let mut best: Option<(&GridResult, f64)> = None;
    for result in results {
        let Some(mape) = result.validation_mape else {
            continue;
        };
        match best {
            Some((_, best_mape)) if mape >= best_mape => {}
            _ => best = Some((result, mape)),
        }
    }
    best.map(|(result, _)| result.point())
}

fn selected_params(config: &ModelConfig) -> SelectedParams {
    SelectedParams {
        changepoint_prior_scale: config.changepoint_prior_scale,
        seasonality_prior_scale: config.seasonality_prior_scale,
        holidays_prior_scale: config.holidays_prior_scale,
        seasonality_mode: config.seasonality_mode.label().to_string(),
        n_changepoints: config.n_changepoints,
        regressors: config
            .regressors
            .iter()
            .map(|regressor| regressor.name.clone())
            .collect(),
        special_events: config
            .special_events
            .iter()
            .map(|event| event.name.clone())
            .collect(),
    }
}

fn write_tail_plot(
    path: &Path,
    model: &ForecastModel,
    dataset: &TrainingDataset,
    tail_rows: usize,
) -> Result<()> {
    let tail = dataset.slice(dataset.len().saturating_sub(tail_rows)..dataset.len());
    let fitted = model.predict_dataset(&tail)?;
    let title = format!(
        "{} close: actual vs fitted (last {} days)",
        tail.symbol().unwrap_or("Stock"),
        tail.len()
    );
    write_forecast_plot(path, &title, tail.dates(), tail.targets(), &fitted)
}
