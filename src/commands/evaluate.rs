use crate::commands::train::score_holdout;
use crate::context::AppContext;
use crate::dataset::{TrainingDataset, MIN_TRAIN_ROWS};
use crate::metrics::MetricExplanations;
use crate::model::ModelArtifact;
use crate::report::{write_json, DatasetSummary, EvaluationReport};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use log::info;
use std::path::Path;
use uuid::Uuid;

/// Refits the persisted model's configuration without the last `test_days` rows and scores that tail.
pub fn run(
    app: &AppContext,
    data_path: &Path,
    model_path: &Path,
    test_days: Option<usize>,
) -> Result<EvaluationReport> {
    let settings = app.settings();
    let training_config = app.training_config(None)?;
    let test_days = test_days.unwrap_or(training_config.test_days);
    if test_days == 0 {
        return Err(anyhow!("test_days must be >= 1"));
    }

    let artifact = ModelArtifact::load(model_path)
        .with_context(|| format!("Failed to load model from {}", model_path.display()))?;
    let dataset =
        TrainingDataset::load_csv(data_path)?.with_event_peaks(&training_config.event_peak);
    if dataset.len() < MIN_TRAIN_ROWS + test_days {
        return Err(anyhow!(
            "Evaluation needs at least {} rows (found {})",
            MIN_TRAIN_ROWS + test_days,
            dataset.len()
        ));
    }

    let fit_on = dataset.without_tail(test_days);
    let test = dataset.slice(fit_on.len()..dataset.len());
    info!(
        "Evaluating {} on the last {} rows of {}",
        model_path.display(),
        test.len(),
        data_path.display()
    );
    let metrics = score_holdout(&fit_on, &test, artifact.model.config())?;
    info!(
        "Evaluation metrics: MAPE {:.2}%, RMSE {:.4}, R² {:.4}",
        metrics.mape, metrics.rmse, metrics.r2
    );

    let report = EvaluationReport {
        run_id: Uuid::new_v4().to_string(),
        evaluated_at: Utc::now().to_rfc3339(),
        symbol: artifact.symbol.clone(),
        model_path: model_path.display().to_string(),
        model_trained_at: artifact.trained_at.to_rfc3339(),
        fitted_on: DatasetSummary::of(&fit_on),
        test: DatasetSummary::of(&test),
        metrics: metrics.rounded(),
        explanations: MetricExplanations::describe(&metrics),
    };
    write_json(&settings.evaluation_path, &report)?;
    info!(
        "Evaluation written to {}",
        settings.evaluation_path.display()
    );
    Ok(report)
}
