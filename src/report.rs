use crate::config::GridPoint;
use crate::dataset::TrainingDataset;
use crate::metrics::MetricExplanations;
use crate::models::AccuracyMetrics;
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt::Write as FmtWrite;
use std::fs;
use std::path::{Path, PathBuf};

pub const PLOT_FILE_NAME: &str = "forecast_plot.svg";

const PLOT_WIDTH: f64 = 900.0;
const PLOT_HEIGHT: f64 = 420.0;
const PLOT_MARGIN_LEFT: f64 = 70.0;
const PLOT_MARGIN_RIGHT: f64 = 20.0;
const PLOT_MARGIN_TOP: f64 = 40.0;
const PLOT_MARGIN_BOTTOM: f64 = 50.0;
const ACTUAL_COLOR: &str = "#1f77b4";
const FITTED_COLOR: &str = "#ff7f0e";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSummary {
    pub row_count: usize,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl DatasetSummary {
    pub fn of(dataset: &TrainingDataset) -> Self {
        Self {
            row_count: dataset.len(),
            start_date: dataset.first_date().map(|date| date.to_string()),
            end_date: dataset.last_date().map(|date| date.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridResult {
    pub changepoint_prior_scale: f64,
    pub seasonality_prior_scale: f64,
    pub validation_mape: Option<f64>,
    pub error: Option<String>,
}

impl GridResult {
    pub fn point(&self) -> GridPoint {
        GridPoint {
            changepoint_prior_scale: self.changepoint_prior_scale,
            seasonality_prior_scale: self.seasonality_prior_scale,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedParams {
    pub changepoint_prior_scale: f64,
    pub seasonality_prior_scale: f64,
    pub holidays_prior_scale: f64,
    pub seasonality_mode: String,
    pub n_changepoints: usize,
    pub regressors: Vec<String>,
    pub special_events: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactPaths {
    pub model: String,
    pub metrics: String,
    pub plot: Option<String>,
    pub log: String,
}

/// Full record of one training run, written as the metrics JSON.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingReport {
    pub run_id: String,
    pub symbol: Option<String>,
    pub trained_at: String,
    pub duration_seconds: f64,
    pub params: SelectedParams,
    pub grid: Vec<GridResult>,
    pub dataset: DatasetSummary,
    pub train: DatasetSummary,
    pub validation: DatasetSummary,
    pub test: DatasetSummary,
    pub validation_metrics: AccuracyMetrics,
    pub test_metrics: AccuracyMetrics,
    pub explanations: MetricExplanations,
    pub artifacts: ArtifactPaths,
}

/// One-line digest printed after training for scripts to pick up.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSummary {
    pub run_id: String,
    pub symbol: Option<String>,
    pub validation_mape: f64,
    pub test_mape: f64,
    pub test_rmse: f64,
    pub test_r2: f64,
    pub model_path: String,
}

impl From<&TrainingReport> for TrainingSummary {
    fn from(report: &TrainingReport) -> Self {
        Self {
            run_id: report.run_id.clone(),
            symbol: report.symbol.clone(),
            validation_mape: report.validation_metrics.mape,
            test_mape: report.test_metrics.mape,
            test_rmse: report.test_metrics.rmse,
            test_r2: report.test_metrics.r2,
            model_path: report.artifacts.model.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationReport {
    pub run_id: String,
    pub evaluated_at: String,
    pub symbol: Option<String>,
    pub model_path: String,
    pub model_trained_at: String,
    pub fitted_on: DatasetSummary,
    pub test: DatasetSummary,
    pub metrics: AccuracyMetrics,
    pub explanations: MetricExplanations,
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    ensure_parent(path)?;
    let payload = serde_json::to_string_pretty(value).context("Failed to serialize report")?;
    fs::write(path, payload).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub fn plot_path(plot_dir: &Path) -> PathBuf {
    plot_dir.join(PLOT_FILE_NAME)
}

/// Renders actual vs fitted closes as a standalone SVG line chart.
pub fn write_forecast_plot(
    path: &Path,
    title: &str,
    dates: &[NaiveDate],
    actual: &[f64],
    fitted: &[f64],
) -> Result<()> {
    if dates.is_empty() || dates.len() != actual.len() || dates.len() != fitted.len() {
        return Err(anyhow!(
            "Cannot plot {} dates against {} actual and {} fitted values",
            dates.len(),
            actual.len(),
            fitted.len()
        ));
    }

    let (mut low, mut high) = actual
        .iter()
        .chain(fitted.iter())
        .filter(|value| value.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), value| {
            (lo.min(*value), hi.max(*value))
        });
    if !low.is_finite() || !high.is_finite() {
        return Err(anyhow!("No finite values to plot"));
    }
    if (high - low).abs() < f64::EPSILON {
        low -= 1.0;
        high += 1.0;
    }
    let padding = (high - low) * 0.05;
    low -= padding;
    high += padding;

    let inner_width = PLOT_WIDTH - PLOT_MARGIN_LEFT - PLOT_MARGIN_RIGHT;
    let inner_height = PLOT_HEIGHT - PLOT_MARGIN_TOP - PLOT_MARGIN_BOTTOM;
    let steps = (dates.len().max(2) - 1) as f64;
    let x = |idx: usize| PLOT_MARGIN_LEFT + inner_width * idx as f64 / steps;
    let y = |value: f64| PLOT_MARGIN_TOP + inner_height * (high - value) / (high - low);

    let mut svg = String::new();
    let _ = write!(
        &mut svg,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{w}\" height=\"{h}\" viewBox=\"0 0 {w} {h}\" font-family=\"Arial,Helvetica,sans-serif\" font-size=\"12\">",
        w = PLOT_WIDTH,
        h = PLOT_HEIGHT
    );
    svg.push_str("<rect width=\"100%\" height=\"100%\" fill=\"#ffffff\"/>");
    let _ = write!(
        &mut svg,
        "<text x=\"{}\" y=\"24\" font-size=\"16\" font-weight=\"600\">{}</text>",
        PLOT_MARGIN_LEFT,
        escape_xml(title)
    );

    for tick in 0..=4 {
        let value = low + (high - low) * tick as f64 / 4.0;
        let ty = y(value);
        let _ = write!(
            &mut svg,
            "<line x1=\"{:.1}\" y1=\"{:.1}\" x2=\"{:.1}\" y2=\"{:.1}\" stroke=\"#e0e0e0\"/><text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"end\">{:.2}</text>",
            PLOT_MARGIN_LEFT,
            ty,
            PLOT_WIDTH - PLOT_MARGIN_RIGHT,
            ty,
            PLOT_MARGIN_LEFT - 6.0,
            ty + 4.0,
            value
        );
    }

    let baseline = PLOT_HEIGHT - PLOT_MARGIN_BOTTOM;
    let _ = write!(
        &mut svg,
        "<text x=\"{:.1}\" y=\"{:.1}\">{}</text><text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"end\">{}</text>",
        PLOT_MARGIN_LEFT,
        baseline + 20.0,
        dates[0].format("%d/%m/%Y"),
        PLOT_WIDTH - PLOT_MARGIN_RIGHT,
        baseline + 20.0,
        dates[dates.len() - 1].format("%d/%m/%Y")
    );

    svg.push_str(&polyline(actual, ACTUAL_COLOR, None, &x, &y));
    svg.push_str(&polyline(fitted, FITTED_COLOR, Some("6 4"), &x, &y));

    let legend_y = baseline + 38.0;
    let _ = write!(
        &mut svg,
        "<rect x=\"{lx:.1}\" y=\"{ry:.1}\" width=\"14\" height=\"3\" fill=\"{ac}\"/><text x=\"{tx:.1}\" y=\"{ty:.1}\">Actual</text><rect x=\"{lx2:.1}\" y=\"{ry:.1}\" width=\"14\" height=\"3\" fill=\"{fc}\"/><text x=\"{tx2:.1}\" y=\"{ty:.1}\">Fitted</text>",
        lx = PLOT_MARGIN_LEFT,
        tx = PLOT_MARGIN_LEFT + 20.0,
        lx2 = PLOT_MARGIN_LEFT + 90.0,
        tx2 = PLOT_MARGIN_LEFT + 110.0,
        ry = legend_y - 5.0,
        ty = legend_y,
        ac = ACTUAL_COLOR,
        fc = FITTED_COLOR
    );
    svg.push_str("</svg>\n");

    ensure_parent(path)?;
    fs::write(path, svg).with_context(|| format!("Failed to write plot {}", path.display()))?;
    Ok(())
}

fn polyline(
    values: &[f64],
    color: &str,
    dash: Option<&str>,
    x: &dyn Fn(usize) -> f64,
    y: &dyn Fn(f64) -> f64,
) -> String {
    let points: Vec<String> = values
        .iter()
        .enumerate()
        .filter(|(_, value)| value.is_finite())
        .map(|(idx, value)| format!("{:.1},{:.1}", x(idx), y(*value)))
        .collect();
    let dash_attr = dash
        .map(|pattern| format!(" stroke-dasharray=\"{}\"", pattern))
        .unwrap_or_default();
    format!(
        "<polyline fill=\"none\" stroke=\"{}\" stroke-width=\"2\"{} points=\"{}\"/>",
        color,
        dash_attr,
        points.join(" ")
    )
}

fn escape_xml(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}
