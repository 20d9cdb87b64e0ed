use crate::config::{FutureValue, ModelConfig, RegressorSpec, SeasonalityMode};
use crate::dataset::{DatasetError, TrainingDataset};
use crate::events::SpecialEvent;
use crate::models::ForecastPoint;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::fs;
use std::path::{Path, PathBuf};

#[path = "components/linalg.rs"]
mod linalg;

#[path = "components/trend.rs"]
pub mod trend;

#[path = "components/seasonality.rs"]
pub mod seasonality;

use linalg::{dot, ridge_solve};
use seasonality::{seasonalities_for, FourierSeasonality};
use trend::{place_changepoints, push_features, PiecewiseLinearTrend};

pub const MIN_FIT_ROWS: usize = 3;
pub const MODEL_ARTIFACT_VERSION: u32 = 1;

/// Near-zero ridge penalty for the intercept and base slope.
const BASE_PENALTY: f64 = 1e-6;
const MIN_NOISE_VARIANCE: f64 = 1e-4;

#[derive(Debug, thiserror::Error)]
pub enum ForecastError {
    #[error("need at least {required} observations to fit a model (found {actual})")]
    InsufficientData { required: usize, actual: usize },

    #[error("invalid model configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error("regressor {0} has no matching column in the price history")]
    MissingRegressor(String),

    #[error("{0} design matrix is singular")]
    Singular(&'static str),

    #[error("model produced a non-finite value for {0}")]
    NonFinite(NaiveDate),

    #[error("forecast horizon must be at least one day")]
    EmptyHorizon,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct EventFeature {
    event: usize,
    offset: i32,
    name: String,
}

/// Standardisation and future fill for one extra regressor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FittedRegressor {
    pub name: String,
    pub mean: f64,
    pub scale: f64,
    pub prior_scale: f64,
    pub future_value: f64,
}

impl FittedRegressor {
    fn fit(spec: &RegressorSpec, dataset: &TrainingDataset) -> Result<Self, ForecastError> {
        let values = dataset
            .column(&spec.name)
            .map_err(|_| ForecastError::MissingRegressor(spec.name.clone()))?;

        let constant = values.windows(2).all(|pair| pair[0] == pair[1]);
        let binary = values.iter().all(|value| *value == 0.0 || *value == 1.0);
        let (mean, scale) = if constant {
            // standardises to zero, so the column never contributes
            (values.first().copied().unwrap_or(0.0), 1.0)
        } else if binary {
            (0.0, 1.0)
        } else {
            let mean = values.iter().mean();
            let std_dev = values.iter().std_dev();
            if std_dev.is_finite() && std_dev > f64::EPSILON {
                (mean, std_dev)
            } else {
                (mean, 1.0)
            }
        };

        let future_value = match spec.future {
            FutureValue::Constant(value) => value,
            FutureValue::TrailingMean(window) => {
                let tail = &values[values.len().saturating_sub(window)..];
                tail.iter().mean()
            }
        };

        Ok(Self {
            name: spec.name.clone(),
            mean,
            scale,
            prior_scale: spec.prior_scale,
            future_value,
        })
    }

    fn standardize(&self, raw: f64) -> f64 {
        (raw - self.mean) / self.scale
    }
}

/// Decomposable forecaster: piecewise-linear trend plus Fourier seasonalities,
/// special-event indicators and extra regressors, fitted as a penalised least-squares problem.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForecastModel {
    config: ModelConfig,
    start: NaiveDate,
    last_date: NaiveDate,
    span_days: f64,
    y_scale: f64,
    trend: PiecewiseLinearTrend,
    seasonalities: Vec<FourierSeasonality>,
    events: Vec<SpecialEvent>,
    event_features: Vec<EventFeature>,
    regressors: Vec<FittedRegressor>,
    component_coefficients: Vec<f64>,
}

impl ForecastModel {
    pub fn fit(dataset: &TrainingDataset, config: &ModelConfig) -> Result<Self, ForecastError> {
        config
            .validate()
            .map_err(|err| ForecastError::InvalidConfig(err.to_string()))?;
        let n = dataset.len();
        if n < MIN_FIT_ROWS {
            return Err(ForecastError::InsufficientData {
                required: MIN_FIT_ROWS,
                actual: n,
            });
        }

        let dates = dataset.dates();
        let start = dates[0];
        let last_date = dates[n - 1];
        let span_days = ((last_date - start).num_days() as f64).max(1.0);
        let y_scale = dataset
            .targets()
            .iter()
            .fold(0.0_f64, |acc, value| acc.max(value.abs()));
        let y_scale = if y_scale > f64::EPSILON { y_scale } else { 1.0 };
        let scaled: Vec<f64> = dataset.targets().iter().map(|value| value / y_scale).collect();
        let t: Vec<f64> = dates
            .iter()
            .map(|date| (*date - start).num_days() as f64 / span_days)
            .collect();

        let changepoints = place_changepoints(&t, config.n_changepoints, config.changepoint_range);

        let events: Vec<SpecialEvent> = config
            .special_events
            .iter()
            .cloned()
            .map(SpecialEvent::normalized)
            .collect();
        let mut event_features = Vec::new();
        for (index, event) in events.iter().enumerate() {
            for offset in event.offsets() {
                if dates.iter().any(|date| event.is_active(*date, offset)) {
                    event_features.push(EventFeature {
                        event: index,
                        offset,
                        name: event.feature_name(offset),
                    });
                }
            }
        }

        let regressors = config
            .regressors
            .iter()
            .map(|spec| FittedRegressor::fit(spec, dataset))
            .collect::<Result<Vec<_>, _>>()?;

        let trend_width = PiecewiseLinearTrend::width(&changepoints);
        let mut model = Self {
            config: config.clone(),
            start,
            last_date,
            span_days,
            y_scale,
            trend: PiecewiseLinearTrend::from_coefficients(
                changepoints.clone(),
                &vec![0.0; trend_width],
            ),
            seasonalities: seasonalities_for(config),
            events,
            event_features,
            regressors,
            component_coefficients: Vec::new(),
        };

        let raw_regressors = model.regressor_columns(dataset)?;
        let component_rows: Vec<Vec<f64>> = (0..n)
            .map(|idx| {
                let raw: Vec<f64> = raw_regressors.iter().map(|column| column[idx]).collect();
                model.component_row(dates[idx], &raw)
            })
            .collect();
        let trend_rows: Vec<Vec<f64>> = t
            .iter()
            .map(|value| {
                let mut row = Vec::with_capacity(trend_width);
                push_features(&mut row, *value, &changepoints);
                row
            })
            .collect();

        let noise = noise_variance(&t, &scaled);
        let mut trend_penalties = vec![BASE_PENALTY; 2];
        trend_penalties.extend(
            changepoints
                .iter()
                .map(|_| noise / config.changepoint_prior_scale.powi(2)),
        );
        let component_penalties = model.component_penalties(noise);

        match config.seasonality_mode {
            SeasonalityMode::Additive => {
                let rows: Vec<Vec<f64>> = trend_rows
                    .iter()
                    .zip(component_rows.iter())
                    .map(|(trend_row, component_row)| {
                        let mut row = trend_row.clone();
                        row.extend_from_slice(component_row);
                        row
                    })
                    .collect();
                let mut penalties = trend_penalties;
                penalties.extend_from_slice(&component_penalties);
                let beta = ridge_solve(&rows, &scaled, &penalties)
                    .ok_or(ForecastError::Singular("additive"))?;
                model.trend =
                    PiecewiseLinearTrend::from_coefficients(changepoints, &beta[..trend_width]);
                model.component_coefficients = beta[trend_width..].to_vec();
            }
            SeasonalityMode::Multiplicative => {
                let trend_beta = ridge_solve(&trend_rows, &scaled, &trend_penalties)
                    .ok_or(ForecastError::Singular("trend"))?;
                model.trend = PiecewiseLinearTrend::from_coefficients(changepoints, &trend_beta);

                let trend_hat: Vec<f64> = t.iter().map(|value| model.trend.value(*value)).collect();
                let rows: Vec<Vec<f64>> = component_rows
                    .iter()
                    .zip(trend_hat.iter())
                    .map(|(row, level)| row.iter().map(|x| x * level).collect())
                    .collect();
                let residuals: Vec<f64> = scaled
                    .iter()
                    .zip(trend_hat.iter())
                    .map(|(y, level)| y - level)
                    .collect();
                model.component_coefficients = ridge_solve(&rows, &residuals, &component_penalties)
                    .ok_or(ForecastError::Singular("multiplicative component"))?;
            }
        }

        model.predict_dataset(dataset)?;
        debug!(
            "Fitted {} model on {} rows: {} changepoints, {} seasonal terms, {} event terms, {} regressors",
            config.seasonality_mode.label(),
            n,
            model.trend.changepoints.len(),
            model.seasonalities.iter().map(FourierSeasonality::width).sum::<usize>(),
            model.event_features.len(),
            model.regressors.len()
        );
        Ok(model)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn last_date(&self) -> NaiveDate {
        self.last_date
    }

    pub fn regressors(&self) -> &[FittedRegressor] {
        &self.regressors
    }

    /// In-sample or hold-out predictions using the dataset's own regressor values.
    pub fn predict_dataset(&self, dataset: &TrainingDataset) -> Result<Vec<f64>, ForecastError> {
        let raw_regressors = self.regressor_columns(dataset)?;
        dataset
            .dates()
            .iter()
            .enumerate()
            .map(|(idx, date)| {
                let raw: Vec<f64> = raw_regressors.iter().map(|column| column[idx]).collect();
                self.predict_row(*date, &raw)
            })
            .collect()
    }

    /// Predictions for arbitrary dates with regressors held at their future values.
    pub fn predict_dates(&self, dates: &[NaiveDate]) -> Result<Vec<f64>, ForecastError> {
        let raw: Vec<f64> = self
            .regressors
            .iter()
            .map(|regressor| regressor.future_value)
            .collect();
        dates.iter().map(|date| self.predict_row(*date, &raw)).collect()
    }

    /// Consecutive calendar days starting the day after the last training date.
    pub fn forecast(&self, days: usize) -> Result<Vec<ForecastPoint>, ForecastError> {
        if days == 0 {
            return Err(ForecastError::EmptyHorizon);
        }
        let dates: Vec<NaiveDate> = (1..=days as i64)
            .map(|offset| self.last_date + Duration::days(offset))
            .collect();
        let values = self.predict_dates(&dates)?;
        Ok(dates
            .into_iter()
            .zip(values)
            .map(|(date, value)| ForecastPoint { date, value })
            .collect())
    }

    fn predict_row(&self, date: NaiveDate, raw_regressors: &[f64]) -> Result<f64, ForecastError> {
        let level = self.trend.value(self.time_index(date));
        let components = self.component_row(date, raw_regressors);
        let effect = dot(&components, &self.component_coefficients);
        let scaled = match self.config.seasonality_mode {
            SeasonalityMode::Additive => level + effect,
            SeasonalityMode::Multiplicative => level * (1.0 + effect),
        };
        let value = scaled * self.y_scale;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(ForecastError::NonFinite(date))
        }
    }

    fn time_index(&self, date: NaiveDate) -> f64 {
        (date - self.start).num_days() as f64 / self.span_days
    }

    fn regressor_columns<'a>(
        &self,
        dataset: &'a TrainingDataset,
    ) -> Result<Vec<&'a [f64]>, ForecastError> {
        self.regressors
            .iter()
            .map(|regressor| {
                dataset
                    .column(&regressor.name)
                    .map_err(|_| ForecastError::MissingRegressor(regressor.name.clone()))
            })
            .collect()
    }

    fn component_row(&self, date: NaiveDate, raw_regressors: &[f64]) -> Vec<f64> {
        let mut row = Vec::with_capacity(self.component_width());
        for seasonality in &self.seasonalities {
            seasonality.push_features(&mut row, date);
        }
        for feature in &self.event_features {
            let active = self.events[feature.event].is_active(date, feature.offset);
            row.push(if active { 1.0 } else { 0.0 });
        }
        for (regressor, raw) in self.regressors.iter().zip(raw_regressors.iter()) {
            row.push(regressor.standardize(*raw));
        }
        row
    }

    fn component_width(&self) -> usize {
        self.seasonalities
            .iter()
            .map(FourierSeasonality::width)
            .sum::<usize>()
            + self.event_features.len()
            + self.regressors.len()
    }

    fn component_penalties(&self, noise: f64) -> Vec<f64> {
        let mut penalties = Vec::with_capacity(self.component_width());
        let seasonal = noise / self.config.seasonality_prior_scale.powi(2);
        for seasonality in &self.seasonalities {
            penalties.extend(std::iter::repeat(seasonal).take(seasonality.width()));
        }
        let holiday = noise / self.config.holidays_prior_scale.powi(2);
        penalties.extend(std::iter::repeat(holiday).take(self.event_features.len()));
        penalties.extend(
            self.regressors
                .iter()
                .map(|regressor| noise / regressor.prior_scale.powi(2)),
        );
        penalties
    }
}

/// Residual variance of a straight-line fit, used to turn prior scales into ridge penalties.
fn noise_variance(t: &[f64], y: &[f64]) -> f64 {
    let rows: Vec<Vec<f64>> = t.iter().map(|value| vec![1.0, *value]).collect();
    let variance = match ridge_solve(&rows, y, &[BASE_PENALTY, BASE_PENALTY]) {
        Some(beta) => {
            rows.iter()
                .zip(y.iter())
                .map(|(row, target)| (target - dot(row, &beta)).powi(2))
                .sum::<f64>()
                / y.len() as f64
        }
        None => 1.0,
    };
    variance.max(MIN_NOISE_VARIANCE)
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("model artifact {0} does not exist")]
    NotFound(PathBuf),

    #[error("failed to access model artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("model artifact {path} is corrupt: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },

    #[error("failed to encode model artifact: {0}")]
    Encode(#[source] bincode::Error),

    #[error("model artifact has format version {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },
}

/// The persisted trained model plus the metadata needed to serve it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: u32,
    pub trained_at: DateTime<Utc>,
    pub symbol: Option<String>,
    pub model: ForecastModel,
}

impl ModelArtifact {
    pub fn new(symbol: Option<String>, model: ForecastModel) -> Self {
        Self {
            version: MODEL_ARTIFACT_VERSION,
            trained_at: Utc::now(),
            symbol,
            model,
        }
    }

    /// Writes to a sibling temp file first so readers never observe a partial artifact.
    pub fn save(&self, path: &Path) -> Result<(), ArtifactError> {
        let io_error = |source: std::io::Error| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let bytes = bincode::serialize(self).map_err(ArtifactError::Encode)?;
        let mut temp_name = path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);
        fs::write(&temp_path, bytes).map_err(io_error)?;
        fs::rename(&temp_path, path).map_err(io_error)?;
        info!("Saved model artifact to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        if !path.exists() {
            return Err(ArtifactError::NotFound(path.to_path_buf()));
        }
        let bytes = fs::read(path).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        // the version is the first field, encoded as a little-endian u32
        if let Some(header) = bytes.get(..4) {
            let found = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            if found != MODEL_ARTIFACT_VERSION {
                return Err(ArtifactError::VersionMismatch {
                    found,
                    expected: MODEL_ARTIFACT_VERSION,
                });
            }
        }
        bincode::deserialize(&bytes).map_err(|source| ArtifactError::Decode {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PriceRecord;

    fn linear_dataset(rows: i64) -> TrainingDataset {
        let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let records = (0..rows)
            .map(|day| PriceRecord {
                volume: Some(1_000.0 + (day % 7) as f64 * 10.0),
                ..PriceRecord::new(base + Duration::days(day), 50.0 + 0.2 * day as f64)
            })
            .collect();
        TrainingDataset::from_records(records).unwrap()
    }

    #[test]
    fn trend_only_model_extrapolates_linear_series() {
        let dataset = linear_dataset(120);
        let model = ForecastModel::fit(&dataset, &ModelConfig::trend_only()).unwrap();
        let forecast = model.forecast(5).unwrap();

        assert_eq!(forecast.len(), 5);
        assert_eq!(
            forecast[0].date,
            dataset.last_date().unwrap() + Duration::days(1)
        );
        for (offset, point) in forecast.iter().enumerate() {
            let expected = 50.0 + 0.2 * (120 + offset) as f64;
            assert!(
                (point.value - expected).abs() / expected < 0.01,
                "{} vs {}",
                point.value,
                expected
            );
        }
    }

    #[test]
    fn default_model_fits_with_regressors_and_events() {
        let dataset = linear_dataset(200).with_event_peaks(&Default::default());
        for mode in [SeasonalityMode::Additive, SeasonalityMode::Multiplicative] {
            let config = ModelConfig {
                seasonality_mode: mode,
                ..ModelConfig::default()
            };
            let model = ForecastModel::fit(&dataset, &config).unwrap();
            let fitted = model.predict_dataset(&dataset).unwrap();
            let mape = crate::metrics::mape(dataset.targets(), &fitted);
            assert!(mape < 2.0, "{:?} in-sample MAPE {}", mode, mape);
            assert_eq!(model.regressors().len(), 3);
        }
    }

    #[test]
    fn missing_regressor_column_is_reported() {
        let dataset = linear_dataset(40);
        let err = ForecastModel::fit(&dataset, &ModelConfig::default()).unwrap_err();
        assert!(matches!(err, ForecastError::MissingRegressor(ref name) if name == "event_peak"));
    }

    #[test]
    fn rejects_tiny_history_and_empty_horizon() {
        let dataset = linear_dataset(2);
        assert!(matches!(
            ForecastModel::fit(&dataset, &ModelConfig::trend_only()),
            Err(ForecastError::InsufficientData { actual: 2, .. })
        ));

        let model = ForecastModel::fit(&linear_dataset(10), &ModelConfig::trend_only()).unwrap();
        assert!(matches!(model.forecast(0), Err(ForecastError::EmptyHorizon)));
    }

    #[test]
    fn artifact_round_trip_preserves_forecast() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("model.bin");
        let model = ForecastModel::fit(&linear_dataset(60), &ModelConfig::trend_only()).unwrap();
        let artifact = ModelArtifact::new(Some("PG".to_string()), model.clone());
        artifact.save(&path).unwrap();

        let loaded = ModelArtifact::load(&path).unwrap();
        assert_eq!(loaded.version, MODEL_ARTIFACT_VERSION);
        assert_eq!(loaded.symbol.as_deref(), Some("PG"));
        assert_eq!(loaded.model.forecast(3).unwrap(), model.forecast(3).unwrap());
    }

    #[test]
    fn corrupt_or_missing_artifact_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.bin");
        assert!(matches!(
            ModelArtifact::load(&missing),
            Err(ArtifactError::NotFound(_))
        ));

        let corrupt = dir.path().join("corrupt.bin");
        fs::write(&corrupt, [1u8, 0, 0, 0, 0xff, 0xff]).unwrap();
        assert!(matches!(
            ModelArtifact::load(&corrupt),
            Err(ArtifactError::Decode { .. })
        ));

        let future = dir.path().join("future.bin");
        fs::write(&future, [9u8, 0, 0, 0]).unwrap();
        assert!(matches!(
            ModelArtifact::load(&future),
            Err(ArtifactError::VersionMismatch { found: 9, .. })
        ));
    }
}
