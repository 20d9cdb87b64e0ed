use crate::events::{default_events, SpecialEvent};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub const DEFAULT_API_BASE_URL: &str = "https://www.alphavantage.co";
pub const DEFAULT_SYMBOL: &str = "PG";
pub const DEFAULT_HISTORY_YEARS: u32 = 2;
pub const DEFAULT_DATA_PATH: &str = "data/stock_data.csv";
pub const DEFAULT_MODEL_PATH: &str = "model/forecast_model.bin";
pub const DEFAULT_METRICS_PATH: &str = "model/metrics.json";
pub const DEFAULT_EVALUATION_PATH: &str = "model/evaluation.json";
pub const DEFAULT_PLOT_DIR: &str = "model";
pub const DEFAULT_TRAINING_LOG_PATH: &str = "model_training.log";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_MAX_FORECAST_DAYS: u32 = 30;

const ENV_KEYS: [&str; 15] = [
    "ALPHAVANTAGE_API_KEY",
    "ALPHAVANTAGE_BASE_URL",
    "STOCK_SYMBOL",
    "HISTORY_YEARS",
    "DATA_PATH",
    "MODEL_PATH",
    "METRICS_PATH",
    "EVALUATION_PATH",
    "PLOT_DIR",
    "TRAINING_LOG_PATH",
    "TRAINING_CONFIG",
    "HOST",
    "PORT",
    "RELOAD",
    "FORECAST_MAX_DAYS",
];

/// Process-wide settings resolved once from the environment.
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub api_key: Option<String>,
    pub api_base_url: String,
    pub symbol: String,
    pub history_years: u32,
    pub data_path: PathBuf,
    pub model_path: PathBuf,
    pub metrics_path: PathBuf,
    pub evaluation_path: PathBuf,
    pub plot_dir: PathBuf,
    pub training_log_path: PathBuf,
    pub training_config_path: Option<PathBuf>,
    pub server: ServerSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub reload: bool,
    pub max_forecast_days: u32,
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| anyhow!("Invalid HOST:PORT configuration ({}:{})", self.host, self.port))
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            reload: false,
            max_forecast_days: DEFAULT_MAX_FORECAST_DAYS,
        }
    }
}

impl AppSettings {
    pub fn from_env() -> Result<Self> {
        let settings: HashMap<String, String> = ENV_KEYS
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|value| (key.to_string(), value)))
            .collect();
        Self::from_settings_map(&settings)
    }

    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let history_years = optional_setting_u32(settings, "HISTORY_YEARS", 1)?
            .unwrap_or(DEFAULT_HISTORY_YEARS);
        let port = match optional_setting_u32(settings, "PORT", 1)? {
            Some(value) if value > u16::MAX as u32 => {
                return Err(anyhow!("Setting PORT must be <= {} (value: {})", u16::MAX, value))
            }
            Some(value) => value as u16,
            None => DEFAULT_PORT,
        };
        let max_forecast_days = optional_setting_u32(settings, "FORECAST_MAX_DAYS", 1)?
            .unwrap_or(DEFAULT_MAX_FORECAST_DAYS);

        Ok(Self {
            api_key: optional_setting(settings, "ALPHAVANTAGE_API_KEY").map(str::to_string),
            api_base_url: optional_setting(settings, "ALPHAVANTAGE_BASE_URL")
                .unwrap_or(DEFAULT_API_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            symbol: optional_setting(settings, "STOCK_SYMBOL")
                .unwrap_or(DEFAULT_SYMBOL)
                .to_uppercase(),
            history_years,
            data_path: setting_path(settings, "DATA_PATH", DEFAULT_DATA_PATH),
            model_path: setting_path(settings, "MODEL_PATH", DEFAULT_MODEL_PATH),
            metrics_path: setting_path(settings, "METRICS_PATH", DEFAULT_METRICS_PATH),
            evaluation_path: setting_path(settings, "EVALUATION_PATH", DEFAULT_EVALUATION_PATH),
            plot_dir: setting_path(settings, "PLOT_DIR", DEFAULT_PLOT_DIR),
            training_log_path: setting_path(
                settings,
                "TRAINING_LOG_PATH",
                DEFAULT_TRAINING_LOG_PATH,
            ),
            training_config_path: optional_setting(settings, "TRAINING_CONFIG").map(PathBuf::from),
            server: ServerSettings {
                host: optional_setting(settings, "HOST")
                    .unwrap_or(DEFAULT_HOST)
                    .to_string(),
                port,
                reload: optional_setting_bool(settings, "RELOAD")?.unwrap_or(false),
                max_forecast_days,
            },
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SeasonalityMode {
    Additive,
    Multiplicative,
}

impl SeasonalityMode {
    pub fn label(self) -> &'static str {
        match self {
            Self::Additive => "additive",
            Self::Multiplicative => "multiplicative",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeasonalitySpec {
    pub name: String,
    pub period_days: f64,
    pub fourier_order: usize,
}

/// How a regressor is filled in for dates after the training history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FutureValue {
    Constant(f64),
    /// Mean of the last N observed values.
    TrailingMean(usize),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegressorSpec {
    pub name: String,
    #[serde(default = "default_regressor_prior_scale")]
    pub prior_scale: f64,
    pub future: FutureValue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub changepoint_prior_scale: f64,
    pub seasonality_prior_scale: f64,
    pub holidays_prior_scale: f64,
    pub seasonality_mode: SeasonalityMode,
    pub n_changepoints: usize,
    pub changepoint_range: f64,
    pub yearly_seasonality: bool,
    pub weekly_seasonality: bool,
    pub seasonalities: Vec<SeasonalitySpec>,
    pub regressors: Vec<RegressorSpec>,
    pub special_events: Vec<SpecialEvent>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            changepoint_prior_scale: 0.05,
            seasonality_prior_scale: 10.0,
            holidays_prior_scale: 0.3,
            seasonality_mode: SeasonalityMode::Multiplicative,
            n_changepoints: 25,
            changepoint_range: 0.8,
            yearly_seasonality: true,
            weekly_seasonality: true,
            seasonalities: vec![
                SeasonalitySpec {
                    name: "quarterly".to_string(),
                    period_days: 91.25,
                    fourier_order: 5,
                },
                SeasonalitySpec {
                    name: "monthly".to_string(),
                    period_days: 30.5,
                    fourier_order: 5,
                },
            ],
            regressors: vec![
                RegressorSpec {
                    name: "bias_adjust".to_string(),
                    prior_scale: 0.5,
                    future: FutureValue::Constant(1.0),
                },
                RegressorSpec {
                    name: "volume".to_string(),
                    prior_scale: 0.5,
                    future: FutureValue::TrailingMean(5),
                },
                RegressorSpec {
                    name: "event_peak".to_string(),
                    prior_scale: 0.5,
                    future: FutureValue::Constant(0.0),
                },
            ],
            special_events: default_events(),
        }
    }
}

impl ModelConfig {
    /// Piecewise-linear trend only: no seasonalities, regressors or events.
    pub fn trend_only() -> Self {
        Self {
            yearly_seasonality: false,
            weekly_seasonality: false,
            seasonalities: Vec::new(),
            regressors: Vec::new(),
            special_events: Vec::new(),
            seasonality_mode: SeasonalityMode::Additive,
            ..Self::default()
        }
    }

    pub fn with_grid_point(&self, point: &GridPoint) -> Self {
        Self {
            changepoint_prior_scale: point.changepoint_prior_scale,
            seasonality_prior_scale: point.seasonality_prior_scale,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        require_positive("changepoint_prior_scale", self.changepoint_prior_scale)?;
        require_positive("seasonality_prior_scale", self.seasonality_prior_scale)?;
        require_positive("holidays_prior_scale", self.holidays_prior_scale)?;
        if !(self.changepoint_range > 0.0 && self.changepoint_range <= 1.0) {
            return Err(anyhow!(
                "changepoint_range must be in (0, 1] (value: {})",
                self.changepoint_range
            ));
        }

        let mut names = HashSet::new();
        for seasonality in &self.seasonalities {
            require_positive(
                &format!("seasonality {} period_days", seasonality.name),
                seasonality.period_days,
            )?;
            if seasonality.fourier_order == 0 {
                return Err(anyhow!(
                    "seasonality {} fourier_order must be >= 1",
                    seasonality.name
                ));
            }
            if !names.insert(seasonality.name.as_str()) {
                return Err(anyhow!("Duplicate seasonality name {}", seasonality.name));
            }
        }

        let mut regressor_names = HashSet::new();
        for regressor in &self.regressors {
            require_positive(
                &format!("regressor {} prior_scale", regressor.name),
                regressor.prior_scale,
            )?;
            if let FutureValue::TrailingMean(0) = regressor.future {
                return Err(anyhow!(
                    "regressor {} trailing_mean window must be >= 1",
                    regressor.name
                ));
            }
            if !regressor_names.insert(regressor.name.as_str()) {
                return Err(anyhow!("Duplicate regressor name {}", regressor.name));
            }
        }

        for event in &self.special_events {
            if event.lower_window > 0 || event.upper_window < 0 {
                return Err(anyhow!(
                    "special event {} needs lower_window <= 0 <= upper_window (got {}..{})",
                    event.name,
                    event.lower_window,
                    event.upper_window
                ));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GridPoint {
    pub changepoint_prior_scale: f64,
    pub seasonality_prior_scale: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EventPeakConfig {
    /// Absolute day-over-day close change that marks a peak.
    pub pct_change_threshold: f64,
    /// Volume quantile above which a day is marked as a peak.
    pub volume_quantile: f64,
}

impl Default for EventPeakConfig {
    fn default() -> Self {
        Self {
            pct_change_threshold: 0.03,
            volume_quantile: 0.99,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainingConfig {
    pub model: ModelConfig,
    pub grid: Vec<GridPoint>,
    pub validation_days: usize,
    pub test_days: usize,
    pub event_peak: EventPeakConfig,
    pub plot_tail_days: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            grid: vec![
                GridPoint {
                    changepoint_prior_scale: 0.03,
                    seasonality_prior_scale: 0.1,
                },
                GridPoint {
                    changepoint_prior_scale: 0.05,
                    seasonality_prior_scale: 0.1,
                },
                GridPoint {
                    changepoint_prior_scale: 0.1,
                    seasonality_prior_scale: 0.2,
                },
                GridPoint {
                    changepoint_prior_scale: 0.3,
                    seasonality_prior_scale: 0.2,
                },
            ],
            validation_days: 60,
            test_days: 30,
            event_peak: EventPeakConfig::default(),
            plot_tail_days: 30,
        }
    }
}

impl TrainingConfig {
    /// Reads a JSON override file when given; any omitted field keeps its default.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = fs::read_to_string(path).with_context(|| {
                    format!("Failed to read training config {}", path.display())
                })?;
                serde_json::from_str::<Self>(&raw).with_context(|| {
                    format!("Invalid training config {}", path.display())
                })?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        for point in &self.grid {
            require_positive("grid changepoint_prior_scale", point.changepoint_prior_scale)?;
            require_positive("grid seasonality_prior_scale", point.seasonality_prior_scale)?;
        }
        if self.validation_days == 0 {
            return Err(anyhow!("validation_days must be >= 1"));
        }
        if self.test_days == 0 {
            return Err(anyhow!("test_days must be >= 1"));
        }
        let quantile = self.event_peak.volume_quantile;
        if !(0.0..=1.0).contains(&quantile) {
            return Err(anyhow!(
                "event_peak volume_quantile must be in [0, 1] (value: {})",
                quantile
            ));
        }
        require_positive(
            "event_peak pct_change_threshold",
            self.event_peak.pct_change_threshold,
        )?;
        Ok(())
    }
}

fn default_regressor_prior_scale() -> f64 {
    10.0
}

fn require_positive(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(anyhow!("{} must be a positive number (value: {})", name, value));
    }
    Ok(())
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn setting_path(settings: &HashMap<String, String>, key: &str, default: &str) -> PathBuf {
    PathBuf::from(optional_setting(settings, key).unwrap_or(default))
}

fn optional_setting_u32(
    settings: &HashMap<String, String>,
    key: &str,
    min: u32,
) -> Result<Option<u32>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    let value = raw
        .parse::<u32>()
        .map_err(|_| anyhow!("Setting {} must be a non-negative integer (value: {})", key, raw))?;
    if value < min {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(Some(value))
}

fn optional_setting_bool(settings: &HashMap<String, String>, key: &str) -> Result<Option<bool>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(anyhow!("Setting {} must be a boolean (value: {})", key, raw)),
    }
}
