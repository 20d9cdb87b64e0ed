use crate::models::AccuracyMetrics;
use anyhow::{anyhow, Result};
use serde::Serialize;
use statrs::statistics::Statistics;

const MAPE_EXCELLENT_BELOW: f64 = 5.0;
const MAPE_GOOD_BELOW: f64 = 10.0;
const R2_EXCELLENT_ABOVE: f64 = 0.5;

/// Mean absolute percentage error in percent. Observations equal to zero are skipped.
pub fn mape(actual: &[f64], predicted: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for (a, p) in actual.iter().zip(predicted.iter()) {
        if a.abs() <= f64::EPSILON {
            continue;
        }
        sum += ((a - p) / a).abs();
        count += 1;
    }
    if count == 0 {
        return f64::NAN;
    }
    sum / count as f64 * 100.0
}

pub fn rmse(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return f64::NAN;
    }
    let sum: f64 = actual
        .iter()
        .zip(predicted.iter())
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    (sum / actual.len() as f64).sqrt()
}

/// Coefficient of determination. A constant series yields 1.0 for a perfect fit and 0.0 otherwise.
pub fn r2(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return f64::NAN;
    }
    let mean = actual.iter().mean();
    let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
    let ss_res: f64 = actual
        .iter()
        .zip(predicted.iter())
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    if ss_tot <= f64::EPSILON {
        return if ss_res <= f64::EPSILON { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

impl AccuracyMetrics {
    pub fn compute(actual: &[f64], predicted: &[f64]) -> Result<Self> {
        if actual.len() != predicted.len() {
            return Err(anyhow!(
                "Cannot score forecast: {} observations vs {} predictions",
                actual.len(),
                predicted.len()
            ));
        }
        if actual.is_empty() {
            return Err(anyhow!("Cannot score forecast on an empty slice"));
        }
        Ok(Self {
            mape: mape(actual, predicted),
            rmse: rmse(actual, predicted),
            r2: r2(actual, predicted),
            observations: actual.len(),
        })
    }

    pub fn rounded(&self) -> Self {
        Self {
            mape: round_to(self.mape, 4),
            rmse: round_to(self.rmse, 4),
            r2: round_to(self.r2, 4),
            observations: self.observations,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricExplanations {
    pub mape: String,
    pub rmse: String,
    pub r2: String,
}

impl MetricExplanations {
    /// Plain-language reading of the metrics for non-technical readers.
    pub fn describe(metrics: &AccuracyMetrics) -> Self {
        Self {
            mape: format!(
                "MAPE shows forecasts are on average {:.2}% away from the actual close; lower is better and below {}% is considered {}.",
                metrics.mape,
                MAPE_EXCELLENT_BELOW,
                mape_quality(metrics.mape)
            ),
            rmse: "RMSE is the typical forecast error in price units; smaller numbers mean forecasts closer to the actual close.".to_string(),
            r2: format!(
                "R² is the share of price variability the model explains; values near 1 are good. The current value ({:.2}) is considered {}.",
                metrics.r2,
                r2_quality(metrics.r2)
            ),
        }
    }
}

pub fn mape_quality(mape: f64) -> &'static str {
    if mape < MAPE_EXCELLENT_BELOW {
        "excellent"
    } else if mape < MAPE_GOOD_BELOW {
        "good"
    } else {
        "poor"
    }
}

pub fn r2_quality(r2: f64) -> &'static str {
    if r2 > R2_EXCELLENT_ABOVE {
        "excellent"
    } else if r2 > 0.0 {
        "acceptable"
    } else {
        "poor"
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
