use serde::{Deserialize, Serialize};

/// Piecewise-linear growth on the scaled time axis, with slope changes at fixed changepoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PiecewiseLinearTrend {
    pub changepoints: Vec<f64>,
    pub intercept: f64,
    pub slope: f64,
    pub deltas: Vec<f64>,
}

impl PiecewiseLinearTrend {
    /// Number of design columns: intercept, slope and one hinge per changepoint.
    pub fn width(changepoints: &[f64]) -> usize {
        2 + changepoints.len()
    }

    pub fn from_coefficients(changepoints: Vec<f64>, coefficients: &[f64]) -> Self {
        Self {
            intercept: coefficients[0],
            slope: coefficients[1],
            deltas: coefficients[2..2 + changepoints.len()].to_vec(),
            changepoints,
        }
    }

    pub fn value(&self, t: f64) -> f64 {
        let hinges: f64 = self
            .changepoints
            .iter()
            .zip(self.deltas.iter())
            .map(|(cp, delta)| delta * (t - cp).max(0.0))
            .sum();
        self.intercept + self.slope * t + hinges
    }
}

/// Spreads changepoints evenly over the first `range` share of the history.
pub fn place_changepoints(t: &[f64], n_changepoints: usize, range: f64) -> Vec<f64> {
    let hist_size = (t.len() as f64 * range).floor() as usize;
    if hist_size < 2 || n_changepoints == 0 {
        return Vec::new();
    }
    let count = n_changepoints.min(hist_size - 1);
    let last = (hist_size - 1) as f64;
    let mut points: Vec<f64> = (1..=count)
        .map(|step| {
            let idx = (last * step as f64 / count as f64).round() as usize;
            t[idx]
        })
        .collect();
    points.dedup();
    points
}

pub fn push_features(row: &mut Vec<f64>, t: f64, changepoints: &[f64]) {
    row.push(1.0);
    row.push(t);
    row.extend(changepoints.iter().map(|cp| (t - cp).max(0.0)));
}
