use crate::config::{ModelConfig, SeasonalitySpec};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

pub const YEARLY_PERIOD_DAYS: f64 = 365.25;
pub const WEEKLY_PERIOD_DAYS: f64 = 7.0;
const YEARLY_FOURIER_ORDER: usize = 10;
const WEEKLY_FOURIER_ORDER: usize = 3;

/// A periodic component expanded into sine/cosine pairs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FourierSeasonality {
    pub name: String,
    pub period_days: f64,
    pub fourier_order: usize,
}

impl FourierSeasonality {
    pub fn width(&self) -> usize {
        2 * self.fourier_order
    }

    pub fn push_features(&self, row: &mut Vec<f64>, date: NaiveDate) {
        let days = days_since_epoch(date);
        for k in 1..=self.fourier_order {
            let angle = 2.0 * PI * k as f64 * days / self.period_days;
            row.push(angle.sin());
            row.push(angle.cos());
        }
    }
}

impl From<&SeasonalitySpec> for FourierSeasonality {
    fn from(spec: &SeasonalitySpec) -> Self {
        Self {
            name: spec.name.clone(),
            period_days: spec.period_days,
            fourier_order: spec.fourier_order,
        }
    }
}

/// Built-in yearly and weekly terms (when enabled) followed by the custom ones.
pub fn seasonalities_for(config: &ModelConfig) -> Vec<FourierSeasonality> {
    let mut components = Vec::new();
    if config.yearly_seasonality {
        components.push(FourierSeasonality {
            name: "yearly".to_string(),
            period_days: YEARLY_PERIOD_DAYS,
            fourier_order: YEARLY_FOURIER_ORDER,
        });
    }
    if config.weekly_seasonality {
        components.push(FourierSeasonality {
            name: "weekly".to_string(),
            period_days: WEEKLY_PERIOD_DAYS,
            fourier_order: WEEKLY_FOURIER_ORDER,
        });
    }
    components.extend(config.seasonalities.iter().map(FourierSeasonality::from));
    components
}

fn days_since_epoch(date: NaiveDate) -> f64 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
    (date - epoch).num_days() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weekly_terms_repeat_every_seven_days() {
        let weekly = FourierSeasonality {
            name: "weekly".to_string(),
            period_days: WEEKLY_PERIOD_DAYS,
            fourier_order: 3,
        };
        let monday = NaiveDate::from_ymd_opt(2025, 6, 16).unwrap();
        let next_monday = NaiveDate::from_ymd_opt(2025, 6, 23).unwrap();

        let mut first = Vec::new();
        let mut second = Vec::new();
        weekly.push_features(&mut first, monday);
        weekly.push_features(&mut second, next_monday);

        assert_eq!(first.len(), weekly.width());
        for (a, b) in first.iter().zip(second.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn trend_only_config_has_no_seasonalities() {
        assert!(seasonalities_for(&ModelConfig::trend_only()).is_empty());
        let names: Vec<String> = seasonalities_for(&ModelConfig::default())
            .into_iter()
            .map(|component| component.name)
            .collect();
        assert_eq!(names, vec!["yearly", "weekly", "quarterly", "monthly"]);
    }
}
