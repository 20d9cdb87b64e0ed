use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

pub const US_MARKET_EVENT: &str = "us_market";
pub const EARNINGS_EVENT: &str = "earnings";

const US_MARKET_HOLIDAYS: [&str; 29] = [
    "2023-01-01", "2023-01-16", "2023-02-20", "2023-04-07", "2023-05-29", "2023-06-19",
    "2023-07-04", "2023-09-04", "2023-11-11", "2023-11-23", "2023-12-25", "2024-01-01",
    "2024-01-15", "2024-02-19", "2024-04-29", "2024-05-27", "2024-06-19", "2024-07-04",
    "2024-09-02", "2024-11-11", "2024-11-28", "2024-12-25", "2025-01-01", "2025-01-20",
    "2025-02-17", "2025-04-28", "2025-05-26", "2025-06-19", "2025-07-04",
];

const EARNINGS_DATES: [&str; 12] = [
    "2023-01-20", "2023-04-21", "2023-07-28", "2023-10-20", "2024-01-19", "2024-04-19",
    "2024-07-26", "2024-10-18", "2025-01-24", "2025-04-18", "2025-07-25", "2025-10-17",
];

/// A named calendar of dates whose neighbourhood gets its own indicator regressors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpecialEvent {
    pub name: String,
    pub dates: Vec<NaiveDate>,
    /// Days before each date covered by the window (zero or negative).
    #[serde(default)]
    pub lower_window: i32,
    /// Days after each date covered by the window (zero or positive).
    #[serde(default)]
    pub upper_window: i32,
}

impl SpecialEvent {
    pub fn offsets(&self) -> impl Iterator<Item = i32> {
        self.lower_window..=self.upper_window
    }

    /// True when `date` falls exactly `offset` days after one of the event dates.
    pub fn is_active(&self, date: NaiveDate, offset: i32) -> bool {
        let anchor = date - Duration::days(offset as i64);
        self.dates.binary_search(&anchor).is_ok()
    }

    pub fn feature_name(&self, offset: i32) -> String {
        format!("{}_{:+}", self.name, offset)
    }

    /// Sorts and dedups the dates so lookups can binary search.
    pub fn normalized(mut self) -> Self {
        self.dates.sort();
        self.dates.dedup();
        self
    }
}

pub fn default_events() -> Vec<SpecialEvent> {
    vec![
        SpecialEvent {
            name: US_MARKET_EVENT.to_string(),
            dates: parse_dates(&US_MARKET_HOLIDAYS),
            lower_window: -2,
            upper_window: 1,
        },
        SpecialEvent {
            name: EARNINGS_EVENT.to_string(),
            dates: parse_dates(&EARNINGS_DATES),
            lower_window: -3,
            upper_window: 3,
        },
    ]
}

fn parse_dates(raw: &[&str]) -> Vec<NaiveDate> {
    let mut dates: Vec<NaiveDate> = raw
        .iter()
        .filter_map(|value| NaiveDate::parse_from_str(value, "%Y-%m-%d").ok())
        .collect();
    dates.sort();
    dates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_calendars_parse_every_date() {
        let events = default_events();
        assert_eq!(events[0].dates.len(), US_MARKET_HOLIDAYS.len());
        assert_eq!(events[1].dates.len(), EARNINGS_DATES.len());
        assert!(events
            .iter()
            .all(|event| event.dates.windows(2).all(|pair| pair[0] < pair[1])));
    }

    #[test]
    fn window_offsets_activate_neighbouring_days() {
        let event = SpecialEvent {
            name: "launch".to_string(),
            dates: vec![NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()],
            lower_window: -1,
            upper_window: 2,
        };
        let day_before = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let two_after = NaiveDate::from_ymd_opt(2024, 3, 12).unwrap();

        assert_eq!(event.offsets().collect::<Vec<_>>(), vec![-1, 0, 1, 2]);
        assert!(event.is_active(day_before, -1));
        assert!(!event.is_active(day_before, 0));
        assert!(event.is_active(two_after, 2));
        assert_eq!(event.feature_name(-1), "launch_-1");
        assert_eq!(event.feature_name(2), "launch_+2");
    }
}
