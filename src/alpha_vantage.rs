use crate::models::PriceRecord;
use chrono::{Months, NaiveDate};
use log::{info, warn};
use reqwest::{Client, StatusCode};
use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

const DAILY_SERIES_KEY: &str = "Time Series (Daily)";
const ERROR_MESSAGE_KEY: &str = "Error Message";
const NOTE_KEY: &str = "Note";
const INFORMATION_KEY: &str = "Information";

#[derive(Debug, thiserror::Error)]
pub enum MarketDataError {
    #[error("ALPHAVANTAGE_API_KEY is not set")]
    MissingApiKey,

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("market data API returned HTTP {0}")]
    Status(StatusCode),

    #[error("market data API rejected the request: {0}")]
    ApiError(String),

    #[error("market data API refused the call (rate limit or key problem): {0}")]
    RateLimited(String),

    #[error("no daily prices returned for {0}")]
    EmptySeries(String),

    #[error("failed to decode market data response: {0}")]
    Decode(String),
}

pub struct AlphaVantageClient<'a> {
    http: &'a Client,
    base_url: String,
    api_key: String,
}

impl<'a> AlphaVantageClient<'a> {
    pub fn new(
        http: &'a Client,
        base_url: &str,
        api_key: Option<&str>,
    ) -> Result<Self, MarketDataError> {
        let api_key = api_key
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(MarketDataError::MissingApiKey)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Daily bars for `symbol`, oldest first, restricted to the last `years` years of the series.
    pub async fn fetch_daily_history(
        &self,
        symbol: &str,
        years: u32,
    ) -> Result<Vec<PriceRecord>, MarketDataError> {
        let symbol = symbol.trim().to_uppercase();
        let url = format!("{}/query", self.base_url);
        info!("Requesting daily prices for {} from {}", symbol, url);

        let response = self
            .http
            .get(&url)
            .query(&[
                ("function", "TIME_SERIES_DAILY"),
                ("symbol", symbol.as_str()),
                ("outputsize", "full"),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|source| MarketDataError::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(MarketDataError::Status(status));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|err| MarketDataError::Decode(err.to_string()))?;
        let records = parse_daily_series(&symbol, payload)?;
        let records = restrict_to_years(records, years);
        if records.is_empty() {
            return Err(MarketDataError::EmptySeries(symbol));
        }
        info!(
            "Received {} daily prices for {} ({} to {})",
            records.len(),
            symbol,
            records[0].date,
            records[records.len() - 1].date
        );
        Ok(records)
    }
}

#[derive(Debug, Deserialize)]
struct DailyBar {
    #[serde(rename = "1. open", default, deserialize_with = "deserialize_f64_opt")]
    open: Option<f64>,
    #[serde(rename = "2. high", default, deserialize_with = "deserialize_f64_opt")]
    high: Option<f64>,
    #[serde(rename = "3. low", default, deserialize_with = "deserialize_f64_opt")]
    low: Option<f64>,
    #[serde(rename = "4. close", default, deserialize_with = "deserialize_f64_opt")]
    close: Option<f64>,
    #[serde(rename = "5. volume", default, deserialize_with = "deserialize_f64_opt")]
    volume: Option<f64>,
}

/// Turns a `TIME_SERIES_DAILY` payload into ascending price records tagged with the symbol.
pub fn parse_daily_series(symbol: &str, mut payload: Value) -> Result<Vec<PriceRecord>, MarketDataError> {
    if let Some(message) = payload.get(ERROR_MESSAGE_KEY) {
        return Err(MarketDataError::ApiError(message_text(message)));
    }
    for key in [NOTE_KEY, INFORMATION_KEY] {
        if let Some(message) = payload.get(key) {
            return Err(MarketDataError::RateLimited(message_text(message)));
        }
    }

    let Some(series) = payload.get_mut(DAILY_SERIES_KEY).map(Value::take) else {
        return Err(MarketDataError::EmptySeries(symbol.to_string()));
    };
    let bars: BTreeMap<String, DailyBar> = serde_json::from_value(series)
        .map_err(|err| MarketDataError::Decode(err.to_string()))?;

    let mut records = Vec::with_capacity(bars.len());
    for (raw_date, bar) in bars {
        let date = NaiveDate::parse_from_str(raw_date.trim(), "%Y-%m-%d")
            .map_err(|_| MarketDataError::Decode(format!("invalid date {}", raw_date)))?;
        let Some(close) = bar.close.filter(|value| value.is_finite()) else {
            warn!("Skipping {} for {}: no close price", raw_date, symbol);
            continue;
        };
        records.push(PriceRecord {
            date,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close,
            volume: bar.volume,
            symbol: Some(symbol.to_string()),
            bias_adjust: Some(1.0),
        });
    }
    records.sort_by_key(|record| record.date);

    if records.is_empty() {
        return Err(MarketDataError::EmptySeries(symbol.to_string()));
    }
    Ok(records)
}

/// Keeps records strictly newer than `years` before the most recent date.
pub fn restrict_to_years(records: Vec<PriceRecord>, years: u32) -> Vec<PriceRecord> {
    let Some(latest) = records.iter().map(|record| record.date).max() else {
        return records;
    };
    let Some(cutoff) = latest.checked_sub_months(Months::new(years.saturating_mul(12))) else {
        return records;
    };
    records
        .into_iter()
        .filter(|record| record.date > cutoff)
        .collect()
}

fn message_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn deserialize_f64_opt<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    struct F64OptVisitor;

    impl<'de> Visitor<'de> for F64OptVisitor {
        type Value = Option<f64>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a number or numeric string")
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(value as f64))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(value as f64))
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value.trim().parse::<f64>().ok())
        }
    }

    deserializer.deserialize_any(F64OptVisitor)
}
