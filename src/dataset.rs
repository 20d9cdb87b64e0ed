use crate::config::EventPeakConfig;
use crate::models::PriceRecord;
use chrono::NaiveDate;
use log::info;
use statrs::statistics::{Data, OrderStatistics};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::ops::Range;
use std::path::{Path, PathBuf};

pub const VOLUME_COLUMN: &str = "volume";
pub const BIAS_ADJUST_COLUMN: &str = "bias_adjust";
pub const EVENT_PEAK_COLUMN: &str = "event_peak";
pub const MIN_TRAIN_ROWS: usize = 30;

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("failed to access price history {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed price history {path}: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("price history is empty")]
    Empty,

    #[error("price history needs at least {required} rows for this split (found {actual})")]
    InsufficientRows { required: usize, actual: usize },

    #[error("column {0} is not available in the price history")]
    MissingColumn(String),

    #[error("close price on {0} is not a finite number")]
    NonFiniteClose(NaiveDate),

    #[error("column {column} has no value on {date}")]
    MissingValue { column: String, date: NaiveDate },
}

/// Reads the CSV written by the collector. Columns other than `date` and `close` are optional.
pub fn read_price_history(path: &Path) -> Result<Vec<PriceRecord>, DatasetError> {
    let file = File::open(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = csv::Reader::from_reader(BufReader::new(file));
    let mut records = Vec::new();
    for (idx, row) in reader.deserialize::<PriceRecord>().enumerate() {
        let record = row.map_err(|err| DatasetError::Malformed {
            path: path.to_path_buf(),
            message: format!("row {}: {}", idx + 1, err),
        })?;
        records.push(record);
    }
    Ok(records)
}

pub fn write_price_history(path: &Path, records: &[PriceRecord]) -> Result<(), DatasetError> {
    let io_error = |source: std::io::Error| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
    }

    let file = File::create(path).map_err(io_error)?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));
    for record in records {
        writer
            .serialize(record)
            .map_err(|err| DatasetError::Malformed {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
    }
    writer.flush().map_err(io_error)?;
    Ok(())
}

/// Chronologically ordered close prices plus the columns usable as regressors.
#[derive(Debug, Clone)]
pub struct TrainingDataset {
    symbol: Option<String>,
    dates: Vec<NaiveDate>,
    close: Vec<f64>,
    columns: BTreeMap<String, Vec<f64>>,
}

pub struct DatasetSplit {
    pub train: TrainingDataset,
    pub validation: TrainingDataset,
    pub test: TrainingDataset,
}

impl TrainingDataset {
    pub fn load_csv(path: &Path) -> Result<Self, DatasetError> {
        let records = read_price_history(path)?;
        let dataset = Self::from_records(records)?;
        info!(
            "Loaded {} price rows from {} ({} to {})",
            dataset.len(),
            path.display(),
            dataset.dates[0],
            dataset.dates[dataset.len() - 1]
        );
        Ok(dataset)
    }

    /// Sorts by date and keeps the last record for any repeated date.
    pub fn from_records(mut records: Vec<PriceRecord>) -> Result<Self, DatasetError> {
        if records.is_empty() {
            return Err(DatasetError::Empty);
        }
        records.sort_by_key(|record| record.date);

        let mut unique: Vec<PriceRecord> = Vec::with_capacity(records.len());
        for record in records {
            if !record.close.is_finite() {
                return Err(DatasetError::NonFiniteClose(record.date));
            }
            match unique.last_mut() {
                Some(last) if last.date == record.date => *last = record,
                _ => unique.push(record),
            }
        }

        let symbol = unique
            .iter()
            .filter_map(|record| record.symbol.as_deref())
            .map(str::trim)
            .find(|symbol| !symbol.is_empty())
            .map(str::to_string);

        let mut columns = BTreeMap::new();
        let optional_columns: [(&str, fn(&PriceRecord) -> Option<f64>); 4] = [
            ("open", |r| r.open),
            ("high", |r| r.high),
            ("low", |r| r.low),
            (VOLUME_COLUMN, |r| r.volume),
        ];
        // A column absent from every row is simply not available; a gap in a present column is an error.
        for (name, extract) in optional_columns {
            if unique.iter().all(|record| extract(record).is_none()) {
                continue;
            }
            let values = unique
                .iter()
                .map(|record| {
                    extract(record)
                        .filter(|value| value.is_finite())
                        .ok_or_else(|| DatasetError::MissingValue {
                            column: name.to_string(),
                            date: record.date,
                        })
                })
                .collect::<Result<Vec<f64>, _>>()?;
            columns.insert(name.to_string(), values);
        }
        columns.insert(
            BIAS_ADJUST_COLUMN.to_string(),
            unique
                .iter()
                .map(|record| record.bias_adjust.unwrap_or(1.0))
                .collect(),
        );

        Ok(Self {
            symbol,
            dates: unique.iter().map(|record| record.date).collect(),
            close: unique.iter().map(|record| record.close).collect(),
            columns,
        })
    }

    /// Flags days whose close moved more than the threshold or whose volume is in the top quantile.
    pub fn with_event_peaks(mut self, config: &EventPeakConfig) -> Self {
        let volume_threshold = self.columns.get(VOLUME_COLUMN).map(|volumes| {
            let mut data = Data::new(volumes.clone());
            data.quantile(config.volume_quantile)
        });

        let peaks: Vec<f64> = (0..self.len())
            .map(|idx| {
                let price_jump = idx > 0 && {
                    let previous = self.close[idx - 1];
                    previous.abs() > f64::EPSILON
                        && ((self.close[idx] - previous) / previous).abs()
                            > config.pct_change_threshold
                };
                let volume_spike = match (volume_threshold, self.columns.get(VOLUME_COLUMN)) {
                    (Some(threshold), Some(volumes)) => volumes[idx] > threshold,
                    _ => false,
                };
                if price_jump || volume_spike {
                    1.0
                } else {
                    0.0
                }
            })
            .collect();

        self.columns.insert(EVENT_PEAK_COLUMN.to_string(), peaks);
        self
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn symbol(&self) -> Option<&str> {
        self.symbol.as_deref()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn targets(&self) -> &[f64] {
        &self.close
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    pub fn column(&self, name: &str) -> Result<&[f64], DatasetError> {
        self.columns
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| DatasetError::MissingColumn(name.to_string()))
    }

    pub fn slice(&self, range: Range<usize>) -> Self {
        Self {
            symbol: self.symbol.clone(),
            dates: self.dates[range.clone()].to_vec(),
            close: self.close[range.clone()].to_vec(),
            columns: self
                .columns
                .iter()
                .map(|(name, values)| (name.clone(), values[range.clone()].to_vec()))
                .collect(),
        }
    }

    /// Everything except the last `rows` observations.
    pub fn without_tail(&self, rows: usize) -> Self {
        self.slice(0..self.len().saturating_sub(rows))
    }

    /// Chronological split: train, then `validation_days` rows, then the last `test_days` rows.
    pub fn split(
        &self,
        validation_days: usize,
        test_days: usize,
    ) -> Result<DatasetSplit, DatasetError> {
        let required = MIN_TRAIN_ROWS + validation_days + test_days;
        if self.len() < required {
            return Err(DatasetError::InsufficientRows {
                required,
                actual: self.len(),
            });
        }
        let test_start = self.len() - test_days;
        let validation_start = test_start - validation_days;
        Ok(DatasetSplit {
            train: self.slice(0..validation_start),
            validation: self.slice(validation_start..test_start),
            test: self.slice(test_start..self.len()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(day: i64, close: f64, volume: Option<f64>) -> PriceRecord {
        let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        PriceRecord {
            volume,
            symbol: Some("PG".to_string()),
            ..PriceRecord::new(base + Duration::days(day), close)
        }
    }

    #[test]
    fn from_records_sorts_and_keeps_last_duplicate() {
        let records = vec![
            record(2, 12.0, Some(100.0)),
            record(0, 10.0, Some(100.0)),
            record(1, 11.0, Some(100.0)),
            record(1, 11.5, Some(100.0)),
        ];
        let dataset = TrainingDataset::from_records(records).unwrap();
        assert_eq!(dataset.len(), 3);
        assert!(dataset.dates().windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(dataset.targets(), &[10.0, 11.5, 12.0]);
        assert_eq!(dataset.symbol(), Some("PG"));
        assert_eq!(dataset.column(BIAS_ADJUST_COLUMN).unwrap(), &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn absent_optional_columns_are_unavailable() {
        let records = vec![record(0, 10.0, None), record(1, 11.0, None)];
        let dataset = TrainingDataset::from_records(records).unwrap();
        assert!(matches!(
            dataset.column(VOLUME_COLUMN),
            Err(DatasetError::MissingColumn(_))
        ));
        assert!(dataset.column("open").is_err());
    }

    #[test]
    fn gap_in_a_present_column_names_the_row() {
        let records = vec![
            record(0, 10.0, Some(5.0)),
            record(1, 11.0, None),
            record(2, 12.0, Some(7.0)),
        ];
        let err = TrainingDataset::from_records(records).unwrap_err();
        let expected_date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert!(matches!(
            &err,
            DatasetError::MissingValue { column, date }
                if column == VOLUME_COLUMN && *date == expected_date
        ));
        assert!(err.to_string().contains("2024-01-02"));
    }

    #[test]
    fn empty_or_non_finite_input_is_rejected() {
        assert!(matches!(
            TrainingDataset::from_records(Vec::new()),
            Err(DatasetError::Empty)
        ));
        assert!(matches!(
            TrainingDataset::from_records(vec![record(0, f64::NAN, None)]),
            Err(DatasetError::NonFiniteClose(_))
        ));
    }

    #[test]
    fn event_peaks_flag_price_jumps_and_volume_spikes() {
        let mut records: Vec<PriceRecord> = (0..100)
            .map(|day| record(day, 100.0, Some(1_000.0)))
            .collect();
        records[10].close = 110.0; // +10% jump, then -9% back on day 11
        records[50].volume = Some(1_000_000.0);
        let dataset = TrainingDataset::from_records(records)
            .unwrap()
            .with_event_peaks(&EventPeakConfig::default());
        let peaks = dataset.column(EVENT_PEAK_COLUMN).unwrap();

        assert_eq!(peaks[0], 0.0);
        assert_eq!(peaks[10], 1.0);
        assert_eq!(peaks[11], 1.0);
        assert_eq!(peaks[50], 1.0);
        assert_eq!(peaks.iter().sum::<f64>(), 3.0);
    }

    #[test]
    fn split_is_chronological_and_sized() {
        let records: Vec<PriceRecord> = (0..120).map(|day| record(day, 50.0, None)).collect();
        let dataset = TrainingDataset::from_records(records).unwrap();
        let split = dataset.split(20, 10).unwrap();

        assert_eq!(split.train.len(), 90);
        assert_eq!(split.validation.len(), 20);
        assert_eq!(split.test.len(), 10);
        assert!(split.train.last_date() < split.validation.first_date());
        assert!(split.validation.last_date() < split.test.first_date());
        assert_eq!(split.test.last_date(), dataset.last_date());

        assert!(matches!(
            dataset.split(60, 40),
            Err(DatasetError::InsufficientRows { required: 130, actual: 120 })
        ));
    }

    #[test]
    fn csv_round_trip_preserves_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("prices.csv");
        let records = vec![record(0, 10.25, Some(1_500.0)), record(1, 10.5, None)];
        write_price_history(&path, &records).unwrap();
        let loaded = read_price_history(&path).unwrap();
        assert_eq!(loaded, records);
    }

    #[test]
    fn csv_without_close_column_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prices.csv");
        fs::write(&path, "date,open\n2024-01-01,10.0\n").unwrap();
        assert!(matches!(
            read_price_history(&path),
            Err(DatasetError::Malformed { .. })
        ));
    }
}
