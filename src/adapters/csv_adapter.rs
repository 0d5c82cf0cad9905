//! CSV file data adapter.
//!
//! One file per symbol and timeframe: `<dir>/<SYMBOL>_<timeframe>.csv` with a
//! `timestamp,open,high,low,close,volume` header.

use crate::domain::error::FibCyclesError;
use crate::domain::ohlcv::{PriceBar, PriceSeries};
use crate::domain::timeframe::Timeframe;
use crate::ports::data_port::DataPort;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        self.base_path
            .join(format!("{}_{}.csv", symbol, timeframe.as_str()))
    }
}

fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, FibCyclesError> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(|d| d.and_time(chrono::NaiveTime::MIN))
        })
        .map_err(|e| FibCyclesError::DataSource {
            reason: format!("invalid timestamp '{raw}': {e}"),
        })
}

fn field(record: &csv::StringRecord, index: usize, name: &str) -> Result<f64, FibCyclesError> {
    record
        .get(index)
        .ok_or_else(|| FibCyclesError::DataSource {
            reason: format!("missing {name} column"),
        })?
        .trim()
        .parse()
        .map_err(|e| FibCyclesError::DataSource {
            reason: format!("invalid {name} value: {e}"),
        })
}

impl DataPort for CsvAdapter {
    fn fetch_series(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        max_bars: usize,
    ) -> Result<PriceSeries, FibCyclesError> {
        let path = self.csv_path(symbol, timeframe);
        if !path.exists() {
            return Err(FibCyclesError::NoData {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
            });
        }
        let content = fs::read_to_string(&path).map_err(|e| FibCyclesError::DataSource {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut bars = Vec::new();

        for result in rdr.records() {
            let record = result.map_err(|e| FibCyclesError::DataSource {
                reason: format!("CSV parse error in {}: {}", path.display(), e),
            })?;
            let timestamp = parse_timestamp(record.get(0).ok_or_else(|| {
                FibCyclesError::DataSource {
                    reason: "missing timestamp column".into(),
                }
            })?)?;

            bars.push(PriceBar {
                timestamp,
                open: field(&record, 1, "open")?,
                high: field(&record, 2, "high")?,
                low: field(&record, 3, "low")?,
                close: field(&record, 4, "close")?,
                volume: field(&record, 5, "volume")?,
            });
        }

        if bars.is_empty() {
            return Err(FibCyclesError::NoData {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
            });
        }

        bars.sort_by_key(|b| b.timestamp);
        bars.dedup_by_key(|b| b.timestamp);
        if bars.len() > max_bars {
            bars.drain(..bars.len() - max_bars);
        }
        log::debug!("{symbol} {timeframe}: loaded {} bars", bars.len());
        PriceSeries::new(symbol, timeframe, bars)
    }

    fn list_symbols(&self) -> Result<Vec<String>, FibCyclesError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| FibCyclesError::DataSource {
            reason: format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ),
        })?;

        let mut symbols = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| FibCyclesError::DataSource {
                reason: format!("directory entry error: {}", e),
            })?;
            let name = entry.file_name();
            let Some(stem) = name.to_string_lossy().strip_suffix(".csv").map(str::to_string)
            else {
                continue;
            };
            if let Some((symbol, tf)) = stem.rsplit_once('_') {
                if tf.parse::<Timeframe>().is_ok() && !symbol.is_empty() {
                    symbols.insert(symbol.to_string());
                }
            }
        }

        Ok(symbols.into_iter().collect())
    }
}
