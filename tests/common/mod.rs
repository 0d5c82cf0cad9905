#![allow(dead_code)]

use chrono::{Duration, NaiveDate, NaiveDateTime};
use fibcycles::domain::error::FibCyclesError;
use fibcycles::domain::ohlcv::{PriceBar, PriceSeries};
use fibcycles::domain::timeframe::Timeframe;
use fibcycles::ports::data_port::DataPort;
use std::collections::HashMap;
use std::f64::consts::PI;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

pub struct MockDataPort {
    pub data: HashMap<(String, Timeframe), PriceSeries>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_series(mut self, series: PriceSeries) -> Self {
        self.data
            .insert((series.symbol().to_string(), series.timeframe()), series);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_series(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        max_bars: usize,
    ) -> Result<PriceSeries, FibCyclesError> {
        if let Some(reason) = self.errors.get(symbol) {
            return Err(FibCyclesError::DataSource {
                reason: reason.clone(),
            });
        }
        match self.data.get(&(symbol.to_string(), timeframe)) {
            Some(series) => Ok(series.tail(max_bars)),
            None => Err(FibCyclesError::NoData {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
            }),
        }
    }

    fn list_symbols(&self) -> Result<Vec<String>, FibCyclesError> {
        let mut symbols: Vec<String> = self.data.keys().map(|(s, _)| s.clone()).collect();
        symbols.sort();
        symbols.dedup();
        Ok(symbols)
    }
}

pub fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2020, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// Bars with open = close and a symmetric high/low `spread`, one per day.
pub fn series_from_closes(symbol: &str, timeframe: Timeframe, closes: &[f64], spread: f64) -> PriceSeries {
    let bars = closes
        .iter()
        .enumerate()
        .map(|(i, &c)| PriceBar {
            timestamp: start() + Duration::days(i as i64),
            open: c,
            high: c + spread,
            low: c - spread,
            close: c,
            volume: 1000.0,
        })
        .collect();
    PriceSeries::new(symbol, timeframe, bars).unwrap()
}

pub fn sine_closes(n: usize, period: f64, amplitude: f64) -> Vec<f64> {
    (0..n)
        .map(|i| 100.0 + amplitude * (2.0 * PI * i as f64 / period).sin())
        .collect()
}

pub fn sine_series(symbol: &str, timeframe: Timeframe, n: usize, period: f64) -> PriceSeries {
    series_from_closes(symbol, timeframe, &sine_closes(n, period, 10.0), 0.5)
}

pub fn rising_series(n: usize) -> PriceSeries {
    let closes: Vec<f64> = (0..n).map(|i| 100.0 + i as f64).collect();
    series_from_closes("RISE", Timeframe::Daily, &closes, 0.0)
}

/// Price path from bounded steps, floored so it stays positive.
pub fn walk_closes(steps: &[f64]) -> Vec<f64> {
    let mut price = 100.0;
    steps
        .iter()
        .map(|s| {
            price = (price + s).max(10.0);
            price
        })
        .collect()
}

/// Write `series` as `<dir>/<SYMBOL>_<timeframe>.csv`.
pub fn write_csv(dir: &Path, series: &PriceSeries) {
    let mut content = String::from("timestamp,open,high,low,close,volume\n");
    for bar in series.bars() {
        writeln!(
            content,
            "{},{},{},{},{},{}",
            bar.timestamp.format("%Y-%m-%d %H:%M:%S"),
            bar.open,
            bar.high,
            bar.low,
            bar.close,
            bar.volume
        )
        .unwrap();
    }
    let name = format!("{}_{}.csv", series.symbol(), series.timeframe().as_str());
    fs::write(dir.join(name), content).unwrap();
}
