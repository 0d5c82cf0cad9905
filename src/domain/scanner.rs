//! Batch and multi-timeframe scanning.
//!
//! Every symbol is an isolated unit of work: a data error, an analysis error
//! or a panic inside one symbol becomes that symbol's `Err` and the rest of
//! the batch carries on.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread;
use std::time::Duration;

use rayon::prelude::*;

use super::alignment::{Alignment, align_timeframes};
use super::analysis::{AnalysisParams, SymbolAnalysis, analyze_series};
use super::classifier::SharedQualityClassifier;
use super::error::FibCyclesError;
use super::timeframe::{Timeframe, TimeframeWeights};
use crate::ports::data_port::DataPort;

#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    pub workers: usize,
    pub batch_size: usize,
    /// Pause between batches, for rate-limited data sources.
    pub batch_delay: Duration,
    pub max_bars: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            workers: 5,
            batch_size: 10,
            batch_delay: Duration::from_millis(2000),
            max_bars: 5000,
        }
    }
}

#[derive(Debug)]
pub struct ScanOutcome {
    pub symbol: String,
    pub result: Result<SymbolAnalysis, FibCyclesError>,
    /// Quality score when a classifier was supplied and the analysis
    /// succeeded.
    pub quality: Option<f64>,
}

fn analyze_symbol(
    port: &dyn DataPort,
    symbol: &str,
    timeframe: Timeframe,
    params: &AnalysisParams,
    max_bars: usize,
) -> Result<SymbolAnalysis, FibCyclesError> {
    let attempt = catch_unwind(AssertUnwindSafe(|| {
        let series = port.fetch_series(symbol, timeframe, max_bars)?;
        analyze_series(&series, params)
    }));
    attempt.unwrap_or_else(|panic| {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "analysis panicked".to_string());
        Err(FibCyclesError::DataSource {
            reason: format!("{symbol}: {reason}"),
        })
    })
}

/// Analyse `symbols` at one timeframe on a pool of `config.workers` threads.
///
/// Successful analyses come first, strongest |signal| first; failures
/// follow in input order.
pub fn scan_batch(
    port: &dyn DataPort,
    symbols: &[String],
    timeframe: Timeframe,
    params: &AnalysisParams,
    config: &ScanConfig,
    classifier: Option<&SharedQualityClassifier>,
) -> Result<Vec<ScanOutcome>, FibCyclesError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers.max(1))
        .build()
        .map_err(|e| FibCyclesError::invalid_config("scan.workers", e.to_string()))?;

    let batch_size = config.batch_size.max(1);
    let batches = symbols.len().div_ceil(batch_size);
    let mut outcomes = Vec::with_capacity(symbols.len());

    for (n, chunk) in symbols.chunks(batch_size).enumerate() {
        if n > 0 && !config.batch_delay.is_zero() {
            thread::sleep(config.batch_delay);
        }
        log::info!(
            "scanning batch {}/{} ({} symbols, {timeframe})",
            n + 1,
            batches,
            chunk.len()
        );
        let batch: Vec<ScanOutcome> = pool.install(|| {
            chunk
                .par_iter()
                .map(|symbol| {
                    let result = analyze_symbol(port, symbol, timeframe, params, config.max_bars);
                    if let Err(e) = &result {
                        log::warn!("{symbol} {timeframe}: {e}");
                    }
                    let quality = match (&result, classifier) {
                        (Ok(analysis), Some(c)) => Some(c.score(&analysis.signal.features())),
                        _ => None,
                    };
                    ScanOutcome {
                        symbol: symbol.clone(),
                        result,
                        quality,
                    }
                })
                .collect()
        });
        outcomes.extend(batch);
    }

    let (mut ok, failed): (Vec<_>, Vec<_>) = outcomes.into_iter().partition(|o| o.result.is_ok());
    ok.sort_by(|a, b| {
        let strength = |o: &ScanOutcome| o.result.as_ref().map(|a| a.strength().abs()).unwrap_or(0.0);
        strength(b).total_cmp(&strength(a))
    });
    ok.extend(failed);
    Ok(ok)
}

#[derive(Debug)]
pub struct TimeframeScan {
    pub symbol: String,
    /// `None` where fetch or analysis failed.
    pub analyses: BTreeMap<Timeframe, Option<SymbolAnalysis>>,
    pub alignment: Alignment,
}

/// Analyse one symbol across `timeframes` and align the results.
pub fn scan_timeframes(
    port: &dyn DataPort,
    symbol: &str,
    timeframes: &[Timeframe],
    params: &AnalysisParams,
    max_bars: usize,
    weights: &TimeframeWeights,
) -> TimeframeScan {
    let analyses: BTreeMap<Timeframe, Option<SymbolAnalysis>> = timeframes
        .par_iter()
        .map(|&tf| {
            let analysis = match analyze_symbol(port, symbol, tf, params, max_bars) {
                Ok(a) => Some(a),
                Err(e) => {
                    log::warn!("{symbol} {tf}: excluded from alignment: {e}");
                    None
                }
            };
            (tf, analysis)
        })
        .collect();

    let signals = analyses
        .iter()
        .map(|(tf, a)| (*tf, a.as_ref().map(|a| a.signal.clone())))
        .collect();
    let alignment = align_timeframes(&signals, weights);

    TimeframeScan {
        symbol: symbol.to_string(),
        analyses,
        alignment,
    }
}
