//! Configuration validation.
//!
//! Validates every section up front so a bad value fails before any data is
//! fetched. Absent keys are fine; their defaults apply.

use std::str::FromStr;

use crate::domain::cycle::DetectionMethod;
use crate::domain::error::FibCyclesError;
use crate::domain::risk::{SizingKind, StopLossKind, TakeProfitKind};
use crate::domain::spectral::SpectralBackend;
use crate::domain::strategy::StrategyKind;
use crate::domain::timeframe::Timeframe;
use crate::ports::config_port::ConfigPort;

pub fn validate_config(config: &dyn ConfigPort) -> Result<(), FibCyclesError> {
    validate_cycles_config(config)?;
    validate_regime_config(config)?;
    validate_fld_config(config)?;
    validate_signal_config(config)?;
    validate_scan_config(config)?;
    validate_timeframe_weights(config)?;
    validate_backtest_config(config)?;
    Ok(())
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> FibCyclesError {
    FibCyclesError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Parsed value of `[section] key`, `None` when absent.
pub(crate) fn parse_value<T: FromStr>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<T>, FibCyclesError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| invalid(section, key, format!("cannot parse '{}'", raw.trim()))),
    }
}

/// Like [`parse_value`] for identifiers whose own parse error explains the
/// accepted values.
pub(crate) fn parse_choice<T: FromStr<Err = FibCyclesError>>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<T>, FibCyclesError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.parse::<T>().map(Some).map_err(|e| match e {
            FibCyclesError::InvalidConfiguration { reason, .. } => invalid(section, key, reason),
            other => other,
        }),
    }
}

fn require_positive(config: &dyn ConfigPort, section: &str, key: &str) -> Result<(), FibCyclesError> {
    match parse_value::<f64>(config, section, key)? {
        Some(v) if v <= 0.0 || !v.is_finite() => Err(invalid(section, key, format!("{key} must be positive"))),
        _ => Ok(()),
    }
}

fn require_non_negative(config: &dyn ConfigPort, section: &str, key: &str) -> Result<(), FibCyclesError> {
    match parse_value::<f64>(config, section, key)? {
        Some(v) if v < 0.0 || !v.is_finite() => {
            Err(invalid(section, key, format!("{key} must be non-negative")))
        }
        _ => Ok(()),
    }
}

fn require_count(config: &dyn ConfigPort, section: &str, key: &str, minimum: usize) -> Result<(), FibCyclesError> {
    match parse_value::<usize>(config, section, key)? {
        Some(v) if v < minimum => Err(invalid(section, key, format!("{key} must be at least {minimum}"))),
        _ => Ok(()),
    }
}

fn validate_cycles_config(config: &dyn ConfigPort) -> Result<(), FibCyclesError> {
    require_count(config, "cycles", "min_period", 2)?;
    require_count(config, "cycles", "max_candidates", 1)?;
    let min = parse_value::<usize>(config, "cycles", "min_period")?.unwrap_or(20);
    let max = parse_value::<usize>(config, "cycles", "max_period")?.unwrap_or(250);
    if min >= max {
        return Err(invalid(
            "cycles",
            "max_period",
            format!("max_period ({max}) must be greater than min_period ({min})"),
        ));
    }
    parse_value::<usize>(config, "cycles", "key_tolerance")?;
    let min_cycles = parse_value::<usize>(config, "cycles", "min_cycles")?.unwrap_or(1);
    let max_candidates = parse_value::<usize>(config, "cycles", "max_candidates")?.unwrap_or(6);
    if min_cycles > max_candidates {
        return Err(invalid(
            "cycles",
            "min_cycles",
            format!("min_cycles ({min_cycles}) must not exceed max_candidates ({max_candidates})"),
        ));
    }
    parse_value::<usize>(config, "cycles", "parallel_threads")?;
    parse_choice::<DetectionMethod>(config, "cycles", "method")?;
    parse_choice::<SpectralBackend>(config, "cycles", "backend")?;
    Ok(())
}

fn validate_regime_config(config: &dyn ConfigPort) -> Result<(), FibCyclesError> {
    require_count(config, "regime", "lookback", 2)?;
    require_non_negative(config, "regime", "bars_per_year")
}

fn validate_fld_config(config: &dyn ConfigPort) -> Result<(), FibCyclesError> {
    require_count(config, "fld", "recent_bars", 1)?;
    parse_value::<bool>(config, "fld", "adaptive")
        .map_err(|_| invalid("fld", "adaptive", "adaptive must be true or false"))?;
    Ok(())
}

fn validate_signal_config(config: &dyn ConfigPort) -> Result<(), FibCyclesError> {
    require_positive(config, "signal", "volume_threshold")?;
    require_count(config, "signal", "volume_lookback", 1)
}

fn validate_scan_config(config: &dyn ConfigPort) -> Result<(), FibCyclesError> {
    require_count(config, "scan", "workers", 1)?;
    require_count(config, "scan", "batch_size", 1)?;
    parse_value::<u64>(config, "scan", "batch_delay_ms")?;
    require_count(config, "scan", "max_bars", 1)?;
    parse_value::<usize>(config, "scan", "min_bars")?;
    Ok(())
}

fn validate_timeframe_weights(config: &dyn ConfigPort) -> Result<(), FibCyclesError> {
    for tf in Timeframe::ALL {
        require_positive(config, "timeframes", tf.as_str())?;
    }
    Ok(())
}

fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), FibCyclesError> {
    parse_choice::<StrategyKind>(config, "backtest", "strategy")?;
    parse_choice::<StopLossKind>(config, "backtest", "stop_loss")?;
    parse_choice::<TakeProfitKind>(config, "backtest", "take_profit")?;
    parse_choice::<SizingKind>(config, "backtest", "sizing")?;
    parse_value::<usize>(config, "backtest", "warmup")?;
    parse_cycle_list(config)?;

    match parse_value::<f64>(config, "backtest", "fraction")? {
        Some(v) if v <= 0.0 || v > 1.0 => {
            return Err(invalid("backtest", "fraction", "fraction must be in (0, 1]"));
        }
        _ => {}
    }
    match parse_value::<f64>(config, "backtest", "kelly_fraction")? {
        Some(v) if v <= 0.0 || v > 1.0 => {
            return Err(invalid("backtest", "kelly_fraction", "kelly_fraction must be in (0, 1]"));
        }
        _ => {}
    }
    for key in [
        "risk_pct",
        "atr_stop_mult",
        "atr_target_mult",
        "stop_pct",
        "target_pct",
        "fib_ratio",
        "reward_risk",
        "bars_per_year",
    ] {
        require_positive(config, "backtest", key)?;
    }
    for key in [
        "entry_threshold",
        "exit_threshold",
        "slippage_pct",
        "commission_pct",
    ] {
        require_non_negative(config, "backtest", key)?;
    }
    require_count(config, "backtest", "atr_period", 1)?;
    parse_value::<usize>(config, "backtest", "extreme_lookback")?;

    match parse_value::<f64>(config, "backtest", "risk_free_rate")? {
        Some(v) if !(0.0..1.0).contains(&v) => Err(invalid(
            "backtest",
            "risk_free_rate",
            "risk_free_rate must be between 0 and 1",
        )),
        _ => Ok(()),
    }
}

/// `[backtest] cycles` as a list of lengths; empty when unset.
pub fn parse_cycle_list(config: &dyn ConfigPort) -> Result<Vec<usize>, FibCyclesError> {
    let Some(raw) = config.get_string("backtest", "cycles") else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s.parse::<usize>() {
            Ok(c) if c >= 2 => Ok(c),
            _ => Err(invalid(
                "backtest",
                "cycles",
                format!("'{s}' is not a cycle length of at least 2"),
            )),
        })
        .collect()
}
