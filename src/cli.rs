//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::analysis::{AnalysisParams, SymbolAnalysis, analyze_series};
use crate::domain::backtest::{BacktestConfig, BacktestResult, run_backtest};
use crate::domain::config_validation::{parse_choice, parse_cycle_list, parse_value, validate_config};
use crate::domain::cycle::{CycleConfig, DetectionMethod};
use crate::domain::error::FibCyclesError;
use crate::domain::execution::ExecutionConfig;
use crate::domain::fld::FldConfig;
use crate::domain::risk::{RiskParams, SizingKind, StopLossKind, TakeProfitKind};
use crate::domain::scanner::{ScanConfig, ScanOutcome, TimeframeScan, scan_batch, scan_timeframes};
use crate::domain::signal::SignalConfig;
use crate::domain::spectral::SpectralBackend;
use crate::domain::strategy::StrategyKind;
use crate::domain::timeframe::{Timeframe, TimeframeWeights};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;

#[derive(Parser, Debug)]
#[command(name = "fibcycles", about = "Fibonacci cycle and FLD analysis")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Analyse one symbol on one timeframe
    Analyze {
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long)]
        data_dir: PathBuf,
        #[arg(short, long)]
        symbol: String,
        #[arg(short, long, default_value = "daily")]
        timeframe: String,
    },
    /// Analyse many symbols and rank them by signal strength
    Scan {
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long)]
        data_dir: PathBuf,
        /// Comma-separated; defaults to every symbol in the data directory
        #[arg(long)]
        symbols: Option<String>,
        #[arg(short, long, default_value = "daily")]
        timeframe: String,
    },
    /// Multi-timeframe alignment for one symbol
    Align {
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long)]
        data_dir: PathBuf,
        #[arg(short, long)]
        symbol: String,
        #[arg(long, default_value = "weekly,daily,4h")]
        timeframes: String,
    },
    /// Replay a cycle strategy over one series
    Backtest {
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long)]
        data_dir: PathBuf,
        #[arg(short, long)]
        symbol: String,
        #[arg(short, long, default_value = "daily")]
        timeframe: String,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Analyze {
            config,
            data_dir,
            symbol,
            timeframe,
        } => run_analyze(config.as_deref(), &data_dir, &symbol, &timeframe),
        Command::Scan {
            config,
            data_dir,
            symbols,
            timeframe,
        } => run_scan(config.as_deref(), &data_dir, symbols.as_deref(), &timeframe),
        Command::Align {
            config,
            data_dir,
            symbol,
            timeframes,
        } => run_align(config.as_deref(), &data_dir, &symbol, &timeframes),
        Command::Backtest {
            config,
            data_dir,
            symbol,
            timeframe,
        } => run_backtest_command(config.as_deref(), &data_dir, &symbol, &timeframe),
        Command::Validate { config } => run_validate(&config),
    }
}

fn fail(err: &FibCyclesError) -> ExitCode {
    eprintln!("error: {err}");
    ExitCode::from(err)
}

/// Load and validate the configuration; no path means all defaults.
pub fn load_config(path: Option<&Path>) -> Result<FileConfigAdapter, ExitCode> {
    let adapter = match path {
        Some(path) => {
            eprintln!("Loading config from {}", path.display());
            FileConfigAdapter::from_file(path)
        }
        None => FileConfigAdapter::from_string(""),
    }
    .map_err(|e| fail(&e))?;
    validate_config(&adapter).map_err(|e| fail(&e))?;
    Ok(adapter)
}

fn parse_timeframes(raw: &str) -> Result<Vec<Timeframe>, FibCyclesError> {
    let mut timeframes = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse::<Timeframe>)
        .collect::<Result<Vec<_>, _>>()?;
    timeframes.sort();
    timeframes.dedup();
    Ok(timeframes)
}

pub fn build_cycle_config(adapter: &dyn ConfigPort) -> Result<CycleConfig, FibCyclesError> {
    let defaults = CycleConfig::default();
    let backend = match parse_choice::<SpectralBackend>(adapter, "cycles", "backend")? {
        Some(SpectralBackend::Parallel { .. }) => SpectralBackend::Parallel {
            threads: parse_value(adapter, "cycles", "parallel_threads")?.unwrap_or(0),
        },
        Some(other) => other,
        None => defaults.backend,
    };
    let config = CycleConfig {
        min_period: parse_value(adapter, "cycles", "min_period")?.unwrap_or(defaults.min_period),
        max_period: parse_value(adapter, "cycles", "max_period")?.unwrap_or(defaults.max_period),
        method: parse_choice::<DetectionMethod>(adapter, "cycles", "method")?
            .unwrap_or(defaults.method),
        max_candidates: parse_value(adapter, "cycles", "max_candidates")?
            .unwrap_or(defaults.max_candidates),
        key_tolerance: parse_value(adapter, "cycles", "key_tolerance")?
            .unwrap_or(defaults.key_tolerance),
        min_cycles: parse_value(adapter, "cycles", "min_cycles")?.unwrap_or(defaults.min_cycles),
        backend,
    };
    config.validate()?;
    Ok(config)
}

fn build_fld_config(adapter: &dyn ConfigPort) -> Result<FldConfig, FibCyclesError> {
    let defaults = FldConfig::default();
    Ok(FldConfig {
        recent_bars: parse_value(adapter, "fld", "recent_bars")?.unwrap_or(defaults.recent_bars),
        adaptive: adapter.get_bool("fld", "adaptive", defaults.adaptive),
    })
}

fn build_signal_config(adapter: &dyn ConfigPort) -> Result<SignalConfig, FibCyclesError> {
    let defaults = SignalConfig::default();
    Ok(SignalConfig {
        volume_threshold: parse_value(adapter, "signal", "volume_threshold")?
            .unwrap_or(defaults.volume_threshold),
        volume_lookback: parse_value(adapter, "signal", "volume_lookback")?
            .unwrap_or(defaults.volume_lookback),
    })
}

pub fn build_analysis_params(adapter: &dyn ConfigPort) -> Result<AnalysisParams, FibCyclesError> {
    let defaults = AnalysisParams::default();
    let bars_per_year = parse_value::<f64>(adapter, "regime", "bars_per_year")?.filter(|v| *v > 0.0);
    Ok(AnalysisParams {
        cycles: build_cycle_config(adapter)?,
        regime_lookback: parse_value(adapter, "regime", "lookback")?
            .unwrap_or(defaults.regime_lookback),
        bars_per_year,
        fld: build_fld_config(adapter)?,
        signal: build_signal_config(adapter)?,
        min_bars: parse_value(adapter, "scan", "min_bars")?.unwrap_or(defaults.min_bars),
    })
}

pub fn build_scan_config(adapter: &dyn ConfigPort) -> Result<ScanConfig, FibCyclesError> {
    let defaults = ScanConfig::default();
    Ok(ScanConfig {
        workers: parse_value(adapter, "scan", "workers")?.unwrap_or(defaults.workers),
        batch_size: parse_value(adapter, "scan", "batch_size")?.unwrap_or(defaults.batch_size),
        batch_delay: parse_value::<u64>(adapter, "scan", "batch_delay_ms")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.batch_delay),
        max_bars: parse_value(adapter, "scan", "max_bars")?.unwrap_or(defaults.max_bars),
    })
}

pub fn build_weights(adapter: &dyn ConfigPort) -> Result<TimeframeWeights, FibCyclesError> {
    let mut weights = TimeframeWeights::default();
    for tf in Timeframe::ALL {
        if let Some(w) = parse_value::<f64>(adapter, "timeframes", tf.as_str())? {
            weights.set(tf, w)?;
        }
    }
    Ok(weights)
}

pub fn build_backtest_config(adapter: &dyn ConfigPort) -> Result<BacktestConfig, FibCyclesError> {
    let defaults = BacktestConfig::default();
    let risk_defaults = RiskParams::default();
    let value = |key: &str, default: f64| -> Result<f64, FibCyclesError> {
        Ok(parse_value(adapter, "backtest", key)?.unwrap_or(default))
    };

    let params = RiskParams {
        atr_stop_mult: value("atr_stop_mult", risk_defaults.atr_stop_mult)?,
        atr_target_mult: value("atr_target_mult", risk_defaults.atr_target_mult)?,
        stop_pct: value("stop_pct", risk_defaults.stop_pct)?,
        target_pct: value("target_pct", risk_defaults.target_pct)?,
        fib_ratio: value("fib_ratio", risk_defaults.fib_ratio)?,
        reward_risk: value("reward_risk", risk_defaults.reward_risk)?,
        fraction: value("fraction", risk_defaults.fraction)?,
        risk_pct: value("risk_pct", risk_defaults.risk_pct)?,
        kelly_fraction: value("kelly_fraction", risk_defaults.kelly_fraction)?,
    };

    let stop_loss = parse_choice::<StopLossKind>(adapter, "backtest", "stop_loss")?
        .unwrap_or(StopLossKind::Atr)
        .with_params(&params);
    let take_profit = parse_choice::<TakeProfitKind>(adapter, "backtest", "take_profit")?
        .unwrap_or(TakeProfitKind::RiskReward)
        .with_params(&params);
    let sizing = parse_choice::<SizingKind>(adapter, "backtest", "sizing")?
        .unwrap_or(SizingKind::FixedFraction)
        .with_params(&params);

    let config = BacktestConfig {
        strategy: parse_choice::<StrategyKind>(adapter, "backtest", "strategy")?
            .unwrap_or_default(),
        warmup: parse_value(adapter, "backtest", "warmup")?.unwrap_or(defaults.warmup),
        cycles: parse_cycle_list(adapter)?,
        cycle_config: build_cycle_config(adapter)?,
        fld: build_fld_config(adapter)?,
        signal: build_signal_config(adapter)?,
        regime_lookback: parse_value(adapter, "regime", "lookback")?
            .unwrap_or(defaults.regime_lookback),
        stop_loss,
        take_profit,
        sizing,
        atr_period: parse_value(adapter, "backtest", "atr_period")?.unwrap_or(defaults.atr_period),
        extreme_lookback: parse_value(adapter, "backtest", "extreme_lookback")?
            .unwrap_or(defaults.extreme_lookback),
        entry_threshold: value("entry_threshold", defaults.entry_threshold)?,
        exit_threshold: value("exit_threshold", defaults.exit_threshold)?,
        execution: ExecutionConfig {
            commission_pct: value("commission_pct", 0.0)?,
            slippage_pct: value("slippage_pct", 0.0)?,
            allow_shorting: adapter.get_bool("backtest", "allow_shorting", true),
        },
        risk_free_rate: value("risk_free_rate", defaults.risk_free_rate)?,
        bars_per_year: value("bars_per_year", defaults.bars_per_year)?,
    };
    config.validate()?;
    Ok(config)
}

fn run_analyze(config: Option<&Path>, data_dir: &Path, symbol: &str, timeframe: &str) -> ExitCode {
    let adapter = match load_config(config) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let prepared = timeframe
        .parse::<Timeframe>()
        .and_then(|tf| Ok((tf, build_analysis_params(&adapter)?, build_scan_config(&adapter)?)));
    let (timeframe, params, scan) = match prepared {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };

    let port = CsvAdapter::new(data_dir.to_path_buf());
    let result = port
        .fetch_series(symbol, timeframe, scan.max_bars)
        .and_then(|series| {
            eprintln!("Loaded {} bars for {} {}", series.len(), symbol, timeframe);
            analyze_series(&series, &params)
        });
    match result {
        Ok(analysis) => {
            print_analysis(&analysis);
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

fn run_scan(config: Option<&Path>, data_dir: &Path, symbols: Option<&str>, timeframe: &str) -> ExitCode {
    let adapter = match load_config(config) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let prepared = timeframe
        .parse::<Timeframe>()
        .and_then(|tf| Ok((tf, build_analysis_params(&adapter)?, build_scan_config(&adapter)?)));
    let (timeframe, params, scan) = match prepared {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };

    let port = CsvAdapter::new(data_dir.to_path_buf());
    let symbols: Vec<String> = match symbols {
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        None => match port.list_symbols() {
            Ok(s) => s,
            Err(e) => return fail(&e),
        },
    };
    if symbols.is_empty() {
        eprintln!("error: no symbols to scan");
        return ExitCode::from(2);
    }

    eprintln!(
        "Scanning {} symbols on {} ({} workers)...",
        symbols.len(),
        timeframe,
        scan.workers
    );
    match scan_batch(&port, &symbols, timeframe, &params, &scan, None) {
        Ok(outcomes) => {
            print_scan(&outcomes);
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

fn run_align(config: Option<&Path>, data_dir: &Path, symbol: &str, timeframes: &str) -> ExitCode {
    let adapter = match load_config(config) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let prepared = parse_timeframes(timeframes).and_then(|tfs| {
        Ok((
            tfs,
            build_analysis_params(&adapter)?,
            build_scan_config(&adapter)?,
            build_weights(&adapter)?,
        ))
    });
    let (timeframes, params, scan, weights) = match prepared {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };
    if timeframes.is_empty() {
        eprintln!("error: no timeframes given");
        return ExitCode::from(2);
    }

    let port = CsvAdapter::new(data_dir.to_path_buf());
    let result = scan_timeframes(&port, symbol, &timeframes, &params, scan.max_bars, &weights);
    print_alignment(&result);
    if result.alignment.included.is_empty() {
        eprintln!("error: no timeframe had enough data for {symbol}");
        return ExitCode::from(5);
    }
    ExitCode::SUCCESS
}

fn run_backtest_command(config: Option<&Path>, data_dir: &Path, symbol: &str, timeframe: &str) -> ExitCode {
    let adapter = match load_config(config) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let prepared = timeframe
        .parse::<Timeframe>()
        .and_then(|tf| Ok((tf, build_backtest_config(&adapter)?, build_scan_config(&adapter)?)));
    let (timeframe, mut bt_config, scan) = match prepared {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };
    if adapter.get_string("backtest", "bars_per_year").is_none() {
        bt_config.bars_per_year = timeframe.bars_per_year();
    }

    let port = CsvAdapter::new(data_dir.to_path_buf());
    let series = match port.fetch_series(symbol, timeframe, scan.max_bars) {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };
    eprintln!(
        "Backtesting {} {} over {} bars ({}, warm-up {})",
        symbol,
        timeframe,
        series.len(),
        bt_config.strategy,
        bt_config.warmup
    );

    match run_backtest(&series, &bt_config) {
        Ok(result) => {
            print_backtest(&bt_config, &result);
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

fn run_validate(config_path: &Path) -> ExitCode {
    let adapter = match load_config(Some(config_path)) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let built = build_analysis_params(&adapter)
        .and_then(|_| build_scan_config(&adapter))
        .and_then(|_| build_weights(&adapter))
        .and_then(|_| build_backtest_config(&adapter));
    match built {
        Ok(bt) => {
            eprintln!("Configuration is valid");
            eprintln!("  Strategy:    {}", bt.strategy);
            eprintln!("  Stop loss:   {}", bt.stop_loss);
            eprintln!("  Take profit: {}", bt.take_profit);
            eprintln!("  Sizing:      {}", bt.sizing);
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

fn fmt_level(level: Option<f64>) -> String {
    level.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"))
}

fn print_analysis(analysis: &SymbolAnalysis) {
    let signal = &analysis.signal;
    println!("=== {} {} ===", analysis.symbol, analysis.timeframe);
    println!("Last bar:        {} @ {:.4}", analysis.last_timestamp, analysis.last_price);
    println!(
        "Regime:          {} (ADX {:.1}, vol {:.1}%, width {:.3})",
        signal.regime.regime,
        signal.regime.trend_strength,
        signal.regime.volatility * 100.0,
        signal.regime.range_width
    );
    println!(
        "Key cycles:      {}",
        if analysis.has_key_cycles { "20/21 and 34 present" } else { "incomplete" }
    );
    println!("Cycles:");
    for cycle in &analysis.cycles {
        let state = signal
            .cycle_states
            .iter()
            .find(|s| s.cycle_length == cycle.candidate.period);
        let side = match state {
            Some(s) if s.bullish => "above FLD",
            Some(_) => "below FLD",
            None => "-",
        };
        let confidence = cycle
            .candidate
            .confidence
            .map_or_else(|| "-".to_string(), |c| format!("{c:.2}"));
        println!(
            "  {:>4} bars  power {:.2}  confidence {:>4}  {}  crossings {}{}",
            cycle.candidate.period,
            cycle.candidate.power,
            confidence,
            side,
            cycle.crossings.len(),
            if cycle.candidate.filled { "  (substituted)" } else { "" }
        );
    }
    println!(
        "Signal:          {} (strength {:.2}, {} confidence)",
        signal.label, signal.strength, signal.confidence
    );
    println!(
        "Volume:          {:.2}x average{}",
        signal.relative_volume,
        if signal.volume_confirmed { ", confirmed" } else { "" }
    );
    let g = &analysis.guidance;
    println!(
        "Guidance:        {:?} size {:.2} {:?}  stop {}  target {}",
        g.action,
        g.size,
        g.horizon,
        fmt_level(g.stop_loss),
        fmt_level(g.take_profit)
    );
}

fn print_scan(outcomes: &[ScanOutcome]) {
    println!(
        "{:<10} {:>10} {:>9} {:>8} {:<12} {}",
        "Symbol", "Price", "Strength", "Conf", "Signal", "Cycles"
    );
    let mut failed = 0;
    for outcome in outcomes {
        match &outcome.result {
            Ok(a) => {
                let cycles: Vec<String> = a.cycles.iter().map(|c| c.candidate.period.to_string()).collect();
                println!(
                    "{:<10} {:>10.4} {:>9.2} {:>8} {:<12} {}",
                    outcome.symbol,
                    a.last_price,
                    a.signal.strength,
                    a.signal.confidence.to_string(),
                    a.signal.label.to_string(),
                    cycles.join(",")
                );
            }
            Err(_) => failed += 1,
        }
    }
    eprintln!();
    eprintln!("=== Scan Summary ===");
    eprintln!("Analysed:  {}", outcomes.len() - failed);
    eprintln!("Skipped:   {failed}");
    for outcome in outcomes {
        if let Err(e) = &outcome.result {
            eprintln!("  {}: {}", outcome.symbol, e);
        }
    }
}

fn print_alignment(scan: &TimeframeScan) {
    println!("=== {} alignment ===", scan.symbol);
    for (tf, analysis) in &scan.analyses {
        match analysis {
            Some(a) => println!(
                "  {:<6} {:<12} strength {:>6.2}",
                tf.as_str(),
                a.signal.label.to_string(),
                a.signal.strength
            ),
            None => println!("  {:<6} insufficient data", tf.as_str()),
        }
    }
    let alignment = &scan.alignment;
    println!(
        "Composite:   {} ({} confidence)",
        alignment.composite, alignment.confidence
    );
    println!("Weighted:    {:.2}", alignment.weighted_strength);
    println!("Agreement:   {:.0}%", alignment.agreeing_fraction * 100.0);
    println!("Score:       {:.2}", alignment.score);
}

fn print_backtest(config: &BacktestConfig, result: &BacktestResult) {
    let m = &result.metrics;
    let cycles: Vec<String> = result.cycles.iter().map(|c| c.to_string()).collect();
    eprintln!();
    eprintln!("=== Backtest Results ===");
    eprintln!("Strategy:         {}", config.strategy);
    eprintln!(
        "Cycles:           {}",
        if cycles.is_empty() { "none".to_string() } else { cycles.join(", ") }
    );
    eprintln!("Total Return:     {:.2}%", m.total_return * 100.0);
    eprintln!("Annualized:       {:.2}%", m.annualized_return * 100.0);
    eprintln!("Sharpe Ratio:     {:.3}", m.sharpe_ratio);
    eprintln!("Sortino Ratio:    {:.3}", m.sortino_ratio);
    eprintln!("Max Drawdown:     {:.2}% ({} bars)", m.max_drawdown * 100.0, m.max_drawdown_duration);
    eprintln!("Total Trades:     {}", m.trade_count);
    eprintln!("Win Rate:         {:.1}%", m.win_rate * 100.0);
    eprintln!("Profit Factor:    {:.2}", m.profit_factor);
    eprintln!("Avg Duration:     {:.1} bars", m.avg_trade_duration);

    if !result.trades.is_empty() {
        println!("direction,entry_time,entry_price,exit_time,exit_price,exit_reason,size,return");
        for t in &result.trades {
            println!(
                "{},{},{:.4},{},{:.4},{},{:.4},{:.6}",
                t.direction,
                t.entry_time,
                t.entry_price,
                t.exit_time,
                t.exit_price,
                t.exit_reason,
                t.size_fraction,
                t.equity_return()
            );
        }
    }
}
