//! Bar-by-bar backtest engine.
//!
//! Bars before `warmup` are history only: cycles (when not given) and the
//! regime are derived from them. From `warmup` on, each bar runs the
//! position state machine (flat → open → closed) and appends one
//! mark-to-market equity point.

use chrono::NaiveDateTime;

use super::cycle::{CycleConfig, detect_cycles};
use super::error::FibCyclesError;
use super::execution::{ExecutionConfig, entry_fill, exit_fill, round_trip_commission};
use super::fld::FldConfig;
use super::indicator::IndicatorSeries;
use super::indicator::atr::calculate_atr;
use super::metrics::{EquityPoint, Metrics};
use super::ohlcv::{PriceBar, PriceSeries};
use super::position::{Direction, ExitReason, Position, Trade};
use super::regime::{RegimeInfo, classify_regime_with};
use super::risk::{
    BASELINE_STOP, BASELINE_TARGET, RiskContext, SizingPolicy, StopLossMethod, TakeProfitMethod,
};
use super::signal::SignalConfig;
use super::strategy::{StrategyInputs, StrategyKind, TradedCycle, build_strategy};

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub strategy: StrategyKind,
    /// Bars reserved as history before the first simulated bar.
    pub warmup: usize,
    /// Cycle lengths to trade; empty means detect them on the warm-up window.
    pub cycles: Vec<usize>,
    pub cycle_config: CycleConfig,
    pub fld: FldConfig,
    pub signal: SignalConfig,
    pub regime_lookback: usize,
    pub stop_loss: StopLossMethod,
    pub take_profit: TakeProfitMethod,
    pub sizing: SizingPolicy,
    pub atr_period: usize,
    /// Bars in "the recent cycle" for structural stops; 0 uses the primary
    /// cycle length.
    pub extreme_lookback: usize,
    pub entry_threshold: f64,
    pub exit_threshold: f64,
    pub execution: ExecutionConfig,
    /// Annual rate for Sharpe/Sortino.
    pub risk_free_rate: f64,
    pub bars_per_year: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            strategy: StrategyKind::FldCrossover,
            warmup: 100,
            cycles: Vec::new(),
            cycle_config: CycleConfig::default(),
            fld: FldConfig::default(),
            signal: SignalConfig::default(),
            regime_lookback: 100,
            stop_loss: StopLossMethod::Atr { multiplier: 2.0 },
            take_profit: TakeProfitMethod::RiskReward { ratio: 2.0 },
            sizing: SizingPolicy::FixedFraction { fraction: 1.0 },
            atr_period: 14,
            extreme_lookback: 0,
            entry_threshold: 2.0,
            exit_threshold: 1.0,
            execution: ExecutionConfig::default(),
            risk_free_rate: 0.0,
            bars_per_year: 252.0,
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<(), FibCyclesError> {
        if let Some(&c) = self.cycles.iter().find(|&&c| c < 2) {
            return Err(FibCyclesError::invalid_config(
                "backtest.cycles",
                format!("cycle length {c} is below 2"),
            ));
        }
        if self.cycles.is_empty() {
            self.cycle_config.validate()?;
        }
        if self.bars_per_year <= 0.0 {
            return Err(FibCyclesError::invalid_config(
                "backtest.bars_per_year",
                "must be positive",
            ));
        }
        if self.entry_threshold < 0.0 || self.exit_threshold < 0.0 {
            return Err(FibCyclesError::invalid_config(
                "backtest.entry_threshold",
                "thresholds must not be negative",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BacktestResult {
    /// Cycle lengths the strategy traded.
    pub cycles: Vec<usize>,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub metrics: Metrics,
}

/// Replay `series` against the configured strategy.
///
/// A series no longer than `warmup` yields an empty result. With no cycle to
/// trade the run still produces a flat equity curve.
pub fn run_backtest(series: &PriceSeries, config: &BacktestConfig) -> Result<BacktestResult, FibCyclesError> {
    config.validate()?;

    let bars = series.bars();
    if bars.len() <= config.warmup {
        log::debug!(
            "{}: {} bars does not exceed warm-up of {}",
            series.symbol(),
            bars.len(),
            config.warmup
        );
        return Ok(BacktestResult::default());
    }

    let history = series.slice(0, config.warmup);
    let cycles = resolve_cycles(&history, config)?;
    let regime = if history.is_empty() {
        RegimeInfo::neutral()
    } else {
        classify_regime_with(&history, config.regime_lookback, config.bars_per_year)
    };
    log::info!(
        "{}: backtesting {} with cycles {:?} ({} regime)",
        series.symbol(),
        config.strategy,
        cycles.iter().map(|c| c.length).collect::<Vec<_>>(),
        regime.regime
    );

    let mut strategy = build_strategy(
        config.strategy,
        StrategyInputs {
            series,
            cycles: &cycles,
            regime: &regime,
            fld: &config.fld,
            signal: &config.signal,
            entry_threshold: config.entry_threshold,
            exit_threshold: config.exit_threshold,
        },
    );
    if strategy.is_none() {
        log::warn!("{}: no cycles to trade, no positions will open", series.symbol());
    }

    let atr = calculate_atr(bars, config.atr_period);
    let lookback = match config.extreme_lookback {
        0 => cycles.first().map(|c| c.length).unwrap_or(config.atr_period),
        n => n,
    };

    let mut sim = Simulation {
        config,
        bars,
        atr: &atr,
        lookback,
        equity: 1.0,
        open: None,
        trades: Vec::new(),
        curve: Vec::with_capacity(bars.len() - config.warmup),
    };

    for i in config.warmup..bars.len() {
        let signal = strategy.as_mut().map(|s| s.on_bar(i)).unwrap_or_default();
        // An opposing-signal exit may reverse on the same bar; stop and
        // target exits wait for the next bar.
        let exit = sim.check_exits(i, signal.opposing);
        let may_enter = matches!(exit, None | Some(ExitReason::OpposingSignal));
        if sim.open.is_none() && may_enter {
            if let Some(direction) = signal.entry {
                sim.try_open(i, direction);
            }
        }
        sim.mark(i);
    }
    sim.finish();

    let metrics = Metrics::compute(
        &sim.trades,
        &sim.curve,
        config.risk_free_rate,
        config.bars_per_year,
    );
    Ok(BacktestResult {
        cycles: cycles.iter().map(|c| c.length).collect(),
        trades: sim.trades,
        equity_curve: sim.curve,
        metrics,
    })
}

/// Configured cycles, or the ranked detection on the warm-up window with the
/// maximum period capped so the window is long enough.
fn resolve_cycles(history: &PriceSeries, config: &BacktestConfig) -> Result<Vec<TradedCycle>, FibCyclesError> {
    if !config.cycles.is_empty() {
        return Ok(config
            .cycles
            .iter()
            .map(|&length| TradedCycle { length, power: None })
            .collect());
    }

    let max_period = config.cycle_config.max_period.min(history.len() / 2);
    if max_period <= config.cycle_config.min_period {
        log::warn!(
            "{}: warm-up of {} bars is too short to detect cycles of at least {} bars",
            history.symbol(),
            history.len(),
            config.cycle_config.min_period
        );
        return Ok(Vec::new());
    }
    let detection = CycleConfig {
        max_period,
        ..config.cycle_config.clone()
    };
    let (all, key) = detect_cycles(history, &detection)?;
    let chosen = if key.is_empty() { all } else { key };
    Ok(chosen
        .into_iter()
        .map(|c| TradedCycle {
            length: c.period,
            power: Some(c.power),
        })
        .collect())
}

struct Simulation<'a> {
    config: &'a BacktestConfig,
    bars: &'a [PriceBar],
    atr: &'a IndicatorSeries,
    lookback: usize,
    /// Closed-trade equity multiple.
    equity: f64,
    open: Option<Position>,
    trades: Vec<Trade>,
    curve: Vec<EquityPoint>,
}

impl Simulation<'_> {
    /// Stop, then target, then opposing signal. Returns the reason if the
    /// open position was closed at this bar.
    fn check_exits(&mut self, i: usize, opposing: Option<Direction>) -> Option<ExitReason> {
        let Some(position) = self.open.as_ref() else {
            return None;
        };
        let bar = &self.bars[i];
        let exit = if position.stop_touched(bar) {
            Some((position.stop_loss, ExitReason::StopLoss))
        } else if position.target_touched(bar) {
            Some((position.take_profit, ExitReason::TakeProfit))
        } else if opposing == Some(position.direction.opposite()) {
            Some((bar.close, ExitReason::OpposingSignal))
        } else {
            None
        };
        let (price, reason) = exit?;
        self.close(i, bar.timestamp, price, reason);
        Some(reason)
    }

    fn close(&mut self, i: usize, time: NaiveDateTime, trigger: f64, reason: ExitReason) {
        let Some(position) = self.open.take() else {
            return;
        };
        let fill = exit_fill(position.direction, trigger, &self.config.execution);
        let mut trade = position.close(i, time, fill, reason);
        trade.realized_return -= round_trip_commission(&self.config.execution);
        self.equity *= 1.0 + trade.equity_return();
        log::debug!(
            "close {} at bar {} ({}): return {:.4}",
            trade.direction,
            i,
            reason,
            trade.realized_return
        );
        self.trades.push(trade);
    }

    fn try_open(&mut self, i: usize, direction: Direction) {
        if direction == Direction::Short && !self.config.execution.allow_shorting {
            return;
        }
        let bar = &self.bars[i];
        let entry = entry_fill(direction, bar.close, &self.config.execution);
        let ctx = RiskContext {
            history: &self.bars[..=i],
            atr: self.atr.simple_at(i),
            lookback: self.lookback,
        };

        let stop = self.config.stop_loss.compute(direction, entry, &ctx).or_else(|| {
            log::warn!(
                "bar {i}: {} stop unavailable, using {}",
                self.config.stop_loss,
                BASELINE_STOP
            );
            BASELINE_STOP.compute(direction, entry, &ctx)
        });
        let Some(stop) = stop else {
            return;
        };
        let target = self
            .config
            .take_profit
            .compute(direction, entry, stop, &ctx)
            .or_else(|| {
                log::warn!(
                    "bar {i}: {} target unavailable, using {}",
                    self.config.take_profit,
                    BASELINE_TARGET
                );
                BASELINE_TARGET.compute(direction, entry, stop, &ctx)
            });
        let Some(target) = target else {
            return;
        };

        let size = self.config.sizing.size(entry, stop, target, &self.trades);
        if size <= 0.0 {
            log::debug!("bar {i}: {} sizes {direction} entry at zero", self.config.sizing);
            return;
        }

        log::debug!("open {direction} at bar {i}: entry {entry:.4} stop {stop:.4} target {target:.4} size {size:.2}");
        self.open = Some(Position {
            direction,
            entry_index: i,
            entry_time: bar.timestamp,
            entry_price: entry,
            stop_loss: stop,
            take_profit: target,
            size_fraction: size,
        });
    }

    fn mark(&mut self, i: usize) {
        let bar = &self.bars[i];
        let equity = match &self.open {
            Some(p) => self.equity * (1.0 + p.return_at(bar.close) * p.size_fraction),
            None => self.equity,
        };
        self.curve.push(EquityPoint {
            index: i,
            timestamp: bar.timestamp,
            equity,
        });
    }

    /// Force-close at the last close and restate the final equity point.
    fn finish(&mut self) {
        if self.open.is_none() {
            return;
        }
        let last = self.bars.len() - 1;
        let bar = &self.bars[last];
        self.close(last, bar.timestamp, bar.close, ExitReason::EndOfData);
        if let Some(point) = self.curve.last_mut() {
            point.equity = self.equity;
        }
    }
}
