//! Stop-loss, take-profit and position sizing methods.
//!
//! Each method returns `None` when it cannot produce a usable level (no ATR
//! yet, no structural extreme, level on the wrong side of entry). The
//! engine then substitutes the baseline methods: a 2% fixed stop and a 2:1
//! reward/risk target.

use std::fmt;
use std::str::FromStr;

use super::cycle::detect_cycle_extremes;
use super::error::FibCyclesError;
use super::ohlcv::PriceBar;
use super::position::{Direction, Trade};

pub const BASELINE_STOP: StopLossMethod = StopLossMethod::FixedPercent { pct: 2.0 };
pub const BASELINE_TARGET: TakeProfitMethod = TakeProfitMethod::RiskReward { ratio: 2.0 };

/// Minimum closed trades before Kelly uses the observed win rate.
const KELLY_MIN_TRADES: usize = 5;

/// Market context at the entry bar.
#[derive(Debug, Clone)]
pub struct RiskContext<'a> {
    /// Bars up to and including the entry bar.
    pub history: &'a [PriceBar],
    pub atr: Option<f64>,
    /// Bars that make up "the recent cycle".
    pub lookback: usize,
}

impl RiskContext<'_> {
    fn window(&self, len: usize) -> &[PriceBar] {
        let start = self.history.len().saturating_sub(len.max(1));
        &self.history[start..]
    }

    /// Most recent structural trough low (long) or peak high (short).
    fn structural_extreme(&self, want_low: bool) -> Option<f64> {
        let window = self.window(3 * self.lookback);
        let closes: Vec<f64> = window.iter().map(|b| b.close).collect();
        let extremes = detect_cycle_extremes(&closes, self.lookback);
        let turning = if want_low {
            extremes.troughs.last()
        } else {
            extremes.peaks.last()
        };
        match turning {
            Some(&i) if want_low => Some(window[i].low),
            Some(&i) => Some(window[i].high),
            None => self.swing(self.lookback).map(|(lo, hi)| if want_low { lo } else { hi }),
        }
    }

    /// Lowest low and highest high over the last `len` bars.
    fn swing(&self, len: usize) -> Option<(f64, f64)> {
        let window = self.window(len);
        if window.is_empty() {
            return None;
        }
        let lo = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
        let hi = window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
        Some((lo, hi))
    }
}

fn on_loss_side(direction: Direction, entry: f64, level: f64) -> bool {
    level.is_finite() && (level - entry) * direction.sign() < 0.0
}

fn on_profit_side(direction: Direction, entry: f64, level: f64) -> bool {
    level.is_finite() && (level - entry) * direction.sign() > 0.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StopLossMethod {
    Atr { multiplier: f64 },
    CycleExtreme,
    FixedPercent { pct: f64 },
}

impl StopLossMethod {
    pub fn compute(&self, direction: Direction, entry: f64, ctx: &RiskContext) -> Option<f64> {
        let level = match *self {
            StopLossMethod::Atr { multiplier } => entry - direction.sign() * multiplier * ctx.atr?,
            StopLossMethod::CycleExtreme => {
                ctx.structural_extreme(direction == Direction::Long)?
            }
            StopLossMethod::FixedPercent { pct } => entry * (1.0 - direction.sign() * pct / 100.0),
        };
        on_loss_side(direction, entry, level).then_some(level)
    }
}

impl fmt::Display for StopLossMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopLossMethod::Atr { multiplier } => write!(f, "atr x{multiplier}"),
            StopLossMethod::CycleExtreme => f.write_str("cycle extreme"),
            StopLossMethod::FixedPercent { pct } => write!(f, "fixed {pct}%"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TakeProfitMethod {
    Atr { multiplier: f64 },
    CycleExtreme,
    FixedPercent { pct: f64 },
    FibonacciExtension { ratio: f64 },
    RiskReward { ratio: f64 },
}

impl TakeProfitMethod {
    pub fn compute(
        &self,
        direction: Direction,
        entry: f64,
        stop: f64,
        ctx: &RiskContext,
    ) -> Option<f64> {
        let sign = direction.sign();
        let level = match *self {
            TakeProfitMethod::Atr { multiplier } => entry + sign * multiplier * ctx.atr?,
            TakeProfitMethod::CycleExtreme => {
                ctx.structural_extreme(direction == Direction::Short)?
            }
            TakeProfitMethod::FixedPercent { pct } => entry * (1.0 + sign * pct / 100.0),
            TakeProfitMethod::FibonacciExtension { ratio } => {
                let (lo, hi) = ctx.swing(ctx.lookback)?;
                match direction {
                    Direction::Long => lo + ratio * (hi - lo),
                    Direction::Short => hi - ratio * (hi - lo),
                }
            }
            TakeProfitMethod::RiskReward { ratio } => entry + sign * ratio * (entry - stop).abs(),
        };
        on_profit_side(direction, entry, level).then_some(level)
    }
}

impl fmt::Display for TakeProfitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TakeProfitMethod::Atr { multiplier } => write!(f, "atr x{multiplier}"),
            TakeProfitMethod::CycleExtreme => f.write_str("cycle extreme"),
            TakeProfitMethod::FixedPercent { pct } => write!(f, "fixed {pct}%"),
            TakeProfitMethod::FibonacciExtension { ratio } => write!(f, "fibonacci {ratio}"),
            TakeProfitMethod::RiskReward { ratio } => write!(f, "reward/risk {ratio}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SizingPolicy {
    FixedFraction { fraction: f64 },
    /// Risk `risk_pct` of equity on the distance to the stop.
    RiskBased { risk_pct: f64 },
    /// Fractional Kelly from the run's closed trades and this trade's
    /// reward/risk. Uses p = 0.5 until enough trades have closed.
    Kelly { fraction: f64 },
}

impl SizingPolicy {
    /// Fraction of equity to commit, in `[0, 1]`.
    pub fn size(&self, entry: f64, stop: f64, target: f64, closed: &[Trade]) -> f64 {
        let risk = (entry - stop).abs();
        let raw = match *self {
            SizingPolicy::FixedFraction { fraction } => fraction,
            SizingPolicy::RiskBased { risk_pct } => {
                if risk > 0.0 {
                    (risk_pct / 100.0) * entry / risk
                } else {
                    0.0
                }
            }
            SizingPolicy::Kelly { fraction } => {
                let reward = (target - entry).abs();
                if risk <= 0.0 || reward <= 0.0 {
                    0.0
                } else {
                    let b = reward / risk;
                    let p = if closed.len() >= KELLY_MIN_TRADES {
                        let wins = closed.iter().filter(|t| t.realized_return > 0.0).count();
                        wins as f64 / closed.len() as f64
                    } else {
                        0.5
                    };
                    let q = 1.0 - p;
                    ((p * b - q) / b) * fraction
                }
            }
        };
        if raw.is_finite() {
            raw.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

impl fmt::Display for SizingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizingPolicy::FixedFraction { fraction } => write!(f, "fixed fraction {fraction}"),
            SizingPolicy::RiskBased { risk_pct } => write!(f, "risk {risk_pct}%"),
            SizingPolicy::Kelly { fraction } => write!(f, "kelly x{fraction}"),
        }
    }
}

/// Parameters that the string-selected methods draw on.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskParams {
    pub atr_stop_mult: f64,
    pub atr_target_mult: f64,
    pub stop_pct: f64,
    pub target_pct: f64,
    pub fib_ratio: f64,
    pub reward_risk: f64,
    pub fraction: f64,
    pub risk_pct: f64,
    pub kelly_fraction: f64,
}

impl Default for RiskParams {
    fn default() -> Self {
        RiskParams {
            atr_stop_mult: 2.0,
            atr_target_mult: 3.0,
            stop_pct: 2.0,
            target_pct: 4.0,
            fib_ratio: 1.618,
            reward_risk: 2.0,
            fraction: 1.0,
            risk_pct: 2.0,
            kelly_fraction: 0.5,
        }
    }
}

fn unknown(key: &str, value: &str) -> FibCyclesError {
    FibCyclesError::invalid_config(key, format!("unknown method '{value}'"))
}

/// Method identifiers as they appear in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopLossKind {
    Atr,
    CycleExtreme,
    FixedPercent,
}

impl FromStr for StopLossKind {
    type Err = FibCyclesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "atr" => Ok(StopLossKind::Atr),
            "cycle_extreme" => Ok(StopLossKind::CycleExtreme),
            "fixed_pct" | "fixed" => Ok(StopLossKind::FixedPercent),
            other => Err(unknown("backtest.stop_loss", other)),
        }
    }
}

impl StopLossKind {
    pub fn with_params(self, p: &RiskParams) -> StopLossMethod {
        match self {
            StopLossKind::Atr => StopLossMethod::Atr {
                multiplier: p.atr_stop_mult,
            },
            StopLossKind::CycleExtreme => StopLossMethod::CycleExtreme,
            StopLossKind::FixedPercent => StopLossMethod::FixedPercent { pct: p.stop_pct },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeProfitKind {
    Atr,
    CycleExtreme,
    FixedPercent,
    Fibonacci,
    RiskReward,
}

impl FromStr for TakeProfitKind {
    type Err = FibCyclesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "atr" => Ok(TakeProfitKind::Atr),
            "cycle_extreme" => Ok(TakeProfitKind::CycleExtreme),
            "fixed_pct" | "fixed" => Ok(TakeProfitKind::FixedPercent),
            "fibonacci" | "fib" => Ok(TakeProfitKind::Fibonacci),
            "risk_reward" | "rr" => Ok(TakeProfitKind::RiskReward),
            other => Err(unknown("backtest.take_profit", other)),
        }
    }
}

impl TakeProfitKind {
    pub fn with_params(self, p: &RiskParams) -> TakeProfitMethod {
        match self {
            TakeProfitKind::Atr => TakeProfitMethod::Atr {
                multiplier: p.atr_target_mult,
            },
            TakeProfitKind::CycleExtreme => TakeProfitMethod::CycleExtreme,
            TakeProfitKind::FixedPercent => TakeProfitMethod::FixedPercent { pct: p.target_pct },
            TakeProfitKind::Fibonacci => TakeProfitMethod::FibonacciExtension {
                ratio: p.fib_ratio,
            },
            TakeProfitKind::RiskReward => TakeProfitMethod::RiskReward {
                ratio: p.reward_risk,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizingKind {
    FixedFraction,
    RiskBased,
    Kelly,
}

impl FromStr for SizingKind {
    type Err = FibCyclesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fixed_fraction" | "fixed" => Ok(SizingKind::FixedFraction),
            "risk_based" | "risk" => Ok(SizingKind::RiskBased),
            "kelly" => Ok(SizingKind::Kelly),
            other => Err(unknown("backtest.sizing", other)),
        }
    }
}

impl SizingKind {
    pub fn with_params(self, p: &RiskParams) -> SizingPolicy {
        match self {
            SizingKind::FixedFraction => SizingPolicy::FixedFraction {
                fraction: p.fraction,
            },
            SizingKind::RiskBased => SizingPolicy::RiskBased {
                risk_pct: p.risk_pct,
            },
            SizingKind::Kelly => SizingPolicy::Kelly {
                fraction: p.kelly_fraction,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::ExitReason;
    use chrono::{Duration, NaiveDate};

    fn bars_from(closes: &[f64], spread: f64) -> Vec<PriceBar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| PriceBar {
                timestamp: start + Duration::days(i as i64),
                open: c,
                high: c + spread,
                low: c - spread,
                close: c,
                volume: 1000.0,
            })
            .collect()
    }

    fn ctx(bars: &[PriceBar], atr: Option<f64>, lookback: usize) -> RiskContext<'_> {
        RiskContext {
            history: bars,
            atr,
            lookback,
        }
    }

    fn trade(ret: f64) -> Trade {
        let t = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        Trade {
            direction: Direction::Long,
            entry_index: 0,
            entry_time: t,
            entry_price: 100.0,
            exit_index: 1,
            exit_time: t,
            exit_price: 100.0 * (1.0 + ret),
            exit_reason: ExitReason::TakeProfit,
            stop_loss: 98.0,
            take_profit: 104.0,
            size_fraction: 1.0,
            realized_return: ret,
        }
    }

    #[test]
    fn atr_stop_and_target() {
        let bars = bars_from(&[100.0; 5], 1.0);
        let c = ctx(&bars, Some(2.0), 5);
        let stop = StopLossMethod::Atr { multiplier: 2.0 }
            .compute(Direction::Long, 100.0, &c)
            .unwrap();
        assert!((stop - 96.0).abs() < 1e-12);
        let target = TakeProfitMethod::Atr { multiplier: 3.0 }
            .compute(Direction::Short, 100.0, 104.0, &c)
            .unwrap();
        assert!((target - 94.0).abs() < 1e-12);
    }

    #[test]
    fn atr_unavailable_is_none() {
        let bars = bars_from(&[100.0; 5], 1.0);
        let c = ctx(&bars, None, 5);
        assert!(StopLossMethod::Atr { multiplier: 2.0 }
            .compute(Direction::Long, 100.0, &c)
            .is_none());
    }

    #[test]
    fn fixed_percent_levels() {
        let bars = bars_from(&[100.0], 0.0);
        let c = ctx(&bars, None, 1);
        let stop = BASELINE_STOP.compute(Direction::Short, 50.0, &c).unwrap();
        assert!((stop - 51.0).abs() < 1e-12);
        let target = TakeProfitMethod::FixedPercent { pct: 4.0 }
            .compute(Direction::Long, 50.0, 49.0, &c)
            .unwrap();
        assert!((target - 52.0).abs() < 1e-12);
    }

    #[test]
    fn risk_reward_target() {
        let bars = bars_from(&[100.0], 0.0);
        let c = ctx(&bars, None, 1);
        let target = BASELINE_TARGET
            .compute(Direction::Long, 100.0, 97.0, &c)
            .unwrap();
        assert!((target - 106.0).abs() < 1e-12);
    }

    #[test]
    fn fibonacci_extension_of_last_swing() {
        let closes: Vec<f64> = (0..10).map(|i| 90.0 + i as f64).collect();
        let bars = bars_from(&closes, 0.0);
        let c = ctx(&bars, None, 10);
        let target = TakeProfitMethod::FibonacciExtension { ratio: 1.618 }
            .compute(Direction::Long, 99.0, 97.0, &c)
            .unwrap();
        assert!((target - (90.0 + 1.618 * 9.0)).abs() < 1e-9);
    }

    #[test]
    fn cycle_extreme_stop_uses_recent_trough() {
        let closes: Vec<f64> = (0..60)
            .map(|i| 100.0 + 5.0 * (2.0 * std::f64::consts::PI * i as f64 / 20.0).sin())
            .collect();
        let bars = bars_from(&closes, 0.5);
        let c = ctx(&bars, None, 20);
        let stop = StopLossMethod::CycleExtreme
            .compute(Direction::Long, 101.0, &c)
            .unwrap();
        assert!((stop - 94.5).abs() < 1e-6);
    }

    #[test]
    fn wrong_side_levels_are_rejected() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let bars = bars_from(&closes, 0.5);
        let c = ctx(&bars, None, 10);
        // Entry above the whole window: the structural high is not a loss level for a short.
        assert!(StopLossMethod::CycleExtreme
            .compute(Direction::Short, 200.0, &c)
            .is_none());
    }

    #[test]
    fn risk_based_size() {
        let size = SizingPolicy::RiskBased { risk_pct: 2.0 }.size(100.0, 96.0, 108.0, &[]);
        assert!((size - 0.5).abs() < 1e-12);
        let capped = SizingPolicy::RiskBased { risk_pct: 2.0 }.size(100.0, 99.9, 108.0, &[]);
        assert!((capped - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn kelly_placeholder_and_history() {
        let policy = SizingPolicy::Kelly { fraction: 0.5 };
        // p = 0.5, b = 2 → f* = 0.25, half Kelly 0.125
        assert!((policy.size(100.0, 98.0, 104.0, &[]) - 0.125).abs() < 1e-12);
        let losers: Vec<Trade> = (0..5).map(|_| trade(-0.02)).collect();
        assert_eq!(policy.size(100.0, 98.0, 104.0, &losers), 0.0);
    }

    #[test]
    fn parse_method_names() {
        assert_eq!("atr".parse::<StopLossKind>().unwrap(), StopLossKind::Atr);
        assert_eq!("fibonacci".parse::<TakeProfitKind>().unwrap(), TakeProfitKind::Fibonacci);
        assert_eq!("kelly".parse::<SizingKind>().unwrap(), SizingKind::Kelly);
        let err = "trailing".parse::<StopLossKind>().unwrap_err();
        assert!(matches!(err, FibCyclesError::InvalidConfiguration { .. }));
    }

    #[test]
    fn kinds_pick_up_params() {
        let params = RiskParams::default();
        assert_eq!(
            TakeProfitKind::RiskReward.with_params(&params),
            TakeProfitMethod::RiskReward { ratio: 2.0 }
        );
        assert_eq!(
            SizingKind::FixedFraction.with_params(&params),
            SizingPolicy::FixedFraction { fraction: 1.0 }
        );
    }
}
