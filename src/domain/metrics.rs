//! Performance metrics over a backtest's trade ledger and equity curve.

use super::position::Trade;

/// Profit factor reported for runs with gains and no losses, and the
/// ceiling for all others.
pub const MAX_PROFIT_FACTOR: f64 = 999.0;

/// One mark-to-market point per simulated bar. Equity is a multiple of the
/// starting capital.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct EquityPoint {
    pub index: usize,
    pub timestamp: chrono::NaiveDateTime,
    pub equity: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Metrics {
    pub total_return: f64,
    pub annualized_return: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: f64,
    /// Longest run of bars spent below the high-water mark.
    pub max_drawdown_duration: usize,
    pub trade_count: usize,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub trades_breakeven: usize,
    pub win_rate: f64,
    /// Gross gain over gross loss, capped at `MAX_PROFIT_FACTOR`.
    pub profit_factor: f64,
    /// Mean equity return per trade.
    pub avg_return: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    /// Mean holding period in bars.
    pub avg_trade_duration: f64,
}

impl Metrics {
    /// `risk_free_rate` is annual; `bars_per_year` scales the per-bar return
    /// series for the Sharpe and Sortino ratios.
    pub fn compute(
        trades: &[Trade],
        equity_curve: &[EquityPoint],
        risk_free_rate: f64,
        bars_per_year: f64,
    ) -> Self {
        if trades.is_empty() {
            return Metrics::default();
        }

        let final_equity = equity_curve.last().map(|p| p.equity).unwrap_or(1.0);
        let total_return = final_equity - 1.0;

        let years = equity_curve.len() as f64 / bars_per_year;
        let annualized_return = if years > 0.0 && total_return.is_finite() && total_return > -1.0 {
            (1.0 + total_return).powf(1.0 / years) - 1.0
        } else {
            0.0
        };

        let (max_drawdown, max_drawdown_duration) = compute_drawdown(equity_curve);

        let bar_rf = risk_free_rate / bars_per_year;
        let (sharpe_ratio, sortino_ratio) =
            compute_risk_adjusted(equity_curve, bar_rf, bars_per_year);

        let mut trades_won = 0usize;
        let mut trades_lost = 0usize;
        let mut trades_breakeven = 0usize;
        let mut total_wins = 0.0_f64;
        let mut total_losses = 0.0_f64;
        let mut largest_win = 0.0_f64;
        let mut largest_loss = 0.0_f64;
        let mut total_duration = 0usize;
        let mut total_return_per_trade = 0.0_f64;

        for trade in trades {
            let ret = trade.equity_return();
            total_return_per_trade += ret;
            if ret > 0.0 {
                trades_won += 1;
                total_wins += ret;
                if ret > largest_win {
                    largest_win = ret;
                }
            } else if ret < 0.0 {
                trades_lost += 1;
                total_losses += ret.abs();
                if ret.abs() > largest_loss {
                    largest_loss = ret.abs();
                }
            } else {
                trades_breakeven += 1;
            }
            total_duration += trade.duration_bars();
        }

        let trade_count = trades.len();
        let win_rate = trades_won as f64 / trade_count as f64;

        let profit_factor = if total_losses > 0.0 {
            (total_wins / total_losses).min(MAX_PROFIT_FACTOR)
        } else if total_wins > 0.0 {
            MAX_PROFIT_FACTOR
        } else {
            0.0
        };

        let avg_win = if trades_won > 0 {
            total_wins / trades_won as f64
        } else {
            0.0
        };

        let avg_loss = if trades_lost > 0 {
            total_losses / trades_lost as f64
        } else {
            0.0
        };

        Metrics {
            total_return,
            annualized_return,
            sharpe_ratio,
            sortino_ratio,
            max_drawdown,
            max_drawdown_duration,
            trade_count,
            trades_won,
            trades_lost,
            trades_breakeven,
            win_rate,
            profit_factor,
            avg_return: total_return_per_trade / trade_count as f64,
            avg_win,
            avg_loss,
            largest_win,
            largest_loss,
            avg_trade_duration: total_duration as f64 / trade_count as f64,
        }
    }
}

fn compute_drawdown(equity_curve: &[EquityPoint]) -> (f64, usize) {
    if equity_curve.is_empty() {
        return (0.0, 0);
    }

    let mut peak = equity_curve[0].equity;
    let mut max_dd = 0.0_f64;
    let mut max_dd_duration = 0usize;
    let mut current_dd_duration = 0usize;

    for point in equity_curve {
        if point.equity >= peak {
            peak = point.equity;
            current_dd_duration = 0;
        } else if peak > 0.0 {
            let dd = (peak - point.equity) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
            current_dd_duration += 1;
            if current_dd_duration > max_dd_duration {
                max_dd_duration = current_dd_duration;
            }
        }
    }

    (max_dd, max_dd_duration)
}

fn compute_risk_adjusted(equity_curve: &[EquityPoint], bar_rf: f64, bars_per_year: f64) -> (f64, f64) {
    if equity_curve.len() < 2 {
        return (0.0, 0.0);
    }

    let returns: Vec<f64> = equity_curve
        .windows(2)
        .map(|w| {
            let prev = w[0].equity;
            let curr = w[1].equity;
            if prev > 0.0 {
                (curr - prev) / prev
            } else {
                0.0
            }
        })
        .collect();

    let n = returns.len() as f64;
    let mean: f64 = returns.iter().sum::<f64>() / n;

    let variance: f64 = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();

    let excess_return = mean - bar_rf;
    let annualize = bars_per_year.sqrt();

    let sharpe = if stddev > 0.0 {
        (excess_return / stddev) * annualize
    } else {
        0.0
    };

    let downside_sum: f64 = returns
        .iter()
        .filter(|&&r| r < bar_rf)
        .map(|&r| (r - bar_rf).powi(2))
        .sum();
    let downside_stddev = (downside_sum / n).sqrt();

    let sortino = if downside_stddev > 0.0 {
        (excess_return / downside_stddev) * annualize
    } else {
        0.0
    };

    (sharpe, sortino)
}
