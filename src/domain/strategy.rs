//! Backtest strategies built from the FLD and signal primitives.
//!
//! A strategy is prepared once over the whole series (FLDs are causal EMAs)
//! and then asked bar by bar for its signal. Nothing at bar `i` looks at
//! bars after `i`.

use std::fmt;
use std::str::FromStr;

use super::error::FibCyclesError;
use super::fld::{CrossingEvent, FldConfig, FldSeries, compute_fld, cycle_state_at, detect_crossings};
use super::ohlcv::PriceSeries;
use super::position::Direction;
use super::regime::RegimeInfo;
use super::signal::{SignalConfig, synthesize_signal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyKind {
    /// Trade price crossing the FLD of the shortest cycle.
    #[default]
    FldCrossover,
    /// Trade the combined multi-cycle signal when the longest cycle agrees.
    MultiCycle,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::FldCrossover => f.write_str("fld_crossover"),
            StrategyKind::MultiCycle => f.write_str("multi_cycle"),
        }
    }
}

impl FromStr for StrategyKind {
    type Err = FibCyclesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fld_crossover" | "fld" => Ok(StrategyKind::FldCrossover),
            "multi_cycle" | "multi" => Ok(StrategyKind::MultiCycle),
            other => Err(FibCyclesError::invalid_config(
                "backtest.strategy",
                format!("unknown strategy '{other}'"),
            )),
        }
    }
}

/// What a strategy says at one bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BarSignal {
    /// Open a position in this direction if flat.
    pub entry: Option<Direction>,
    /// Close an open position pointing the other way.
    pub opposing: Option<Direction>,
}

pub trait Strategy {
    fn kind(&self) -> StrategyKind;

    /// Called once per simulated bar, in order.
    fn on_bar(&mut self, index: usize) -> BarSignal;
}

/// A cycle to trade with its detection power, if known.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradedCycle {
    pub length: usize,
    pub power: Option<f64>,
}

pub struct StrategyInputs<'a> {
    pub series: &'a PriceSeries,
    pub cycles: &'a [TradedCycle],
    pub regime: &'a RegimeInfo,
    pub fld: &'a FldConfig,
    pub signal: &'a SignalConfig,
    pub entry_threshold: f64,
    pub exit_threshold: f64,
}

/// `None` when there is no cycle to trade.
pub fn build_strategy<'a>(
    kind: StrategyKind,
    inputs: StrategyInputs<'a>,
) -> Option<Box<dyn Strategy + 'a>> {
    match kind {
        StrategyKind::FldCrossover => {
            FldCrossoverStrategy::new(&inputs).map(|s| Box::new(s) as Box<dyn Strategy + 'a>)
        }
        StrategyKind::MultiCycle => {
            MultiCycleStrategy::new(inputs).map(|s| Box::new(s) as Box<dyn Strategy + 'a>)
        }
    }
}

fn fld_for(inputs: &StrategyInputs, cycle: usize) -> FldSeries {
    let regime = inputs.fld.adaptive.then_some(inputs.regime);
    compute_fld(inputs.series, cycle, regime)
}

/// Long when price moves above the FLD, short when it moves below. Bars
/// before the FLD period are not evaluated; the side seen at the first
/// evaluated bar counts as a move.
pub struct FldCrossoverStrategy<'a> {
    series: &'a PriceSeries,
    fld: FldSeries,
    side: Option<Direction>,
}

impl<'a> FldCrossoverStrategy<'a> {
    fn new(inputs: &StrategyInputs<'a>) -> Option<Self> {
        let shortest = inputs.cycles.iter().map(|c| c.length).min()?;
        Some(FldCrossoverStrategy {
            series: inputs.series,
            fld: fld_for(inputs, shortest),
            side: None,
        })
    }
}

impl Strategy for FldCrossoverStrategy<'_> {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FldCrossover
    }

    fn on_bar(&mut self, index: usize) -> BarSignal {
        if index < self.fld.period {
            return BarSignal::default();
        }
        let (Some(bar), Some(fld)) = (self.series.bars().get(index), self.fld.value_at(index))
        else {
            return BarSignal::default();
        };
        let side = if bar.close > fld {
            Some(Direction::Long)
        } else if bar.close < fld {
            Some(Direction::Short)
        } else {
            self.side
        };
        let changed = side.is_some() && side != self.side;
        self.side = side;
        if changed {
            BarSignal {
                entry: side,
                opposing: side,
            }
        } else {
            BarSignal::default()
        }
    }
}

struct CycleTrack {
    cycle: TradedCycle,
    fld: FldSeries,
    crossings: Vec<CrossingEvent>,
}

/// Enters when |S| reaches the entry threshold and the longest cycle is on
/// the same side; exits on an opposing S of at least the exit threshold.
pub struct MultiCycleStrategy<'a> {
    inputs: StrategyInputs<'a>,
    tracks: Vec<CycleTrack>,
    longest: usize,
}

impl<'a> MultiCycleStrategy<'a> {
    fn new(inputs: StrategyInputs<'a>) -> Option<Self> {
        let longest = inputs.cycles.iter().map(|c| c.length).max()?;
        let tracks = inputs
            .cycles
            .iter()
            .map(|&cycle| {
                let fld = fld_for(&inputs, cycle.length);
                let crossings = detect_crossings(inputs.series, &fld);
                CycleTrack {
                    cycle,
                    fld,
                    crossings,
                }
            })
            .collect();
        Some(MultiCycleStrategy {
            inputs,
            tracks,
            longest,
        })
    }
}

impl Strategy for MultiCycleStrategy<'_> {
    fn kind(&self) -> StrategyKind {
        StrategyKind::MultiCycle
    }

    fn on_bar(&mut self, index: usize) -> BarSignal {
        let series = self.inputs.series;
        let states: Vec<_> = self
            .tracks
            .iter()
            .filter(|t| index >= t.fld.period)
            .filter_map(|t| {
                cycle_state_at(
                    series,
                    &t.fld,
                    &t.crossings,
                    index,
                    self.inputs.fld.recent_bars,
                    t.cycle.power,
                )
            })
            .collect();
        if states.is_empty() {
            return BarSignal::default();
        }

        let relative_volume = series.relative_volume(index, self.inputs.signal.volume_lookback);
        let result = synthesize_signal(&states, self.inputs.regime, relative_volume, self.inputs.signal);
        let s = result.strength;

        let longest_bullish = states
            .iter()
            .find(|st| st.cycle_length == self.longest)
            .map(|st| st.bullish);

        let entry = match longest_bullish {
            Some(true) if s >= self.inputs.entry_threshold => Some(Direction::Long),
            Some(false) if s <= -self.inputs.entry_threshold => Some(Direction::Short),
            _ => None,
        };
        let opposing = if s >= self.inputs.exit_threshold {
            Some(Direction::Long)
        } else if s <= -self.inputs.exit_threshold {
            Some(Direction::Short)
        } else {
            None
        };
        BarSignal { entry, opposing }
    }
}
