//! Signal synthesis from per-cycle states, plus position guidance derived
//! from a finished signal.

use std::fmt;

use super::fld::CycleState;
use super::regime::RegimeInfo;

/// Crossing contribution multiplier when volume confirms.
const VOLUME_BOOST: f64 = 1.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum SignalLabel {
    StrongBuy,
    Buy,
    WeakBuy,
    Neutral,
    WeakSell,
    Sell,
    StrongSell,
}

impl SignalLabel {
    /// +1 for buys, -1 for sells, 0 for neutral.
    pub fn direction(&self) -> i8 {
        match self {
            SignalLabel::StrongBuy | SignalLabel::Buy | SignalLabel::WeakBuy => 1,
            SignalLabel::Neutral => 0,
            SignalLabel::WeakSell | SignalLabel::Sell | SignalLabel::StrongSell => -1,
        }
    }

    /// Label for a combined strength. Strong tiers require volume
    /// confirmation and otherwise drop one tier.
    pub fn from_strength(strength: f64, volume_confirmed: bool) -> Self {
        let magnitude = strength.abs();
        let tier = if magnitude > 2.0 {
            if volume_confirmed { 3 } else { 2 }
        } else if magnitude > 1.0 {
            2
        } else if magnitude > 0.0 {
            1
        } else {
            0
        };
        match (tier, strength > 0.0) {
            (0, _) => SignalLabel::Neutral,
            (1, true) => SignalLabel::WeakBuy,
            (2, true) => SignalLabel::Buy,
            (_, true) => SignalLabel::StrongBuy,
            (1, false) => SignalLabel::WeakSell,
            (2, false) => SignalLabel::Sell,
            (_, false) => SignalLabel::StrongSell,
        }
    }
}

impl fmt::Display for SignalLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalLabel::StrongBuy => "Strong Buy",
            SignalLabel::Buy => "Buy",
            SignalLabel::WeakBuy => "Weak Buy",
            SignalLabel::Neutral => "Neutral",
            SignalLabel::WeakSell => "Weak Sell",
            SignalLabel::Sell => "Sell",
            SignalLabel::StrongSell => "Strong Sell",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ConfidenceTier {
    Low,
    Medium,
    High,
}

impl ConfidenceTier {
    pub fn from_strength(strength: f64) -> Self {
        let magnitude = strength.abs();
        if magnitude > 3.0 {
            ConfidenceTier::High
        } else if magnitude > 1.5 {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConfidenceTier::Low => "Low",
            ConfidenceTier::Medium => "Medium",
            ConfidenceTier::High => "High",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalConfig {
    /// Relative volume above which a signal is volume-confirmed.
    pub volume_threshold: f64,
    /// Bars in the trailing volume average.
    pub volume_lookback: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        SignalConfig {
            volume_threshold: 1.5,
            volume_lookback: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SignalResult {
    pub label: SignalLabel,
    pub confidence: ConfidenceTier,
    pub strength: f64,
    pub volume_confirmed: bool,
    pub relative_volume: f64,
    pub cycle_states: Vec<CycleState>,
    pub regime: RegimeInfo,
}

impl SignalResult {
    pub const FEATURE_COUNT: usize = 10;

    /// Feature vector for the quality classifier.
    pub fn features(&self) -> Vec<f64> {
        let n = self.cycle_states.len().max(1) as f64;
        let count = |pred: fn(&CycleState) -> bool| {
            self.cycle_states.iter().filter(|s| pred(s)).count() as f64 / n
        };
        vec![
            self.strength,
            self.strength.abs(),
            self.relative_volume,
            if self.volume_confirmed { 1.0 } else { 0.0 },
            count(|s| s.bullish),
            count(|s| s.recent_crossover),
            count(|s| s.recent_crossunder),
            self.regime.trend_strength / 100.0,
            self.regime.volatility,
            self.regime.range_width,
        ]
    }
}

/// Combine cycle states into one directional signal.
///
/// Each cycle contributes ±weight by side, then +0.5·weight for a recent
/// crossover and -0.5·weight for a recent crossunder. A cycle with a recent
/// crossing has its contribution scaled by 1.2 when the relative volume is
/// above the threshold.
pub fn synthesize_signal(
    cycle_states: &[CycleState],
    regime: &RegimeInfo,
    relative_volume: f64,
    config: &SignalConfig,
) -> SignalResult {
    let volume_confirmed = relative_volume > config.volume_threshold;

    let strength: f64 = cycle_states
        .iter()
        .map(|state| {
            let w = state.weight;
            let mut contribution = if state.bullish { w } else { -w };
            if state.recent_crossover {
                contribution += 0.5 * w;
            }
            if state.recent_crossunder {
                contribution -= 0.5 * w;
            }
            if volume_confirmed && (state.recent_crossover || state.recent_crossunder) {
                contribution *= VOLUME_BOOST;
            }
            contribution
        })
        .sum();

    SignalResult {
        label: SignalLabel::from_strength(strength, volume_confirmed),
        confidence: ConfidenceTier::from_strength(strength),
        strength,
        volume_confirmed,
        relative_volume,
        cycle_states: cycle_states.to_vec(),
        regime: regime.clone(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum GuidanceAction {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Horizon {
    ShortTerm,
    MediumTerm,
    LongTerm,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PositionGuidance {
    pub action: GuidanceAction,
    /// Fraction of a full position.
    pub size: f64,
    pub entry: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub risk_reward: Option<f64>,
    pub horizon: Horizon,
}

/// Action, size, 2%/4% stop/target and holding horizon for a signal.
pub fn position_guidance(signal: &SignalResult, last_price: f64) -> PositionGuidance {
    let size = match signal.confidence {
        ConfidenceTier::High => 1.0,
        ConfidenceTier::Medium => 0.5,
        ConfidenceTier::Low => 0.25,
    };
    let longest = signal
        .cycle_states
        .iter()
        .map(|s| s.cycle_length)
        .max()
        .unwrap_or(0);
    let horizon = if longest > 50 {
        Horizon::LongTerm
    } else if longest > 20 {
        Horizon::MediumTerm
    } else {
        Horizon::ShortTerm
    };

    let (action, stop_loss, take_profit) = match signal.label.direction() {
        1 => (
            GuidanceAction::Buy,
            Some(last_price * 0.98),
            Some(last_price * 1.04),
        ),
        -1 => (
            GuidanceAction::Sell,
            Some(last_price * 1.02),
            Some(last_price * 0.96),
        ),
        _ => (GuidanceAction::Hold, None, None),
    };

    PositionGuidance {
        action,
        size: if action == GuidanceAction::Hold { 0.0 } else { size },
        entry: last_price,
        stop_loss,
        take_profit,
        risk_reward: stop_loss.map(|_| 2.0),
        horizon,
    }
}
