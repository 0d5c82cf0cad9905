//! Multi-timeframe alignment of per-timeframe signals.

use std::collections::BTreeMap;

use super::signal::{ConfidenceTier, SignalLabel, SignalResult};
use super::timeframe::{Timeframe, TimeframeWeights};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Alignment {
    /// Fraction agreeing with the majority × |weighted strength|.
    pub score: f64,
    /// Sign of the weighted strength: 1, -1 or 0.
    pub direction: i8,
    pub composite: SignalLabel,
    pub confidence: ConfidenceTier,
    pub weighted_strength: f64,
    pub agreeing_fraction: f64,
    /// Timeframes that had a result.
    pub included: Vec<Timeframe>,
}

impl Alignment {
    fn empty() -> Self {
        Alignment {
            score: 0.0,
            direction: 0,
            composite: SignalLabel::Neutral,
            confidence: ConfidenceTier::Low,
            weighted_strength: 0.0,
            agreeing_fraction: 0.0,
            included: Vec::new(),
        }
    }
}

/// Combine per-timeframe results. `None` entries (insufficient data) are
/// left out of both the weighted average and the agreement count.
pub fn align_timeframes(
    results: &BTreeMap<Timeframe, Option<SignalResult>>,
    weights: &TimeframeWeights,
) -> Alignment {
    let present: Vec<(Timeframe, &SignalResult)> = results
        .iter()
        .filter_map(|(tf, r)| r.as_ref().map(|r| (*tf, r)))
        .collect();
    if present.is_empty() {
        return Alignment::empty();
    }

    let total_weight: f64 = present.iter().map(|(tf, _)| weights.weight(*tf)).sum();
    if total_weight <= 0.0 {
        return Alignment::empty();
    }
    let weighted_strength = present
        .iter()
        .map(|(tf, r)| weights.weight(*tf) * r.strength)
        .sum::<f64>()
        / total_weight;

    let bullish = present.iter().filter(|(_, r)| r.strength > 0.0).count();
    let bearish = present.iter().filter(|(_, r)| r.strength < 0.0).count();
    let agreeing_fraction = bullish.max(bearish) as f64 / present.len() as f64;

    let direction: i8 = if weighted_strength > 0.0 {
        1
    } else if weighted_strength < 0.0 {
        -1
    } else {
        0
    };

    // Strong composite tiers need volume confirmation from a timeframe on
    // the same side.
    let volume_confirmed = present
        .iter()
        .any(|(_, r)| r.volume_confirmed && r.strength * weighted_strength > 0.0);

    Alignment {
        score: agreeing_fraction * weighted_strength.abs(),
        direction,
        composite: SignalLabel::from_strength(weighted_strength, volume_confirmed),
        confidence: ConfidenceTier::from_strength(weighted_strength),
        weighted_strength,
        agreeing_fraction,
        included: present.iter().map(|(tf, _)| *tf).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::regime::RegimeInfo;

    fn result(strength: f64, volume_confirmed: bool) -> SignalResult {
        SignalResult {
            label: SignalLabel::from_strength(strength, volume_confirmed),
            confidence: ConfidenceTier::from_strength(strength),
            strength,
            volume_confirmed,
            relative_volume: 1.0,
            cycle_states: Vec::new(),
            regime: RegimeInfo::neutral(),
        }
    }

    #[test]
    fn agreement_score_equals_weighted_strength() {
        let mut results = BTreeMap::new();
        results.insert(Timeframe::Weekly, Some(result(3.0, false)));
        results.insert(Timeframe::Daily, Some(result(1.0, false)));
        results.insert(Timeframe::OneHour, Some(result(2.0, false)));
        let alignment = align_timeframes(&results, &TimeframeWeights::default());

        let expected = (3.0 * 3.0 + 2.5 * 1.0 + 1.5 * 2.0) / (3.0 + 2.5 + 1.5);
        assert!((alignment.weighted_strength - expected).abs() < 1e-12);
        assert!((alignment.agreeing_fraction - 1.0).abs() < f64::EPSILON);
        assert!((alignment.score - expected.abs()).abs() < 1e-12);
        assert_eq!(alignment.direction, 1);
        assert_eq!(alignment.composite, SignalLabel::Buy);
    }

    #[test]
    fn missing_timeframes_are_excluded() {
        let mut results = BTreeMap::new();
        results.insert(Timeframe::Weekly, None);
        results.insert(Timeframe::Daily, Some(result(-2.0, false)));
        let alignment = align_timeframes(&results, &TimeframeWeights::default());
        assert!((alignment.weighted_strength + 2.0).abs() < 1e-12);
        assert_eq!(alignment.included, vec![Timeframe::Daily]);
        assert_eq!(alignment.direction, -1);
    }

    #[test]
    fn disagreement_reduces_score() {
        let mut results = BTreeMap::new();
        results.insert(Timeframe::Weekly, Some(result(2.0, false)));
        results.insert(Timeframe::Daily, Some(result(2.0, false)));
        results.insert(Timeframe::FiveMinute, Some(result(-1.0, false)));
        let alignment = align_timeframes(&results, &TimeframeWeights::default());
        let avg = (3.0 * 2.0 + 2.5 * 2.0 - 0.5) / 6.0;
        assert!((alignment.agreeing_fraction - 2.0 / 3.0).abs() < 1e-12);
        assert!((alignment.score - 2.0 / 3.0 * avg).abs() < 1e-12);
    }

    #[test]
    fn strong_composite_needs_same_side_volume() {
        let mut results = BTreeMap::new();
        results.insert(Timeframe::Daily, Some(result(3.0, true)));
        results.insert(Timeframe::FourHour, Some(result(3.0, false)));
        let alignment = align_timeframes(&results, &TimeframeWeights::default());
        assert_eq!(alignment.composite, SignalLabel::StrongBuy);

        let mut results = BTreeMap::new();
        results.insert(Timeframe::Daily, Some(result(5.0, false)));
        results.insert(Timeframe::FourHour, Some(result(-0.5, true)));
        let alignment = align_timeframes(&results, &TimeframeWeights::default());
        assert_eq!(alignment.composite, SignalLabel::Buy);
    }

    #[test]
    fn no_results_is_neutral() {
        let mut results = BTreeMap::new();
        results.insert(Timeframe::Daily, None);
        let alignment = align_timeframes(&results, &TimeframeWeights::default());
        assert_eq!(alignment.composite, SignalLabel::Neutral);
        assert_eq!(alignment.score, 0.0);
        assert!(alignment.included.is_empty());
    }
}
