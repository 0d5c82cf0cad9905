//! Integration tests across the analysis pipeline and backtest engine.
//!
//! Tests cover:
//! - Cycle detection on pure sinusoids and on short series
//! - FLD crossing idempotence (property test)
//! - Signal synthesis edge cases
//! - Multi-timeframe alignment when every timeframe agrees
//! - Backtest invariants: single open position, exit after entry, equity
//!   curve length, determinism (property tests)
//! - Scenario: rising series with the FLD crossover strategy
//! - Batch scan over a mock data port with isolated failures
//! - Shared quality classifier used from several threads

mod common;

use approx::assert_relative_eq;
use common::*;
use fibcycles::domain::alignment::align_timeframes;
use fibcycles::domain::analysis::{AnalysisParams, analyze_series};
use fibcycles::domain::backtest::{BacktestConfig, run_backtest};
use fibcycles::domain::classifier::{
    ClassifierConfig, NEUTRAL_SCORE, SharedQualityClassifier, SignalQualityClassifier,
};
use fibcycles::domain::cycle::{CycleConfig, DetectionMethod, detect_cycles};
use fibcycles::domain::fld::{CycleState, compute_fld, detect_crossings};
use fibcycles::domain::position::{Direction, ExitReason};
use fibcycles::domain::regime::RegimeInfo;
use fibcycles::domain::risk::{StopLossMethod, TakeProfitMethod};
use fibcycles::domain::scanner::{ScanConfig, scan_batch};
use fibcycles::domain::signal::{SignalConfig, SignalLabel, SignalResult, synthesize_signal};
use fibcycles::domain::strategy::StrategyKind;
use fibcycles::domain::timeframe::{Timeframe, TimeframeWeights};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

fn detection_config(method: DetectionMethod) -> CycleConfig {
    CycleConfig {
        min_period: 10,
        max_period: 100,
        method,
        ..CycleConfig::default()
    }
}

mod cycle_detection {
    use super::*;

    #[test]
    fn sinusoid_sweep_ranks_true_period_first() {
        let config = CycleConfig {
            min_period: 10,
            max_period: 60,
            ..CycleConfig::default()
        };
        for period in 10..=60usize {
            let series = sine_series("SINE", Timeframe::Daily, 120, period as f64);
            let (all, _) = detect_cycles(&series, &config).unwrap();
            let top = all.first().map(|c| c.period);
            assert!(
                top.is_some_and(|p| p.abs_diff(period) <= 1),
                "period {period}: top candidate {top:?}"
            );
        }
    }

    #[test]
    fn pure_sine_reports_one_cycle() {
        let series = sine_series("SINE", Timeframe::Daily, 500, 34.0);
        let (all, key) = detect_cycles(&series, &detection_config(DetectionMethod::Combined)).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(key.iter().map(|c| c.period).collect::<Vec<_>>(), vec![34]);
    }

    #[test]
    fn combined_method_finds_key_cycle() {
        let series = sine_series("SINE", Timeframe::Daily, 500, 34.0);
        let (all, key) = detect_cycles(&series, &detection_config(DetectionMethod::Combined)).unwrap();
        assert!(all[0].period.abs_diff(34) <= 1);
        assert!(key.iter().any(|c| c.period.abs_diff(34) <= 1));
        assert!(all.iter().all(|c| (10..=100).contains(&c.period)));
    }

    #[test]
    fn short_series_returns_empty_key_set() {
        let series = sine_series("SINE", Timeframe::Daily, 199, 34.0);
        let (all, key) = detect_cycles(&series, &detection_config(DetectionMethod::Combined)).unwrap();
        assert!(all.is_empty());
        assert!(key.is_empty());
    }
}

mod fld_crossings {
    use super::*;

    proptest! {
        #[test]
        fn detection_is_idempotent(
            steps in prop::collection::vec(-3.0f64..3.0, 60..200),
            cycle in 4usize..40,
        ) {
            let series = series_from_closes("WALK", Timeframe::Daily, &walk_closes(&steps), 0.5);
            let fld = compute_fld(&series, cycle, None);
            let first = detect_crossings(&series, &fld);
            let second = detect_crossings(&series, &fld);
            prop_assert_eq!(&first, &second);
            for event in &first {
                prop_assert!(event.index >= fld.period);
            }
        }
    }
}

mod signal_synthesis {
    use super::*;

    fn bullish_state(cycle_length: usize) -> CycleState {
        CycleState {
            cycle_length,
            bullish: true,
            recent_crossover: false,
            recent_crossunder: false,
            power: 1.0,
            weight: 1.5,
            fld_value: 100.0,
        }
    }

    #[test]
    fn all_bullish_without_volume_is_not_strong() {
        let states = vec![bullish_state(21), bullish_state(34), bullish_state(55)];
        let signal = synthesize_signal(&states, &RegimeInfo::neutral(), 1.0, &SignalConfig::default());
        assert!(signal.strength > 2.0);
        assert_eq!(signal.label, SignalLabel::Buy);
        assert!(!signal.volume_confirmed);
    }

    #[test]
    fn no_cycles_is_neutral() {
        let signal = synthesize_signal(&[], &RegimeInfo::neutral(), 3.0, &SignalConfig::default());
        assert_eq!(signal.strength, 0.0);
        assert_eq!(signal.label, SignalLabel::Neutral);
    }
}

mod alignment {
    use super::*;

    fn signal(strength: f64) -> SignalResult {
        SignalResult {
            label: SignalLabel::from_strength(strength, false),
            confidence: fibcycles::domain::signal::ConfidenceTier::from_strength(strength),
            strength,
            volume_confirmed: false,
            relative_volume: 1.0,
            cycle_states: Vec::new(),
            regime: RegimeInfo::neutral(),
        }
    }

    #[test]
    fn agreeing_timeframes_score_the_weighted_strength() {
        let mut results = BTreeMap::new();
        results.insert(Timeframe::Weekly, Some(signal(2.5)));
        results.insert(Timeframe::Daily, Some(signal(1.0)));
        results.insert(Timeframe::OneHour, Some(signal(0.4)));
        results.insert(Timeframe::FiveMinute, None);
        let alignment = align_timeframes(&results, &TimeframeWeights::default());

        assert_eq!(alignment.agreeing_fraction, 1.0);
        assert_relative_eq!(alignment.score, alignment.weighted_strength.abs(), epsilon = 1e-12);
        assert_eq!(alignment.direction, 1);
        assert_eq!(alignment.included.len(), 3);
    }

    #[test]
    fn analysed_timeframes_align() {
        let params = AnalysisParams {
            cycles: CycleConfig {
                min_period: 15,
                max_period: 60,
                ..CycleConfig::default()
            },
            ..AnalysisParams::default()
        };
        let mut results = BTreeMap::new();
        for tf in [Timeframe::Daily, Timeframe::FourHour] {
            let analysis = analyze_series(&sine_series("SINE", tf, 400, 34.0), &params).unwrap();
            results.insert(tf, Some(analysis.signal));
        }
        let alignment = align_timeframes(&results, &TimeframeWeights::default());
        assert_eq!(alignment.included, vec![Timeframe::Daily, Timeframe::FourHour]);
        assert!((0.0..=1.0).contains(&alignment.agreeing_fraction));
    }
}

mod backtest {
    use super::*;

    fn config(strategy: StrategyKind, cycles: Vec<usize>) -> BacktestConfig {
        BacktestConfig {
            strategy,
            warmup: 50,
            cycles,
            entry_threshold: 0.5,
            exit_threshold: 0.25,
            ..BacktestConfig::default()
        }
    }

    #[test]
    fn rising_series_trades_long_only() {
        let series = rising_series(200);
        let config = BacktestConfig {
            stop_loss: StopLossMethod::FixedPercent { pct: 5.0 },
            take_profit: TakeProfitMethod::FixedPercent { pct: 10.0 },
            ..config(StrategyKind::FldCrossover, vec![21])
        };
        let result = run_backtest(&series, &config).unwrap();

        assert!(!result.trades.is_empty());
        assert!(result.trades.iter().all(|t| t.direction == Direction::Long));
        assert!(result.trades.iter().all(|t| t.realized_return >= 0.0));
        assert_eq!(result.cycles, vec![21]);
    }

    #[test]
    fn rising_series_with_detected_cycle_trades_long_only() {
        let series = rising_series(300);
        let result = run_backtest(&series, &BacktestConfig::default()).unwrap();

        assert_eq!(result.cycles.len(), 1);
        assert!(!result.trades.is_empty());
        assert!(result.trades.iter().all(|t| t.direction == Direction::Long));
        assert!(result.trades.iter().all(|t| t.realized_return >= 0.0));
    }

    #[test]
    fn symmetric_sine_trades_both_sides() {
        let series = sine_series("SINE", Timeframe::Daily, 400, 21.0);
        let config = BacktestConfig {
            stop_loss: StopLossMethod::FixedPercent { pct: 50.0 },
            take_profit: TakeProfitMethod::FixedPercent { pct: 90.0 },
            ..config(StrategyKind::FldCrossover, vec![21])
        };
        let result = run_backtest(&series, &config).unwrap();
        assert!(result.trades.iter().any(|t| t.direction == Direction::Long));
        assert!(result.trades.iter().any(|t| t.direction == Direction::Short));
    }

    #[test]
    fn detects_cycles_on_warmup_window() {
        let series = sine_series("SINE", Timeframe::Daily, 400, 34.0);
        let config = BacktestConfig {
            warmup: 200,
            cycle_config: CycleConfig {
                min_period: 15,
                max_period: 60,
                ..CycleConfig::default()
            },
            ..config(StrategyKind::FldCrossover, Vec::new())
        };
        let result = run_backtest(&series, &config).unwrap();
        assert!(!result.cycles.is_empty());
        assert_eq!(result.equity_curve.len(), 200);
    }

    #[test]
    fn zero_trades_give_zero_metrics() {
        let series = rising_series(40);
        let result = run_backtest(&series, &config(StrategyKind::FldCrossover, vec![21])).unwrap();
        assert!(result.trades.is_empty());
        assert_eq!(result.metrics.profit_factor, 0.0);
        assert_eq!(result.metrics.trade_count, 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn ledger_invariants_hold(
            steps in prop::collection::vec(-2.0f64..2.0, 120..260),
            cycle in 5usize..30,
            multi in any::<bool>(),
        ) {
            let series = series_from_closes("WALK", Timeframe::Daily, &walk_closes(&steps), 0.8);
            let config = if multi {
                config(StrategyKind::MultiCycle, vec![cycle, cycle * 2])
            } else {
                config(StrategyKind::FldCrossover, vec![cycle])
            };
            let result = run_backtest(&series, &config).unwrap();

            prop_assert_eq!(result.equity_curve.len(), series.len() - config.warmup);
            for trade in &result.trades {
                prop_assert!(trade.exit_index >= trade.entry_index);
                prop_assert!(trade.entry_index >= config.warmup);
            }
            for pair in result.trades.windows(2) {
                if pair[0].exit_reason == ExitReason::OpposingSignal {
                    prop_assert!(pair[1].entry_index >= pair[0].exit_index);
                } else {
                    prop_assert!(pair[1].entry_index > pair[0].exit_index);
                }
            }
            prop_assert!(result.equity_curve.iter().all(|p| p.equity.is_finite()));
        }

        #[test]
        fn runs_are_deterministic(
            steps in prop::collection::vec(-2.0f64..2.0, 120..200),
            cycle in 5usize..30,
        ) {
            let series = series_from_closes("WALK", Timeframe::Daily, &walk_closes(&steps), 0.8);
            let config = config(StrategyKind::MultiCycle, vec![cycle, cycle + 8]);
            let first = run_backtest(&series, &config).unwrap();
            let second = run_backtest(&series, &config).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}

mod scanning {
    use super::*;

    fn params() -> AnalysisParams {
        AnalysisParams {
            cycles: CycleConfig {
                min_period: 15,
                max_period: 60,
                ..CycleConfig::default()
            },
            ..AnalysisParams::default()
        }
    }

    #[test]
    fn batch_isolates_failures() {
        let port = MockDataPort::new()
            .with_series(sine_series("AAA", Timeframe::Daily, 300, 21.0))
            .with_series(sine_series("BBB", Timeframe::Daily, 300, 34.0))
            .with_series(sine_series("SHORT", Timeframe::Daily, 50, 21.0))
            .with_error("DOWN", "connection refused");
        let symbols: Vec<String> = ["DOWN", "AAA", "SHORT", "BBB", "NONE"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let config = ScanConfig {
            workers: 3,
            batch_size: 2,
            batch_delay: Duration::ZERO,
            max_bars: 1000,
        };

        let outcomes = scan_batch(&port, &symbols, Timeframe::Daily, &params(), &config, None).unwrap();

        assert_eq!(outcomes.len(), 5);
        let ok: Vec<&str> = outcomes
            .iter()
            .filter(|o| o.result.is_ok())
            .map(|o| o.symbol.as_str())
            .collect();
        assert_eq!(ok.len(), 2);
        assert!(ok.contains(&"AAA") && ok.contains(&"BBB"));
        let failed: Vec<&str> = outcomes[2..].iter().map(|o| o.symbol.as_str()).collect();
        assert_eq!(failed, vec!["DOWN", "SHORT", "NONE"]);
        assert!(outcomes[3].result.as_ref().unwrap_err().is_insufficient_data());
    }
}

mod classifier {
    use super::*;

    #[test]
    fn shared_classifier_accepts_concurrent_outcomes() {
        let shared = SharedQualityClassifier::new(SignalQualityClassifier::new(
            2,
            ClassifierConfig {
                min_samples: 40,
                retrain_every: 20,
            },
        ));
        assert_eq!(shared.score(&[1.0, 0.0]), NEUTRAL_SCORE);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let shared = shared.clone();
                thread::spawn(move || {
                    for i in 0..20 {
                        let x = (t * 20 + i) as f64 / 80.0;
                        let positive = i % 2 == 0;
                        let features = if positive { [1.0 + x, x] } else { [-1.0 - x, x] };
                        shared.add_outcome(&features, positive).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(shared.is_trained());
        assert!(shared.score(&[2.0, 0.5]) > 0.5);
        assert!(shared.score(&[-2.0, 0.5]) < 0.5);
    }
}
