//! Runs every enabled strategy over one snapshot and aggregates the results.

use std::panic::{catch_unwind, AssertUnwindSafe};

use log::{error, info, warn};

use crate::domain::enriched::EnrichedSeries;
use crate::domain::signal::{Side, Signal};
use crate::domain::strategy::registry::{self, StrategySettings};
use crate::domain::strategy::{PositionSizer, SharedBalance, Strategy, StrategyDeps};

/// Side share a vote must exceed to produce a consolidated signal.
pub const CONSENSUS_THRESHOLD: f64 = 0.6;

pub struct StrategyManager {
    settings: StrategySettings,
    deps: StrategyDeps,
    enabled: Vec<String>,
    strategies: Vec<Box<dyn Strategy>>,
}

impl StrategyManager {
    pub fn new(enabled: &[String], settings: StrategySettings, deps: StrategyDeps) -> Self {
        let mut manager = StrategyManager {
            settings,
            deps,
            enabled: Vec::new(),
            strategies: Vec::new(),
        };
        manager.set_enabled(enabled);
        manager
    }

    /// Manager over already-built strategies, run in the given order.
    pub fn from_strategies(strategies: Vec<Box<dyn Strategy>>) -> Self {
        StrategyManager {
            settings: StrategySettings::default(),
            deps: StrategyDeps {
                sizer: PositionSizer::default(),
                balance: SharedBalance::new(0.0),
            },
            enabled: strategies.iter().map(|s| s.id().to_string()).collect(),
            strategies,
        }
    }

    /// Replace the enabled set and rebuild the registry from it.
    ///
    /// Unknown identifiers are logged and skipped.
    pub fn set_enabled(&mut self, ids: &[String]) {
        self.enabled = ids.to_vec();
        self.strategies.clear();
        for id in ids {
            match registry::build(id, &self.settings, &self.deps) {
                Ok(strategy) => {
                    info!("loaded strategy: {}", id);
                    self.strategies.push(strategy);
                }
                Err(e) => error!("cannot load strategy {}: {}", id, e),
            }
        }
    }

    pub fn enabled(&self) -> &[String] {
        &self.enabled
    }

    /// Identifiers of the strategies that actually loaded.
    pub fn loaded(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.id()).collect()
    }

    /// Every strategy's signals against the same snapshot, concatenated.
    ///
    /// A failing or panicking strategy is logged and contributes nothing.
    /// When every signal carries a confidence the result is ordered by it,
    /// highest first; otherwise generation order is kept.
    pub fn generate_signals(&self, series: &EnrichedSeries) -> Vec<Signal> {
        let mut all = Vec::new();

        for strategy in &self.strategies {
            let outcome = catch_unwind(AssertUnwindSafe(|| strategy.generate_signals(series)));
            match outcome {
                Ok(Ok(signals)) => all.extend(signals),
                Ok(Err(e)) => error!("strategy {} failed: {}", strategy.id(), e),
                Err(panic) => error!(
                    "strategy {} panicked: {}",
                    strategy.id(),
                    panic_message(panic.as_ref())
                ),
            }
        }

        if !all.is_empty() && all.iter().all(|s| s.confidence.is_some()) {
            all.sort_by(|a, b| {
                let (a, b) = (a.confidence.unwrap_or(0.0), b.confidence.unwrap_or(0.0));
                b.total_cmp(&a)
            });
        }
        all
    }

    pub fn combine_signals(&self, signals: &[Signal]) -> Vec<Signal> {
        combine_signals(signals)
    }
}

/// Majority vote: a side wins when its share of all signals exceeds
/// [`CONSENSUS_THRESHOLD`]; its best signal is emitted.
pub fn combine_signals(signals: &[Signal]) -> Vec<Signal> {
    if signals.is_empty() {
        return Vec::new();
    }
    let total = signals.len() as f64;

    [Side::Buy, Side::Sell]
        .into_iter()
        .filter_map(|side| {
            let votes: Vec<&Signal> = signals.iter().filter(|s| s.side == side).collect();
            let share = votes.len() as f64 / total;
            if share > CONSENSUS_THRESHOLD {
                best_signal(&votes).cloned()
            } else {
                if !votes.is_empty() {
                    warn!("no consensus for {}: {:.2} of signals", side, share);
                }
                None
            }
        })
        .collect()
}

/// Highest confidence, earliest on ties; the first signal when none is scored.
fn best_signal<'a>(candidates: &[&'a Signal]) -> Option<&'a Signal> {
    if !candidates.iter().any(|s| s.confidence.is_some()) {
        return candidates.first().copied();
    }
    candidates.iter().copied().fold(None, |best: Option<&Signal>, s| match best {
        Some(b) if s.confidence.unwrap_or(0.0) <= b.confidence.unwrap_or(0.0) => Some(b),
        _ => Some(s),
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::BotError;
    use crate::domain::timeframe::Timeframe;
    use chrono::{TimeZone, Utc};

    fn signal(strategy: &str, side: Side, confidence: Option<f64>) -> Signal {
        Signal {
            strategy: strategy.into(),
            symbol: "BTCUSDT".into(),
            side,
            price: 100.0,
            quantity: 0.01,
            stop_loss: None,
            take_profit: None,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            confidence,
        }
    }

    struct Fixed {
        id: &'static str,
        signals: Vec<Signal>,
    }

    impl Strategy for Fixed {
        fn id(&self) -> &str {
            self.id
        }
        fn generate_signals(&self, _: &EnrichedSeries) -> Result<Vec<Signal>, BotError> {
            Ok(self.signals.clone())
        }
        fn size_position(&self, _: f64, _: Side) -> f64 {
            0.0
        }
    }

    struct Failing;

    impl Strategy for Failing {
        fn id(&self) -> &str {
            "failing"
        }
        fn generate_signals(&self, _: &EnrichedSeries) -> Result<Vec<Signal>, BotError> {
            Err(BotError::StrategyFailure {
                strategy: "failing".into(),
                reason: "boom".into(),
            })
        }
        fn size_position(&self, _: f64, _: Side) -> f64 {
            0.0
        }
    }

    struct Panicking;

    impl Strategy for Panicking {
        fn id(&self) -> &str {
            "panicking"
        }
        fn generate_signals(&self, _: &EnrichedSeries) -> Result<Vec<Signal>, BotError> {
            panic!("index out of range")
        }
        fn size_position(&self, _: f64, _: Side) -> f64 {
            0.0
        }
    }

    fn fixed(id: &'static str, signals: Vec<Signal>) -> Box<dyn Strategy> {
        Box::new(Fixed { id, signals })
    }

    fn series() -> EnrichedSeries {
        EnrichedSeries::empty("BTCUSDT", Timeframe::M5)
    }

    #[test]
    fn failures_are_isolated() {
        let manager = StrategyManager::from_strategies(vec![
            Box::new(Failing),
            fixed("a", vec![signal("a", Side::Buy, None)]),
            Box::new(Panicking),
            fixed("b", vec![signal("b", Side::Sell, None)]),
        ]);
        let signals = manager.generate_signals(&series());
        let ids: Vec<&str> = signals.iter().map(|s| s.strategy.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn sorted_by_confidence_when_all_scored() {
        let manager = StrategyManager::from_strategies(vec![
            fixed("low", vec![signal("low", Side::Buy, Some(0.2))]),
            fixed("high", vec![signal("high", Side::Buy, Some(0.9))]),
        ]);
        let signals = manager.generate_signals(&series());
        assert_eq!(signals[0].strategy, "high");
        assert_eq!(signals[1].strategy, "low");
    }

    #[test]
    fn order_kept_when_any_unscored() {
        let manager = StrategyManager::from_strategies(vec![
            fixed("low", vec![signal("low", Side::Buy, Some(0.2))]),
            fixed("none", vec![signal("none", Side::Buy, None)]),
            fixed("high", vec![signal("high", Side::Buy, Some(0.9))]),
        ]);
        let ids: Vec<String> = manager
            .generate_signals(&series())
            .into_iter()
            .map(|s| s.strategy)
            .collect();
        assert_eq!(ids, vec!["low", "none", "high"]);
    }

    #[test]
    fn two_buys_one_sell_combine_to_first_buy() {
        let signals = vec![
            signal("first", Side::Buy, None),
            signal("seller", Side::Sell, None),
            signal("second", Side::Buy, None),
        ];
        let combined = combine_signals(&signals);
        assert_eq!(combined.len(), 1);
        assert_eq!(combined[0].side, Side::Buy);
        assert_eq!(combined[0].strategy, "first");
    }

    #[test]
    fn even_split_emits_nothing() {
        let signals = vec![signal("a", Side::Buy, None), signal("b", Side::Sell, None)];
        assert!(combine_signals(&signals).is_empty());
    }

    #[test]
    fn exactly_sixty_percent_is_not_enough() {
        let signals = vec![
            signal("a", Side::Buy, None),
            signal("b", Side::Buy, None),
            signal("c", Side::Buy, None),
            signal("d", Side::Sell, None),
            signal("e", Side::Sell, None),
        ];
        assert!(combine_signals(&signals).is_empty());
    }

    #[test]
    fn highest_confidence_wins_with_earliest_tie() {
        let signals = vec![
            signal("a", Side::Sell, Some(0.5)),
            signal("b", Side::Sell, Some(0.8)),
            signal("c", Side::Sell, Some(0.8)),
        ];
        let combined = combine_signals(&signals);
        assert_eq!(combined.len(), 1);
        assert_eq!(combined[0].strategy, "b");
    }

    #[test]
    fn no_input_no_output() {
        assert!(combine_signals(&[]).is_empty());
    }

    #[test]
    fn set_enabled_skips_unknown() {
        let deps = StrategyDeps {
            sizer: PositionSizer::default(),
            balance: SharedBalance::new(10000.0),
        };
        let mut manager = StrategyManager::new(
            &["ichimoku".to_string()],
            StrategySettings::default(),
            deps,
        );
        assert_eq!(manager.loaded(), vec!["ichimoku"]);

        manager.set_enabled(&["vwap".to_string(), "ichimoku".to_string()]);
        assert_eq!(manager.enabled(), &["vwap".to_string(), "ichimoku".to_string()]);
        assert_eq!(manager.loaded(), vec!["ichimoku"]);

        manager.set_enabled(&[]);
        assert!(manager.loaded().is_empty());
    }
}
