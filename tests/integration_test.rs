//! End-to-end decision cycles over the replay and mock exchanges.

mod common;

use approx::assert_relative_eq;
use chrono::Duration;
use common::*;
use kumobot::adapters::csv_exchange::CsvReplayExchange;
use kumobot::domain::engine::Engine;
use kumobot::domain::enriched::IndicatorSettings;
use kumobot::domain::error::BotError;
use kumobot::domain::pipeline::DataPipeline;
use kumobot::domain::position::ExitReason;
use kumobot::domain::risk::{RejectReason, RiskManager, RiskSettings, TradeDecision};
use kumobot::domain::settings::Settings;
use kumobot::domain::signal::Side;
use kumobot::domain::timeframe::Timeframe;
use kumobot::ports::clock::Clock;
use kumobot::ports::exchange_port::ExchangePort;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

fn replay_settings() -> Settings {
    let mut settings = Settings::default();
    settings.interval = std::time::Duration::ZERO;
    settings.strategies.ichimoku = small_ichimoku();
    settings
}

fn replay(closes: &[f64], warmup: usize) -> Arc<CsvReplayExchange> {
    Arc::new(
        CsvReplayExchange::from_candles(
            "BTCUSDT",
            Timeframe::M5,
            "USDT",
            10_000.0,
            flat_candles(closes),
        )
        .starting_at(warmup),
    )
}

#[test]
fn replay_enters_trails_and_stops_out() {
    let exchange = replay(&[10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 13.0, 20.0, 21.0, 20.5], 7);
    let clock: Arc<dyn Clock> = exchange.clone();
    let log = MemoryTradeLog::default();
    let mut engine = Engine::new(
        &replay_settings(),
        exchange.clone(),
        clock,
        Some(Box::new(log.clone())),
    );

    // Cycle 1: Tenkan crosses Kijun above the cloud at 20.
    let report = engine.run_cycle().unwrap();
    assert_eq!(report.candles, 8);
    assert_eq!(report.generated, 1);
    assert_eq!(report.executed.len(), 1);
    assert_eq!(report.executed[0].side, Side::Buy);
    assert_relative_eq!(report.executed[0].price, 20.0);
    assert_relative_eq!(report.executed[0].quantity, 0.01, epsilon = 1e-12);

    let position = engine.risk().position("BTCUSDT").unwrap();
    assert_relative_eq!(position.stop_loss.unwrap(), 16.335, epsilon = 1e-9);
    assert_relative_eq!(position.take_profit.unwrap(), 27.0, epsilon = 1e-9);

    let records = log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].strategy, "ichimoku");
    assert_relative_eq!(records[0].risk_reward_ratio, 7.0 / 3.665, epsilon = 1e-9);

    // Cycle 2: price rises, the stop follows.
    let report = engine.run_cycle().unwrap();
    assert_eq!(report.generated, 0);
    assert_eq!(report.stops_moved.len(), 1);
    assert_relative_eq!(report.stops_moved[0].1, 20.79, epsilon = 1e-9);

    // Cycle 3: price falls through the trailed stop.
    let report = engine.run_cycle().unwrap();
    assert_eq!(report.exits.len(), 1);
    assert_eq!(report.exits[0].reason, ExitReason::StopLoss);
    assert_eq!(report.failed_orders, 0);
    assert!(engine.risk().open_positions().is_empty());

    let account = exchange.fetch_account_state().unwrap();
    assert_relative_eq!(account.account_value("USDT").unwrap(), 10_000.005, epsilon = 1e-9);
    assert_eq!(exchange.remaining(), 0);
}

#[test]
fn combine_mode_passes_unanimous_signal() {
    let exchange = replay(&BUY_SETUP, 7);
    let clock: Arc<dyn Clock> = exchange.clone();
    let mut settings = replay_settings();
    settings.combine = true;
    let mut engine = Engine::new(&settings, exchange, clock, None);

    let report = engine.run_cycle().unwrap();
    assert_eq!(report.generated, 1);
    assert_eq!(report.executed.len(), 1);
}

#[test]
fn run_stops_at_cycle_limit() {
    let exchange = replay(&BUY_SETUP, 0);
    let clock: Arc<dyn Clock> = exchange.clone();
    let mut engine = Engine::new(&replay_settings(), exchange.clone(), clock, None);

    let ran = engine.run(Some(5), &AtomicBool::new(false)).unwrap();
    assert_eq!(ran, 5);
    assert_eq!(engine.cycles(), 5);
    assert_eq!(exchange.remaining(), 3);
}

#[test]
fn run_honours_shutdown() {
    let exchange = replay(&BUY_SETUP, 0);
    let clock: Arc<dyn Clock> = exchange.clone();
    let mut engine = Engine::new(&replay_settings(), exchange, clock, None);

    let shutdown = AtomicBool::new(true);
    assert_eq!(engine.run(None, &shutdown).unwrap(), 0);
    assert_eq!(engine.cycles(), 0);
}

#[test]
fn malformed_account_aborts_run() {
    let exchange = MockExchange::new(flat_candles(&BUY_SETUP), account(&[("BTC", 1.0)], &[]));
    let clock = ManualClock::new(start());
    let mut engine = Engine::new(&replay_settings(), exchange, clock, None);

    let err = engine.run(Some(3), &AtomicBool::new(false)).unwrap_err();
    assert!(matches!(err, BotError::MalformedAccount { .. }));
}

#[test]
fn missing_data_skips_cycles_without_aborting() {
    let exchange = MockExchange::new(Vec::new(), account(&[("USDT", 10_000.0)], &[]));
    exchange.fail_candles.store(true, Ordering::SeqCst);
    let clock = ManualClock::new(start());
    let mut engine = Engine::new(&replay_settings(), exchange.clone(), clock, None);

    let report = engine.run_cycle().unwrap();
    assert_eq!(report.candles, 0);
    assert_eq!(engine.run(Some(2), &AtomicBool::new(false)).unwrap(), 2);
    assert_eq!(exchange.fetches(), 3);
}

#[test]
fn failed_order_opens_nothing() {
    let exchange = MockExchange::new(
        flat_candles(&BUY_SETUP),
        account(&[("USDT", 10_000.0)], &[]),
    );
    exchange.fail_orders.store(true, Ordering::SeqCst);
    let log = MemoryTradeLog::default();
    let clock = ManualClock::new(start());
    let mut engine = Engine::new(
        &replay_settings(),
        exchange,
        clock,
        Some(Box::new(log.clone())),
    );

    let report = engine.run_cycle().unwrap();
    assert_eq!(report.generated, 1);
    assert_eq!(report.failed_orders, 1);
    assert!(report.executed.is_empty());
    assert!(engine.risk().open_positions().is_empty());
    assert!(log.records().is_empty());
}

#[test]
fn exposure_ceiling_blocks_entry() {
    // 4.6 ETH at 2000 already uses 9200 of a 10000 account.
    let exchange = MockExchange::new(
        flat_candles(&BUY_SETUP),
        account(&[("USDT", 10_000.0), ("ETH", 4.6)], &[("ETH", 2000.0)]),
    );
    let clock = ManualClock::new(start());
    let mut engine = Engine::new(&replay_settings(), exchange.clone(), clock, None);

    let report = engine.run_cycle().unwrap();
    assert_eq!(report.generated, 1);
    assert_eq!(report.rejected.len(), 1);
    assert!(exchange.submitted.lock().unwrap().is_empty());
}

#[test]
fn pipeline_respects_limit_and_degrades() {
    let candles: Vec<_> = (0..10).map(|i| candle_at(i, 100.0 + i as f64)).collect();
    let exchange = MockExchange::new(candles, account(&[("USDT", 1.0)], &[]));
    let clock = ManualClock::new(start());
    let pipeline = DataPipeline::new(
        exchange.clone(),
        clock.clone(),
        IndicatorSettings::default(),
        4,
    );

    let first = pipeline.refresh("BTCUSDT", Timeframe::M5);
    assert_eq!(first.len(), 4);
    assert_eq!(first.candles[0].close, 106.0);

    exchange.fail_candles.store(true, Ordering::SeqCst);
    clock.advance(Duration::hours(1));
    let degraded = pipeline.refresh("BTCUSDT", Timeframe::M5);
    assert!(Arc::ptr_eq(&first, &degraded));

    let other = pipeline.refresh("BTCUSDT", Timeframe::H1);
    assert!(other.is_empty());
    assert_eq!(exchange.fetches(), 3);
}

#[test]
fn failed_exit_keeps_position_until_retry_fills() {
    let exchange = MockExchange::new(
        flat_candles(&BUY_SETUP),
        account(&[("USDT", 10_000.0)], &[]),
    );
    let clock = ManualClock::new(start());
    let mut engine = Engine::new(&replay_settings(), exchange.clone(), clock.clone(), None);

    let report = engine.run_cycle().unwrap();
    assert_eq!(report.executed.len(), 1);
    assert_eq!(engine.risk().open_count(), 1);

    // Price collapses through the stop while the venue refuses orders.
    let mut closes = BUY_SETUP.to_vec();
    closes.push(10.0);
    exchange.set_candles(flat_candles(&closes));
    exchange.fail_orders.store(true, Ordering::SeqCst);
    clock.advance(Duration::minutes(5));

    let report = engine.run_cycle().unwrap();
    assert_eq!(report.failed_orders, 1);
    assert!(report.exits.is_empty());
    assert_eq!(engine.risk().position("BTCUSDT").unwrap().side, Side::Buy);
    // The long still blocks the bearish cross signalled at 10.
    assert!(report
        .rejected
        .iter()
        .any(|r| matches!(r, RejectReason::OppositePosition { .. })));

    exchange.fail_orders.store(false, Ordering::SeqCst);
    clock.advance(Duration::minutes(5));

    let report = engine.run_cycle().unwrap();
    assert_eq!(report.exits.len(), 1);
    assert_eq!(report.exits[0].reason, ExitReason::StopLoss);
    assert_eq!(report.exits[0].position.side, Side::Buy);
    let submitted = exchange.submitted.lock().unwrap();
    assert!(submitted.iter().any(|s| s.strategy == "exit:stop-loss"));
    assert!(engine
        .risk()
        .open_positions()
        .iter()
        .all(|p| p.side == Side::Sell));
}

#[test]
fn concurrent_validations_share_the_exposure_ceiling() {
    let exchange = MockExchange::new(Vec::new(), account(&[("USDT", 10_000.0)], &[]));
    let settings = RiskSettings {
        risk_per_trade: 1.0,
        max_position_size: 100.0,
        ..RiskSettings::default()
    };
    let risk = RiskManager::new(exchange, settings, "USDT");
    let barrier = Barrier::new(2);
    let (risk, barrier) = (&risk, &barrier);

    let decisions: Vec<TradeDecision> = thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                scope.spawn(move || {
                    barrier.wait();
                    risk.validate_trade(signal("BTCUSDT", Side::Buy, 100.0, 50.0))
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let accepted: Vec<_> = decisions.iter().filter(|d| d.is_accepted()).collect();
    assert_eq!(accepted.len(), 1);
    assert_relative_eq!(risk.reserved_exposure(), 5_000.0, epsilon = 1e-9);
}

#[test]
fn shutdown_raised_mid_run_stops_loop() {
    let exchange = MockExchange::new(
        flat_candles(&BUY_SETUP),
        account(&[("USDT", 10_000.0)], &[]),
    );
    let clock = ManualClock::new(start());
    let mut settings = replay_settings();
    settings.interval = std::time::Duration::from_millis(20);
    let mut engine = Engine::new(&settings, exchange, clock, None);
    let shutdown = AtomicBool::new(false);

    let ran = thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(std::time::Duration::from_millis(100));
            shutdown.store(true, Ordering::SeqCst);
        });
        engine.run(None, &shutdown).unwrap()
    });

    assert!(ran >= 1);
    assert_eq!(engine.cycles(), ran);
}
