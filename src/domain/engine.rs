//! The decision loop: refresh → exits and trailing stops → signals →
//! validation → execution → trade history.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};

use crate::domain::error::BotError;
use crate::domain::pipeline::DataPipeline;
use crate::domain::position::ClosedPosition;
use crate::domain::risk::{RejectReason, RiskManager, TradeDecision};
use crate::domain::settings::Settings;
use crate::domain::signal::Signal;
use crate::domain::strategy::{SharedBalance, StrategyDeps};
use crate::domain::strategy_manager::StrategyManager;
use crate::domain::timeframe::Timeframe;
use crate::domain::trade_record::TradeRecord;
use crate::ports::clock::Clock;
use crate::ports::exchange_port::{ExchangePort, Fill};
use crate::ports::trade_log_port::TradeLogPort;

const SLEEP_SLICE: Duration = Duration::from_millis(200);

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    /// Candles in the frame the cycle decided on; 0 means no decision was possible.
    pub candles: usize,
    pub generated: usize,
    pub executed: Vec<Fill>,
    pub rejected: Vec<RejectReason>,
    pub exits: Vec<ClosedPosition>,
    pub stops_moved: Vec<(String, f64)>,
    pub failed_orders: usize,
}

pub struct Engine {
    exchange: Arc<dyn ExchangePort>,
    clock: Arc<dyn Clock>,
    pipeline: DataPipeline,
    strategies: StrategyManager,
    risk: RiskManager,
    trade_log: Option<Box<dyn TradeLogPort>>,
    balance: SharedBalance,
    symbol: String,
    quote_asset: String,
    timeframe: Timeframe,
    combine: bool,
    interval: Duration,
    cycles: u64,
}

impl Engine {
    pub fn new(
        settings: &Settings,
        exchange: Arc<dyn ExchangePort>,
        clock: Arc<dyn Clock>,
        trade_log: Option<Box<dyn TradeLogPort>>,
    ) -> Self {
        let balance = SharedBalance::new(settings.exchange.starting_balance);
        let deps = StrategyDeps {
            sizer: settings.risk.sizer(),
            balance: balance.clone(),
        };
        Engine {
            pipeline: DataPipeline::new(
                Arc::clone(&exchange),
                Arc::clone(&clock),
                settings.indicators.clone(),
                settings.exchange.candle_limit,
            ),
            strategies: StrategyManager::new(
                &settings.enabled_strategies,
                settings.strategies.clone(),
                deps,
            ),
            risk: RiskManager::new(
                Arc::clone(&exchange),
                settings.risk.clone(),
                settings.exchange.quote_asset.clone(),
            ),
            exchange,
            clock,
            trade_log,
            balance,
            symbol: settings.exchange.symbol.clone(),
            quote_asset: settings.exchange.quote_asset.clone(),
            timeframe: settings.exchange.timeframe,
            combine: settings.combine,
            interval: settings.interval,
            cycles: 0,
        }
    }

    pub fn strategies_mut(&mut self) -> &mut StrategyManager {
        &mut self.strategies
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    pub fn pipeline(&self) -> &DataPipeline {
        &self.pipeline
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// One full decision cycle.
    ///
    /// Strategy failures, rejections and failed orders are contained in the
    /// report. `Err` means the account snapshot was unusable.
    pub fn run_cycle(&mut self) -> Result<CycleReport, BotError> {
        self.cycles += 1;
        let mut report = CycleReport {
            cycle: self.cycles,
            ..CycleReport::default()
        };

        let series = self.pipeline.refresh(&self.symbol, self.timeframe);
        let Some(price) = series.last_close() else {
            warn!("cycle {}: no candles for {}, skipping", self.cycles, self.symbol);
            return Ok(report);
        };
        report.candles = series.len();

        let account = self.exchange.fetch_account_state()?;
        self.balance.set(account.account_value(&self.quote_asset)?);

        let now = self.clock.now();
        let prices = HashMap::from([(self.symbol.clone(), price)]);

        // A position leaves the book only once its exit fills; a failed
        // exit is retried next cycle.
        for closed in self.risk.check_exits(&prices) {
            let exit = exit_signal(&closed, now);
            match self.exchange.submit_order(&exit) {
                Ok(fill) => {
                    self.risk.close_position(&closed.position.symbol);
                    info!(
                        "closed {} on {} at {}, pnl {:.4}",
                        closed.position.symbol,
                        closed.reason,
                        fill.price,
                        closed.position.unrealized_pnl(fill.price)
                    );
                    report.exits.push(closed);
                }
                Err(e) => {
                    error!("exit order for {} failed: {}", closed.position.symbol, e);
                    report.failed_orders += 1;
                }
            }
        }

        report.stops_moved = self.risk.adjust_stops(&prices);

        let mut signals = self.strategies.generate_signals(&series);
        report.generated = signals.len();
        if self.combine {
            signals = self.strategies.combine_signals(&signals);
        }

        for signal in signals {
            match self.risk.validate_trade(signal) {
                Ok(TradeDecision::Accepted {
                    signal,
                    quantity_adjusted,
                }) => {
                    if quantity_adjusted {
                        debug!("quantity adjusted for {}", signal);
                    }
                    self.execute(&signal, now, &mut report);
                }
                Ok(TradeDecision::Rejected(reason)) => report.rejected.push(reason),
                Err(e @ BotError::MalformedAccount { .. }) => return Err(e),
                Err(e) => error!("validation failed: {}", e),
            }
        }

        info!(
            "cycle {}: {} candles, {} signals, {} executed, {} rejected, {} exits",
            report.cycle,
            report.candles,
            report.generated,
            report.executed.len(),
            report.rejected.len(),
            report.exits.len()
        );
        Ok(report)
    }

    fn execute(&mut self, signal: &Signal, now: DateTime<Utc>, report: &mut CycleReport) {
        let fill = match self.exchange.submit_order(signal) {
            Ok(fill) => fill,
            Err(e) => {
                error!("order {} failed: {}", signal, e);
                self.risk.release(signal);
                report.failed_orders += 1;
                return;
            }
        };
        self.risk.record_fill(signal, &fill, now);

        if let Some(log) = self.trade_log.as_mut() {
            let record = TradeRecord::from_signal(signal, fill.price, now);
            if let Err(e) = log.record(&record) {
                error!("could not record trade: {}", e);
            }
        }
        report.executed.push(fill);
    }

    /// Repeat cycles until `max_cycles` have run or `shutdown` is raised.
    ///
    /// Returns the number of cycles run. Only a malformed account stops the
    /// loop early; other cycle errors are logged.
    pub fn run(&mut self, max_cycles: Option<u64>, shutdown: &AtomicBool) -> Result<u64, BotError> {
        let mut ran = 0;
        while !shutdown.load(Ordering::SeqCst) {
            if max_cycles.is_some_and(|max| ran >= max) {
                break;
            }
            match self.run_cycle() {
                Ok(_) => {}
                Err(e @ BotError::MalformedAccount { .. }) => return Err(e),
                Err(e) => error!("cycle {} failed: {}", self.cycles, e),
            }
            ran += 1;

            if max_cycles.is_some_and(|max| ran >= max) {
                break;
            }
            self.pause(shutdown);
        }
        info!("stopped after {} cycles", ran);
        Ok(ran)
    }

    fn pause(&self, shutdown: &AtomicBool) {
        let deadline = Instant::now() + self.interval;
        while !shutdown.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

/// Market order that flattens a closed position.
fn exit_signal(closed: &ClosedPosition, timestamp: DateTime<Utc>) -> Signal {
    Signal {
        strategy: format!("exit:{}", closed.reason),
        symbol: closed.position.symbol.clone(),
        side: closed.position.side.opposite(),
        price: closed.exit_price,
        quantity: closed.position.quantity,
        stop_loss: None,
        take_profit: None,
        timestamp,
        confidence: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::{ExitReason, Position};
    use crate::domain::signal::Side;
    use chrono::TimeZone;

    #[test]
    fn exit_signal_flattens_position() {
        let closed = ClosedPosition {
            position: Position {
                symbol: "BTCUSDT".into(),
                side: Side::Buy,
                entry_price: 50000.0,
                quantity: 0.002,
                stop_loss: Some(49000.0),
                take_profit: None,
                opened_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            },
            exit_price: 48900.0,
            reason: ExitReason::StopLoss,
        };
        let signal = exit_signal(&closed, Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
        assert_eq!(signal.side, Side::Sell);
        assert_eq!(signal.quantity, 0.002);
        assert_eq!(signal.price, 48900.0);
        assert_eq!(signal.strategy, "exit:stop-loss");
    }
}
