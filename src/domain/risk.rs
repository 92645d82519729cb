//! Trade validation gate, position bookkeeping and trailing stops.
//!
//! The [`RiskManager`] is the only owner of open positions. Every operation
//! that reads the account and then decides or mutates runs under one lock.
//! An accepted trade reserves its value until it is filled or released, so
//! concurrent validations cannot both pass the exposure ceiling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::domain::error::BotError;
use crate::domain::position::{ClosedPosition, ExitReason, Position};
use crate::domain::signal::{Side, Signal};
use crate::domain::strategy::{round_down, PositionSizer};
use crate::ports::exchange_port::{ExchangePort, Fill};

/// Share of account value that total exposure may never exceed.
pub const EXPOSURE_CEILING: f64 = 0.9;

#[derive(Debug, Clone, PartialEq)]
pub struct RiskSettings {
    pub max_position_size: f64,
    pub risk_per_trade: f64,
    pub max_open_trades: usize,
    pub use_stop_loss: bool,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub use_trailing_stop: bool,
    pub trailing_stop_pct: f64,
    pub min_position_size: f64,
    pub quantity_decimals: u32,
}

impl Default for RiskSettings {
    fn default() -> Self {
        RiskSettings {
            max_position_size: 0.01,
            risk_per_trade: 0.01,
            max_open_trades: 3,
            use_stop_loss: true,
            stop_loss_pct: 0.02,
            take_profit_pct: 0.04,
            use_trailing_stop: true,
            trailing_stop_pct: 0.01,
            min_position_size: 0.00001,
            quantity_decimals: 6,
        }
    }
}

impl RiskSettings {
    pub fn sizer(&self) -> PositionSizer {
        PositionSizer {
            risk_per_trade: self.risk_per_trade,
            max_position_size: self.max_position_size,
            quantity_decimals: self.quantity_decimals,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RejectReason {
    #[error("{open} positions open, limit is {max}")]
    MaxOpenTrades { open: usize, max: usize },

    #[error("open {existing} position on {symbol}")]
    OppositePosition { symbol: String, existing: Side },

    #[error("quantity {quantity} below minimum {minimum}")]
    BelowMinimumSize { quantity: f64, minimum: f64 },

    #[error("exposure {exposure:.2} + trade {trade_value:.2} exceeds limit {limit:.2}")]
    ExposureCeiling {
        exposure: f64,
        trade_value: f64,
        limit: f64,
    },

    #[error("invalid price {price}")]
    InvalidPrice { price: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TradeDecision {
    Accepted {
        signal: Signal,
        /// The requested quantity was clamped to the sizing limit.
        quantity_adjusted: bool,
    },
    Rejected(RejectReason),
}

impl TradeDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, TradeDecision::Accepted { .. })
    }
}

/// Exposure held for an accepted trade whose order has not filled yet.
#[derive(Debug, Clone, PartialEq)]
struct Reservation {
    symbol: String,
    value: f64,
}

#[derive(Debug, Default)]
struct Book {
    positions: HashMap<String, Position>,
    reservations: Vec<Reservation>,
}

impl Book {
    fn reserved(&self) -> f64 {
        self.reservations.iter().map(|r| r.value).sum()
    }

    fn release(&mut self, signal: &Signal) -> bool {
        let value = signal.quantity * signal.price;
        match self
            .reservations
            .iter()
            .position(|r| r.symbol == signal.symbol && r.value == value)
        {
            Some(index) => {
                self.reservations.swap_remove(index);
                true
            }
            None => false,
        }
    }
}

pub struct RiskManager {
    exchange: Arc<dyn ExchangePort>,
    settings: RiskSettings,
    quote_asset: String,
    book: Mutex<Book>,
}

impl RiskManager {
    pub fn new(
        exchange: Arc<dyn ExchangePort>,
        settings: RiskSettings,
        quote_asset: impl Into<String>,
    ) -> Self {
        RiskManager {
            exchange,
            settings,
            quote_asset: quote_asset.into(),
            book: Mutex::new(Book::default()),
        }
    }

    pub fn settings(&self) -> &RiskSettings {
        &self.settings
    }

    fn lock(&self) -> MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accept (possibly clamping and backfilling) or reject one signal.
    ///
    /// The account snapshot and open orders are fetched fresh on every call.
    /// Exposure counts holdings, resting buy orders and trades accepted but
    /// not yet filled. An accepted trade stays reserved until
    /// [`record_fill`](Self::record_fill) or [`release`](Self::release).
    /// `Err` means the snapshot could not be obtained or does not make sense.
    pub fn validate_trade(&self, mut signal: Signal) -> Result<TradeDecision, BotError> {
        let mut book = self.lock();

        let mut account = self.exchange.fetch_account_state()?;
        account.open_orders = self.exchange.fetch_open_orders(None)?;
        let account_value = account.account_value(&self.quote_asset)?;
        let exposure = account.total_exposure(&self.quote_asset)?
            + account.open_order_exposure()
            + book.reserved();

        if !signal.price.is_finite() || signal.price <= 0.0 {
            return Ok(self.reject(
                &signal,
                RejectReason::InvalidPrice {
                    price: signal.price,
                },
            ));
        }

        if book.positions.len() >= self.settings.max_open_trades {
            return Ok(self.reject(
                &signal,
                RejectReason::MaxOpenTrades {
                    open: book.positions.len(),
                    max: self.settings.max_open_trades,
                },
            ));
        }

        if let Some(existing) = book.positions.get(&signal.symbol) {
            if existing.side != signal.side {
                return Ok(self.reject(
                    &signal,
                    RejectReason::OppositePosition {
                        symbol: signal.symbol.clone(),
                        existing: existing.side,
                    },
                ));
            }
        }

        let max_size = self.settings.sizer().max_size(account_value, signal.price);
        let mut quantity_adjusted = false;
        if signal.quantity > max_size {
            let clamped = round_down(max_size, self.settings.quantity_decimals);
            info!(
                "clamping {} quantity {} -> {} (max {})",
                signal.symbol, signal.quantity, clamped, max_size
            );
            signal.quantity = clamped;
            quantity_adjusted = true;
        }

        if !(signal.quantity >= self.settings.min_position_size) {
            return Ok(self.reject(
                &signal,
                RejectReason::BelowMinimumSize {
                    quantity: signal.quantity,
                    minimum: self.settings.min_position_size,
                },
            ));
        }

        if signal.stop_loss.is_none()
            && (self.settings.use_stop_loss || self.settings.use_trailing_stop)
        {
            signal.stop_loss = Some(offset_against(
                signal.price,
                signal.side,
                self.settings.stop_loss_pct,
            ));
        }
        if signal.take_profit.is_none() {
            signal.take_profit = Some(offset_toward(
                signal.price,
                signal.side,
                self.settings.take_profit_pct,
            ));
        }

        let trade_value = signal.quantity * signal.price;
        let limit = EXPOSURE_CEILING * account_value;
        if exposure + trade_value > limit {
            return Ok(self.reject(
                &signal,
                RejectReason::ExposureCeiling {
                    exposure,
                    trade_value,
                    limit,
                },
            ));
        }

        book.reservations.push(Reservation {
            symbol: signal.symbol.clone(),
            value: trade_value,
        });
        debug!("accepted {}, {:.2} reserved", signal, book.reserved());
        Ok(TradeDecision::Accepted {
            signal,
            quantity_adjusted,
        })
    }

    fn reject(&self, signal: &Signal, reason: RejectReason) -> TradeDecision {
        warn!("rejected {}: {}", signal, reason);
        TradeDecision::Rejected(reason)
    }

    /// Drop the reservation of an accepted signal whose order did not fill.
    pub fn release(&self, signal: &Signal) {
        if self.lock().release(signal) {
            debug!("released reservation for {}", signal);
        }
    }

    /// Open a position for an executed entry, or add to a same-direction one.
    /// Releases the signal's reservation.
    pub fn record_fill(&self, signal: &Signal, fill: &Fill, at: DateTime<Utc>) -> Position {
        let mut book = self.lock();
        book.release(signal);
        let positions = &mut book.positions;

        if let Some(existing) = positions.get_mut(&fill.symbol) {
            if existing.side == fill.side {
                existing.add(fill.quantity, fill.price);
                if existing.take_profit.is_none() {
                    existing.take_profit = signal.take_profit;
                }
                if existing.stop_loss.is_none() {
                    existing.stop_loss = signal.stop_loss;
                }
                info!(
                    "added {} to {} {}, entry now {:.8}",
                    fill.quantity, existing.side, existing.symbol, existing.entry_price
                );
                return existing.clone();
            }
            warn!(
                "fill on {} opposes open {} position, replacing it",
                fill.symbol, existing.side
            );
        }

        let position = Position {
            symbol: fill.symbol.clone(),
            side: fill.side,
            entry_price: fill.price,
            quantity: fill.quantity,
            stop_loss: signal.stop_loss,
            take_profit: signal.take_profit,
            opened_at: at,
        };
        info!(
            "opened {} {} {} @ {}",
            position.side, position.quantity, position.symbol, position.entry_price
        );
        positions.insert(position.symbol.clone(), position.clone());
        position
    }

    pub fn close_position(&self, symbol: &str) -> Option<Position> {
        self.lock().positions.remove(symbol)
    }

    /// Every position whose stop-loss or take-profit is hit at its current
    /// price. Stop-loss wins when both are.
    ///
    /// Positions stay open; the caller closes each one with
    /// [`close_position`](Self::close_position) once its exit order fills.
    pub fn check_exits(&self, prices: &HashMap<String, f64>) -> Vec<ClosedPosition> {
        let book = self.lock();

        let mut hits: Vec<ClosedPosition> = book
            .positions
            .values()
            .filter_map(|p| {
                let price = *prices.get(&p.symbol)?;
                let reason = if p.should_stop_loss(price) {
                    ExitReason::StopLoss
                } else if p.should_take_profit(price) {
                    ExitReason::TakeProfit
                } else {
                    return None;
                };
                info!("{} hit on {} at {}", reason, p.symbol, price);
                Some(ClosedPosition {
                    position: p.clone(),
                    exit_price: price,
                    reason,
                })
            })
            .collect();
        hits.sort_by(|a, b| a.position.symbol.cmp(&b.position.symbol));
        hits
    }

    /// Ratchet every open position's stop toward its current price.
    ///
    /// Returns the `(symbol, new_stop)` pairs that moved. Does nothing when
    /// trailing stops are disabled.
    pub fn adjust_stops(&self, prices: &HashMap<String, f64>) -> Vec<(String, f64)> {
        if !self.settings.use_trailing_stop {
            return Vec::new();
        }
        let mut book = self.lock();

        let mut moved = Vec::new();
        for position in book.positions.values_mut() {
            let Some(&price) = prices.get(&position.symbol) else {
                continue;
            };
            let previous = position.stop_loss;
            if let Some(stop) = position.ratchet_stop(price, self.settings.trailing_stop_pct) {
                info!(
                    "trailing stop {} {:?} -> {:.8}",
                    position.symbol, previous, stop
                );
                moved.push((position.symbol.clone(), stop));
            }
        }
        moved.sort_by(|a, b| a.0.cmp(&b.0));
        moved
    }

    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.lock().positions.get(symbol).cloned()
    }

    /// Snapshot of open positions ordered by symbol.
    pub fn open_positions(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.lock().positions.values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        positions
    }

    pub fn open_count(&self) -> usize {
        self.lock().positions.len()
    }

    /// Value held for accepted trades that have not filled or been released.
    pub fn reserved_exposure(&self) -> f64 {
        self.lock().reserved()
    }
}

/// A level `pct` beyond `price` against the position.
fn offset_against(price: f64, side: Side, pct: f64) -> f64 {
    match side {
        Side::Buy => price * (1.0 - pct),
        Side::Sell => price * (1.0 + pct),
    }
}

/// A level `pct` beyond `price` in the position's favour.
fn offset_toward(price: f64, side: Side, pct: f64) -> f64 {
    offset_against(price, side.opposite(), pct)
}
