//! Strategy capability contract and the sizing collaborators every strategy receives.
//!
//! Strategies are built once by the [`registry`] with all their
//! dependencies and are read-only afterwards: `generate_signals` takes the
//! shared snapshot by reference and must not keep state between calls.

pub mod ichimoku;
pub mod registry;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::domain::enriched::EnrichedSeries;
use crate::domain::error::BotError;
use crate::domain::signal::{Side, Signal};

pub trait Strategy: Send + Sync {
    /// Registry identifier, also stamped on every emitted signal.
    fn id(&self) -> &str;

    /// Signals for the latest candle of `series`.
    ///
    /// Unmet preconditions (too little history, undefined indicators) yield
    /// `Ok(vec![])`; `Err` is reserved for genuine failures.
    fn generate_signals(&self, series: &EnrichedSeries) -> Result<Vec<Signal>, BotError>;

    fn size_position(&self, price: f64, side: Side) -> f64;
}

/// Risk-based sizing shared by strategies and the risk manager.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSizer {
    pub risk_per_trade: f64,
    pub max_position_size: f64,
    pub quantity_decimals: u32,
}

impl Default for PositionSizer {
    fn default() -> Self {
        PositionSizer {
            risk_per_trade: 0.01,
            max_position_size: 0.01,
            quantity_decimals: 6,
        }
    }
}

impl PositionSizer {
    /// `min(account_value × risk_per_trade / price, max_position_size)`, unrounded.
    pub fn max_size(&self, account_value: f64, price: f64) -> f64 {
        if price <= 0.0 || !price.is_finite() {
            return 0.0;
        }
        let raw = account_value * self.risk_per_trade / price;
        raw.min(self.max_position_size).max(0.0)
    }

    /// [`Self::max_size`] rounded to the asset precision, never above the cap.
    pub fn size(&self, account_value: f64, price: f64) -> f64 {
        round_down(self.max_size(account_value, price), self.quantity_decimals)
    }
}

/// Rounds to `decimals` places without ever exceeding `value`.
pub fn round_down(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    let nearest = (value * factor).round() / factor;
    if nearest > value {
        (value * factor).floor() / factor
    } else {
        nearest
    }
}

/// Latest account value, shared between the engine (writer) and strategies (readers).
#[derive(Debug, Clone)]
pub struct SharedBalance(Arc<AtomicU64>);

impl SharedBalance {
    pub fn new(value: f64) -> Self {
        SharedBalance(Arc::new(AtomicU64::new(value.to_bits())))
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

/// Collaborators handed to every strategy at construction.
#[derive(Debug, Clone)]
pub struct StrategyDeps {
    pub sizer: PositionSizer,
    pub balance: SharedBalance,
}

impl StrategyDeps {
    pub fn size(&self, price: f64) -> f64 {
        self.sizer.size(self.balance.get(), price)
    }
}
