//! Open positions and the trailing-stop ratchet.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::domain::signal::Side;

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub quantity: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    pub fn is_long(&self) -> bool {
        self.side == Side::Buy
    }

    pub fn is_short(&self) -> bool {
        self.side == Side::Sell
    }

    pub fn market_value(&self, price: f64) -> f64 {
        self.quantity * price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        match self.side {
            Side::Buy => self.quantity * (price - self.entry_price),
            Side::Sell => self.quantity * (self.entry_price - price),
        }
    }

    pub fn should_stop_loss(&self, price: f64) -> bool {
        match self.stop_loss {
            None => false,
            Some(stop) if self.is_long() => price <= stop,
            Some(stop) => price >= stop,
        }
    }

    pub fn should_take_profit(&self, price: f64) -> bool {
        match self.take_profit {
            None => false,
            Some(target) if self.is_long() => price >= target,
            Some(target) => price <= target,
        }
    }

    /// Same-direction add: quantities sum, entry becomes the weighted average.
    pub fn add(&mut self, quantity: f64, price: f64) {
        let total = self.quantity + quantity;
        if total > 0.0 {
            self.entry_price = (self.entry_price * self.quantity + price * quantity) / total;
        }
        self.quantity = total;
    }

    /// Tighten the stop toward `current_price`; never loosens it.
    ///
    /// Returns the new stop when it moved.
    pub fn ratchet_stop(&mut self, current_price: f64, trailing_pct: f64) -> Option<f64> {
        let candidate = match self.side {
            Side::Buy => current_price * (1.0 - trailing_pct),
            Side::Sell => current_price * (1.0 + trailing_pct),
        };
        let tightens = match (self.side, self.stop_loss) {
            (_, None) => true,
            (Side::Buy, Some(stop)) => candidate > stop,
            (Side::Sell, Some(stop)) => candidate < stop,
        };
        if tightens {
            self.stop_loss = Some(candidate);
            Some(candidate)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Manual,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::StopLoss => f.write_str("stop-loss"),
            ExitReason::TakeProfit => f.write_str("take-profit"),
            ExitReason::Manual => f.write_str("manual"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClosedPosition {
    pub position: Position,
    pub exit_price: f64,
    pub reason: ExitReason,
}

impl ClosedPosition {
    pub fn pnl(&self) -> f64 {
        self.position.unrealized_pnl(self.exit_price)
    }
}
