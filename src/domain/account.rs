//! Account snapshots as reported by the exchange.

use std::collections::HashMap;

use crate::domain::error::BotError;
use crate::domain::signal::Side;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Balance {
    pub free: f64,
    pub locked: f64,
}

impl Balance {
    pub fn new(free: f64, locked: f64) -> Self {
        Balance { free, locked }
    }

    pub fn total(&self) -> f64 {
        self.free + self.locked
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenOrder {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
}

/// A point-in-time view of the account. Never reused across validations.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AccountState {
    /// Asset → balance.
    pub balances: HashMap<String, Balance>,
    pub open_orders: Vec<OpenOrder>,
    /// Asset → last price in the quote asset.
    pub prices: HashMap<String, f64>,
}

impl AccountState {
    pub fn balance(&self, asset: &str) -> Option<&Balance> {
        self.balances.get(asset)
    }

    /// Total holdings of the quote asset.
    pub fn account_value(&self, quote_asset: &str) -> Result<f64, BotError> {
        let balance = self
            .balances
            .get(quote_asset)
            .ok_or_else(|| BotError::MalformedAccount {
                reason: format!("no {} balance reported", quote_asset),
            })?;
        let total = balance.total();
        if !total.is_finite() || total < 0.0 {
            return Err(BotError::MalformedAccount {
                reason: format!("{} balance {} is not a valid amount", quote_asset, total),
            });
        }
        Ok(total)
    }

    /// Quote-asset value of every non-quote holding.
    pub fn total_exposure(&self, quote_asset: &str) -> Result<f64, BotError> {
        let mut exposure = 0.0;
        for (asset, balance) in &self.balances {
            if asset == quote_asset || balance.total() == 0.0 {
                continue;
            }
            let price = self
                .prices
                .get(asset)
                .copied()
                .filter(|p| p.is_finite() && *p >= 0.0)
                .ok_or_else(|| BotError::MalformedAccount {
                    reason: format!("no {} price for held asset {}", quote_asset, asset),
                })?;
            exposure += balance.total() * price;
        }
        Ok(exposure)
    }

    /// Quote value committed to resting buy orders.
    pub fn open_order_exposure(&self) -> f64 {
        self.open_orders
            .iter()
            .filter(|o| o.side == Side::Buy)
            .map(|o| o.price * o.quantity)
            .sum()
    }
}

/// Base asset of a symbol quoted in `quote_asset` ("BTCUSDT" → "BTC").
pub fn base_asset<'a>(symbol: &'a str, quote_asset: &str) -> &'a str {
    symbol.strip_suffix(quote_asset).unwrap_or(symbol)
}
