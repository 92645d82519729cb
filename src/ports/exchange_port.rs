//! Exchange collaborator port trait.
//!
//! Every call is fallible and synchronous. The engine performs no retries;
//! retry/backoff, if any, lives in the adapter.

use crate::domain::account::{AccountState, OpenOrder};
use crate::domain::candle::Candle;
use crate::domain::error::BotError;
use crate::domain::signal::{Side, Signal};
use crate::domain::timeframe::Timeframe;

/// Outcome of a filled market order.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
}

pub trait ExchangePort: Send + Sync {
    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, BotError>;

    fn fetch_account_state(&self) -> Result<AccountState, BotError>;

    fn fetch_open_orders(&self, symbol: Option<&str>) -> Result<Vec<OpenOrder>, BotError>;

    fn submit_order(&self, signal: &Signal) -> Result<Fill, BotError>;
}
