//! Trade history port trait.

use crate::domain::error::BotError;
use crate::domain::trade_record::TradeRecord;

/// Sink for executed trades.
pub trait TradeLogPort: Send {
    fn record(&mut self, trade: &TradeRecord) -> Result<(), BotError>;
}
