//! Executed-trade history records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::signal::{Side, Signal};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub quantity: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub strategy: String,
    pub timestamp: DateTime<Utc>,
    pub risk_reward_ratio: f64,
}

impl TradeRecord {
    /// Record for an executed entry at `fill_price`.
    pub fn from_signal(signal: &Signal, fill_price: f64, timestamp: DateTime<Utc>) -> Self {
        TradeRecord {
            symbol: signal.symbol.clone(),
            side: signal.side,
            entry_price: fill_price,
            quantity: signal.quantity,
            stop_loss: signal.stop_loss,
            take_profit: signal.take_profit,
            strategy: signal.strategy.clone(),
            timestamp,
            risk_reward_ratio: risk_reward_ratio(
                fill_price,
                signal.stop_loss.unwrap_or(0.0),
                signal.take_profit.unwrap_or(0.0),
                signal.side,
            ),
        }
    }
}

/// Reward distance over risk distance; 0 when there is no risk distance.
pub fn risk_reward_ratio(entry: f64, stop_loss: f64, take_profit: f64, side: Side) -> f64 {
    let (risk, reward) = match side {
        Side::Buy => ((entry - stop_loss).abs(), (take_profit - entry).abs()),
        Side::Sell => ((stop_loss - entry).abs(), (entry - take_profit).abs()),
    };
    if risk == 0.0 {
        return 0.0;
    }
    reward / risk
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn long_ratio() {
        assert!((risk_reward_ratio(100.0, 95.0, 110.0, Side::Buy) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn short_ratio() {
        assert!((risk_reward_ratio(100.0, 104.0, 88.0, Side::Sell) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn zero_risk_distance() {
        assert_eq!(risk_reward_ratio(100.0, 100.0, 120.0, Side::Buy), 0.0);
    }

    #[test]
    fn from_signal_copies_fields() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let signal = Signal {
            strategy: "ichimoku".into(),
            symbol: "ETHUSDT".into(),
            side: Side::Buy,
            price: 2000.0,
            quantity: 0.5,
            stop_loss: Some(1960.0),
            take_profit: Some(2080.0),
            timestamp: ts,
            confidence: None,
        };
        let record = TradeRecord::from_signal(&signal, 2000.0, ts);
        assert_eq!(record.symbol, "ETHUSDT");
        assert_eq!(record.strategy, "ichimoku");
        assert!((record.risk_reward_ratio - 2.0).abs() < 1e-12);
    }
}
