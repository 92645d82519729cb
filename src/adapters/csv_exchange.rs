//! Paper exchange that replays candles from a CSV file.
//!
//! Reads `{data_dir}/{symbol}_{timeframe}.csv` with columns
//! `open_time,close_time,open,high,low,close,volume` (epoch milliseconds).
//! Every `fetch_candles` reveals one more candle; market orders fill at the
//! last revealed close against a simulated spot balance. The exchange also
//! acts as the replay clock: "now" is the close time of the candle the next
//! fetch will reveal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Deserialize;

use crate::domain::account::{base_asset, AccountState, Balance, OpenOrder};
use crate::domain::candle::Candle;
use crate::domain::error::BotError;
use crate::domain::signal::{Side, Signal};
use crate::domain::timeframe::Timeframe;
use crate::ports::clock::Clock;
use crate::ports::exchange_port::{ExchangePort, Fill};

#[derive(Debug, Deserialize)]
struct CandleRow {
    open_time: i64,
    close_time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl CandleRow {
    fn into_candle(self, line: usize) -> Result<Candle, BotError> {
        let to_time = |ms: i64| {
            DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| BotError::Exchange {
                reason: format!("line {}: timestamp {} out of range", line, ms),
            })
        };
        Ok(Candle {
            open_time: to_time(self.open_time)?,
            close_time: to_time(self.close_time)?,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        })
    }
}

struct ReplayState {
    revealed: usize,
    balances: HashMap<String, f64>,
    next_order_id: u64,
}

pub struct CsvReplayExchange {
    symbol: String,
    timeframe: Timeframe,
    quote_asset: String,
    candles: Vec<Candle>,
    state: Mutex<ReplayState>,
}

impl CsvReplayExchange {
    pub fn csv_path(data_dir: &Path, symbol: &str, timeframe: Timeframe) -> PathBuf {
        data_dir.join(format!("{}_{}.csv", symbol, timeframe))
    }

    pub fn open(
        data_dir: &Path,
        symbol: &str,
        timeframe: Timeframe,
        quote_asset: &str,
        starting_balance: f64,
    ) -> Result<Self, BotError> {
        let path = Self::csv_path(data_dir, symbol, timeframe);
        let mut reader = csv::Reader::from_path(&path).map_err(|e| BotError::DataUnavailable {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            reason: format!("failed to open {}: {}", path.display(), e),
        })?;

        let mut candles = Vec::new();
        for (i, row) in reader.deserialize::<CandleRow>().enumerate() {
            let row = row.map_err(|e| BotError::DataUnavailable {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
                reason: format!("CSV parse error in {}: {}", path.display(), e),
            })?;
            candles.push(row.into_candle(i + 2)?);
        }
        candles.sort_by_key(|c| c.open_time);
        info!("loaded {} candles from {}", candles.len(), path.display());

        Ok(Self::from_candles(
            symbol,
            timeframe,
            quote_asset,
            starting_balance,
            candles,
        ))
    }

    pub fn from_candles(
        symbol: &str,
        timeframe: Timeframe,
        quote_asset: &str,
        starting_balance: f64,
        candles: Vec<Candle>,
    ) -> Self {
        CsvReplayExchange {
            symbol: symbol.to_string(),
            timeframe,
            quote_asset: quote_asset.to_string(),
            candles,
            state: Mutex::new(ReplayState {
                revealed: 0,
                balances: HashMap::from([(quote_asset.to_string(), starting_balance)]),
                next_order_id: 1,
            }),
        }
    }

    /// Reveal `count` candles up front, before the first fetch.
    pub fn starting_at(self, count: usize) -> Self {
        self.lock().revealed = count.min(self.candles.len());
        self
    }

    fn lock(&self) -> MutexGuard<'_, ReplayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Candles not yet revealed.
    pub fn remaining(&self) -> usize {
        self.candles.len() - self.lock().revealed
    }

    pub fn total_candles(&self) -> usize {
        self.candles.len()
    }

    fn last_price(&self, revealed: usize) -> Option<f64> {
        revealed
            .checked_sub(1)
            .and_then(|i| self.candles.get(i))
            .map(|c| c.close)
    }

    fn base(&self) -> &str {
        base_asset(&self.symbol, &self.quote_asset)
    }
}

impl ExchangePort for CsvReplayExchange {
    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, BotError> {
        if symbol != self.symbol || timeframe != self.timeframe {
            return Err(BotError::DataUnavailable {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
                reason: format!("replay only holds {} {}", self.symbol, self.timeframe),
            });
        }
        let mut state = self.lock();
        if state.revealed < self.candles.len() {
            state.revealed += 1;
        }
        let end = state.revealed;
        let start = end.saturating_sub(limit);
        debug!("replay revealed {}/{} candles", end, self.candles.len());
        Ok(self.candles[start..end].to_vec())
    }

    fn fetch_account_state(&self) -> Result<AccountState, BotError> {
        let state = self.lock();
        let mut account = AccountState::default();
        for (asset, amount) in &state.balances {
            account
                .balances
                .insert(asset.clone(), Balance::new(*amount, 0.0));
        }
        if let Some(price) = self.last_price(state.revealed) {
            account.prices.insert(self.base().to_string(), price);
        }
        Ok(account)
    }

    fn fetch_open_orders(&self, _symbol: Option<&str>) -> Result<Vec<OpenOrder>, BotError> {
        // Market orders fill immediately.
        Ok(Vec::new())
    }

    fn submit_order(&self, signal: &Signal) -> Result<Fill, BotError> {
        let mut state = self.lock();
        let execution_error = |reason: String| BotError::Execution {
            symbol: signal.symbol.clone(),
            reason,
        };

        if signal.symbol != self.symbol {
            return Err(execution_error(format!("unknown symbol {}", signal.symbol)));
        }
        let price = self
            .last_price(state.revealed)
            .ok_or_else(|| execution_error("no price revealed yet".to_string()))?;
        if !(signal.quantity > 0.0) {
            return Err(execution_error(format!("invalid quantity {}", signal.quantity)));
        }

        let base = self.base().to_string();
        let quote = self.quote_asset.clone();
        let cost = signal.quantity * price;
        let held_quote = state.balances.get(&quote).copied().unwrap_or(0.0);
        let held_base = state.balances.get(&base).copied().unwrap_or(0.0);

        match signal.side {
            Side::Buy => {
                if cost > held_quote {
                    return Err(execution_error(format!(
                        "insufficient {}: need {:.8}, have {:.8}",
                        quote, cost, held_quote
                    )));
                }
                state.balances.insert(quote, held_quote - cost);
                state.balances.insert(base, held_base + signal.quantity);
            }
            Side::Sell => {
                if signal.quantity > held_base {
                    return Err(execution_error(format!(
                        "insufficient {}: need {:.8}, have {:.8}",
                        base, signal.quantity, held_base
                    )));
                }
                state.balances.insert(quote, held_quote + cost);
                state.balances.insert(base, held_base - signal.quantity);
            }
        }

        let order_id = state.next_order_id;
        state.next_order_id += 1;
        info!(
            "filled #{} {} {} {} @ {}",
            order_id, signal.side, signal.quantity, signal.symbol, price
        );
        Ok(Fill {
            order_id: order_id.to_string(),
            symbol: signal.symbol.clone(),
            side: signal.side,
            price,
            quantity: signal.quantity,
        })
    }
}

impl Clock for CsvReplayExchange {
    fn now(&self) -> DateTime<Utc> {
        let revealed = self.lock().revealed;
        let index = revealed.min(self.candles.len().saturating_sub(1));
        self.candles
            .get(index)
            .map(|c| c.close_time)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}
