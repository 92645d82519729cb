#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use kumobot::domain::account::{AccountState, Balance, OpenOrder};
use kumobot::domain::candle::Candle;
use kumobot::domain::error::BotError;
use kumobot::domain::signal::{Side, Signal};
use kumobot::domain::strategy::ichimoku::IchimokuSettings;
use kumobot::domain::timeframe::Timeframe;
use kumobot::domain::trade_record::TradeRecord;
use kumobot::ports::clock::Clock;
use kumobot::ports::exchange_port::{ExchangePort, Fill};
use kumobot::ports::trade_log_port::TradeLogPort;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Closes that end in an Ichimoku buy under [`small_ichimoku`].
pub const BUY_SETUP: [f64; 8] = [10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 13.0, 20.0];

pub fn small_ichimoku() -> IchimokuSettings {
    IchimokuSettings {
        tenkan_period: 1,
        kijun_period: 3,
        senkou_span_b_period: 4,
        displacement: 2,
    }
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Five-minute candle `index` periods after [`start`], open = high = low = close.
pub fn candle_at(index: usize, close: f64) -> Candle {
    let open_time = start() + Duration::minutes(5 * index as i64);
    Candle {
        open_time,
        close_time: open_time + Duration::minutes(5) - Duration::milliseconds(1),
        open: close,
        high: close,
        low: close,
        close,
        volume: 1000.0,
    }
}

pub fn flat_candles(prices: &[f64]) -> Vec<Candle> {
    prices
        .iter()
        .enumerate()
        .map(|(i, &p)| candle_at(i, p))
        .collect()
}

pub fn signal(symbol: &str, side: Side, price: f64, quantity: f64) -> Signal {
    Signal {
        strategy: "test".into(),
        symbol: symbol.into(),
        side,
        price,
        quantity,
        stop_loss: None,
        take_profit: None,
        timestamp: start(),
        confidence: None,
    }
}

pub fn account(balances: &[(&str, f64)], prices: &[(&str, f64)]) -> AccountState {
    let mut account = AccountState::default();
    for (asset, amount) in balances {
        account
            .balances
            .insert(asset.to_string(), Balance::new(*amount, 0.0));
    }
    for (asset, price) in prices {
        account.prices.insert(asset.to_string(), *price);
    }
    account
}

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(at: DateTime<Utc>) -> Arc<Self> {
        Arc::new(ManualClock {
            now: Mutex::new(at),
        })
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

pub struct MockExchange {
    pub candles: Mutex<Vec<Candle>>,
    pub account: Mutex<AccountState>,
    pub submitted: Mutex<Vec<Signal>>,
    pub candle_fetches: AtomicUsize,
    pub fail_candles: AtomicBool,
    pub fail_orders: AtomicBool,
}

impl MockExchange {
    pub fn new(candles: Vec<Candle>, account: AccountState) -> Arc<Self> {
        Arc::new(MockExchange {
            candles: Mutex::new(candles),
            account: Mutex::new(account),
            submitted: Mutex::new(Vec::new()),
            candle_fetches: AtomicUsize::new(0),
            fail_candles: AtomicBool::new(false),
            fail_orders: AtomicBool::new(false),
        })
    }

    pub fn set_candles(&self, candles: Vec<Candle>) {
        *self.candles.lock().unwrap() = candles;
    }

    pub fn set_account(&self, account: AccountState) {
        *self.account.lock().unwrap() = account;
    }

    pub fn fetches(&self) -> usize {
        self.candle_fetches.load(Ordering::SeqCst)
    }
}

impl ExchangePort for MockExchange {
    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, BotError> {
        self.candle_fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_candles.load(Ordering::SeqCst) {
            return Err(BotError::DataUnavailable {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
                reason: "connection reset".into(),
            });
        }
        let candles = self.candles.lock().unwrap();
        let start = candles.len().saturating_sub(limit);
        Ok(candles[start..].to_vec())
    }

    fn fetch_account_state(&self) -> Result<AccountState, BotError> {
        Ok(self.account.lock().unwrap().clone())
    }

    fn fetch_open_orders(&self, _symbol: Option<&str>) -> Result<Vec<OpenOrder>, BotError> {
        Ok(Vec::new())
    }

    fn submit_order(&self, signal: &Signal) -> Result<Fill, BotError> {
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(BotError::Execution {
                symbol: signal.symbol.clone(),
                reason: "rejected by venue".into(),
            });
        }
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(signal.clone());
        Ok(Fill {
            order_id: submitted.len().to_string(),
            symbol: signal.symbol.clone(),
            side: signal.side,
            price: signal.price,
            quantity: signal.quantity,
        })
    }
}

/// Trade log kept in memory; clones share the same records.
#[derive(Clone, Default)]
pub struct MemoryTradeLog {
    pub records: Arc<Mutex<Vec<TradeRecord>>>,
}

impl MemoryTradeLog {
    pub fn records(&self) -> Vec<TradeRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl TradeLogPort for MemoryTradeLog {
    fn record(&mut self, trade: &TradeRecord) -> Result<(), BotError> {
        self.records.lock().unwrap().push(trade.clone());
        Ok(())
    }
}
