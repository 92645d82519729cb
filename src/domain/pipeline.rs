//! Candle fetching and the enriched-series cache.
//!
//! Entries are keyed by (symbol, timeframe) and served unchanged until half
//! a candle period has passed. A failed fetch never propagates: the last
//! good frame is served instead, or an empty one if there never was one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::domain::enriched::{calculate_indicators, EnrichedSeries, IndicatorSettings, Series};
use crate::domain::error::BotError;
use crate::domain::timeframe::Timeframe;
use crate::ports::clock::Clock;
use crate::ports::exchange_port::ExchangePort;

type CacheKey = (String, Timeframe);

struct CacheEntry {
    series: Arc<EnrichedSeries>,
    refreshed_at: DateTime<Utc>,
}

pub struct DataPipeline {
    exchange: Arc<dyn ExchangePort>,
    clock: Arc<dyn Clock>,
    settings: IndicatorSettings,
    candle_limit: usize,
    cache: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl DataPipeline {
    pub fn new(
        exchange: Arc<dyn ExchangePort>,
        clock: Arc<dyn Clock>,
        settings: IndicatorSettings,
        candle_limit: usize,
    ) -> Self {
        DataPipeline {
            exchange,
            clock,
            settings,
            candle_limit,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Latest enriched frame for the pair.
    ///
    /// An empty frame means no decision is possible this cycle.
    pub fn refresh(&self, symbol: &str, timeframe: Timeframe) -> Arc<EnrichedSeries> {
        let now = self.clock.now();
        let key = (symbol.to_string(), timeframe);

        if let Some(entry) = self.lock().get(&key) {
            if now.signed_duration_since(entry.refreshed_at) < timeframe.stale_after() {
                debug!("serving cached {} {}", symbol, timeframe);
                return Arc::clone(&entry.series);
            }
        }

        match self.fetch(symbol, timeframe) {
            Ok(series) => {
                let enriched = Arc::new(calculate_indicators(&series, &self.settings));
                debug!(
                    "refreshed {} {}: {} candles",
                    symbol,
                    timeframe,
                    enriched.len()
                );
                self.lock().insert(
                    key,
                    CacheEntry {
                        series: Arc::clone(&enriched),
                        refreshed_at: now,
                    },
                );
                enriched
            }
            Err(e) => {
                let cached = self.lock().get(&key).map(|entry| Arc::clone(&entry.series));
                match cached {
                    Some(series) => {
                        warn!("{}; serving last good frame", e);
                        series
                    }
                    None => {
                        warn!("{}; no cached frame", e);
                        Arc::new(EnrichedSeries::empty(symbol, timeframe))
                    }
                }
            }
        }
    }

    fn fetch(&self, symbol: &str, timeframe: Timeframe) -> Result<Series, BotError> {
        let candles = self
            .exchange
            .fetch_candles(symbol, timeframe, self.candle_limit)
            .map_err(|e| BotError::DataUnavailable {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
                reason: e.to_string(),
            })?;
        if candles.is_empty() {
            return Err(BotError::DataUnavailable {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
                reason: "no candles returned".to_string(),
            });
        }
        Ok(Series::new(symbol, timeframe, candles))
    }

    /// The cached frame without any refresh.
    pub fn cached(&self, symbol: &str, timeframe: Timeframe) -> Option<Arc<EnrichedSeries>> {
        self.lock()
            .get(&(symbol.to_string(), timeframe))
            .map(|entry| Arc::clone(&entry.series))
    }

    pub fn invalidate(&self, symbol: &str, timeframe: Timeframe) {
        self.lock().remove(&(symbol.to_string(), timeframe));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::{AccountState, OpenOrder};
    use crate::domain::candle::Candle;
    use crate::domain::indicator::test_support::flat_candles;
    use crate::domain::signal::Signal;
    use crate::ports::exchange_port::Fill;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FixedClock(Mutex<DateTime<Utc>>);

    impl FixedClock {
        fn advance(&self, by: Duration) {
            let mut now = self.0.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    struct CountingExchange {
        calls: AtomicUsize,
        failing: AtomicBool,
    }

    impl ExchangePort for CountingExchange {
        fn fetch_candles(&self, _: &str, _: Timeframe, _: usize) -> Result<Vec<Candle>, BotError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(BotError::Exchange {
                    reason: "timeout".into(),
                });
            }
            Ok(flat_candles(&vec![100.0 + call as f64; 30]))
        }
        fn fetch_account_state(&self) -> Result<AccountState, BotError> {
            Ok(AccountState::default())
        }
        fn fetch_open_orders(&self, _: Option<&str>) -> Result<Vec<OpenOrder>, BotError> {
            Ok(Vec::new())
        }
        fn submit_order(&self, _: &Signal) -> Result<Fill, BotError> {
            Err(BotError::Exchange {
                reason: "read only".into(),
            })
        }
    }

    fn setup(failing: bool) -> (Arc<CountingExchange>, Arc<FixedClock>, DataPipeline) {
        let exchange = Arc::new(CountingExchange {
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(failing),
        });
        let clock = Arc::new(FixedClock(Mutex::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        )));
        let pipeline = DataPipeline::new(
            exchange.clone(),
            clock.clone(),
            IndicatorSettings::default(),
            500,
        );
        (exchange, clock, pipeline)
    }

    #[test]
    fn serves_cache_within_half_period() {
        let (exchange, clock, pipeline) = setup(false);
        let first = pipeline.refresh("BTCUSDT", Timeframe::M5);
        clock.advance(Duration::seconds(149));
        let second = pipeline.refresh("BTCUSDT", Timeframe::M5);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::seconds(1));
        let third = pipeline.refresh("BTCUSDT", Timeframe::M5);
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.last_close(), Some(101.0));
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn keys_are_independent() {
        let (exchange, _, pipeline) = setup(false);
        pipeline.refresh("BTCUSDT", Timeframe::M5);
        pipeline.refresh("BTCUSDT", Timeframe::H1);
        pipeline.refresh("ETHUSDT", Timeframe::M5);
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn failure_without_cache_gives_empty() {
        let (_, _, pipeline) = setup(true);
        let series = pipeline.refresh("BTCUSDT", Timeframe::M5);
        assert!(series.is_empty());
        assert!(pipeline.cached("BTCUSDT", Timeframe::M5).is_none());
    }

    #[test]
    fn failure_serves_last_good() {
        let (exchange, clock, pipeline) = setup(false);
        let good = pipeline.refresh("BTCUSDT", Timeframe::M5);
        exchange.failing.store(true, Ordering::SeqCst);
        clock.advance(Duration::minutes(10));
        let served = pipeline.refresh("BTCUSDT", Timeframe::M5);
        assert!(Arc::ptr_eq(&good, &served));

        // Failed fetches do not reset the refresh timer.
        pipeline.refresh("BTCUSDT", Timeframe::M5);
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn invalidate_forces_refetch() {
        let (exchange, _, pipeline) = setup(false);
        pipeline.refresh("BTCUSDT", Timeframe::M5);
        pipeline.invalidate("BTCUSDT", Timeframe::M5);
        pipeline.refresh("BTCUSDT", Timeframe::M5);
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 2);
    }
}
