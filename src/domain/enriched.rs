//! Candle series and their indicator-enriched form.
//!
//! [`calculate_indicators`] is a pure function of its input: it borrows the
//! candles, never mutates them, and recomputes every column from scratch.

use std::collections::HashMap;

use crate::domain::candle::Candle;
use crate::domain::gap::{detect_gaps, GapPoint, DEFAULT_GAP_THRESHOLD};
use crate::domain::indicator::{
    bollinger, calculate_bollinger, calculate_ema, calculate_macd_default, calculate_obv,
    calculate_pivots, calculate_rsi, calculate_sma, calculate_vwap, pivot, rsi, IndicatorSeries,
    IndicatorType,
};
use crate::domain::timeframe::Timeframe;

pub const SMA_PERIODS: [usize; 3] = [20, 50, 200];
pub const EMA_PERIODS: [usize; 2] = [12, 26];

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSettings {
    pub pivot_lookback: usize,
    pub gap_threshold: f64,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        IndicatorSettings {
            pivot_lookback: pivot::DEFAULT_LOOKBACK,
            gap_threshold: DEFAULT_GAP_THRESHOLD,
        }
    }
}

/// Time-ascending candles for one (symbol, timeframe) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub candles: Vec<Candle>,
}

impl Series {
    /// Sorts by open time and keeps the last candle seen for a duplicated open time.
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe, mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|c| c.open_time);
        let mut deduped: Vec<Candle> = Vec::with_capacity(candles.len());
        for candle in candles {
            match deduped.last_mut() {
                Some(last) if last.open_time == candle.open_time => *last = candle,
                _ => deduped.push(candle),
            }
        }
        Series {
            symbol: symbol.into(),
            timeframe,
            candles: deduped,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedSeries {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub candles: Vec<Candle>,
    pub indicators: HashMap<IndicatorType, IndicatorSeries>,
    pub gaps: Vec<Option<GapPoint>>,
}

impl EnrichedSeries {
    /// The "no decision possible" frame returned when nothing could be fetched.
    pub fn empty(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        EnrichedSeries {
            symbol: symbol.into(),
            timeframe,
            candles: Vec::new(),
            indicators: HashMap::new(),
            gaps: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last_candle(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.candles.last().map(|c| c.close)
    }

    pub fn indicator(&self, indicator_type: &IndicatorType) -> Option<&IndicatorSeries> {
        self.indicators.get(indicator_type)
    }

    /// Scalar indicator value at `index`, `None` if absent or still warming up.
    pub fn simple(&self, indicator_type: &IndicatorType, index: usize) -> Option<f64> {
        self.indicator(indicator_type)?.simple_at(index)
    }
}

/// Every indicator column the strategies may read, keyed by type.
pub fn indicator_set(settings: &IndicatorSettings) -> Vec<IndicatorType> {
    let mut set: Vec<IndicatorType> = SMA_PERIODS.iter().map(|&p| IndicatorType::Sma(p)).collect();
    set.extend(EMA_PERIODS.iter().map(|&p| IndicatorType::Ema(p)));
    set.push(IndicatorType::Macd {
        fast: 12,
        slow: 26,
        signal: 9,
    });
    set.push(IndicatorType::Rsi(rsi::DEFAULT_PERIOD));
    set.push(IndicatorType::Bollinger {
        period: bollinger::DEFAULT_PERIOD,
        stddev_mult_x100: bollinger::DEFAULT_MULT_X100,
    });
    set.push(IndicatorType::Obv);
    set.push(IndicatorType::Vwap);
    set.push(IndicatorType::Pivot(settings.pivot_lookback));
    set
}

pub fn calculate_indicators(series: &Series, settings: &IndicatorSettings) -> EnrichedSeries {
    let candles = &series.candles;
    let indicators = indicator_set(settings)
        .into_iter()
        .map(|indicator_type| {
            let computed = match &indicator_type {
                IndicatorType::Sma(period) => calculate_sma(candles, *period),
                IndicatorType::Ema(period) => calculate_ema(candles, *period),
                IndicatorType::Rsi(period) => calculate_rsi(candles, *period),
                IndicatorType::Obv => calculate_obv(candles),
                IndicatorType::Vwap => calculate_vwap(candles),
                IndicatorType::Macd { .. } => calculate_macd_default(candles),
                IndicatorType::Bollinger {
                    period,
                    stddev_mult_x100,
                } => calculate_bollinger(candles, *period, *stddev_mult_x100),
                IndicatorType::Pivot(lookback) => calculate_pivots(candles, *lookback),
            };
            (indicator_type, computed)
        })
        .collect();

    EnrichedSeries {
        symbol: series.symbol.clone(),
        timeframe: series.timeframe,
        candles: candles.clone(),
        indicators,
        gaps: detect_gaps(candles, settings.gap_threshold),
    }
}
