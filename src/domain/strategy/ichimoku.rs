//! Ichimoku Kinko Hyo strategy.
//!
//! Tenkan-sen  = (HH + LL) / 2 over `tenkan_period`
//! Kijun-sen   = (HH + LL) / 2 over `kijun_period`
//! Senkou A    = (Tenkan + Kijun) / 2, plotted `displacement` candles ahead
//! Senkou B    = (HH + LL) / 2 over `senkou_span_b_period`, plotted `displacement` ahead
//! Chikou      = close plotted `displacement` candles behind
//!
//! Buy on a Tenkan/Kijun cross up with price above a bullish cloud and the
//! Chikou above the close it is plotted against; sell is the mirror.

use log::debug;

use crate::domain::candle::Candle;
use crate::domain::enriched::EnrichedSeries;
use crate::domain::error::BotError;
use crate::domain::signal::{Side, Signal};
use crate::domain::strategy::{Strategy, StrategyDeps};

pub const ID: &str = "ichimoku";

/// Stop sits this far beyond the Kijun-sen.
const KIJUN_STOP_BUFFER: f64 = 0.01;
const REWARD_TO_RISK: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IchimokuSettings {
    pub tenkan_period: usize,
    pub kijun_period: usize,
    pub senkou_span_b_period: usize,
    pub displacement: usize,
}

impl Default for IchimokuSettings {
    fn default() -> Self {
        IchimokuSettings {
            tenkan_period: 9,
            kijun_period: 26,
            senkou_span_b_period: 52,
            displacement: 26,
        }
    }
}

impl IchimokuSettings {
    pub fn required_candles(&self) -> usize {
        self.senkou_span_b_period + self.displacement
    }
}

/// Ichimoku lines, one entry per candle; `None` where a line is undefined.
#[derive(Debug, Clone, PartialEq)]
pub struct IchimokuLines {
    pub tenkan: Vec<Option<f64>>,
    pub kijun: Vec<Option<f64>>,
    pub senkou_a: Vec<Option<f64>>,
    pub senkou_b: Vec<Option<f64>>,
    pub chikou: Vec<Option<f64>>,
}

pub fn calculate_ichimoku(candles: &[Candle], settings: &IchimokuSettings) -> IchimokuLines {
    let tenkan = midpoint_channel(candles, settings.tenkan_period);
    let kijun = midpoint_channel(candles, settings.kijun_period);
    let base_a: Vec<Option<f64>> = tenkan
        .iter()
        .zip(&kijun)
        .map(|(t, k)| Some(((*t)? + (*k)?) / 2.0))
        .collect();
    let base_b = midpoint_channel(candles, settings.senkou_span_b_period);
    let closes: Vec<Option<f64>> = candles.iter().map(|c| Some(c.close)).collect();

    IchimokuLines {
        senkou_a: shift_forward(&base_a, settings.displacement),
        senkou_b: shift_forward(&base_b, settings.displacement),
        chikou: shift_backward(&closes, settings.displacement),
        tenkan,
        kijun,
    }
}

/// (highest high + lowest low) / 2 over a trailing window.
fn midpoint_channel(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    (0..candles.len())
        .map(|i| {
            if period == 0 || i + 1 < period {
                return None;
            }
            let window = &candles[i + 1 - period..=i];
            let high = window.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
            let low = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
            Some((high + low) / 2.0)
        })
        .collect()
}

/// out[i] = column[i - n]
fn shift_forward(column: &[Option<f64>], n: usize) -> Vec<Option<f64>> {
    (0..column.len())
        .map(|i| i.checked_sub(n).and_then(|j| column[j]))
        .collect()
}

/// out[i] = column[i + n]
fn shift_backward(column: &[Option<f64>], n: usize) -> Vec<Option<f64>> {
    (0..column.len())
        .map(|i| column.get(i + n).copied().flatten())
        .collect()
}

/// Chikou at the latest plotted point and the close it is compared with,
/// `2 * displacement` candles before the last. Needs more than
/// `2 * displacement + 1` candles.
fn chikou_comparison(
    lines: &IchimokuLines,
    candles: &[Candle],
    displacement: usize,
) -> Option<(f64, f64)> {
    if candles.len() <= 2 * displacement + 1 {
        return None;
    }
    let last = candles.len() - 1;
    let chikou = lines.chikou[last - displacement]?;
    Some((chikou, candles[last - 2 * displacement].close))
}

pub struct IchimokuStrategy {
    settings: IchimokuSettings,
    deps: StrategyDeps,
}

impl IchimokuStrategy {
    pub fn new(settings: IchimokuSettings, deps: StrategyDeps) -> Self {
        IchimokuStrategy { settings, deps }
    }

    pub fn settings(&self) -> &IchimokuSettings {
        &self.settings
    }

    fn signal(&self, series: &EnrichedSeries, side: Side, price: f64, kijun: f64) -> Signal {
        let (stop_loss, take_profit) = match side {
            Side::Buy => (
                kijun * (1.0 - KIJUN_STOP_BUFFER),
                price + (price - kijun) * REWARD_TO_RISK,
            ),
            Side::Sell => (
                kijun * (1.0 + KIJUN_STOP_BUFFER),
                price - (kijun - price) * REWARD_TO_RISK,
            ),
        };
        let timestamp = series
            .last_candle()
            .map(|c| c.close_time)
            .unwrap_or_default();

        Signal {
            strategy: ID.to_string(),
            symbol: series.symbol.clone(),
            side,
            price,
            quantity: self.size_position(price, side),
            stop_loss: Some(stop_loss),
            take_profit: Some(take_profit),
            timestamp,
            confidence: None,
        }
    }
}

impl Strategy for IchimokuStrategy {
    fn id(&self) -> &str {
        ID
    }

    fn generate_signals(&self, series: &EnrichedSeries) -> Result<Vec<Signal>, BotError> {
        let n = series.len();
        let required = self.settings.required_candles().max(2);
        if n < required {
            debug!(
                "ichimoku: {} candles for {}, need {}",
                n, series.symbol, required
            );
            return Ok(Vec::new());
        }

        let last = n - 1;
        let price = series.candles[last].close;
        if !price.is_finite() || price <= 0.0 {
            return Err(BotError::StrategyFailure {
                strategy: ID.to_string(),
                reason: format!("invalid close {} for {}", price, series.symbol),
            });
        }

        let lines = calculate_ichimoku(&series.candles, &self.settings);
        let (
            Some(tenkan),
            Some(kijun),
            Some(prev_tenkan),
            Some(prev_kijun),
            Some(span_a),
            Some(span_b),
        ) = (
            lines.tenkan[last],
            lines.kijun[last],
            lines.tenkan[last - 1],
            lines.kijun[last - 1],
            lines.senkou_a[last],
            lines.senkou_b[last],
        )
        else {
            return Ok(Vec::new());
        };

        let cloud_top = span_a.max(span_b);
        let cloud_bottom = span_a.min(span_b);
        let bullish_cloud = span_a > span_b;

        let chikou_vs_past = chikou_comparison(&lines, &series.candles, self.settings.displacement);

        let buy = prev_tenkan <= prev_kijun
            && tenkan > kijun
            && price > cloud_top
            && bullish_cloud
            && chikou_vs_past.is_some_and(|(chikou, past)| chikou > past);

        let sell = prev_tenkan >= prev_kijun
            && tenkan < kijun
            && price < cloud_bottom
            && !bullish_cloud
            && chikou_vs_past.is_some_and(|(chikou, past)| chikou < past);

        let mut signals = Vec::new();
        if buy {
            signals.push(self.signal(series, Side::Buy, price, kijun));
        }
        if sell {
            signals.push(self.signal(series, Side::Sell, price, kijun));
        }
        Ok(signals)
    }

    fn size_position(&self, price: f64, _side: Side) -> f64 {
        self.deps.size(price)
    }
}
