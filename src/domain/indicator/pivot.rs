//! Traditional pivot points from a lagged candle.
//!
//! With H, L, C taken `lookback` candles back:
//! P  = (H + L + C) / 3
//! R1 = 2P - L,        S1 = 2P - H
//! R2 = P + (H - L),   S2 = P - (H - L)
//! R3 = H + 2(P - L),  S3 = L - 2(H - P)
//!
//! Warmup: the first `lookback` candles are invalid.

use crate::domain::candle::Candle;
use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};

pub const DEFAULT_LOOKBACK: usize = 1;

pub fn calculate_pivots(candles: &[Candle], lookback: usize) -> IndicatorSeries {
    let values = candles
        .iter()
        .enumerate()
        .map(|(i, candle)| match i.checked_sub(lookback) {
            Some(lagged) => IndicatorPoint {
                time: candle.open_time,
                valid: true,
                value: pivot_levels(&candles[lagged]),
            },
            None => IndicatorPoint {
                time: candle.open_time,
                valid: false,
                value: IndicatorValue::Pivot {
                    pivot: 0.0,
                    r1: 0.0,
                    r2: 0.0,
                    r3: 0.0,
                    s1: 0.0,
                    s2: 0.0,
                    s3: 0.0,
                },
            },
        })
        .collect();

    IndicatorSeries {
        indicator_type: IndicatorType::Pivot(lookback),
        values,
    }
}

fn pivot_levels(source: &Candle) -> IndicatorValue {
    let (h, l) = (source.high, source.low);
    let pivot = source.typical_price();
    IndicatorValue::Pivot {
        pivot,
        r1: 2.0 * pivot - l,
        s1: 2.0 * pivot - h,
        r2: pivot + (h - l),
        s2: pivot - (h - l),
        r3: h + 2.0 * (pivot - l),
        s3: l - 2.0 * (h - pivot),
    }
}
