//! Bollinger Bands indicator.
//!
//! Bollinger Bands consist of:
//! - Middle: Simple Moving Average (SMA) over n periods
//! - Upper: Middle + (multiplier × StdDev)
//! - Lower: Middle - (multiplier × StdDev)
//!
//! Where StdDev is population standard deviation (divides by N, not N-1).
//!
//! Default parameters: period=20, multiplier=2.0
//! Warmup: first (period-1) candles are invalid.

use crate::domain::candle::Candle;
use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};

pub const DEFAULT_PERIOD: usize = 20;
pub const DEFAULT_MULT_X100: u32 = 200;

pub fn calculate_bollinger(
    candles: &[Candle],
    period: usize,
    stddev_mult_x100: u32,
) -> IndicatorSeries {
    let indicator_type = IndicatorType::Bollinger {
        period,
        stddev_mult_x100,
    };
    if period == 0 {
        return IndicatorSeries::empty(indicator_type);
    }

    let mult = stddev_mult_x100 as f64 / 100.0;
    let values = candles
        .iter()
        .enumerate()
        .map(|(i, candle)| {
            let valid = i + 1 >= period;
            let (upper, middle, lower) = if valid {
                let window = &candles[i + 1 - period..=i];
                let middle = window.iter().map(|c| c.close).sum::<f64>() / period as f64;
                let variance = window
                    .iter()
                    .map(|c| (c.close - middle).powi(2))
                    .sum::<f64>()
                    / period as f64;
                let stddev = variance.sqrt();
                (middle + mult * stddev, middle, middle - mult * stddev)
            } else {
                (0.0, 0.0, 0.0)
            };

            IndicatorPoint {
                time: candle.open_time,
                valid,
                value: IndicatorValue::Bollinger {
                    upper,
                    middle,
                    lower,
                },
            }
        })
        .collect();

    IndicatorSeries {
        indicator_type,
        values,
    }
}
