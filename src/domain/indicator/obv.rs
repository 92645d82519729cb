//! OBV (On-Balance Volume) indicator implementation.

use crate::domain::candle::Candle;
use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};

/// Calculate OBV (On-Balance Volume) indicator.
///
/// OBV[0] = volume[0]
/// If close[i] > close[i-1]: OBV[i] = OBV[i-1] + volume[i]
/// If close[i] < close[i-1]: OBV[i] = OBV[i-1] - volume[i]
/// If close[i] == close[i-1]: OBV[i] = OBV[i-1]
///
/// No warmup period; all candles are valid.
pub fn calculate_obv(candles: &[Candle]) -> IndicatorSeries {
    let mut values = Vec::with_capacity(candles.len());
    let mut obv = 0.0;
    let mut prev_close: Option<f64> = None;

    for candle in candles {
        match prev_close {
            None => obv = candle.volume,
            Some(prev) if candle.close > prev => obv += candle.volume,
            Some(prev) if candle.close < prev => obv -= candle.volume,
            Some(_) => {}
        }
        prev_close = Some(candle.close);

        values.push(IndicatorPoint {
            time: candle.open_time,
            valid: true,
            value: IndicatorValue::Simple(obv),
        });
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Obv,
        values,
    }
}
