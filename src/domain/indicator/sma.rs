//! Simple Moving Average indicator.
//!
//! SMA(n)[i] = mean(C[i-n+1..=i]), maintained as a running window sum.
//! Warmup: first (n-1) candles are invalid.

use crate::domain::candle::Candle;
use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};

pub fn calculate_sma(candles: &[Candle], period: usize) -> IndicatorSeries {
    if period == 0 || candles.is_empty() {
        return IndicatorSeries::empty(IndicatorType::Sma(period));
    }

    let mut values = Vec::with_capacity(candles.len());
    let mut sum = 0.0;

    for (i, candle) in candles.iter().enumerate() {
        sum += candle.close;
        if i >= period {
            sum -= candles[i - period].close;
        }

        let valid = i + 1 >= period;
        values.push(IndicatorPoint {
            time: candle.open_time,
            valid,
            value: IndicatorValue::Simple(if valid { sum / period as f64 } else { 0.0 }),
        });
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Sma(period),
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::flat_candles;

    #[test]
    fn sma_warmup() {
        let series = calculate_sma(&flat_candles(&[1.0, 2.0, 3.0, 4.0]), 3);
        assert!(!series.values[0].valid);
        assert!(!series.values[1].valid);
        assert!(series.values[2].valid);
        assert!(series.values[3].valid);
    }

    #[test]
    fn sma_window_mean() {
        let series = calculate_sma(&flat_candles(&[1.0, 2.0, 3.0, 4.0, 8.0]), 3);
        assert_eq!(series.simple_at(2), Some(2.0));
        assert_eq!(series.simple_at(3), Some(3.0));
        assert_eq!(series.simple_at(4), Some(5.0));
    }

    #[test]
    fn sma_longer_than_series_is_all_invalid() {
        let series = calculate_sma(&flat_candles(&[1.0, 2.0]), 20);
        assert_eq!(series.values.len(), 2);
        assert_eq!(series.first_valid(), None);
    }

    #[test]
    fn sma_period_0() {
        let series = calculate_sma(&flat_candles(&[1.0, 2.0]), 0);
        assert!(series.values.is_empty());
    }
}
