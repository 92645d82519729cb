//! VWAP (Volume-Weighted Average Price), anchored to each trading day.
//!
//! Cumulative volume and cumulative volume × typical price reset whenever the
//! UTC calendar day of the candle open time changes.
//! VWAP[i] = cum_vol_price / cum_vol within the day.
//!
//! A candle is invalid only while its day has seen zero volume.

use chrono::NaiveDate;

use crate::domain::candle::Candle;
use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};

pub fn calculate_vwap(candles: &[Candle]) -> IndicatorSeries {
    let mut values = Vec::with_capacity(candles.len());
    let mut day: Option<NaiveDate> = None;
    let mut cum_vol = 0.0;
    let mut cum_vol_price = 0.0;

    for candle in candles {
        let candle_day = candle.trading_day();
        if day != Some(candle_day) {
            day = Some(candle_day);
            cum_vol = 0.0;
            cum_vol_price = 0.0;
        }

        cum_vol += candle.volume;
        cum_vol_price += candle.volume * candle.typical_price();

        let valid = cum_vol > 0.0;
        values.push(IndicatorPoint {
            time: candle.open_time,
            valid,
            value: IndicatorValue::Simple(if valid { cum_vol_price / cum_vol } else { 0.0 }),
        });
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Vwap,
        values,
    }
}
