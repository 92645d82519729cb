//! Opening gap detection between consecutive candles.

use crate::domain::candle::Candle;

pub const DEFAULT_GAP_THRESHOLD: f64 = 0.005;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GapPoint {
    pub gap_up: bool,
    pub gap_down: bool,
    /// Percentage change from the prior close to this open.
    pub gap_size_pct: f64,
}

/// One entry per candle; the first candle has no prior close and yields `None`.
///
/// A candle gaps up when `open > prior_close × (1 + threshold)` and gaps
/// down when `open < prior_close × (1 - threshold)`.
pub fn detect_gaps(candles: &[Candle], threshold: f64) -> Vec<Option<GapPoint>> {
    let mut gaps = Vec::with_capacity(candles.len());
    if candles.is_empty() {
        return gaps;
    }
    gaps.push(None);

    for pair in candles.windows(2) {
        let prior_close = pair[0].close;
        let open = pair[1].open;
        if prior_close == 0.0 {
            gaps.push(None);
            continue;
        }
        gaps.push(Some(GapPoint {
            gap_up: open > prior_close * (1.0 + threshold),
            gap_down: open < prior_close * (1.0 - threshold),
            gap_size_pct: (open - prior_close) / prior_close * 100.0,
        }));
    }

    gaps
}
