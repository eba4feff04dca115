//! # models::candle
//!
//! Market-data shapes: one [`Candle`] per exchange-reported bar, the live
//! [`RealtimeQuote`], and the per-interval [`TimeframeSnapshot`] the Market
//! Aggregator builds fresh every cycle.

use serde::{Deserialize, Serialize};

/// A single OHLCV bar.  Sequences are ordered by `open_time` ascending and may
/// contain gaps (the exchange simply does not report empty bars).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time, epoch milliseconds (UTC).
    pub open_time: i64,
    pub open:      f64,
    pub high:      f64,
    pub low:       f64,
    pub close:     f64,
    pub volume:    f64,
}

impl Candle {
    /// Percentage move from open to close, `0.0` when open is not positive.
    #[inline]
    pub fn change_pct(&self) -> f64 {
        if self.open > 0.0 {
            (self.close - self.open) / self.open * 100.0
        } else {
            0.0
        }
    }
}

/// Live market pulse for one symbol.
///
/// `funding_rate` and `open_interest` are `0.0` when the exchange could not
/// provide them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RealtimeQuote {
    pub price:          f64,
    pub change_24h_pct: f64,
    pub volume_24h:     f64,
    pub high_24h:       f64,
    pub low_24h:        f64,
    pub funding_rate:   f64,
    pub open_interest:  f64,
}

/// Latest value of every indicator for one timeframe.
///
/// Every field is always populated: when the history is too short the
/// documented neutral default is substituted and the indicator name is
/// appended to `defaulted`.  Values never leak across cycles.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorSet {
    pub rsi:               f64,
    pub macd:              f64,
    pub macd_signal:       f64,
    pub macd_histogram:    f64,
    pub ema_20:            f64,
    pub ema_50:            f64,
    pub sma_20:            f64,
    pub sma_50:            f64,
    pub bollinger_upper:   f64,
    pub bollinger_middle:  f64,
    pub bollinger_lower:   f64,
    pub atr_14:            f64,
    pub volume_ratio:      f64,
    /// Indicators that fell back to their neutral default this cycle.
    pub defaulted:         Vec<&'static str>,
}

/// One interval's worth of candles plus the indicators derived from them.
#[derive(Debug, Clone, Serialize)]
pub struct TimeframeSnapshot {
    /// Exchange interval code, e.g. `"15m"`, `"4h"`.
    pub interval:   String,
    pub candles:    Vec<Candle>,
    pub indicators: IndicatorSet,
}
