//! # indicators — Indicator Engine
//!
//! Pure, stateless functions over ordered price series.  Each one returns
//! `None` when the series is shorter than its warm-up window; that is a
//! normal condition (fresh listings, short intervals), not an error.
//!
//! [`IndicatorSet::compute`] substitutes the neutral defaults:
//!
//! | Indicator        | Default                 |
//! |------------------|-------------------------|
//! | RSI              | 50.0                    |
//! | EMA / SMA        | current price           |
//! | Bollinger        | current price ± 2%      |
//! | ATR              | 2% of current price     |
//! | MACD / sig / hist| 0.0                     |
//! | Volume ratio     | 100.0                   |

use crate::models::{Candle, IndicatorSet};

pub const RSI_PERIOD: usize = 14;
pub const ATR_PERIOD: usize = 14;
pub const BOLLINGER_PERIOD: usize = 20;
pub const BOLLINGER_K: f64 = 2.0;
pub const VOLUME_WINDOW: usize = 20;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;

// ─── Moving Averages ──────────────────────────────────────────────────────────

/// Full EMA series, seeded with the first value (α = 2 / (period + 1)).
fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev = match values.first() {
        Some(v) => *v,
        None => return out,
    };
    out.push(prev);
    for v in &values[1..] {
        prev = alpha * v + (1.0 - alpha) * prev;
        out.push(prev);
    }
    out
}

/// Latest EMA value.
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    ema_series(values, period).last().copied()
}

/// Latest simple moving average over the last `period` values.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

// ─── RSI ──────────────────────────────────────────────────────────────────────

/// RSI from the rolling mean of gains and losses over the last `period`
/// first-differences.
///
/// Zero average loss saturates at 100; a completely flat window (no gains,
/// no losses) is neutral 50.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }
    let tail = &closes[closes.len() - period - 1..];
    let (mut gain, mut loss) = (0.0, 0.0);
    for pair in tail.windows(2) {
        let delta = pair[1] - pair[0];
        if delta > 0.0 {
            gain += delta;
        } else {
            loss -= delta;
        }
    }
    let avg_gain = gain / period as f64;
    let avg_loss = loss / period as f64;

    if avg_loss == 0.0 {
        return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

// ─── MACD ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Macd {
    pub macd:      f64,
    pub signal:    f64,
    pub histogram: f64,
}

pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    if fast == 0 || slow == 0 || signal == 0 || closes.len() < slow + signal {
        return None;
    }
    let fast_series = ema_series(closes, fast);
    let slow_series = ema_series(closes, slow);
    let macd_line: Vec<f64> = fast_series
        .iter()
        .zip(&slow_series)
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema_series(&macd_line, signal);

    let macd = *macd_line.last()?;
    let signal = *signal_line.last()?;
    Some(Macd { macd, signal, histogram: macd - signal })
}

// ─── ATR ──────────────────────────────────────────────────────────────────────

/// Rolling mean of the true range over the last `period` bars.
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let tail = &candles[candles.len() - period - 1..];
    let sum: f64 = tail
        .windows(2)
        .map(|w| {
            let (prev, cur) = (w[0], w[1]);
            (cur.high - cur.low)
                .max((cur.high - prev.close).abs())
                .max((cur.low - prev.close).abs())
        })
        .sum();
    Some(sum / period as f64)
}

// ─── Bollinger ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bollinger {
    pub upper:  f64,
    pub middle: f64,
    pub lower:  f64,
}

/// Middle = SMA(period); bands at ± k · sample standard deviation.
pub fn bollinger(closes: &[f64], period: usize, k: f64) -> Option<Bollinger> {
    if period < 2 || closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    let middle = window.iter().sum::<f64>() / period as f64;
    let var = window.iter().map(|v| (v - middle).powi(2)).sum::<f64>() / (period as f64 - 1.0);
    let dev = var.sqrt() * k;
    Some(Bollinger { upper: middle + dev, middle, lower: middle - dev })
}

// ─── Volume ───────────────────────────────────────────────────────────────────

/// `current / average × 100`, neutral 100 when the average is unusable.
pub fn volume_ratio(current: f64, average: f64) -> f64 {
    if average == 0.0 || !average.is_finite() {
        return 100.0;
    }
    current / average * 100.0
}

// ─── IndicatorSet ─────────────────────────────────────────────────────────────

impl IndicatorSet {
    /// Computes every indicator from a candle series, filling in neutral
    /// defaults where history is too short.
    pub fn compute(candles: &[Candle]) -> Self {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let price = closes.last().copied().unwrap_or(0.0);
        let mut defaulted = Vec::new();

        let mut or_default = |name: &'static str, value: Option<f64>, fallback: f64| {
            value.unwrap_or_else(|| {
                defaulted.push(name);
                fallback
            })
        };

        let rsi = or_default("rsi", rsi(&closes, RSI_PERIOD), 50.0);
        let ema_20 = or_default("ema_20", ema(&closes, 20), price);
        let ema_50 = or_default("ema_50", ema(&closes, 50), price);
        let sma_20 = or_default("sma_20", sma(&closes, 20), price);
        let sma_50 = or_default("sma_50", sma(&closes, 50), price);
        let atr_14 = or_default("atr_14", atr(candles, ATR_PERIOD), price * 0.02);

        let (macd, macd_signal, macd_histogram) =
            match macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL) {
                Some(m) => (m.macd, m.signal, m.histogram),
                None => {
                    defaulted.push("macd");
                    (0.0, 0.0, 0.0)
                }
            };

        let (bollinger_upper, bollinger_middle, bollinger_lower) =
            match bollinger(&closes, BOLLINGER_PERIOD, BOLLINGER_K) {
                Some(b) => (b.upper, b.middle, b.lower),
                None => {
                    defaulted.push("bollinger");
                    (price * 1.02, price, price * 0.98)
                }
            };

        let volume_ratio = if candles.len() >= VOLUME_WINDOW {
            let window = &candles[candles.len() - VOLUME_WINDOW..];
            let avg = window.iter().map(|c| c.volume).sum::<f64>() / VOLUME_WINDOW as f64;
            volume_ratio(window[VOLUME_WINDOW - 1].volume, avg)
        } else {
            defaulted.push("volume_ratio");
            100.0
        };

        Self {
            rsi,
            macd,
            macd_signal,
            macd_histogram,
            ema_20,
            ema_50,
            sma_20,
            sma_50,
            bollinger_upper,
            bollinger_middle,
            bollinger_lower,
            atr_14,
            volume_ratio,
            defaulted,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                open_time: i as i64 * 60_000,
                open:      c,
                high:      c + 1.0,
                low:       c - 1.0,
                close:     c,
                volume:    10.0,
            })
            .collect()
    }

    #[test]
    fn test_short_series_returns_none() {
        let closes = [1.0, 2.0, 3.0];
        assert_eq!(rsi(&closes, 14), None);
        assert_eq!(ema(&closes, 20), None);
        assert_eq!(sma(&closes, 20), None);
        assert_eq!(macd(&closes, 12, 26, 9), None);
        assert_eq!(bollinger(&closes, 20, 2.0), None);
        assert_eq!(atr(&candles_from_closes(&closes), 14), None);
    }

    #[test]
    fn test_rsi_needs_period_plus_one() {
        let closes: Vec<f64> = (0..14).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&closes, 14), None);
        let closes: Vec<f64> = (0..15).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&closes, 14), Some(100.0));
    }

    #[test]
    fn test_rsi_flat_is_neutral() {
        let closes = vec![250.0; 40];
        assert_eq!(rsi(&closes, 14), Some(50.0));
    }

    #[test]
    fn test_rsi_all_losses_is_zero() {
        let closes: Vec<f64> = (0..30).map(|i| 500.0 - i as f64).collect();
        assert_eq!(rsi(&closes, 14), Some(0.0));
    }

    #[test]
    fn test_rsi_bounded_on_mixed_series() {
        let closes: Vec<f64> = (0..120)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0 + (i % 7) as f64)
            .collect();
        for end in 15..closes.len() {
            let v = rsi(&closes[..end], 14).unwrap();
            assert!((0.0..=100.0).contains(&v), "rsi out of range: {v}");
        }
    }

    #[test]
    fn test_rsi_known_value() {
        // 7 gains of 2, 7 losses of 1 → rs = 2 → rsi = 66.67
        let mut closes = vec![100.0];
        for i in 0..14 {
            let last = *closes.last().unwrap();
            closes.push(if i % 2 == 0 { last + 2.0 } else { last - 1.0 });
        }
        let v = rsi(&closes, 14).unwrap();
        assert!((v - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_sma_and_ema_of_constant_series() {
        let closes = vec![42.0; 60];
        assert!(approx(sma(&closes, 20).unwrap(), 42.0));
        assert!(approx(ema(&closes, 50).unwrap(), 42.0));
    }

    #[test]
    fn test_ema_recursion() {
        // α = 2/(3+1) = 0.5 → 1, 1.5, 2.25
        let v = ema(&[1.0, 2.0, 3.0], 3).unwrap();
        assert!(approx(v, 2.25));
    }

    #[test]
    fn test_macd_histogram_is_difference() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let m = macd(&closes, 12, 26, 9).unwrap();
        assert!(approx(m.histogram, m.macd - m.signal));
        assert!(m.macd > 0.0, "uptrend should have positive macd");
    }

    #[test]
    fn test_bollinger_sample_stddev() {
        let closes = [1.0, 2.0, 3.0, 4.0];
        let b = bollinger(&closes, 4, 2.0).unwrap();
        let sd = (5.0f64 / 3.0).sqrt();
        assert!(approx(b.middle, 2.5));
        assert!(approx(b.upper, 2.5 + 2.0 * sd));
        assert!(approx(b.lower, 2.5 - 2.0 * sd));
    }

    #[test]
    fn test_atr_uses_previous_close() {
        let mut candles = candles_from_closes(&[10.0; 15]);
        // gap up: high-low = 2 but |high - prev_close| = 6
        candles[14] = Candle { open_time: 0, open: 15.0, high: 16.0, low: 14.0, close: 15.0, volume: 1.0 };
        let v = atr(&candles, 14).unwrap();
        assert!(approx(v, (13.0 * 2.0 + 6.0) / 14.0));
    }

    #[test]
    fn test_volume_ratio_guard() {
        assert_eq!(volume_ratio(50.0, 0.0), 100.0);
        assert!(approx(volume_ratio(50.0, 25.0), 200.0));
    }

    #[test]
    fn test_indicator_set_defaults_on_short_history() {
        let candles = candles_from_closes(&[100.0, 101.0, 102.0]);
        let set = IndicatorSet::compute(&candles);
        assert_eq!(set.rsi, 50.0);
        assert_eq!(set.ema_20, 102.0);
        assert_eq!(set.ema_50, 102.0);
        assert_eq!(set.sma_20, 102.0);
        assert_eq!(set.sma_50, 102.0);
        assert!(approx(set.bollinger_upper, 102.0 * 1.02));
        assert!(approx(set.bollinger_lower, 102.0 * 0.98));
        assert_eq!(set.bollinger_middle, 102.0);
        assert!(approx(set.atr_14, 102.0 * 0.02));
        assert_eq!((set.macd, set.macd_signal, set.macd_histogram), (0.0, 0.0, 0.0));
        assert_eq!(set.volume_ratio, 100.0);
        assert!(set.defaulted.contains(&"rsi"));
    }

    #[test]
    fn test_indicator_set_empty_series() {
        let set = IndicatorSet::compute(&[]);
        assert_eq!(set.rsi, 50.0);
        assert_eq!(set.ema_20, 0.0);
        assert_eq!(set.atr_14, 0.0);
    }

    #[test]
    fn test_indicator_set_full_history_has_no_defaults() {
        let closes: Vec<f64> = (0..200).map(|i| 1000.0 + (i as f64 * 0.3).cos() * 20.0).collect();
        let set = IndicatorSet::compute(&candles_from_closes(&closes));
        assert!(set.defaulted.is_empty(), "unexpected defaults: {:?}", set.defaulted);
        assert!(!set.defaulted.contains(&"macd"));
        assert!(set.bollinger_upper > set.bollinger_middle);
    }
}
