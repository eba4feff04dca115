//! # market — Market Aggregator
//!
//! Builds a per-symbol, multi-timeframe [`MarketSnapshot`] from candles, the
//! 24h ticker, funding rate and open interest.
//!
//! A timeframe that errors or comes back empty is logged and left out; the
//! rest of the snapshot is still valid.  All calls here are read-only, so
//! timeframes and symbols are fetched concurrently.

use std::fmt::Write as _;
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};

use crate::exchange::MarketData;
use crate::models::{IndicatorSet, RealtimeQuote, TimeframeSnapshot};

/// Candles shown per timeframe in the digest.
const DIGEST_CANDLES: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct MarketSnapshot {
    pub symbol:     String,
    /// `None` when the ticker itself could not be read.
    pub quote:      Option<RealtimeQuote>,
    /// In the configured timeframe order, minus any that failed.
    pub timeframes: Vec<TimeframeSnapshot>,
}

impl MarketSnapshot {
    /// Live price, `0.0` when unknown.
    pub fn price(&self) -> f64 {
        self.quote.as_ref().map(|q| q.price).unwrap_or(0.0)
    }

    /// Compact text rendering for the AI prompt: quote line, then the last
    /// few candles and an indicator summary per timeframe.
    pub fn digest(&self) -> String {
        let mut out = format!("=== {} ===\n", self.symbol);

        match &self.quote {
            Some(q) => {
                let _ = writeln!(
                    out,
                    "Price: {:.4} | 24h: {:+.2}% | 24h high/low: {:.4}/{:.4} | 24h volume: {:.0}",
                    q.price, q.change_24h_pct, q.high_24h, q.low_24h, q.volume_24h
                );
                let _ = writeln!(out, "Funding rate: {:.6} | Open interest: {:.0}", q.funding_rate, q.open_interest);
            }
            None => out.push_str("Price: unavailable\n"),
        }

        for tf in &self.timeframes {
            let _ = writeln!(out, "\n[{}]", tf.interval);
            let skip = tf.candles.len().saturating_sub(DIGEST_CANDLES);
            for (i, c) in tf.candles.iter().skip(skip).enumerate() {
                let body = if c.close > c.open {
                    "UP"
                } else if c.close < c.open {
                    "DOWN"
                } else {
                    "FLAT"
                };
                let _ = writeln!(out, "  K{}: {body} C {:.4} ({:+.2}%) V {:.2}", i + 1, c.close, c.change_pct(), c.volume);
            }

            let ind = &tf.indicators;
            let _ = writeln!(
                out,
                "  RSI={:.1} MACD={:.4}/{:.4}/{:.4} EMA20={:.4} EMA50={:.4} SMA20={:.4} SMA50={:.4}",
                ind.rsi, ind.macd, ind.macd_signal, ind.macd_histogram, ind.ema_20, ind.ema_50, ind.sma_20, ind.sma_50
            );
            let _ = writeln!(
                out,
                "  BB={:.4}/{:.4}/{:.4} ATR14={:.4} VolRatio={:.1}%",
                ind.bollinger_upper, ind.bollinger_middle, ind.bollinger_lower, ind.atr_14, ind.volume_ratio
            );
            if !ind.defaulted.is_empty() {
                let _ = writeln!(out, "  (insufficient history: {})", ind.defaulted.join(", "));
            }
        }
        out
    }
}

#[derive(Clone)]
pub struct MarketAggregator {
    source:     Arc<dyn MarketData>,
    timeframes: Vec<String>,
    limit:      usize,
}

impl MarketAggregator {
    pub fn new(source: Arc<dyn MarketData>, timeframes: Vec<String>, limit: usize) -> Self {
        Self { source, timeframes, limit }
    }

    async fn timeframe(&self, symbol: &str, interval: &str) -> Option<TimeframeSnapshot> {
        match self.source.candles(symbol, interval, self.limit).await {
            Ok(candles) if candles.is_empty() => {
                warn!(symbol, interval, "No candles returned — timeframe skipped");
                None
            }
            Ok(candles) => {
                let indicators = IndicatorSet::compute(&candles);
                debug!(symbol, interval, count = candles.len(), "Timeframe loaded");
                Some(TimeframeSnapshot { interval: interval.to_string(), candles, indicators })
            }
            Err(e) => {
                warn!(symbol, interval, error = %e, "Candle fetch failed — timeframe skipped");
                None
            }
        }
    }

    /// Ticker is required for a quote; funding and open interest default to 0.
    pub async fn quote(&self, symbol: &str) -> Option<RealtimeQuote> {
        let (ticker, funding, oi) = tokio::join!(
            self.source.ticker(symbol),
            self.source.funding_rate(symbol),
            self.source.open_interest(symbol),
        );

        let ticker = match ticker {
            Ok(t) => t,
            Err(e) => {
                warn!(symbol, error = %e, "Ticker fetch failed — no live quote");
                return None;
            }
        };

        let funding_rate = funding.unwrap_or_else(|e| {
            debug!(symbol, error = %e, "Funding rate unavailable");
            None
        });
        let open_interest = oi.unwrap_or_else(|e| {
            debug!(symbol, error = %e, "Open interest unavailable");
            None
        });

        Some(RealtimeQuote {
            price:          ticker.last_price,
            change_24h_pct: ticker.price_change_pct,
            volume_24h:     ticker.volume,
            high_24h:       ticker.high_price,
            low_24h:        ticker.low_price,
            funding_rate:   funding_rate.unwrap_or(0.0),
            open_interest:  open_interest.unwrap_or(0.0),
        })
    }

    pub async fn aggregate(&self, symbol: &str) -> MarketSnapshot {
        let frames = join_all(self.timeframes.iter().map(|tf| self.timeframe(symbol, tf)));
        let (frames, quote) = tokio::join!(frames, self.quote(symbol));
        let timeframes: Vec<TimeframeSnapshot> = frames.into_iter().flatten().collect();

        debug!(
            symbol,
            loaded = timeframes.len(),
            requested = self.timeframes.len(),
            has_quote = quote.is_some(),
            "Market snapshot built"
        );

        MarketSnapshot { symbol: symbol.to_string(), quote, timeframes }
    }

    /// One snapshot per symbol, in the order given.
    pub async fn aggregate_all(&self, symbols: &[String]) -> Vec<MarketSnapshot> {
        join_all(symbols.iter().map(|s| self.aggregate(s))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::mock::MockExchange;
    use crate::exchange::ExchangeError;
    use crate::models::Candle;

    fn candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let p = 100.0 + (i % 7) as f64;
                Candle { open_time: i as i64 * 60_000, open: p, high: p + 1.0, low: p - 1.0, close: p + 0.5, volume: 10.0 }
            })
            .collect()
    }

    fn aggregator(ex: MockExchange) -> MarketAggregator {
        MarketAggregator::new(Arc::new(ex), vec!["5m".into(), "1h".into(), "1d".into()], 200)
    }

    #[tokio::test]
    async fn test_failed_and_empty_timeframes_are_omitted() {
        let ex = MockExchange::new()
            .with_candles("BTCUSDT", "5m", candles(60))
            .with_candles("BTCUSDT", "1d", candles(60))
            .with_price("BTCUSDT", 50_000.0);
        ex.fail_next("candles", ExchangeError::Transient("timeout".into()));
        let agg = aggregator(ex);

        let snap = agg.aggregate("BTCUSDT").await;
        // one of 5m/1d failed, 1h is empty
        assert_eq!(snap.timeframes.len(), 1);
        assert!(snap.timeframes.iter().all(|t| t.interval != "1h"));
        assert_eq!(snap.price(), 50_000.0);
    }

    #[tokio::test]
    async fn test_quote_defaults_missing_funding_to_zero() {
        let ex = MockExchange::new().with_price("ETHUSDT", 3_000.0);
        ex.fail_next("funding_rate", ExchangeError::Transient("timeout".into()));
        let q = aggregator(ex).quote("ETHUSDT").await.unwrap();
        assert_eq!(q.funding_rate, 0.0);
        assert_eq!(q.open_interest, 0.0);
        assert_eq!(q.price, 3_000.0);
    }

    #[tokio::test]
    async fn test_ticker_failure_leaves_quote_absent() {
        let agg = aggregator(MockExchange::new().with_candles("BTCUSDT", "5m", candles(30)));
        let snap = agg.aggregate("BTCUSDT").await;
        assert!(snap.quote.is_none());
        assert_eq!(snap.price(), 0.0);
        assert_eq!(snap.timeframes.len(), 1);
    }

    #[tokio::test]
    async fn test_aggregate_all_keeps_symbol_order() {
        let ex = MockExchange::new().with_price("BTCUSDT", 1.0).with_price("ETHUSDT", 2.0);
        let snaps = aggregator(ex).aggregate_all(&["ETHUSDT".into(), "BTCUSDT".into()]).await;
        assert_eq!(snaps[0].symbol, "ETHUSDT");
        assert_eq!(snaps[1].price(), 1.0);
    }

    #[tokio::test]
    async fn test_digest_shows_last_five_candles() {
        let ex = MockExchange::new()
            .with_candles("BTCUSDT", "5m", candles(60))
            .with_price("BTCUSDT", 100.0)
            .with_funding("BTCUSDT", 0.0001);
        let digest = aggregator(ex).aggregate("BTCUSDT").await.digest();
        assert!(digest.starts_with("=== BTCUSDT ==="));
        assert!(digest.contains("[5m]"));
        assert!(digest.contains("K5:"));
        assert!(!digest.contains("K6:"));
        assert!(digest.contains("Funding rate: 0.000100"));
    }

    #[test]
    fn test_digest_flags_defaulted_indicators() {
        let c = candles(3);
        let snap = MarketSnapshot {
            symbol:     "NEWUSDT".into(),
            quote:      None,
            timeframes: vec![TimeframeSnapshot { interval: "1h".into(), indicators: IndicatorSet::compute(&c), candles: c }],
        };
        let digest = snap.digest();
        assert!(digest.contains("Price: unavailable"));
        assert!(digest.contains("insufficient history"));
    }
}
