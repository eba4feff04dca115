//! # exchange::binance — Public USDⓈ-M futures market data
//!
//! Unsigned REST endpoints only (klines, 24h ticker, premium index, open
//! interest).  Account and trading calls need a signed client, which lives
//! outside this crate.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{ExchangeError, MarketData, Ticker24h};
use crate::models::Candle;

pub const DEFAULT_BASE_URL: &str = "https://fapi.binance.com";

pub struct BinanceMarketData {
    client:   reqwest::Client,
    base_url: String,
    timeout:  Duration,
}

impl BinanceMarketData {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout:  Duration::from_secs(10),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, ExchangeError> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "GET market data");

        let resp = self
            .client
            .get(&url)
            .query(query)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(map_transport)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let msg = format!("HTTP {status}: {body}");
            return Err(if status.as_u16() == 429 || status.as_u16() == 418 || status.is_server_error() {
                ExchangeError::Transient(msg)
            } else {
                ExchangeError::Rejected(msg)
            });
        }

        resp.json::<T>().await.map_err(|e| ExchangeError::Decode(e.to_string()))
    }
}

fn map_transport(e: reqwest::Error) -> ExchangeError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        ExchangeError::Transient(e.to_string())
    } else {
        ExchangeError::Decode(e.to_string())
    }
}

/// Binance sends most decimals as JSON strings.
fn num(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn parse_kline(row: &[Value]) -> Option<Candle> {
    Some(Candle {
        open_time: row.first()?.as_i64()?,
        open:      num(row.get(1)?)?,
        high:      num(row.get(2)?)?,
        low:       num(row.get(3)?)?,
        close:     num(row.get(4)?)?,
        volume:    num(row.get(5)?)?,
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerResponse {
    last_price:           String,
    price_change_percent: Option<String>,
    volume:               Option<String>,
    high_price:           Option<String>,
    low_price:            Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PremiumIndexResponse {
    last_funding_rate: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenInterestResponse {
    open_interest: Option<String>,
}

fn opt_num(s: &Option<String>) -> f64 {
    s.as_deref().and_then(|v| v.parse().ok()).unwrap_or(0.0)
}

#[async_trait]
impl MarketData for BinanceMarketData {
    async fn candles(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>, ExchangeError> {
        let rows: Vec<Vec<Value>> = self
            .get(
                "/fapi/v1/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        rows.iter()
            .map(|row| parse_kline(row).ok_or_else(|| ExchangeError::Decode(format!("malformed kline row: {row:?}"))))
            .collect()
    }

    async fn ticker(&self, symbol: &str) -> Result<Ticker24h, ExchangeError> {
        let t: TickerResponse = self
            .get("/fapi/v1/ticker/24hr", &[("symbol", symbol.to_string())])
            .await?;

        let last_price = t
            .last_price
            .parse()
            .map_err(|_| ExchangeError::Decode(format!("bad lastPrice '{}'", t.last_price)))?;

        Ok(Ticker24h {
            last_price,
            price_change_pct: opt_num(&t.price_change_percent),
            volume:           opt_num(&t.volume),
            high_price:       opt_num(&t.high_price),
            low_price:        opt_num(&t.low_price),
        })
    }

    async fn funding_rate(&self, symbol: &str) -> Result<Option<f64>, ExchangeError> {
        let p: PremiumIndexResponse = self
            .get("/fapi/v1/premiumIndex", &[("symbol", symbol.to_string())])
            .await?;
        Ok(p.last_funding_rate.and_then(|v| v.parse().ok()))
    }

    async fn open_interest(&self, symbol: &str) -> Result<Option<f64>, ExchangeError> {
        let oi: OpenInterestResponse = self
            .get("/fapi/v1/openInterest", &[("symbol", symbol.to_string())])
            .await?;
        Ok(oi.open_interest.and_then(|v| v.parse().ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_kline_row() {
        let row = json!([1700000000000i64, "100.5", "101", "99.5", "100.9", "1234.5", 1700000059999i64]);
        let c = parse_kline(row.as_array().unwrap()).unwrap();
        assert_eq!(c.open_time, 1700000000000);
        assert_eq!(c.close, 100.9);
        assert_eq!(c.volume, 1234.5);
    }

    #[test]
    fn test_parse_kline_rejects_short_row() {
        let row = json!([1700000000000i64, "100.5"]);
        assert!(parse_kline(row.as_array().unwrap()).is_none());
    }
}
