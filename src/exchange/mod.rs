//! # exchange
//!
//! Collaborator contracts for the exchange.  The core only ever talks to these
//! traits; signing, transport and rate limiting live behind them.
//!
//! Payloads are typed once at this boundary ([`RawPosition`], [`RawAccount`],
//! [`Ticker24h`]) and normalised by the State Reader.

pub mod binance;
pub mod paper;

#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Candle, ConditionalKind, ExecutedOrder, OrderSide};

// ─── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExchangeError {
    /// Timeouts, connection resets, rate limits, 5xx.  Safe to retry.
    #[error("transient exchange failure: {0}")]
    Transient(String),

    /// The exchange understood and refused the request.
    #[error("exchange rejected request: {0}")]
    Rejected(String),

    /// The response could not be decoded into the expected shape.
    #[error("exchange response decode error: {0}")]
    Decode(String),
}

impl ExchangeError {
    /// Retry predicate used by the execution retry policy.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExchangeError::Transient(_))
    }
}

// ─── Boundary Records ─────────────────────────────────────────────────────────

/// 24h rolling ticker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ticker24h {
    pub last_price:         f64,
    pub price_change_pct:   f64,
    pub volume:             f64,
    pub high_price:         f64,
    pub low_price:          f64,
}

/// Position record as the exchange reports it: signed amount, may be zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPosition {
    pub symbol:             String,
    pub position_amt:       f64,
    pub entry_price:        f64,
    pub mark_price:         f64,
    pub leverage:           u32,
    pub unrealized_profit:  f64,
    pub liquidation_price:  f64,
}

/// Account record as the exchange reports it.  Balance fields the venue did
/// not send are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAccount {
    pub total_wallet_balance:       Option<f64>,
    pub total_margin_balance:       Option<f64>,
    pub total_cross_wallet_balance: Option<f64>,
    pub available_balance:          Option<f64>,
    pub wallet_balance:             Option<f64>,
    pub total_initial_margin:       Option<f64>,
    pub total_unrealized_profit:    Option<f64>,
    pub update_time:                Option<DateTime<Utc>>,
}

// ─── Traits ───────────────────────────────────────────────────────────────────

/// Read-only market data.  Side-effect free, safe to fan out concurrently.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Most recent `limit` bars, oldest first.
    async fn candles(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>, ExchangeError>;

    async fn ticker(&self, symbol: &str) -> Result<Ticker24h, ExchangeError>;

    /// `None` when the venue has no funding information for the symbol.
    async fn funding_rate(&self, symbol: &str) -> Result<Option<f64>, ExchangeError>;

    async fn open_interest(&self, symbol: &str) -> Result<Option<f64>, ExchangeError>;
}

/// Read-only account state.
#[async_trait]
pub trait AccountData: Send + Sync {
    async fn account(&self) -> Result<Option<RawAccount>, ExchangeError>;

    /// Raw record for one symbol (may carry a zero amount).
    async fn position(&self, symbol: &str) -> Result<Option<RawPosition>, ExchangeError>;

    async fn all_positions(&self) -> Result<Vec<RawPosition>, ExchangeError>;
}

/// Capital-affecting calls.
#[async_trait]
pub trait Trading: Send + Sync {
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError>;

    async fn market_order(&self, symbol: &str, side: OrderSide, quantity: f64) -> Result<ExecutedOrder, ExchangeError>;

    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), ExchangeError>;

    /// Conditional close-position market order triggered at `stop_price`.
    async fn place_conditional(
        &self,
        symbol:     &str,
        side:       OrderSide,
        stop_price: f64,
        kind:       ConditionalKind,
    ) -> Result<ExecutedOrder, ExchangeError>;
}
