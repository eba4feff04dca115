//! Scripted in-memory exchange for tests.
//!
//! Records every call in order and lets a test queue failures per operation.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{AccountData, ExchangeError, MarketData, RawAccount, RawPosition, Ticker24h, Trading};
use crate::models::{Candle, ConditionalKind, ExecutedOrder, OrderSide, OrderStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Candles(String, String),
    Ticker(String),
    Funding(String),
    OpenInterest(String),
    Account,
    Position(String),
    AllPositions,
    SetLeverage(String, u32),
    MarketOrder(String, OrderSide, f64),
    CancelAll(String),
    Conditional(String, OrderSide, f64, ConditionalKind),
}

impl Call {
    /// Capital-affecting or order-management call.
    pub fn is_trading(&self) -> bool {
        matches!(
            self,
            Call::SetLeverage(..) | Call::MarketOrder(..) | Call::CancelAll(..) | Call::Conditional(..)
        )
    }
}

#[derive(Default)]
pub struct MockExchange {
    pub calls:     Mutex<Vec<Call>>,
    candles:       Mutex<HashMap<(String, String), Vec<Candle>>>,
    tickers:       Mutex<HashMap<String, Ticker24h>>,
    funding:       Mutex<HashMap<String, f64>>,
    account:       Mutex<Option<RawAccount>>,
    positions:     Mutex<HashMap<String, RawPosition>>,
    failures:      Mutex<HashMap<&'static str, VecDeque<ExchangeError>>>,
    fills:         Mutex<VecDeque<f64>>,
    next_order_id: Mutex<u64>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_candles(self, symbol: &str, interval: &str, candles: Vec<Candle>) -> Self {
        self.candles.lock().unwrap().insert((symbol.into(), interval.into()), candles);
        self
    }

    pub fn with_price(self, symbol: &str, price: f64) -> Self {
        self.tickers.lock().unwrap().insert(
            symbol.into(),
            Ticker24h {
                last_price:       price,
                price_change_pct: 1.5,
                volume:           1_000.0,
                high_price:       price * 1.01,
                low_price:        price * 0.99,
            },
        );
        self
    }

    pub fn with_funding(self, symbol: &str, rate: f64) -> Self {
        self.funding.lock().unwrap().insert(symbol.into(), rate);
        self
    }

    pub fn with_account(self, account: RawAccount) -> Self {
        *self.account.lock().unwrap() = Some(account);
        self
    }

    pub fn with_equity(self, equity: f64) -> Self {
        self.with_account(RawAccount {
            total_wallet_balance: Some(equity),
            total_margin_balance: Some(equity),
            available_balance:    Some(equity),
            total_initial_margin: Some(0.0),
            ..RawAccount::default()
        })
    }

    pub fn with_position(self, position: RawPosition) -> Self {
        self.positions.lock().unwrap().insert(position.symbol.clone(), position);
        self
    }

    /// Queue `err` for the next call of `op` (`"candles"`, `"market_order"`, ...).
    pub fn fail_next(&self, op: &'static str, err: ExchangeError) {
        self.failures.lock().unwrap().entry(op).or_default().push_back(err);
    }

    /// The next market order executes only `ratio` of its quantity (0 = nothing).
    pub fn fill_next(&self, ratio: f64) {
        self.fills.lock().unwrap().push_back(ratio);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn trading_calls(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_trading).collect()
    }

    pub fn market_orders(&self) -> Vec<Call> {
        self.calls().into_iter().filter(|c| matches!(c, Call::MarketOrder(..))).collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn take_failure(&self, op: &'static str) -> Result<(), ExchangeError> {
        match self.failures.lock().unwrap().get_mut(op).and_then(|q| q.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn order_id(&self) -> String {
        let mut id = self.next_order_id.lock().unwrap();
        *id += 1;
        format!("mock-{}", *id)
    }
}

#[async_trait]
impl MarketData for MockExchange {
    async fn candles(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>, ExchangeError> {
        self.record(Call::Candles(symbol.into(), interval.into()));
        self.take_failure("candles")?;
        let all = self
            .candles
            .lock()
            .unwrap()
            .get(&(symbol.to_string(), interval.to_string()))
            .cloned()
            .unwrap_or_default();
        let skip = all.len().saturating_sub(limit);
        Ok(all[skip..].to_vec())
    }

    async fn ticker(&self, symbol: &str) -> Result<Ticker24h, ExchangeError> {
        self.record(Call::Ticker(symbol.into()));
        self.take_failure("ticker")?;
        self.tickers
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::Rejected(format!("unknown symbol {symbol}")))
    }

    async fn funding_rate(&self, symbol: &str) -> Result<Option<f64>, ExchangeError> {
        self.record(Call::Funding(symbol.into()));
        self.take_failure("funding_rate")?;
        Ok(self.funding.lock().unwrap().get(symbol).copied())
    }

    async fn open_interest(&self, symbol: &str) -> Result<Option<f64>, ExchangeError> {
        self.record(Call::OpenInterest(symbol.into()));
        self.take_failure("open_interest")?;
        Ok(None)
    }
}

#[async_trait]
impl AccountData for MockExchange {
    async fn account(&self) -> Result<Option<RawAccount>, ExchangeError> {
        self.record(Call::Account);
        self.take_failure("account")?;
        Ok(self.account.lock().unwrap().clone())
    }

    async fn position(&self, symbol: &str) -> Result<Option<RawPosition>, ExchangeError> {
        self.record(Call::Position(symbol.into()));
        self.take_failure("position")?;
        Ok(self.positions.lock().unwrap().get(symbol).cloned())
    }

    async fn all_positions(&self) -> Result<Vec<RawPosition>, ExchangeError> {
        self.record(Call::AllPositions);
        self.take_failure("all_positions")?;
        let mut all: Vec<RawPosition> = self.positions.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(all)
    }
}

#[async_trait]
impl Trading for MockExchange {
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        self.record(Call::SetLeverage(symbol.into(), leverage));
        self.take_failure("set_leverage")
    }

    async fn market_order(&self, symbol: &str, side: OrderSide, quantity: f64) -> Result<ExecutedOrder, ExchangeError> {
        self.record(Call::MarketOrder(symbol.into(), side, quantity));
        self.take_failure("market_order")?;

        let ratio = self.fills.lock().unwrap().pop_front().unwrap_or(1.0);
        let filled = quantity * ratio;
        let status = if ratio <= 0.0 {
            OrderStatus::New
        } else if ratio < 1.0 {
            OrderStatus::PartiallyFilled
        } else {
            OrderStatus::Filled
        };

        let price = self.tickers.lock().unwrap().get(symbol).map(|t| t.last_price).unwrap_or(100.0);
        let signed = match side {
            OrderSide::Buy  => filled,
            OrderSide::Sell => -filled,
        };
        {
            let mut positions = self.positions.lock().unwrap();
            let entry = positions.entry(symbol.to_string()).or_insert_with(|| RawPosition {
                symbol:      symbol.to_string(),
                entry_price: price,
                mark_price:  price,
                leverage:    1,
                ..RawPosition::default()
            });
            entry.position_amt += signed;
            if entry.position_amt.abs() < 1e-12 {
                positions.remove(symbol);
            }
        }

        Ok(ExecutedOrder {
            order_id:        self.order_id(),
            symbol:          symbol.to_string(),
            side,
            filled_quantity: filled,
            status,
        })
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), ExchangeError> {
        self.record(Call::CancelAll(symbol.into()));
        self.take_failure("cancel_all_orders")
    }

    async fn place_conditional(
        &self,
        symbol:     &str,
        side:       OrderSide,
        stop_price: f64,
        kind:       ConditionalKind,
    ) -> Result<ExecutedOrder, ExchangeError> {
        self.record(Call::Conditional(symbol.into(), side, stop_price, kind));
        let op = match kind {
            ConditionalKind::TakeProfit => "take_profit",
            ConditionalKind::StopLoss   => "stop_loss",
        };
        self.take_failure(op)?;
        Ok(ExecutedOrder {
            order_id:        self.order_id(),
            symbol:          symbol.to_string(),
            side,
            filled_quantity: 0.0,
            status:          OrderStatus::New,
        })
    }
}
