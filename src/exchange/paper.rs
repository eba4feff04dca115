//! # exchange::paper — In-memory paper account
//!
//! One-way mode account that fills market orders at the live quote of a
//! wrapped [`MarketData`] source.  Protective orders are held locally and
//! fire when a later quote crosses their trigger price.
//!
//! Lets the bot run end-to-end without exchange credentials.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use super::{AccountData, ExchangeError, MarketData, RawAccount, RawPosition, Ticker24h, Trading};
use crate::models::{Candle, ConditionalKind, ExecutedOrder, OrderSide, OrderStatus};

/// Taker fee charged on every fill (0.04%).
const TAKER_FEE: f64 = 0.0004;

#[derive(Debug, Clone)]
struct PaperPosition {
    amount:      f64,
    entry_price: f64,
}

#[derive(Debug, Clone)]
struct PaperConditional {
    order_id:   String,
    side:       OrderSide,
    stop_price: f64,
    kind:       ConditionalKind,
}

#[derive(Debug, Default)]
struct PaperBook {
    wallet:       f64,
    positions:    HashMap<String, PaperPosition>,
    leverage:     HashMap<String, u32>,
    marks:        HashMap<String, f64>,
    conditionals: HashMap<String, Vec<PaperConditional>>,
}

impl PaperBook {
    /// Applies a fill and books realised PnL + fees into the wallet.
    fn fill(&mut self, symbol: &str, side: OrderSide, quantity: f64, price: f64) {
        let signed = match side {
            OrderSide::Buy  => quantity,
            OrderSide::Sell => -quantity,
        };
        self.wallet -= quantity * price * TAKER_FEE;

        let pos = self
            .positions
            .entry(symbol.to_string())
            .or_insert(PaperPosition { amount: 0.0, entry_price: price });

        if pos.amount == 0.0 || pos.amount.signum() == signed.signum() {
            let total = pos.amount.abs() + quantity;
            pos.entry_price = (pos.entry_price * pos.amount.abs() + price * quantity) / total;
            pos.amount += signed;
        } else {
            let closed = quantity.min(pos.amount.abs());
            let pnl = (price - pos.entry_price) * closed * pos.amount.signum();
            self.wallet += pnl;
            pos.amount += signed;
            if pos.amount.abs() < 1e-12 {
                pos.amount = 0.0;
            } else if pos.amount.signum() == signed.signum() {
                // flipped through zero: remainder opens at the fill price
                pos.entry_price = price;
            }
        }

        if pos.amount == 0.0 {
            self.positions.remove(symbol);
            self.conditionals.remove(symbol);
        }
    }

    /// Fires any protective order crossed by `price`.
    fn trigger(&mut self, symbol: &str, price: f64) -> Vec<PaperConditional> {
        let Some(amount) = self.positions.get(symbol).map(|p| p.amount) else {
            return Vec::new();
        };
        let orders = self.conditionals.get(symbol).cloned().unwrap_or_default();
        let hit = orders.into_iter().find(|c| {
            let long = amount > 0.0;
            match (c.kind, long) {
                (ConditionalKind::TakeProfit, true)  => price >= c.stop_price,
                (ConditionalKind::TakeProfit, false) => price <= c.stop_price,
                (ConditionalKind::StopLoss, true)    => price <= c.stop_price,
                (ConditionalKind::StopLoss, false)   => price >= c.stop_price,
            }
        });
        match hit {
            Some(c) => {
                self.fill(symbol, c.side, amount.abs(), price);
                vec![c]
            }
            None => Vec::new(),
        }
    }
}

pub struct PaperExchange {
    market: Arc<dyn MarketData>,
    book:   Mutex<PaperBook>,
}

impl PaperExchange {
    pub fn new(market: Arc<dyn MarketData>, starting_balance: f64) -> Self {
        Self {
            market,
            book: Mutex::new(PaperBook { wallet: starting_balance, ..PaperBook::default() }),
        }
    }

    async fn observe(&self, symbol: &str, price: f64) {
        if price <= 0.0 {
            return;
        }
        let mut book = self.book.lock().await;
        book.marks.insert(symbol.to_string(), price);
        for c in book.trigger(symbol, price) {
            info!(symbol, kind = %c.kind, price, order_id = %c.order_id, "📄 [PAPER] protective order triggered");
        }
    }
}

#[async_trait]
impl MarketData for PaperExchange {
    async fn candles(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>, ExchangeError> {
        self.market.candles(symbol, interval, limit).await
    }

    async fn ticker(&self, symbol: &str) -> Result<Ticker24h, ExchangeError> {
        let t = self.market.ticker(symbol).await?;
        self.observe(symbol, t.last_price).await;
        Ok(t)
    }

    async fn funding_rate(&self, symbol: &str) -> Result<Option<f64>, ExchangeError> {
        self.market.funding_rate(symbol).await
    }

    async fn open_interest(&self, symbol: &str) -> Result<Option<f64>, ExchangeError> {
        self.market.open_interest(symbol).await
    }
}

#[async_trait]
impl AccountData for PaperExchange {
    async fn account(&self) -> Result<Option<RawAccount>, ExchangeError> {
        let book = self.book.lock().await;
        let mut unrealized = 0.0;
        let mut initial_margin = 0.0;
        for (symbol, p) in &book.positions {
            let mark = book.marks.get(symbol).copied().unwrap_or(p.entry_price);
            let lev = book.leverage.get(symbol).copied().unwrap_or(1).max(1) as f64;
            unrealized += (mark - p.entry_price) * p.amount;
            initial_margin += p.amount.abs() * p.entry_price / lev;
        }
        let margin_balance = book.wallet + unrealized;

        Ok(Some(RawAccount {
            total_wallet_balance:       Some(book.wallet),
            total_margin_balance:       Some(margin_balance),
            total_cross_wallet_balance: Some(book.wallet),
            available_balance:          Some((margin_balance - initial_margin).max(0.0)),
            wallet_balance:             Some(book.wallet),
            total_initial_margin:       Some(initial_margin),
            total_unrealized_profit:    Some(unrealized),
            update_time:                Some(Utc::now()),
        }))
    }

    async fn position(&self, symbol: &str) -> Result<Option<RawPosition>, ExchangeError> {
        let book = self.book.lock().await;
        Ok(book.positions.get(symbol).map(|p| raw_position(&book, symbol, p)))
    }

    async fn all_positions(&self) -> Result<Vec<RawPosition>, ExchangeError> {
        let book = self.book.lock().await;
        let mut all: Vec<RawPosition> = book
            .positions
            .iter()
            .map(|(symbol, p)| raw_position(&book, symbol, p))
            .collect();
        all.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(all)
    }
}

fn raw_position(book: &PaperBook, symbol: &str, p: &PaperPosition) -> RawPosition {
    let mark = book.marks.get(symbol).copied().unwrap_or(p.entry_price);
    let leverage = book.leverage.get(symbol).copied().unwrap_or(1).max(1);
    let liq_offset = p.entry_price / leverage as f64;
    let liquidation_price = if leverage == 1 && p.amount > 0.0 {
        0.0
    } else if p.amount > 0.0 {
        p.entry_price - liq_offset
    } else {
        p.entry_price + liq_offset
    };

    RawPosition {
        symbol:            symbol.to_string(),
        position_amt:      p.amount,
        entry_price:       p.entry_price,
        mark_price:        mark,
        leverage,
        unrealized_profit: (mark - p.entry_price) * p.amount,
        liquidation_price,
    }
}

#[async_trait]
impl Trading for PaperExchange {
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        if leverage == 0 || leverage > crate::models::order::MAX_LEVERAGE {
            return Err(ExchangeError::Rejected(format!("leverage {leverage} not allowed")));
        }
        self.book.lock().await.leverage.insert(symbol.to_string(), leverage);
        Ok(())
    }

    async fn market_order(&self, symbol: &str, side: OrderSide, quantity: f64) -> Result<ExecutedOrder, ExchangeError> {
        if !quantity.is_finite() || quantity <= 0.0 {
            return Err(ExchangeError::Rejected(format!("invalid quantity {quantity}")));
        }
        let price = self.market.ticker(symbol).await?.last_price;
        if price <= 0.0 {
            return Err(ExchangeError::Transient(format!("no live price for {symbol}")));
        }

        let mut book = self.book.lock().await;
        book.marks.insert(symbol.to_string(), price);
        book.fill(symbol, side, quantity, price);

        Ok(ExecutedOrder {
            order_id:        Uuid::new_v4().to_string(),
            symbol:          symbol.to_string(),
            side,
            filled_quantity: quantity,
            status:          OrderStatus::Filled,
        })
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), ExchangeError> {
        self.book.lock().await.conditionals.remove(symbol);
        Ok(())
    }

    async fn place_conditional(
        &self,
        symbol:     &str,
        side:       OrderSide,
        stop_price: f64,
        kind:       ConditionalKind,
    ) -> Result<ExecutedOrder, ExchangeError> {
        let mut book = self.book.lock().await;
        if !book.positions.contains_key(symbol) {
            return Err(ExchangeError::Rejected(format!("no position to protect on {symbol}")));
        }
        let order_id = Uuid::new_v4().to_string();
        book.conditionals
            .entry(symbol.to_string())
            .or_default()
            .push(PaperConditional { order_id: order_id.clone(), side, stop_price, kind });

        Ok(ExecutedOrder {
            order_id,
            symbol: symbol.to_string(),
            side,
            filled_quantity: 0.0,
            status: OrderStatus::New,
        })
    }
}
