//! # engine::executor
//!
//! The **Execution Engine** — per-symbol order state machine.
//!
//! ```text
//!  FLAT ──open──▶ OPENING ──fill──▶ OPEN ──close──▶ CLOSING ──fill──▶ FLAT
//!    ▲               │                                  │
//!    └── entry fails ┘                                  └── close fails ──▶ OPEN
//! ```
//!
//! Side effects are strictly ordered:
//! * open:  set leverage (best-effort) → entry market order → TP → SL
//! * close: cancel pending orders (best-effort) → reducing market order
//!
//! Only order submissions are retried.  Close direction and size always come
//! from a fresh read of the signed exchange position, never from local state.
//!
//! Fill state is the exchange's: an accepted order that executed nothing is a
//! failure, and a partial fill leaves the symbol OPEN at the executed size.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::account::PositionReader;
use crate::engine::retry::RetryPolicy;
use crate::engine::ExecutionTimings;
use crate::error::ExecutionError;
use crate::exchange::{AccountData, ExchangeError, Trading};
use crate::models::{ConditionalKind, ExecutedOrder, OrderIntent, OrderSide, Position, PositionSide};

// ─── State ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SymbolState {
    #[default]
    Flat,
    Opening,
    Open,
    Closing,
}

impl SymbolState {
    /// A sequence is in flight; nothing else may start.
    pub fn is_busy(self) -> bool {
        matches!(self, SymbolState::Opening | SymbolState::Closing)
    }
}

impl std::fmt::Display for SymbolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SymbolState::Flat    => "FLAT",
            SymbolState::Opening => "OPENING",
            SymbolState::Open    => "OPEN",
            SymbolState::Closing => "CLOSING",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SymbolStatus {
    pub state:       SymbolState,
    /// Open without a working TP or SL.
    pub unprotected: bool,
    pub last_error:  Option<String>,
    pub updated_at:  DateTime<Utc>,
}

impl Default for SymbolStatus {
    fn default() -> Self {
        Self { state: SymbolState::Flat, unprotected: false, last_error: None, updated_at: Utc::now() }
    }
}

// ─── Outcomes ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegStatus {
    NotRequested,
    Placed { order_id: String },
    Failed { error: String },
}

impl LegStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, LegStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenOutcome {
    pub entry:            ExecutedOrder,
    pub leverage_applied: bool,
    pub take_profit:      LegStatus,
    pub stop_loss:        LegStatus,
}

impl OpenOutcome {
    pub fn is_protected(&self) -> bool {
        !self.take_profit.is_failed() && !self.stop_loss.is_failed()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CloseOutcome {
    pub order:       ExecutedOrder,
    /// Side of the position that was reduced.
    pub closed_side: PositionSide,
    pub quantity:    f64,
    /// Position still open after a partial close.
    pub remaining:   f64,
}

// ─── Engine ───────────────────────────────────────────────────────────────────

pub struct ExecutionEngine {
    trading:   Arc<dyn Trading>,
    positions: PositionReader,
    retry:     RetryPolicy,
    timings:   ExecutionTimings,
    states:    Mutex<HashMap<String, SymbolStatus>>,
}

impl ExecutionEngine {
    pub fn new(
        trading: Arc<dyn Trading>,
        account: Arc<dyn AccountData>,
        retry:   RetryPolicy,
        timings: ExecutionTimings,
    ) -> Self {
        Self {
            trading,
            positions: PositionReader::new(account),
            retry,
            timings,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub async fn state(&self, symbol: &str) -> SymbolState {
        self.states.lock().await.get(symbol).map(|s| s.state).unwrap_or_default()
    }

    /// Every tracked symbol, sorted by name.
    pub async fn snapshot(&self) -> Vec<(String, SymbolStatus)> {
        let states = self.states.lock().await;
        let mut all: Vec<(String, SymbolStatus)> = states.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Atomically checks the guard and moves `symbol` into `next`.
    async fn begin(&self, symbol: &str, next: SymbolState, allowed: &[SymbolState]) -> Result<(), ExecutionError> {
        let mut states = self.states.lock().await;
        let status = states.entry(symbol.to_string()).or_default();
        if !allowed.contains(&status.state) {
            return Err(ExecutionError::AlreadyActive { symbol: symbol.to_string(), state: status.state });
        }
        status.state = next;
        status.updated_at = Utc::now();
        Ok(())
    }

    async fn transition(&self, symbol: &str, next: SymbolState, unprotected: Option<bool>, last_error: Option<String>) {
        let mut states = self.states.lock().await;
        let status = states.entry(symbol.to_string()).or_default();
        status.state = next;
        status.updated_at = Utc::now();
        if let Some(u) = unprotected {
            status.unprotected = u;
        }
        if next == SymbolState::Flat {
            status.unprotected = false;
        }
        if last_error.is_some() {
            status.last_error = last_error;
        }
    }

    /// Reconciles local state with the positions the exchange reports.
    /// Symbols with a sequence in flight are left alone.
    pub async fn sync(&self, positions: &[Position]) {
        let mut states = self.states.lock().await;
        for p in positions {
            let status = states.entry(p.symbol.clone()).or_default();
            if !status.state.is_busy() && status.state != SymbolState::Open {
                info!(symbol = %p.symbol, side = %p.side, "Exchange reports a position — state set to OPEN");
                status.state = SymbolState::Open;
                status.updated_at = Utc::now();
            }
        }
        for (symbol, status) in states.iter_mut() {
            if status.state == SymbolState::Open && !positions.iter().any(|p| &p.symbol == symbol) {
                info!(symbol = %symbol, "Position gone on exchange (TP/SL or manual) — state set to FLAT");
                status.state = SymbolState::Flat;
                status.unprotected = false;
                status.updated_at = Utc::now();
            }
        }
    }

    // ─── Open ─────────────────────────────────────────────────────────────────

    /// FLAT → OPENING → OPEN.  Rejected unless the symbol is FLAT.
    pub async fn open(&self, intent: &OrderIntent) -> Result<OpenOutcome, ExecutionError> {
        intent.validate().map_err(ExecutionError::InvalidIntent)?;
        self.begin(&intent.symbol, SymbolState::Opening, &[SymbolState::Flat]).await?;

        let symbol = intent.symbol.as_str();
        info!(
            symbol,
            side     = %intent.side,
            quantity = intent.quantity,
            leverage = intent.leverage,
            tp       = ?intent.take_profit_price,
            sl       = ?intent.stop_loss_price,
            "🚀 [EXECUTOR] Opening position"
        );

        // ── 1. Leverage (best-effort) ─────────────────────────────────────────
        let leverage_applied = match self.trading.set_leverage(symbol, intent.leverage).await {
            Ok(()) => true,
            Err(e) => {
                warn!(symbol, leverage = intent.leverage, error = %e, "Leverage change failed — opening at existing leverage");
                false
            }
        };
        if !self.timings.leverage_settle.is_zero() {
            tokio::time::sleep(self.timings.leverage_settle).await;
        }

        // ── 2. Entry order ────────────────────────────────────────────────────
        let entry = self
            .retry
            .run("market_order", ExchangeError::is_transient, || {
                self.trading.market_order(symbol, intent.side, intent.quantity)
            })
            .await;

        let entry = match entry {
            Ok(order) if order.is_unfilled() => {
                error!(
                    symbol,
                    order_id = %order.order_id,
                    status   = ?order.status,
                    "❌ Entry order accepted but not filled — position NEVER OPENED"
                );
                // a resting remainder must not fill later without protection
                if let Err(e) = self.trading.cancel_all_orders(symbol).await {
                    warn!(symbol, error = %e, "Cancel of unfilled entry failed");
                }
                self.transition(symbol, SymbolState::Flat, None, Some("entry order not filled".into())).await;
                return Err(ExecutionError::Unfilled { step: "market_order", symbol: symbol.to_string() });
            }
            Ok(order) => order,
            Err(e) => {
                error!(symbol, side = %intent.side, quantity = intent.quantity, error = %e, "❌ Entry order failed — position NEVER OPENED");
                self.transition(symbol, SymbolState::Flat, None, Some(e.to_string())).await;
                return Err(ExecutionError::exchange("market_order")(e));
            }
        };
        self.transition(symbol, SymbolState::Open, Some(false), None).await;
        if entry.is_partial(intent.quantity) {
            warn!(
                symbol,
                order_id  = %entry.order_id,
                requested = intent.quantity,
                filled    = entry.filled_quantity,
                "⚠️ Entry order PARTIALLY filled — position OPEN at the filled size"
            );
        } else {
            info!(symbol, order_id = %entry.order_id, filled = entry.filled_quantity, "✅ Entry order filled");
        }

        // ── 3. Protective orders ──────────────────────────────────────────────
        let wants_protection = intent.take_profit_price.is_some() || intent.stop_loss_price.is_some();
        if wants_protection && !self.timings.fill_settle.is_zero() {
            tokio::time::sleep(self.timings.fill_settle).await;
        }
        let exit_side = intent.side.opposite();
        let take_profit = self.protect(symbol, exit_side, intent.take_profit_price, ConditionalKind::TakeProfit).await;
        let stop_loss = self.protect(symbol, exit_side, intent.stop_loss_price, ConditionalKind::StopLoss).await;

        let outcome = OpenOutcome { entry, leverage_applied, take_profit, stop_loss };
        if !outcome.is_protected() {
            warn!(
                symbol,
                take_profit = ?outcome.take_profit,
                stop_loss   = ?outcome.stop_loss,
                "⚠️ Position OPEN but UNPROTECTED — protective order placement failed"
            );
            self.transition(symbol, SymbolState::Open, Some(true), Some("protective order failed".into())).await;
        }
        Ok(outcome)
    }

    async fn protect(&self, symbol: &str, side: OrderSide, price: Option<f64>, kind: ConditionalKind) -> LegStatus {
        let Some(stop_price) = price else {
            return LegStatus::NotRequested;
        };
        let placed = self
            .retry
            .run("place_conditional", ExchangeError::is_transient, || {
                self.trading.place_conditional(symbol, side, stop_price, kind)
            })
            .await;
        match placed {
            Ok(order) => {
                info!(symbol, %kind, stop_price, order_id = %order.order_id, "🛡️ Protective order placed");
                LegStatus::Placed { order_id: order.order_id }
            }
            Err(e) => {
                warn!(symbol, %kind, stop_price, error = %e, "Protective order failed");
                LegStatus::Failed { error: e.to_string() }
            }
        }
    }

    // ─── Close ────────────────────────────────────────────────────────────────

    /// OPEN → CLOSING → FLAT for the whole position.
    pub async fn close(&self, symbol: &str) -> Result<CloseOutcome, ExecutionError> {
        self.begin(symbol, SymbolState::Closing, &[SymbolState::Flat, SymbolState::Open]).await?;
        self.close_sequence(symbol, 1.0).await
    }

    /// Reduces the position by `fraction` ∈ (0, 1].  Protective orders are
    /// left in place; they close whatever remains.
    pub async fn close_partial(&self, symbol: &str, fraction: f64) -> Result<CloseOutcome, ExecutionError> {
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(ExecutionError::InvalidIntent(format!("close fraction must be in (0, 1], got {fraction}")));
        }
        self.begin(symbol, SymbolState::Closing, &[SymbolState::Flat, SymbolState::Open]).await?;
        self.close_sequence(symbol, fraction).await
    }

    /// Closes regardless of the current state.  Used when liquidation is
    /// near.
    pub async fn force_close(&self, symbol: &str, reason: &str) -> Result<CloseOutcome, ExecutionError> {
        error!(symbol, reason, "🚨 FORCE CLOSE");
        self.transition(symbol, SymbolState::Closing, None, Some(format!("force close: {reason}"))).await;
        self.close_sequence(symbol, 1.0).await
    }

    async fn close_sequence(&self, symbol: &str, fraction: f64) -> Result<CloseOutcome, ExecutionError> {
        let position = match self.positions.current_position(symbol).await {
            Ok(Some(p)) => p,
            Ok(None) => {
                warn!(symbol, "Close requested but exchange reports no position");
                self.transition(symbol, SymbolState::Flat, None, None).await;
                return Err(ExecutionError::NoPosition(symbol.to_string()));
            }
            Err(e) => {
                error!(symbol, error = %e, "❌ Close aborted — position read failed");
                // exchange state unknown; OPEN lets the next cycle retry
                self.transition(symbol, SymbolState::Open, None, Some(e.to_string())).await;
                return Err(ExecutionError::exchange("read_position")(e));
            }
        };

        let full = fraction >= 1.0;
        if full {
            if let Err(e) = self.trading.cancel_all_orders(symbol).await {
                warn!(symbol, error = %e, "Cancel pending orders failed — closing anyway");
            }
        }

        let side = position.side.closing_side();
        let quantity = if full { position.amount } else { position.amount * fraction };

        let order = self
            .retry
            .run("close_order", ExchangeError::is_transient, || {
                self.trading.market_order(symbol, side, quantity)
            })
            .await;

        // a full close has already cancelled the protective orders
        let unprotected = full.then_some(true);

        match order {
            Ok(order) if order.is_unfilled() => {
                error!(symbol, %side, quantity, order_id = %order.order_id, "❌ Close order accepted but not filled — position still open");
                self.transition(symbol, SymbolState::Open, unprotected, Some("close order not filled".into())).await;
                Err(ExecutionError::Unfilled { step: "close_order", symbol: symbol.to_string() })
            }
            Ok(order) => {
                let filled = order.filled_quantity.min(quantity);
                let remaining = (position.amount - filled).max(0.0);
                if order.is_partial(quantity) {
                    warn!(
                        symbol,
                        requested = quantity,
                        filled,
                        remaining,
                        order_id = %order.order_id,
                        "⚠️ Close order PARTIALLY filled — position still OPEN"
                    );
                    self.transition(symbol, SymbolState::Open, unprotected, Some("close order partially filled".into()))
                        .await;
                } else {
                    let next = if full { SymbolState::Flat } else { SymbolState::Open };
                    self.transition(symbol, next, None, None).await;
                    info!(
                        symbol,
                        closed_side = %position.side,
                        %side,
                        quantity = filled,
                        remaining,
                        order_id = %order.order_id,
                        "✅ Position {}",
                        if full { "closed" } else { "partially closed" }
                    );
                }
                Ok(CloseOutcome { order, closed_side: position.side, quantity: filled, remaining })
            }
            Err(e) => {
                error!(symbol, %side, quantity, error = %e, "❌ Close order FAILED — position still open");
                self.transition(symbol, SymbolState::Open, unprotected, Some(e.to_string())).await;
                Err(ExecutionError::exchange("close_order")(e))
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
