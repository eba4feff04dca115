//! # engine::orchestrator
//!
//! The **Cycle Orchestrator** — one pass per interval:
//!
//! ```text
//! read positions → sync engine → liquidation guard
//!   → aggregate all symbols (concurrent, read-only)
//!   → decide (one batched AI call, or one per symbol)
//!   → per symbol, sequentially: record → gate → execute
//! ```
//!
//! A shutdown request is honoured between symbols: the symbol in flight
//! always finishes its sequence.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::account::{AccountReader, PositionReader};
use crate::ai::Reasoner;
use crate::decision::{parse_batch, parse_single};
use crate::engine::planner::plan_open;
use crate::error::ExecutionError;
use crate::events::WsEvent;
use crate::exchange::AccountData;
use crate::history::DecisionRecord;
use crate::market::{MarketAggregator, MarketSnapshot};
use crate::models::{Action, Decision, Position};
use crate::prompt::{self, PROMPT_HISTORY};
use crate::risk::{self, GuardDecision, RiskInput, RiskLimits};
use crate::state::SharedState;

// ─── Outcomes ─────────────────────────────────────────────────────────────────

/// What happened to one symbol this cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolOutcome {
    Held,
    /// Nothing to do or not safe to try (no price, existing position, ...).
    Skipped(String),
    /// Confidence, kill switch or Risk Gate refused.
    Rejected(Vec<String>),
    Opened { protected: bool },
    OpenFailed,
    Closed,
    CloseFailed,
}

#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub cycle:        u64,
    pub outcomes:     Vec<(String, SymbolOutcome)>,
    pub force_closed: Vec<String>,
    pub trades:       u64,
    /// Shutdown was requested before every symbol ran.
    pub interrupted:  bool,
}

// ─── Orchestrator ─────────────────────────────────────────────────────────────

pub struct Orchestrator {
    symbols:   Vec<String>,
    interval:  Duration,
    batch:     bool,
    limits:    RiskLimits,
    market:    MarketAggregator,
    positions: PositionReader,
    accounts:  AccountReader,
    reasoner:  Arc<dyn Reasoner>,
    state:     SharedState,
    shutdown:  watch::Receiver<bool>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbols:  Vec<String>,
        interval: Duration,
        batch:    bool,
        limits:   RiskLimits,
        market:   MarketAggregator,
        account:  Arc<dyn AccountData>,
        reasoner: Arc<dyn Reasoner>,
        state:    SharedState,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            symbols,
            interval,
            batch,
            limits,
            market,
            positions: PositionReader::new(account.clone()),
            accounts: AccountReader::new(account),
            reasoner,
            state,
            shutdown,
        }
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Runs cycles until shutdown is requested.  Cycles start on a fixed
    /// cadence: the wait after a cycle is the interval minus its duration.
    pub async fn run(&mut self) {
        loop {
            let started = Instant::now();
            let next = started + self.interval;
            let report = self.run_cycle().await;
            info!(
                cycle   = report.cycle,
                trades  = report.trades,
                symbols = report.outcomes.len(),
                "🔁 Cycle finished"
            );
            if report.interrupted || self.stopping() {
                break;
            }

            let elapsed = started.elapsed();
            if elapsed >= self.interval {
                warn!(elapsed = ?elapsed, interval = ?self.interval, "Cycle overran its interval — starting next cycle now");
            } else {
                info!(wait = ?(self.interval - elapsed), "💤 Sleeping until next cycle...");
            }
            tokio::select! {
                _ = sleep_until(next) => {}
                changed = self.shutdown.changed() => {
                    // sender gone: nobody can ask us to stop any more
                    if changed.is_err() {
                        sleep_until(next).await;
                    }
                }
            }
            if self.stopping() {
                break;
            }
        }
        info!("Cycle loop stopped");
    }

    pub async fn run_cycle(&self) -> CycleReport {
        let cycle = self.state.cycle_count.fetch_add(1, Ordering::Relaxed) + 1;
        *self.state.last_cycle_at.write().await = Some(Utc::now());
        self.state.broadcast(&WsEvent::CycleStarted { cycle, symbols: self.symbols.clone() });
        info!(cycle, symbols = ?self.symbols, "🧠 Cycle starting");

        let mut report = CycleReport { cycle, ..CycleReport::default() };

        // ── 1. Exchange truth ─────────────────────────────────────────────────
        let positions = match self.positions.all_positions().await {
            Ok(p) => {
                self.state.engine.sync(&p).await;
                p
            }
            Err(e) => {
                warn!(error = %e, "Position read failed — liquidation guard skipped this cycle");
                Vec::new()
            }
        };

        // ── 2. Liquidation guard ──────────────────────────────────────────────
        for p in &positions {
            if self.stopping() {
                report.interrupted = true;
                break;
            }
            if let Some(closed) = self.guard_liquidation(p).await {
                report.trades += u64::from(closed);
                report.force_closed.push(p.symbol.clone());
            }
        }

        // ── 3. Market data ────────────────────────────────────────────────────
        let snapshots = if report.interrupted { Vec::new() } else { self.market.aggregate_all(&self.symbols).await };

        // ── 4. Batched decisions ──────────────────────────────────────────────
        let mut batched = if self.batch && snapshots.len() > 1 {
            Some(self.decide_batch(&snapshots, &positions).await.into_iter())
        } else {
            None
        };

        // ── 5. Per symbol, strictly sequential ────────────────────────────────
        for snapshot in &snapshots {
            if self.stopping() {
                warn!(symbol = %snapshot.symbol, "Shutdown requested — remaining symbols skipped");
                report.interrupted = true;
                break;
            }

            let decision = match batched.as_mut().and_then(Iterator::next) {
                Some(d) => d,
                None => self.decide_single(snapshot).await,
            };

            self.state.record_decision(DecisionRecord::from_decision(&decision, snapshot.price())).await;
            info!(
                symbol     = %decision.symbol,
                action     = %decision.action,
                confidence = decision.confidence,
                leverage   = decision.leverage,
                position   = decision.position_percent,
                reason     = %decision.reason,
                "🤖 Decision"
            );

            let outcome = self.execute_decision(&decision, snapshot).await;
            if matches!(outcome, SymbolOutcome::Opened { .. } | SymbolOutcome::Closed) {
                report.trades += 1;
            }
            report.outcomes.push((snapshot.symbol.clone(), outcome));
        }

        self.state.broadcast(&WsEvent::CycleFinished {
            cycle,
            decisions:   report.outcomes.len(),
            trades:      report.trades,
            interrupted: report.interrupted,
        });
        report
    }

    // ─── Liquidation Guard ────────────────────────────────────────────────────

    /// `Some(true)` when a force-close filled, `Some(false)` when it was
    /// attempted and failed, `None` when the position is safe.
    async fn guard_liquidation(&self, position: &Position) -> Option<bool> {
        let distance = position.liquidation_distance_pct()?;
        if distance > self.limits.liquidation_buffer_pct {
            return None;
        }

        let reason = format!(
            "mark {:.4} within {:.2}% of liquidation {:.4}",
            position.mark_price, distance, position.liquidation_price
        );
        self.state.broadcast(&WsEvent::ForceClose { symbol: position.symbol.clone(), reason: reason.clone() });

        match self.state.engine.force_close(&position.symbol, &reason).await {
            Ok(out) => {
                self.state.trade_count.fetch_add(1, Ordering::Relaxed);
                self.state.broadcast(&WsEvent::PositionClosed {
                    symbol:    position.symbol.clone(),
                    side:      out.closed_side,
                    quantity:  out.quantity,
                    remaining: out.remaining,
                    order_id:  out.order.order_id,
                });
                Some(true)
            }
            Err(e) => {
                self.state.broadcast(&WsEvent::CloseFailed { symbol: position.symbol.clone(), error: e.to_string() });
                Some(false)
            }
        }
    }

    // ─── Decide ───────────────────────────────────────────────────────────────

    async fn decide_batch(&self, snapshots: &[MarketSnapshot], positions: &[Position]) -> Vec<Decision> {
        let account = self.accounts.summary().await.unwrap_or_else(|e| {
            warn!(error = %e, "Account read failed — prompt built without account");
            None
        });
        let history = self.state.history.read().await.recent(PROMPT_HISTORY);
        let text = prompt::build_batch(snapshots, positions, account.as_ref(), &history, &self.limits);
        let symbols: Vec<String> = snapshots.iter().map(|s| s.symbol.clone()).collect();

        debug!(chars = text.len(), "Batched prompt built");
        match self.reasoner.decide(&text).await {
            Ok(reply) => {
                if let Some(trace) = &reply.reasoning {
                    debug!(reasoning = %trace, "AI reasoning trace");
                }
                debug!(content = %reply.content, "AI reply");
                parse_batch(&symbols, &reply.content)
            }
            Err(e) => {
                error!(error = %e, "❌ AI call failed — every symbol defaults to HOLD");
                symbols.iter().map(|s| Decision::fallback(s, format!("AI call failed: {e}"))).collect()
            }
        }
    }

    async fn decide_single(&self, snapshot: &MarketSnapshot) -> Decision {
        let symbol = snapshot.symbol.as_str();
        let position = self.positions.current_position(symbol).await.unwrap_or_else(|e| {
            warn!(symbol, error = %e, "Position read failed — prompt built without position");
            None
        });
        let account = self.accounts.summary().await.unwrap_or_else(|e| {
            warn!(symbol, error = %e, "Account read failed — prompt built without account");
            None
        });
        let history = self.state.history.read().await.recent_for(symbol, PROMPT_HISTORY);
        let text = prompt::build_single(snapshot, position.as_ref(), account.as_ref(), &history, &self.limits);

        match self.reasoner.decide(&text).await {
            Ok(reply) => {
                if let Some(trace) = &reply.reasoning {
                    debug!(symbol, reasoning = %trace, "AI reasoning trace");
                }
                parse_single(symbol, &reply.content)
            }
            Err(e) => {
                error!(symbol, error = %e, "❌ AI call failed — defaulting to HOLD");
                Decision::fallback(symbol, format!("AI call failed: {e}"))
            }
        }
    }

    // ─── Gate & Execute ───────────────────────────────────────────────────────

    fn reject(&self, symbol: &str, reasons: Vec<String>) -> SymbolOutcome {
        warn!(symbol, reasons = ?reasons, "🛑 Decision rejected");
        self.state.broadcast(&WsEvent::RiskRejected { symbol: symbol.to_string(), reasons: reasons.clone() });
        SymbolOutcome::Rejected(reasons)
    }

    fn skip(symbol: &str, reason: impl Into<String>) -> SymbolOutcome {
        let reason = reason.into();
        warn!(symbol, %reason, "Open skipped");
        SymbolOutcome::Skipped(reason)
    }

    pub async fn execute_decision(&self, decision: &Decision, snapshot: &MarketSnapshot) -> SymbolOutcome {
        let symbol = decision.symbol.as_str();

        if decision.action == Action::Hold {
            info!(symbol, "💤 Holding");
            return SymbolOutcome::Held;
        }

        if !risk::passes_confidence(decision, self.limits.min_confidence) {
            return self.reject(
                symbol,
                vec![format!("confidence {:.2} below {:.2}", decision.confidence, self.limits.min_confidence)],
            );
        }

        if decision.action == Action::Close {
            return self.close(symbol).await;
        }

        if let GuardDecision::Blocked(reason) = self.state.guard.allow_open().await {
            return self.reject(symbol, vec![reason]);
        }

        // ── Fresh figures, read right before the gate ─────────────────────────
        let account = match self.accounts.summary().await {
            Ok(Some(a)) => a,
            Ok(None) => return Self::skip(symbol, "account unavailable"),
            Err(e) => return Self::skip(symbol, format!("account read failed: {e}")),
        };
        let existing = match self.positions.current_position(symbol).await {
            Ok(p) => p,
            Err(e) => return Self::skip(symbol, format!("position read failed: {e}")),
        };
        if let Some(p) = &existing {
            return Self::skip(symbol, format!("{} position already open", p.side));
        }

        let price = snapshot.price();
        let intent = match plan_open(decision, account.equity, price) {
            Ok(i) => i,
            Err(skip) => return Self::skip(symbol, skip.to_string()),
        };

        let verdict = risk::check(
            &RiskInput {
                leverage:          intent.leverage,
                quantity:          intent.quantity,
                price,
                equity:            account.equity,
                available_balance: account.available_balance,
                existing_notional: existing.as_ref().map(|p| p.notional).unwrap_or(0.0),
            },
            &self.limits,
        );
        if !verdict.accepted {
            return self.reject(symbol, verdict.reasons());
        }

        match self.state.engine.open(&intent).await {
            Ok(out) => {
                self.state.guard.record_success().await;
                self.state.trade_count.fetch_add(1, Ordering::Relaxed);
                self.state.broadcast(&WsEvent::PositionOpened {
                    symbol:   symbol.to_string(),
                    side:     intent.side,
                    quantity: out.entry.filled_quantity,
                    leverage: intent.leverage,
                    order_id: out.entry.order_id.clone(),
                });
                let protected = out.is_protected();
                if !protected {
                    self.state.broadcast(&WsEvent::PositionUnprotected {
                        symbol:      symbol.to_string(),
                        take_profit: out.take_profit,
                        stop_loss:   out.stop_loss,
                    });
                }
                SymbolOutcome::Opened { protected }
            }
            Err(ExecutionError::AlreadyActive { state, .. }) => Self::skip(symbol, format!("symbol is {state}")),
            Err(e) => {
                if matches!(e, ExecutionError::Exchange { .. } | ExecutionError::Unfilled { .. }) {
                    if let Some(reason) = self.state.guard.record_failure().await {
                        self.state.broadcast(&WsEvent::KillSwitch { engaged: true, reason: Some(reason) });
                    }
                }
                self.state.broadcast(&WsEvent::OpenFailed { symbol: symbol.to_string(), error: e.to_string() });
                SymbolOutcome::OpenFailed
            }
        }
    }

    async fn close(&self, symbol: &str) -> SymbolOutcome {
        match self.state.engine.close(symbol).await {
            Ok(out) => {
                self.state.trade_count.fetch_add(1, Ordering::Relaxed);
                self.state.broadcast(&WsEvent::PositionClosed {
                    symbol:    symbol.to_string(),
                    side:      out.closed_side,
                    quantity:  out.quantity,
                    remaining: out.remaining,
                    order_id:  out.order.order_id,
                });
                SymbolOutcome::Closed
            }
            Err(ExecutionError::NoPosition(_)) => {
                info!(symbol, "CLOSE requested with no open position — nothing to do");
                SymbolOutcome::Skipped("no position".into())
            }
            Err(ExecutionError::AlreadyActive { state, .. }) => Self::skip(symbol, format!("symbol is {state}")),
            Err(e) => {
                self.state.broadcast(&WsEvent::CloseFailed { symbol: symbol.to_string(), error: e.to_string() });
                SymbolOutcome::CloseFailed
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
