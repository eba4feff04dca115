//! # state
//!
//! Shared state between the cycle orchestrator (writer) and the monitor
//! handlers (readers).  Cloned cheaply into every Axum handler.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};

use crate::engine::executor::ExecutionEngine;
use crate::events::WsEvent;
use crate::history::{DecisionHistory, DecisionRecord};
use crate::risk::TradingGuard;

pub struct AppState {
    /// Rolling decision log, oldest first.
    pub history:       RwLock<DecisionHistory>,
    pub engine:        Arc<ExecutionEngine>,
    pub guard:         Arc<TradingGuard>,
    /// Pre-serialised JSON events for WebSocket clients.
    pub broadcast_tx:  broadcast::Sender<String>,
    pub cycle_count:   AtomicU64,
    /// Filled opens and closes this session.
    pub trade_count:   AtomicU64,
    pub last_cycle_at: RwLock<Option<DateTime<Utc>>>,
    pub started_at:    DateTime<Utc>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(engine: Arc<ExecutionEngine>, guard: Arc<TradingGuard>) -> Self {
        let (broadcast_tx, _) = broadcast::channel(256);
        Self {
            history: RwLock::new(DecisionHistory::default()),
            engine,
            guard,
            broadcast_tx,
            cycle_count: AtomicU64::new(0),
            trade_count: AtomicU64::new(0),
            last_cycle_at: RwLock::new(None),
            started_at: Utc::now(),
        }
    }

    /// No-op when nobody is listening.
    pub fn broadcast(&self, event: &WsEvent) {
        let _ = self.broadcast_tx.send(event.to_json());
    }

    pub async fn record_decision(&self, record: DecisionRecord) {
        self.broadcast(&WsEvent::DecisionMade { record: Box::new(record.clone()) });
        self.history.write().await.push(record);
    }

    pub fn cycles(&self) -> u64 {
        self.cycle_count.load(Ordering::Relaxed)
    }

    pub fn trades(&self) -> u64 {
        self.trade_count.load(Ordering::Relaxed)
    }
}
