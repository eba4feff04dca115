//! # events
//!
//! [`WsEvent`] — everything broadcast to monitor WebSocket clients.
//!
//! Events are serialised to JSON once and sent through a
//! `broadcast::Sender<String>`, so receivers never need `Clone` on the event.

use serde::Serialize;

use crate::engine::executor::LegStatus;
use crate::history::DecisionRecord;
use crate::models::{OrderSide, PositionSide};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WsEvent {
    CycleStarted {
        cycle:   u64,
        symbols: Vec<String>,
    },

    DecisionMade {
        record: Box<DecisionRecord>,
    },

    /// Confidence pre-gate, Risk Gate or kill switch said no.
    RiskRejected {
        symbol:  String,
        reasons: Vec<String>,
    },

    PositionOpened {
        symbol:   String,
        side:     OrderSide,
        quantity: f64,
        leverage: u32,
        order_id: String,
    },

    /// Entry filled but TP and/or SL could not be placed.
    PositionUnprotected {
        symbol:      String,
        take_profit: LegStatus,
        stop_loss:   LegStatus,
    },

    /// Entry order never filled.
    OpenFailed {
        symbol: String,
        error:  String,
    },

    PositionClosed {
        symbol:    String,
        side:      PositionSide,
        quantity:  f64,
        remaining: f64,
        order_id:  String,
    },

    CloseFailed {
        symbol: String,
        error:  String,
    },

    ForceClose {
        symbol: String,
        reason: String,
    },

    KillSwitch {
        engaged: bool,
        reason:  Option<String>,
    },

    CycleFinished {
        cycle:       u64,
        decisions:   usize,
        trades:      u64,
        interrupted: bool,
    },
}

impl WsEvent {
    #[inline]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"event":"SERIALIZATION_ERROR"}"#.to_string())
    }
}
