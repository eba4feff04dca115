//! # models::decision
//!
//! A [`Decision`] is produced once per symbol per cycle by the Decision
//! Normalizer and is never mutated afterwards.

use serde::{Deserialize, Serialize};

use crate::models::OrderSide;

// ─── Action ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    BuyOpen,
    SellOpen,
    Close,
    Hold,
}

impl Action {
    /// Accepts the canonical tokens plus the aliases models tend to emit.
    pub fn from_token(token: &str) -> Option<Self> {
        let norm = token.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        match norm.as_str() {
            "BUY_OPEN" | "OPEN_LONG" | "LONG" | "BUY"        => Some(Action::BuyOpen),
            "SELL_OPEN" | "OPEN_SHORT" | "SHORT" | "SELL"    => Some(Action::SellOpen),
            "CLOSE" | "CLOSE_POSITION" | "EXIT"              => Some(Action::Close),
            "HOLD" | "WAIT" | "NO_TRADE" | "NONE"            => Some(Action::Hold),
            _ => None,
        }
    }

    /// Entry side for an open action.
    pub fn entry_side(self) -> Option<OrderSide> {
        match self {
            Action::BuyOpen  => Some(OrderSide::Buy),
            Action::SellOpen => Some(OrderSide::Sell),
            Action::Close | Action::Hold => None,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Action::BuyOpen  => "BUY_OPEN",
            Action::SellOpen => "SELL_OPEN",
            Action::Close    => "CLOSE",
            Action::Hold     => "HOLD",
        };
        f.write_str(s)
    }
}

// ─── DecisionSource ───────────────────────────────────────────────────────────

/// Whether the decision came from the model or from the safe fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionSource {
    Parsed,
    ParseFailure { detail: String },
}

// ─── Decision ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub symbol:              String,
    pub action:              Action,
    /// Always within `[0, 1]`.
    pub confidence:          f64,
    /// As requested by the model.  Bounds are enforced by the Risk Gate,
    /// not silently clamped here.
    pub leverage:            u32,
    /// Share of equity to commit, `[0, 100]`.
    pub position_percent:    f64,
    pub take_profit_percent: f64,
    pub stop_loss_percent:   f64,
    pub reason:              String,
    pub source:              DecisionSource,
}

impl Decision {
    pub const FALLBACK_REASON: &'static str = "parse failure";

    /// The safe default: HOLD with neutral confidence and no sizing.
    pub fn fallback(symbol: &str, detail: impl Into<String>) -> Self {
        Self {
            symbol:              symbol.to_string(),
            action:              Action::Hold,
            confidence:          0.5,
            leverage:            1,
            position_percent:    0.0,
            take_profit_percent: 0.0,
            stop_loss_percent:   0.0,
            reason:              Self::FALLBACK_REASON.to_string(),
            source:              DecisionSource::ParseFailure { detail: detail.into() },
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.source, DecisionSource::ParseFailure { .. })
    }
}
