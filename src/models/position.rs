//! # models::position
//!
//! Normalised position and account state.
//!
//! These are always derived fresh from the exchange (the exchange is the
//! source of truth).  Nothing here is cached between cycles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::OrderSide;

// ─── PositionSide ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Side derived from the sign of an exchange signed amount.
    /// `None` for a zero amount: "no position" is absence, not a value.
    pub fn from_signed_amount(amount: f64) -> Option<Self> {
        if amount > 0.0 {
            Some(PositionSide::Long)
        } else if amount < 0.0 {
            Some(PositionSide::Short)
        } else {
            None
        }
    }

    /// Order side that reduces a position on this side.
    pub fn closing_side(self) -> OrderSide {
        match self {
            PositionSide::Long  => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Long  => write!(f, "LONG"),
            PositionSide::Short => write!(f, "SHORT"),
        }
    }
}

// ─── Position ─────────────────────────────────────────────────────────────────

/// An open position on one symbol.
///
/// `amount` is always a positive magnitude; `side` carries the direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol:            String,
    pub side:              PositionSide,
    pub amount:            f64,
    pub entry_price:       f64,
    pub mark_price:        f64,
    pub leverage:          u32,
    pub margin:            f64,
    pub unrealized_pnl:    f64,
    pub pnl_percent:       f64,
    pub liquidation_price: f64,
    pub notional:          f64,
}

impl Position {
    /// Distance between mark and liquidation price as a % of mark.
    /// `None` when the exchange reports no liquidation price.
    pub fn liquidation_distance_pct(&self) -> Option<f64> {
        if self.liquidation_price <= 0.0 || self.mark_price <= 0.0 {
            return None;
        }
        Some((self.mark_price - self.liquidation_price).abs() / self.mark_price * 100.0)
    }
}

// ─── AccountSummary ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub total_balance:        f64,
    pub available_balance:    f64,
    pub used_margin:          f64,
    pub total_unrealized_pnl: f64,
    pub equity:               f64,
    pub margin_ratio_pct:     f64,
    pub update_time:          Option<DateTime<Utc>>,
}
