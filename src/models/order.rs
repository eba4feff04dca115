//! # models::order
//!
//! The Execution Engine's input ([`OrderIntent`]) and the exchange-owned
//! output ([`ExecutedOrder`]).

use serde::{Deserialize, Serialize};

/// Highest leverage any perpetual venue we talk to will accept.
pub const MAX_LEVERAGE: u32 = 100;

// ─── OrderSide ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy  => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderSide::Buy  => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── ConditionalKind ──────────────────────────────────────────────────────────

/// Protective order flavour.  Both are placed as close-position market
/// triggers on the side opposite to the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionalKind {
    TakeProfit,
    StopLoss,
}

impl std::fmt::Display for ConditionalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionalKind::TakeProfit => write!(f, "TAKE_PROFIT"),
            ConditionalKind::StopLoss   => write!(f, "STOP_LOSS"),
        }
    }
}

// ─── OrderIntent ──────────────────────────────────────────────────────────────

/// What the engine has been asked to open.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderIntent {
    pub symbol:            String,
    pub side:              OrderSide,
    pub quantity:          f64,
    pub leverage:          u32,
    pub take_profit_price: Option<f64>,
    pub stop_loss_price:   Option<f64>,
}

impl OrderIntent {
    /// Programmer-error checks.  An intent that fails here must never reach
    /// the exchange.
    pub fn validate(&self) -> Result<(), String> {
        if self.symbol.is_empty() {
            return Err("empty symbol".into());
        }
        if !self.quantity.is_finite() || self.quantity <= 0.0 {
            return Err(format!("quantity must be positive, got {}", self.quantity));
        }
        if self.leverage == 0 || self.leverage > MAX_LEVERAGE {
            return Err(format!("leverage must be in 1..={MAX_LEVERAGE}, got {}", self.leverage));
        }
        for (name, price) in [("take_profit", self.take_profit_price), ("stop_loss", self.stop_loss_price)] {
            if let Some(p) = price {
                if !p.is_finite() || p <= 0.0 {
                    return Err(format!("{name} price must be positive, got {p}"));
                }
            }
        }
        Ok(())
    }
}

// ─── ExecutedOrder ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Resting conditional order, or a market order nothing executed against.
    New,
    PartiallyFilled,
    Filled,
}

/// The exchange's acknowledgement of an order.  `order_id` and fill state are
/// owned by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedOrder {
    pub order_id:        String,
    pub symbol:          String,
    pub side:            OrderSide,
    pub filled_quantity: f64,
    pub status:          OrderStatus,
}

impl ExecutedOrder {
    /// Nothing executed.
    pub fn is_unfilled(&self) -> bool {
        !(self.filled_quantity.is_finite() && self.filled_quantity > 0.0)
    }

    /// Executed, but less than `requested`.
    pub fn is_partial(&self, requested: f64) -> bool {
        !self.is_unfilled()
            && (self.status == OrderStatus::PartiallyFilled || self.filled_quantity < requested * (1.0 - 1e-9))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(filled_quantity: f64, status: OrderStatus) -> ExecutedOrder {
        ExecutedOrder {
            order_id: "1".into(),
            symbol: "BTCUSDT".into(),
            side: OrderSide::Buy,
            filled_quantity,
            status,
        }
    }

    #[test]
    fn test_fill_state() {
        assert!(order(0.0, OrderStatus::New).is_unfilled());
        assert!(order(f64::NAN, OrderStatus::Filled).is_unfilled());

        let partial = order(0.01, OrderStatus::PartiallyFilled);
        assert!(!partial.is_unfilled());
        assert!(partial.is_partial(0.02));

        assert!(order(0.01, OrderStatus::Filled).is_partial(0.02));
        assert!(!order(0.02, OrderStatus::Filled).is_partial(0.02));
    }
}
