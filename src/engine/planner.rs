//! # engine::planner
//!
//! Converts a decision plus live figures into an [`OrderIntent`].
//!
//! quantity = equity × position_percent / 100 ÷ price.  Leverage changes the
//! margin required, not the quantity.

use crate::models::{Decision, OrderIntent, OrderSide};

/// `None` unless every input is positive and finite.
pub fn quantity(equity: f64, position_percent: f64, price: f64) -> Option<f64> {
    let q = equity * position_percent / 100.0 / price;
    (equity > 0.0 && position_percent > 0.0 && price > 0.0 && q.is_finite() && q > 0.0).then_some(q)
}

/// Take-profit and stop-loss trigger prices.  A zero percentage disables that
/// leg.  The stop-loss sign is ignored: it always sits on the losing side.
pub fn protective_prices(side: OrderSide, price: f64, tp_pct: f64, sl_pct: f64) -> (Option<f64>, Option<f64>) {
    let sl = sl_pct.abs();
    let (tp_price, sl_price) = match side {
        OrderSide::Buy  => (price * (1.0 + tp_pct / 100.0), price * (1.0 - sl / 100.0)),
        OrderSide::Sell => (price * (1.0 - tp_pct / 100.0), price * (1.0 + sl / 100.0)),
    };
    (
        (tp_pct != 0.0 && tp_price > 0.0).then_some(tp_price),
        (sl != 0.0 && sl_price > 0.0).then_some(sl_price),
    )
}

/// Why an open was skipped before any exchange call.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanSkip {
    NotAnOpen,
    NoPrice,
    NoEquity,
    ZeroQuantity,
}

impl std::fmt::Display for PlanSkip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanSkip::NotAnOpen    => write!(f, "decision is not an open"),
            PlanSkip::NoPrice      => write!(f, "no live price"),
            PlanSkip::NoEquity     => write!(f, "account equity is zero"),
            PlanSkip::ZeroQuantity => write!(f, "computed quantity is zero"),
        }
    }
}

pub fn plan_open(decision: &Decision, equity: f64, price: f64) -> Result<OrderIntent, PlanSkip> {
    let side = decision.action.entry_side().ok_or(PlanSkip::NotAnOpen)?;
    if !(price > 0.0) {
        return Err(PlanSkip::NoPrice);
    }
    if !(equity > 0.0) {
        return Err(PlanSkip::NoEquity);
    }
    let quantity = quantity(equity, decision.position_percent, price).ok_or(PlanSkip::ZeroQuantity)?;
    let (take_profit_price, stop_loss_price) =
        protective_prices(side, price, decision.take_profit_percent, decision.stop_loss_percent);

    Ok(OrderIntent {
        symbol: decision.symbol.clone(),
        side,
        quantity,
        leverage: decision.leverage,
        take_profit_price,
        stop_loss_price,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Action;

    fn decision(action: Action, pct: f64, tp: f64, sl: f64) -> Decision {
        Decision {
            action,
            confidence: 0.8,
            leverage: 5,
            position_percent: pct,
            take_profit_percent: tp,
            stop_loss_percent: sl,
            reason: "test".into(),
            ..Decision::fallback("BTCUSDT", "")
        }
    }

    #[test]
    fn test_sizing_scenario() {
        let intent = plan_open(&decision(Action::BuyOpen, 10.0, 5.0, -2.0), 10_000.0, 50_000.0).unwrap();
        assert!((intent.quantity - 0.02).abs() < 1e-12);
        assert_eq!(intent.side, OrderSide::Buy);
        assert_eq!(intent.leverage, 5);
        assert!((intent.take_profit_price.unwrap() - 52_500.0).abs() < 1e-6);
        assert!((intent.stop_loss_price.unwrap() - 49_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_short_protective_prices_are_mirrored() {
        let (tp, sl) = protective_prices(OrderSide::Sell, 100.0, 5.0, -2.0);
        assert!((tp.unwrap() - 95.0).abs() < 1e-9);
        assert!((sl.unwrap() - 102.0).abs() < 1e-9);
        // positive stop-loss input is treated the same
        let (_, sl) = protective_prices(OrderSide::Sell, 100.0, 5.0, 2.0);
        assert!((sl.unwrap() - 102.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_percent_disables_leg() {
        assert_eq!(protective_prices(OrderSide::Buy, 100.0, 0.0, 0.0), (None, None));
        let (tp, sl) = protective_prices(OrderSide::Buy, 100.0, 0.0, -3.0);
        assert!(tp.is_none() && sl.is_some());
    }

    #[test]
    fn test_skips() {
        let d = decision(Action::BuyOpen, 10.0, 5.0, -2.0);
        assert_eq!(plan_open(&d, 10_000.0, 0.0), Err(PlanSkip::NoPrice));
        assert_eq!(plan_open(&d, 0.0, 100.0), Err(PlanSkip::NoEquity));
        assert_eq!(plan_open(&decision(Action::BuyOpen, 0.0, 5.0, -2.0), 100.0, 100.0), Err(PlanSkip::ZeroQuantity));
        assert_eq!(plan_open(&decision(Action::Hold, 10.0, 5.0, -2.0), 100.0, 100.0), Err(PlanSkip::NotAnOpen));
    }
}
