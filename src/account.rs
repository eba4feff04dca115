//! # account — Position / Account State Reader
//!
//! Turns raw exchange records into [`Position`] and [`AccountSummary`].
//! Always reads fresh; nothing is cached between calls.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::exchange::{AccountData, ExchangeError, RawAccount, RawPosition};
use crate::models::{AccountSummary, Position, PositionSide};

// ─── Pure Normalisation ───────────────────────────────────────────────────────

/// `None` for a zero amount: no position is represented by absence.
pub fn position_from_raw(raw: &RawPosition) -> Option<Position> {
    let side = PositionSide::from_signed_amount(raw.position_amt)?;
    let amount = raw.position_amt.abs();

    let pnl_percent = if raw.entry_price > 0.0 {
        match side {
            PositionSide::Long  => (raw.mark_price - raw.entry_price) / raw.entry_price * 100.0,
            PositionSide::Short => (raw.entry_price - raw.mark_price) / raw.entry_price * 100.0,
        }
    } else {
        0.0
    };

    let margin = if raw.leverage > 0 {
        (amount * raw.entry_price).abs() / raw.leverage as f64
    } else {
        0.0
    };

    Some(Position {
        symbol:            raw.symbol.clone(),
        side,
        amount,
        entry_price:       raw.entry_price,
        mark_price:        raw.mark_price,
        leverage:          raw.leverage,
        margin,
        unrealized_pnl:    raw.unrealized_profit,
        pnl_percent,
        liquidation_price: raw.liquidation_price,
        notional:          (amount * raw.mark_price).abs(),
    })
}

/// Resolves the total balance: wallet balance first, then the first positive
/// value among margin balance → cross wallet balance → available balance →
/// wallet balance.
///
/// Returns the value and the field it came from.
pub fn resolve_total_balance(raw: &RawAccount) -> (f64, &'static str) {
    let primary = raw.total_wallet_balance.unwrap_or(0.0);
    if primary != 0.0 {
        return (primary, "totalWalletBalance");
    }
    let fallbacks = [
        ("totalMarginBalance", raw.total_margin_balance),
        ("totalCrossWalletBalance", raw.total_cross_wallet_balance),
        ("availableBalance", raw.available_balance),
        ("walletBalance", raw.wallet_balance),
    ];
    fallbacks
        .into_iter()
        .find_map(|(name, v)| v.filter(|x| *x > 0.0).map(|x| (x, name)))
        .unwrap_or((0.0, "none"))
}

pub fn account_from_raw(raw: &RawAccount) -> AccountSummary {
    let (total_balance, source) = resolve_total_balance(raw);
    if source != "totalWalletBalance" && total_balance > 0.0 {
        // TODO: validate against live venue data whether a stale fallback field can mask a genuinely zero wallet
        warn!(field = source, total_balance, "Total balance resolved from fallback field");
    }

    let used_margin = raw.total_initial_margin.unwrap_or(0.0);
    let equity = raw
        .total_margin_balance
        .filter(|v| *v >= 0.0)
        .unwrap_or(total_balance)
        .max(0.0);

    let margin_ratio_pct = if total_balance == 0.0 { 0.0 } else { used_margin / total_balance * 100.0 };

    AccountSummary {
        total_balance,
        available_balance:    raw.available_balance.unwrap_or(0.0),
        used_margin,
        total_unrealized_pnl: raw.total_unrealized_profit.unwrap_or(0.0),
        equity,
        margin_ratio_pct,
        update_time:          raw.update_time,
    }
}

/// Margin needed for a position.  Leverage outside `1..=100` is a programmer
/// error.
pub fn required_margin(quantity: f64, price: f64, leverage: u32) -> Result<f64, String> {
    if leverage == 0 {
        return Err(format!("leverage must be greater than 0, got {leverage}"));
    }
    if leverage > crate::models::order::MAX_LEVERAGE {
        return Err(format!("leverage must not exceed 100, got {leverage}"));
    }
    Ok(quantity * price / leverage as f64)
}

// ─── Readers ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct PositionReader {
    source: Arc<dyn AccountData>,
}

impl PositionReader {
    pub fn new(source: Arc<dyn AccountData>) -> Self {
        Self { source }
    }

    pub async fn current_position(&self, symbol: &str) -> Result<Option<Position>, ExchangeError> {
        let raw = self.source.position(symbol).await?;
        Ok(raw.as_ref().and_then(position_from_raw))
    }

    /// Every non-zero position, ordered as the exchange returned them.
    pub async fn all_positions(&self) -> Result<Vec<Position>, ExchangeError> {
        let raws = self.source.all_positions().await?;
        let positions: Vec<Position> = raws.iter().filter_map(position_from_raw).collect();
        debug!(count = positions.len(), "Positions read");
        Ok(positions)
    }
}

#[derive(Clone)]
pub struct AccountReader {
    source: Arc<dyn AccountData>,
}

impl AccountReader {
    pub fn new(source: Arc<dyn AccountData>) -> Self {
        Self { source }
    }

    pub async fn summary(&self) -> Result<Option<AccountSummary>, ExchangeError> {
        let raw = self.source.account().await?;
        if raw.is_none() {
            warn!("Exchange returned an empty account");
        }
        Ok(raw.as_ref().map(account_from_raw))
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::mock::MockExchange;

    fn raw(amt: f64, entry: f64, mark: f64) -> RawPosition {
        RawPosition {
            symbol:            "BTCUSDT".into(),
            position_amt:      amt,
            entry_price:       entry,
            mark_price:        mark,
            leverage:          10,
            unrealized_profit: 5.0,
            liquidation_price: 40_000.0,
        }
    }

    #[test]
    fn test_zero_amount_is_absent() {
        assert!(position_from_raw(&raw(0.0, 50_000.0, 51_000.0)).is_none());
        assert!(position_from_raw(&raw(-0.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn test_long_pnl_positive_when_mark_above_entry() {
        let p = position_from_raw(&raw(0.01, 50_000.0, 51_000.0)).unwrap();
        assert_eq!(p.side, PositionSide::Long);
        assert!((p.pnl_percent - 2.0).abs() < 1e-9);
        assert!((p.margin - 50.0).abs() < 1e-9);
        assert!((p.notional - 510.0).abs() < 1e-9);
    }

    #[test]
    fn test_short_pnl_negative_when_mark_above_entry() {
        let p = position_from_raw(&raw(-0.01, 50_000.0, 51_000.0)).unwrap();
        assert_eq!(p.side, PositionSide::Short);
        assert_eq!(p.amount, 0.01);
        assert!(p.pnl_percent < 0.0);
    }

    #[test]
    fn test_zero_entry_price_gives_zero_pnl() {
        let p = position_from_raw(&raw(1.0, 0.0, 51_000.0)).unwrap();
        assert_eq!(p.pnl_percent, 0.0);
    }

    #[test]
    fn test_zero_leverage_gives_zero_margin() {
        let mut r = raw(1.0, 100.0, 100.0);
        r.leverage = 0;
        assert_eq!(position_from_raw(&r).unwrap().margin, 0.0);
    }

    #[test]
    fn test_balance_fallback_order() {
        let acct = RawAccount {
            total_wallet_balance:       Some(0.0),
            total_margin_balance:       Some(0.0),
            total_cross_wallet_balance: Some(700.0),
            available_balance:          Some(650.0),
            wallet_balance:             Some(900.0),
            ..RawAccount::default()
        };
        assert_eq!(resolve_total_balance(&acct), (700.0, "totalCrossWalletBalance"));

        let acct = RawAccount {
            total_wallet_balance: None,
            wallet_balance:       Some(900.0),
            ..RawAccount::default()
        };
        assert_eq!(resolve_total_balance(&acct), (900.0, "walletBalance"));
    }

    #[test]
    fn test_primary_balance_wins() {
        let acct = RawAccount {
            total_wallet_balance: Some(1_000.0),
            total_margin_balance: Some(1_200.0),
            ..RawAccount::default()
        };
        assert_eq!(resolve_total_balance(&acct).0, 1_000.0);
    }

    #[test]
    fn test_account_summary_equity_and_ratio() {
        let acct = RawAccount {
            total_wallet_balance:    Some(1_000.0),
            total_margin_balance:    Some(1_050.0),
            available_balance:       Some(800.0),
            total_initial_margin:    Some(200.0),
            total_unrealized_profit: Some(50.0),
            ..RawAccount::default()
        };
        let s = account_from_raw(&acct);
        assert_eq!(s.equity, 1_050.0);
        assert_eq!(s.available_balance, 800.0);
        assert!((s.margin_ratio_pct - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_equity_falls_back_to_total_balance() {
        let acct = RawAccount { total_wallet_balance: Some(500.0), ..RawAccount::default() };
        let s = account_from_raw(&acct);
        assert_eq!(s.equity, 500.0);
    }

    #[test]
    fn test_margin_ratio_zero_without_balance() {
        let s = account_from_raw(&RawAccount { total_initial_margin: Some(10.0), ..RawAccount::default() });
        assert_eq!(s.margin_ratio_pct, 0.0);
        assert_eq!(s.equity, 0.0);
    }

    #[test]
    fn test_required_margin_bounds() {
        assert!(required_margin(1.0, 100.0, 0).is_err());
        assert!(required_margin(1.0, 100.0, 101).is_err());
        assert_eq!(required_margin(1.0, 100.0, 4).unwrap(), 25.0);
    }

    #[tokio::test]
    async fn test_reader_skips_zero_positions() {
        let ex = Arc::new(
            MockExchange::new()
                .with_position(raw(0.0, 1.0, 1.0))
                .with_position(RawPosition { symbol: "ETHUSDT".into(), ..raw(-2.0, 3_000.0, 2_900.0) }),
        );
        let reader = PositionReader::new(ex.clone());
        let all = reader.all_positions().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].symbol, "ETHUSDT");
        assert!(reader.current_position("BTCUSDT").await.unwrap().is_none());
    }
}
