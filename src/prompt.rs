//! # prompt — builds the text sent to the reasoning model
//!
//! The model must answer with JSON the Decision Normalizer can read, so the
//! response format is spelled out in every prompt.

use std::fmt::Write as _;

use crate::decision::confidence_label;
use crate::history::DecisionRecord;
use crate::market::MarketSnapshot;
use crate::models::{AccountSummary, Position};
use crate::risk::RiskLimits;

/// History entries rendered into a prompt.
pub const PROMPT_HISTORY: usize = 3;

const DECISION_FIELDS: &str = r#"  "action": "BUY_OPEN" | "SELL_OPEN" | "CLOSE" | "HOLD",
  "confidence": "HIGH" | "MEDIUM" | "LOW",
  "leverage": <integer>,
  "position_percent": <number, % of equity>,
  "take_profit_percent": <number>,
  "stop_loss_percent": <negative number>,
  "reason": "<short explanation>""#;

fn position_block(out: &mut String, position: Option<&Position>) {
    match position {
        Some(p) => {
            let _ = writeln!(
                out,
                "Position: {} {:.6} @ {:.4} | mark {:.4} | {}x | PnL {:+.2} ({:+.2}%) | liq {:.4}",
                p.side, p.amount, p.entry_price, p.mark_price, p.leverage, p.unrealized_pnl, p.pnl_percent, p.liquidation_price
            );
        }
        None => out.push_str("Position: none\n"),
    }
}

fn account_block(out: &mut String, account: Option<&AccountSummary>) {
    match account {
        Some(a) => {
            let _ = writeln!(
                out,
                "## Account\nEquity: {:.2} | Available: {:.2} | Used margin: {:.2} ({:.1}%) | Unrealized PnL: {:+.2}",
                a.equity, a.available_balance, a.used_margin, a.margin_ratio_pct, a.total_unrealized_pnl
            );
        }
        None => out.push_str("## Account\nunavailable\n"),
    }
}

fn history_block(out: &mut String, history: &[DecisionRecord]) {
    out.push_str("\n## Recent decisions\n");
    if history.is_empty() {
        out.push_str("none\n");
        return;
    }
    for r in history {
        let _ = writeln!(
            out,
            "- {} {} {} ({}) {}x {:.1}% @ {:.4}: {}",
            r.timestamp.format("%Y-%m-%d %H:%M"),
            r.symbol,
            r.action,
            confidence_label(r.confidence),
            r.leverage,
            r.position_percent,
            r.price,
            r.reason
        );
    }
}

fn rules_block(out: &mut String, limits: &RiskLimits) {
    let _ = write!(
        out,
        r#"
## Rules
1. Leverage must be between 1 and {max_lev}.
2. position_percent is the share of equity committed, between 0 and 100.
3. Only one position per symbol. Use CLOSE to exit, HOLD to do nothing.
4. LOW confidence opens are discarded; prefer HOLD when signals disagree.
5. take_profit_percent is positive, stop_loss_percent is negative (e.g. 5 and -2).
"#,
        max_lev = limits.max_leverage,
    );
}

/// Prompt for a single symbol.
pub fn build_single(
    snapshot: &MarketSnapshot,
    position: Option<&Position>,
    account:  Option<&AccountSummary>,
    history:  &[DecisionRecord],
    limits:   &RiskLimits,
) -> String {
    let mut out = format!(
        "You are an expert crypto perpetual futures trader analysing {}.\n\n## Market\n",
        snapshot.symbol
    );
    out.push_str(&snapshot.digest());
    out.push('\n');
    position_block(&mut out, position);
    account_block(&mut out, account);
    history_block(&mut out, history);
    rules_block(&mut out, limits);

    let _ = write!(
        out,
        "\nRespond with ONLY a JSON object, no markdown:\n{{\n{DECISION_FIELDS}\n}}\n"
    );
    out
}

/// One prompt covering every symbol, answered with a JSON object keyed by
/// symbol.
pub fn build_batch(
    snapshots: &[MarketSnapshot],
    positions: &[Position],
    account:   Option<&AccountSummary>,
    history:   &[DecisionRecord],
    limits:    &RiskLimits,
) -> String {
    let symbols: Vec<&str> = snapshots.iter().map(|s| s.symbol.as_str()).collect();
    let mut out = format!(
        "You are an expert crypto perpetual futures trader managing {} symbols: {}.\n\n## Market\n",
        symbols.len(),
        symbols.join(", ")
    );

    for snap in snapshots {
        out.push_str(&snap.digest());
        position_block(&mut out, positions.iter().find(|p| p.symbol == snap.symbol));
        out.push('\n');
    }
    account_block(&mut out, account);
    history_block(&mut out, history);
    rules_block(&mut out, limits);

    let example = symbols.first().copied().unwrap_or("BTCUSDT");
    let _ = write!(
        out,
        "\nRespond with ONLY a JSON object with one entry per symbol, no markdown:\n{{\n  \"{example}\": {{\n{DECISION_FIELDS}\n  }},\n  ...\n}}\n"
    );
    out
}
