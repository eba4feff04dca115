//! # risk — Risk Gate & Trading Guard
//!
//! The last checkpoint before any capital-affecting call.
//!
//! ## Layers
//! 1. **Confidence pre-gate** — low-conviction opens never reach sizing.
//! 2. **Risk Gate** ([`check`]) — pure; evaluates every configured limit and
//!    collects *all* violations.
//! 3. **Trading Guard** — stateful kill switch (manual, or automatic after N
//!    consecutive failed opens).  Blocks opens only; closes always proceed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::account::required_margin;
use crate::models::order::MAX_LEVERAGE;
use crate::models::{Action, Decision};

// ─── Limits ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct RiskLimits {
    /// Never above [`MAX_LEVERAGE`].
    pub max_leverage:            u32,
    /// Largest notional (quantity × price) for a single open.
    pub max_position_value:      f64,
    /// Largest share of equity one symbol may carry after the open, in %.
    pub max_symbol_exposure_pct: f64,
    pub min_equity:              f64,
    pub min_confidence:          f64,
    /// Force-close when mark is within this % of the liquidation price.
    pub liquidation_buffer_pct:  f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_leverage:            20,
            max_position_value:      10_000.0,
            max_symbol_exposure_pct: 50.0,
            min_equity:              10.0,
            min_confidence:          0.5,
            liquidation_buffer_pct:  5.0,
        }
    }
}

// ─── Input / Verdict ──────────────────────────────────────────────────────────

/// Sizing under test plus the account figures captured for this decision.
#[derive(Debug, Clone)]
pub struct RiskInput {
    pub leverage:          u32,
    pub quantity:          f64,
    pub price:             f64,
    pub equity:            f64,
    pub available_balance: f64,
    /// Notional already held on the symbol (0 when flat).
    pub existing_notional: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Violation {
    LeverageOutOfRange { leverage: u32, max: u32 },
    InvalidQuantity { quantity: f64 },
    InvalidPrice { price: f64 },
    PositionValueExceeded { value: f64, max: f64 },
    SymbolExposureExceeded { exposure_pct: f64, max_pct: f64 },
    EquityBelowMinimum { equity: f64, min: f64 },
    InsufficientMargin { required: f64, available: f64 },
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Violation::LeverageOutOfRange { leverage, max } => {
                write!(f, "leverage {leverage}x outside 1..={max}")
            }
            Violation::InvalidQuantity { quantity } => write!(f, "invalid quantity {quantity}"),
            Violation::InvalidPrice { price } => write!(f, "invalid price {price}"),
            Violation::PositionValueExceeded { value, max } => {
                write!(f, "position value {value:.2} exceeds {max:.2}")
            }
            Violation::SymbolExposureExceeded { exposure_pct, max_pct } => {
                write!(f, "symbol exposure {exposure_pct:.1}% exceeds {max_pct:.1}%")
            }
            Violation::EquityBelowMinimum { equity, min } => {
                write!(f, "equity {equity:.2} below minimum {min:.2}")
            }
            Violation::InsufficientMargin { required, available } => {
                write!(f, "margin {required:.2} exceeds available {available:.2}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskVerdict {
    pub accepted:   bool,
    pub violations: Vec<Violation>,
}

impl RiskVerdict {
    pub fn reasons(&self) -> Vec<String> {
        self.violations.iter().map(ToString::to_string).collect()
    }
}

// ─── Gate ─────────────────────────────────────────────────────────────────────

/// Lower-conviction opens stop here.  CLOSE always passes.
pub fn passes_confidence(decision: &Decision, min_confidence: f64) -> bool {
    decision.action == Action::Close || decision.confidence >= min_confidence
}

/// Evaluates every limit independently.  Accepted only with zero violations.
pub fn check(input: &RiskInput, limits: &RiskLimits) -> RiskVerdict {
    let mut violations = Vec::new();

    // 1..=100 holds regardless of configuration
    let max_leverage = limits.max_leverage.clamp(1, MAX_LEVERAGE);
    if input.leverage == 0 || input.leverage > max_leverage {
        violations.push(Violation::LeverageOutOfRange { leverage: input.leverage, max: max_leverage });
    }

    let quantity_ok = input.quantity.is_finite() && input.quantity > 0.0;
    let price_ok = input.price.is_finite() && input.price > 0.0;
    if !quantity_ok {
        violations.push(Violation::InvalidQuantity { quantity: input.quantity });
    }
    if !price_ok {
        violations.push(Violation::InvalidPrice { price: input.price });
    }

    if input.equity < limits.min_equity {
        violations.push(Violation::EquityBelowMinimum { equity: input.equity, min: limits.min_equity });
    }

    if quantity_ok && price_ok {
        let value = input.quantity * input.price;
        if value > limits.max_position_value {
            violations.push(Violation::PositionValueExceeded { value, max: limits.max_position_value });
        }

        let exposure_pct = if input.equity > 0.0 {
            (input.existing_notional + value) / input.equity * 100.0
        } else {
            f64::INFINITY
        };
        if exposure_pct > limits.max_symbol_exposure_pct {
            violations.push(Violation::SymbolExposureExceeded {
                exposure_pct,
                max_pct: limits.max_symbol_exposure_pct,
            });
        }

        if let Ok(required) = required_margin(input.quantity, input.price, input.leverage) {
            if required > input.available_balance {
                violations.push(Violation::InsufficientMargin { required, available: input.available_balance });
            }
        }
    }

    RiskVerdict { accepted: violations.is_empty(), violations }
}

// ─── Trading Guard ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct GuardInner {
    is_killed:            bool,
    kill_reason:          Option<String>,
    consecutive_failures: u32,
    last_failure_at:      Option<DateTime<Utc>>,
    last_trade_at:        Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GuardStatus {
    pub is_killed:            bool,
    pub kill_reason:          Option<String>,
    pub consecutive_failures: u32,
    pub max_consecutive_failures: u32,
    pub last_failure_at:      Option<DateTime<Utc>>,
    pub last_trade_at:        Option<DateTime<Utc>>,
    pub limits:               RiskLimits,
}

#[derive(Debug, PartialEq)]
pub enum GuardDecision {
    Approved,
    Blocked(String),
}

pub struct TradingGuard {
    inner:                    Arc<RwLock<GuardInner>>,
    limits:                   RiskLimits,
    max_consecutive_failures: u32,
}

impl TradingGuard {
    /// `max_consecutive_failures == 0` disables the automatic kill.
    pub fn new(limits: RiskLimits, max_consecutive_failures: u32) -> Self {
        Self {
            inner: Arc::new(RwLock::new(GuardInner::default())),
            limits,
            max_consecutive_failures,
        }
    }

    /// Call before every open.
    pub async fn allow_open(&self) -> GuardDecision {
        let inner = self.inner.read().await;
        if inner.is_killed {
            return GuardDecision::Blocked(format!(
                "Kill switch active: {}",
                inner.kill_reason.as_deref().unwrap_or("manual activation")
            ));
        }
        GuardDecision::Approved
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.write().await;
        let prev = inner.consecutive_failures;
        inner.consecutive_failures = 0;
        inner.last_trade_at = Some(Utc::now());
        if prev > 0 {
            info!("Guard: consecutive_failures reset (was {prev})");
        }
    }

    /// Returns the kill reason when this failure tripped the automatic kill.
    pub async fn record_failure(&self) -> Option<String> {
        let mut inner = self.inner.write().await;
        inner.consecutive_failures += 1;
        inner.last_failure_at = Some(Utc::now());
        warn!(
            consecutive = inner.consecutive_failures,
            max         = self.max_consecutive_failures,
            "⚠️ Guard: failed open recorded"
        );

        if self.max_consecutive_failures > 0
            && !inner.is_killed
            && inner.consecutive_failures >= self.max_consecutive_failures
        {
            let reason = format!("Auto-kill: {} consecutive failed opens", inner.consecutive_failures);
            inner.is_killed = true;
            inner.kill_reason = Some(reason.clone());
            warn!("⛔ Guard auto-kill activated: {reason}");
            return Some(reason);
        }
        None
    }

    pub async fn kill(&self, reason: &str) {
        let mut inner = self.inner.write().await;
        inner.is_killed = true;
        inner.kill_reason = Some(reason.to_string());
        warn!(reason, "⛔ KILL SWITCH ACTIVATED");
    }

    pub async fn rearm(&self) {
        let mut inner = self.inner.write().await;
        inner.is_killed = false;
        inner.kill_reason = None;
        inner.consecutive_failures = 0;
        inner.last_failure_at = None;
        info!("✅ KILL SWITCH DEACTIVATED — opens enabled");
    }

    pub async fn status(&self) -> GuardStatus {
        let inner = self.inner.read().await;
        GuardStatus {
            is_killed:                inner.is_killed,
            kill_reason:              inner.kill_reason.clone(),
            consecutive_failures:     inner.consecutive_failures,
            max_consecutive_failures: self.max_consecutive_failures,
            last_failure_at:          inner.last_failure_at,
            last_trade_at:            inner.last_trade_at,
            limits:                   self.limits.clone(),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
