//! # routes::risk
//!
//! Kill switch and limits.
//!
//! | Method | Path                    | Description               |
//! |--------|-------------------------|---------------------------|
//! | POST   | `/api/risk/kill`        | Engage the kill switch    |
//! | POST   | `/api/risk/rearm`       | Disengage the kill switch |
//! | GET    | `/api/risk/status`      | Guard status + limits     |
//! | POST   | `/api/risk/close`       | Manual (partial) close    |

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::Ordering;

use crate::{error::AppError, events::WsEvent, state::SharedState};

#[derive(Deserialize)]
pub struct KillBody {
    pub reason: Option<String>,
}

/// POST /api/risk/kill — blocks new opens; closes keep working.
pub async fn kill_switch_on(
    State(state): State<SharedState>,
    body: Option<Json<KillBody>>,
) -> impl IntoResponse {
    let reason = body
        .and_then(|Json(b)| b.reason)
        .unwrap_or_else(|| "Manual kill via API".to_string());

    state.guard.kill(&reason).await;
    state.broadcast(&WsEvent::KillSwitch { engaged: true, reason: Some(reason.clone()) });

    (StatusCode::OK, Json(json!({
        "ok":      true,
        "message": format!("Kill switch activated: {reason}"),
    })))
}

/// POST /api/risk/rearm — re-enables opens and resets the failure streak.
pub async fn kill_switch_off(State(state): State<SharedState>) -> impl IntoResponse {
    state.guard.rearm().await;
    state.broadcast(&WsEvent::KillSwitch { engaged: false, reason: None });

    Json(json!({
        "ok":      true,
        "message": "System re-armed — opens enabled",
    }))
}

#[derive(Deserialize)]
pub struct CloseBody {
    pub symbol:   String,
    /// Share of the position to close, `(0, 1]`.  Whole position when absent.
    pub fraction: Option<f64>,
}

/// POST /api/risk/close — never blocked by the kill switch.
pub async fn close_position(
    State(state): State<SharedState>,
    Json(body): Json<CloseBody>,
) -> Result<impl IntoResponse, AppError> {
    let symbol = body.symbol.trim().to_uppercase();
    let result = match body.fraction {
        Some(fraction) => state.engine.close_partial(&symbol, fraction).await,
        None => state.engine.close(&symbol).await,
    };

    let out = match result {
        Ok(out) => out,
        Err(e) => {
            state.broadcast(&WsEvent::CloseFailed { symbol: symbol.clone(), error: e.to_string() });
            return Err(e.into());
        }
    };

    state.trade_count.fetch_add(1, Ordering::Relaxed);
    state.broadcast(&WsEvent::PositionClosed {
        symbol:    symbol.clone(),
        side:      out.closed_side,
        quantity:  out.quantity,
        remaining: out.remaining,
        order_id:  out.order.order_id.clone(),
    });

    Ok(Json(json!({ "ok": true, "symbol": symbol, "close": out })))
}

/// GET /api/risk/status
pub async fn get_risk_status(State(state): State<SharedState>) -> impl IntoResponse {
    let status = state.guard.status().await;
    Json(json!({ "ok": true, "risk": status }))
}
