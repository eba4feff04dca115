//! # routes::monitor
//!
//! **Monitor Loop** — read-only view of the trading loop for dashboards.
//!
//! ## Endpoints
//!
//! | Method    | Path                          | Description                                  |
//! |-----------|-------------------------------|----------------------------------------------|
//! | GET       | `/api/health`                 | Liveness + cycle counters                    |
//! | GET (WS)  | `/ws/monitor`                 | WebSocket real-time event stream             |
//! | GET       | `/api/monitor/decisions`      | Decision history (`?symbol=&limit=`)         |
//! | GET       | `/api/monitor/decisions/:id`  | One decision record                          |
//! | GET       | `/api/monitor/engine`         | Per-symbol execution state                   |
//! | GET       | `/api/monitor/stats`          | cycle_count, trade_count, last cycle, uptime |

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{error::AppError, history::HISTORY_CAPACITY, state::SharedState};

// ─── WebSocket Handler ────────────────────────────────────────────────────────

/// Upgrade HTTP → WebSocket and subscribe to the broadcast channel.
///
/// Every [`WsEvent`](crate::events::WsEvent) arrives as a JSON text frame,
/// after an initial `SNAPSHOT` frame.
pub async fn ws_monitor(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn snapshot(state: &SharedState) -> Value {
    let engine = state.engine.snapshot().await;
    let guard = state.guard.status().await;
    let recent = state.history.read().await.recent(10);
    let last_cycle_at = *state.last_cycle_at.read().await;

    json!({
        "event":         "SNAPSHOT",
        "cycle_count":   state.cycles(),
        "trade_count":   state.trades(),
        "last_cycle_at": last_cycle_at,
        "engine":        engine_json(&engine),
        "kill_switch":   guard.is_killed,
        "decisions":     recent,
    })
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let mut rx = state.broadcast_tx.subscribe();
    let (mut sender, mut receiver) = socket.split();

    info!("🔌 WebSocket client connected");

    let first = snapshot(&state).await.to_string();
    if sender.send(Message::Text(first)).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(json_str) => {
                        if sender.send(Message::Text(json_str)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        debug!("WS client lagged, skipped {n} events");
                    }
                    Err(_) => break,
                }
            }

            result = receiver.next() => {
                match result {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("🔌 WebSocket client disconnected");
}

fn engine_json(engine: &[(String, crate::engine::executor::SymbolStatus)]) -> Vec<Value> {
    engine
        .iter()
        .map(|(symbol, status)| {
            json!({
                "symbol":      symbol,
                "state":       status.state,
                "unprotected": status.unprotected,
                "last_error":  status.last_error,
                "updated_at":  status.updated_at,
            })
        })
        .collect()
}

// ─── REST Monitoring Endpoints ────────────────────────────────────────────────

/// GET /api/health
pub async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "ok":          true,
        "cycle_count": state.cycles(),
        "trade_count": state.trades(),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct DecisionQuery {
    pub symbol: Option<String>,
    pub limit:  Option<usize>,
}

/// GET /api/monitor/decisions — oldest first.
pub async fn get_decisions(
    State(state): State<SharedState>,
    Query(q): Query<DecisionQuery>,
) -> Result<impl IntoResponse, AppError> {
    let limit = q.limit.unwrap_or(HISTORY_CAPACITY);
    if limit == 0 || limit > HISTORY_CAPACITY {
        return Err(AppError::BadRequest(format!("limit must be within 1..={HISTORY_CAPACITY}")));
    }

    let history = state.history.read().await;
    let records = match q.symbol {
        Some(symbol) => history.recent_for(&symbol.to_uppercase(), limit),
        None => history.recent(limit),
    };
    Ok(Json(json!({
        "ok":      true,
        "count":   records.len(),
        "records": records,
    })))
}

/// GET /api/monitor/decisions/:id
pub async fn get_decision(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let record = state
        .history
        .read()
        .await
        .get(id)
        .ok_or_else(|| AppError::NotFound(format!("decision {id} (only the last {HISTORY_CAPACITY} are kept)")))?;
    Ok(Json(json!({ "ok": true, "record": record })))
}

/// GET /api/monitor/engine
pub async fn get_engine(State(state): State<SharedState>) -> impl IntoResponse {
    let engine = state.engine.snapshot().await;
    Json(json!({
        "ok":      true,
        "symbols": engine_json(&engine),
    }))
}

/// GET /api/monitor/stats
pub async fn get_stats(State(state): State<SharedState>) -> impl IntoResponse {
    let last_cycle_at = *state.last_cycle_at.read().await;
    let decisions = state.history.read().await.len();
    let uptime_secs = (Utc::now() - state.started_at).num_seconds();

    Json(json!({
        "ok":            true,
        "cycle_count":   state.cycles(),
        "trade_count":   state.trades(),
        "decisions":     decisions,
        "last_cycle_at": last_cycle_at,
        "uptime_secs":   uptime_secs,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::DecisionRecord;
    use crate::models::Decision;
    use crate::routes::test_support::{body_json, state};
    use axum::http::StatusCode;

    async fn seed(state: &SharedState) -> Uuid {
        let mut last = Uuid::nil();
        for symbol in ["BTCUSDT", "ETHUSDT", "BTCUSDT"] {
            let rec = DecisionRecord::from_decision(&Decision::fallback(symbol, "seed"), 1.0);
            last = rec.id;
            state.record_decision(rec).await;
        }
        last
    }

    #[tokio::test]
    async fn test_decisions_filtered_by_symbol() {
        let s = state();
        seed(&s).await;
        let q = DecisionQuery { symbol: Some("btcusdt".into()), limit: None };
        let resp = get_decisions(State(s), Query(q)).await.unwrap().into_response();
        let body = body_json(resp).await;
        assert_eq!(body["count"], 2);
    }

    #[tokio::test]
    async fn test_decisions_limit_validated() {
        let q = DecisionQuery { symbol: None, limit: Some(0) };
        let err = get_decisions(State(state()), Query(q)).await.err().unwrap();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_decision_lookup() {
        let s = state();
        let id = seed(&s).await;
        let body = body_json(get_decision(State(s.clone()), Path(id)).await.unwrap().into_response()).await;
        assert_eq!(body["record"]["symbol"], "BTCUSDT");

        let err = get_decision(State(s), Path(Uuid::new_v4())).await.err().unwrap();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stats_counts() {
        let s = state();
        seed(&s).await;
        let body = body_json(get_stats(State(s)).await.into_response()).await;
        assert_eq!(body["decisions"], 3);
        assert_eq!(body["cycle_count"], 0);
        assert!(body["last_cycle_at"].is_null());
    }

    #[tokio::test]
    async fn test_snapshot_shape() {
        let s = state();
        seed(&s).await;
        let snap = snapshot(&s).await;
        assert_eq!(snap["event"], "SNAPSHOT");
        assert_eq!(snap["decisions"].as_array().unwrap().len(), 3);
        assert_eq!(snap["kill_switch"], false);
    }
}
