//! # Perpclaw — AI Perpetual Futures Trader
//!
//! ## Architecture Overview
//!
//! ```text
//!  every CYCLE_INTERVAL_SECS
//!  ┌──────────────────────────────────────────────────────────────────────┐
//!  │ Orchestrator                                                         │
//!  │   positions ─▶ liquidation guard                                     │
//!  │   MarketAggregator (klines + indicators, ticker/funding/OI)          │
//!  │   prompt ─▶ Reasoner (DeepSeek / Claude / OpenAI) ─▶ Normalizer      │
//!  │   per symbol: confidence ─▶ TradingGuard ─▶ Risk Gate ─▶ Engine      │
//!  └───────────────────────────────┬──────────────────────────────────────┘
//!                                  │ AppState (history, engine, guard)
//!  ┌──────────────┐   WS / REST    │
//!  │  Dashboard   │ ◀──────────────┘   /ws/monitor, /api/monitor/*, /api/risk/*
//!  └──────────────┘
//! ```
//!
//! ## Environment Variables
//!
//! | Variable              | Default                  | Description                         |
//! |-----------------------|--------------------------|-------------------------------------|
//! | `SYMBOLS`             | `BTCUSDT,ETHUSDT`        | Traded symbols                      |
//! | `TIMEFRAMES`          | `5m,15m,1h,4h,1d`        | Kline intervals aggregated          |
//! | `CYCLE_INTERVAL_SECS` | `180`                    | Pause between cycles                |
//! | `AI_PROVIDER`         | `deepseek`               | `deepseek`, `claude` or `openai`    |
//! | `AI_API_KEY`          | (required)               | Provider API key                    |
//! | `PAPER_BALANCE`       | `10000`                  | Starting paper wallet (USDT)        |
//! | `BIND_ADDR`           | `0.0.0.0:3000`           | Monitor server address              |
//! | `RUST_LOG`            | `perpclaw=info`          | Console tracing filter              |
//! | `LOG_FILE`            | `perpclaw.log`           | Append-only log file (`off` = none) |
//!
//! Risk and execution knobs (`RISK_*`, `EXEC_*`) are listed in [`config`].

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use tokio::sync::watch;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod account;
mod ai;
mod config;
mod decision;
mod engine;
mod error;
mod events;
mod exchange;
mod history;
mod indicators;
mod market;
mod models;
mod prompt;
mod risk;
mod routes;
mod state;

use ai::HttpReasoner;
use config::Config;
use engine::executor::ExecutionEngine;
use engine::orchestrator::Orchestrator;
use exchange::binance::BinanceMarketData;
use exchange::paper::PaperExchange;
use market::MarketAggregator;
use risk::TradingGuard;
use routes::{
    monitor::{get_decision, get_decisions, get_engine, get_stats, health, ws_monitor},
    risk::{close_position, get_risk_status, kill_switch_off, kill_switch_on},
};
use state::{AppState, SharedState};

fn monitor_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health",                 get(health))
        // ── Monitor Loop ─────────────────────────────────────────────────────
        .route("/ws/monitor",                 get(ws_monitor))
        .route("/api/monitor/decisions",      get(get_decisions))
        .route("/api/monitor/decisions/:id",  get(get_decision))
        .route("/api/monitor/engine",         get(get_engine))
        .route("/api/monitor/stats",          get(get_stats))
        // ── Risk ─────────────────────────────────────────────────────────────
        .route("/api/risk/status",            get(get_risk_status))
        .route("/api/risk/kill",              post(kill_switch_on))
        .route("/api/risk/rearm",             post(kill_switch_off))
        .route("/api/risk/close",             post(close_position))
        // ── Middleware ───────────────────────────────────────────────────────
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ─── Logging ──────────────────────────────────────────────────────────────────

fn open_log_sink(path: &Path) -> anyhow::Result<File> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

/// Console layer filtered by `RUST_LOG`; optional plain-text file layer that
/// always records our own DEBUG lines.
fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<()> {
    let console_filter = EnvFilter::from_default_env()
        .add_directive("perpclaw=info".parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("tower_http=info".parse()?);

    let file_layer = match log_file {
        Some(path) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(open_log_sink(path)?))
                .with_filter(EnvFilter::new("warn,perpclaw=debug,tower_http=info")),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_filter(console_filter))
        .with(file_layer)
        .init();
    Ok(())
}

// ─── Entry Point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Load .env (optional — real env vars win) ──────────────────────────
    dotenvy::dotenv().ok();

    // ── 2. Configuration, then structured logging ────────────────────────────
    let config = Config::from_env().context("Failed to load config")?;
    init_tracing(config.log_file.as_deref())?;

    info!(
        r#"

  ╔═══════════════════════════════════════════════╗
  ║        PERPCLAW — AI Perpetual Trader         ║
  ║   Aggregate · Decide · Gate · Execute         ║
  ╚═══════════════════════════════════════════════╝"#
    );

    info!(
        log_file   = ?config.log_file,
        symbols    = ?config.symbols,
        timeframes = ?config.timeframes,
        provider   = %config.ai.provider,
        model      = %config.ai.model,
        batch      = config.ai.batch,
        interval   = ?config.cycle_interval,
        "Configuration loaded"
    );

    // ── 3. Collaborators ─────────────────────────────────────────────────────
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;

    let live = Arc::new(BinanceMarketData::new(client.clone(), config.market_data_url.clone()));
    // Market reads go through the paper book so protective orders trigger on every quote.
    let paper = Arc::new(PaperExchange::new(live, config.paper_balance));
    info!(balance = config.paper_balance, "📄 Paper trading account ready");

    let reasoner = Arc::new(HttpReasoner::new(client, config.ai.clone()));

    // ── 4. Shared state ──────────────────────────────────────────────────────
    let engine = Arc::new(ExecutionEngine::new(
        paper.clone(),
        paper.clone(),
        config.retry,
        config.timings,
    ));
    let guard = Arc::new(TradingGuard::new(config.risk.clone(), config.max_consecutive_failures));
    let state: SharedState = Arc::new(AppState::new(engine, guard));

    // ── 5. Monitor server ────────────────────────────────────────────────────
    if config.monitor_enabled {
        let app = monitor_router(state.clone());
        let listener = tokio::net::TcpListener::bind(config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
        info!(addr = %config.bind_addr, "🚀 Monitor server starting");

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "❌ Monitor server stopped");
            }
        });
    }

    // ── 6. Shutdown signal ───────────────────────────────────────────────────
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("🛑 Ctrl-C received — finishing the symbol in flight");
                let _ = stop_tx.send(true);
            }
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
        }
        // keep the sender alive so the orchestrator never sees a closed channel
        std::future::pending::<()>().await;
    });

    // ── 7. Cycle loop ────────────────────────────────────────────────────────
    let market = MarketAggregator::new(paper.clone(), config.timeframes.clone(), config.candle_limit);
    let mut orchestrator = Orchestrator::new(
        config.symbols.clone(),
        config.cycle_interval,
        config.ai.batch,
        config.risk.clone(),
        market,
        paper,
        reasoner,
        state.clone(),
        stop_rx,
    );
    orchestrator.run().await;

    let decisions = state.history.read().await.len();
    info!(
        cycles    = state.cycles(),
        trades    = state.trades(),
        decisions,
        "👋 Perpclaw shut down"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_log_sink_appends_across_restarts() {
        let path = std::env::temp_dir()
            .join(format!("perpclaw-log-{}", uuid::Uuid::new_v4()))
            .join("run.log");

        writeln!(open_log_sink(&path).unwrap(), "first run").unwrap();
        writeln!(open_log_sink(&path).unwrap(), "second run").unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "first run\nsecond run\n");
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
