//! # config — settings from environment variables
//!
//! Read once at startup (after `.env` is loaded) and passed down explicitly.
//! Invalid values abort startup with the offending variable named.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};

use crate::engine::retry::RetryPolicy;
use crate::engine::ExecutionTimings;
use crate::exchange::binance::DEFAULT_BASE_URL;
use crate::models::order::MAX_LEVERAGE;
use crate::risk::RiskLimits;

pub const DEFAULT_LOG_FILE: &str = "perpclaw.log";

// ─── AI Provider ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiProvider {
    DeepSeek,
    Claude,
    OpenAi,
}

impl AiProvider {
    pub fn default_model(self) -> &'static str {
        match self {
            AiProvider::DeepSeek => "deepseek-reasoner",
            AiProvider::Claude   => "claude-3-5-sonnet-20241022",
            AiProvider::OpenAi   => "gpt-4o",
        }
    }
}

impl FromStr for AiProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "deepseek" => Ok(AiProvider::DeepSeek),
            "claude"   => Ok(AiProvider::Claude),
            "openai"   => Ok(AiProvider::OpenAi),
            other => bail!("Unknown AI_PROVIDER: '{other}'. Use 'deepseek', 'claude' or 'openai'"),
        }
    }
}

impl std::fmt::Display for AiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AiProvider::DeepSeek => write!(f, "DeepSeek"),
            AiProvider::Claude   => write!(f, "Claude"),
            AiProvider::OpenAi   => write!(f, "OpenAI"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub provider: AiProvider,
    pub api_key:  String,
    pub model:    String,
    pub timeout:  Duration,
    /// One round trip for all symbols when more than one is configured.
    pub batch:    bool,
}

// ─── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Config {
    pub symbols:                  Vec<String>,
    pub timeframes:               Vec<String>,
    pub candle_limit:             usize,
    pub cycle_interval:           Duration,
    pub ai:                       AiConfig,
    pub risk:                     RiskLimits,
    pub max_consecutive_failures: u32,
    pub retry:                    RetryPolicy,
    pub timings:                  ExecutionTimings,
    pub market_data_url:          String,
    pub paper_balance:            f64,
    pub bind_addr:                SocketAddr,
    pub monitor_enabled:          bool,
    /// Append-only operational log; `None` when disabled.
    pub log_file:                 Option<PathBuf>,
}

/// Parsed variable or `default` when unset/blank.
fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} is invalid ('{v}'): {e}")),
        _ => Ok(default),
    }
}

fn env_list(key: &str, default: &str) -> Vec<String> {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// `LOG_FILE` value → path.  Unset means the default file; blank, `off` or
/// `none` disable the file sink.
fn log_file_setting(value: Option<String>) -> Option<PathBuf> {
    match value {
        None => Some(PathBuf::from(DEFAULT_LOG_FILE)),
        Some(v) => {
            let v = v.trim();
            if v.is_empty() || v.eq_ignore_ascii_case("off") || v.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(PathBuf::from(v))
            }
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let symbols: Vec<String> = env_list("SYMBOLS", "BTCUSDT,ETHUSDT")
            .into_iter()
            .map(|s| s.to_uppercase())
            .collect();
        if symbols.is_empty() {
            bail!("SYMBOLS must name at least one symbol");
        }
        let timeframes = env_list("TIMEFRAMES", "5m,15m,1h,4h,1d");
        if timeframes.is_empty() {
            bail!("TIMEFRAMES must name at least one interval");
        }

        let provider: AiProvider = env_or("AI_PROVIDER", AiProvider::DeepSeek)?;
        let api_key = std::env::var("AI_API_KEY").context("AI_API_KEY environment variable is required")?;
        let model = std::env::var("AI_MODEL")
            .ok()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| provider.default_model().to_string());

        let max_leverage: u32 = env_or("RISK_MAX_LEVERAGE", 20)?;
        if max_leverage == 0 || max_leverage > MAX_LEVERAGE {
            bail!("RISK_MAX_LEVERAGE must be in 1..={MAX_LEVERAGE}, got {max_leverage}");
        }
        let min_confidence: f64 = env_or("RISK_MIN_CONFIDENCE", 0.5)?;
        if !(0.0..=1.0).contains(&min_confidence) {
            bail!("RISK_MIN_CONFIDENCE must be within 0..=1, got {min_confidence}");
        }

        let max_attempts: u32 = env_or("EXEC_MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            bail!("EXEC_MAX_ATTEMPTS must be at least 1");
        }

        let bind_addr: SocketAddr = env_or("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?;

        Ok(Self {
            symbols,
            timeframes,
            candle_limit:   env_or("CANDLE_LIMIT", 200)?,
            cycle_interval: Duration::from_secs(env_or("CYCLE_INTERVAL_SECS", 180)?),
            ai: AiConfig {
                provider,
                api_key,
                model,
                timeout: Duration::from_secs(env_or("AI_TIMEOUT_SECS", 120)?),
                batch:   env_or("AI_BATCH", true)?,
            },
            risk: RiskLimits {
                max_leverage,
                max_position_value:      env_or("RISK_MAX_POSITION_VALUE", 10_000.0)?,
                max_symbol_exposure_pct: env_or("RISK_MAX_SYMBOL_EXPOSURE_PCT", 50.0)?,
                min_equity:              env_or("RISK_MIN_EQUITY", 10.0)?,
                min_confidence,
                liquidation_buffer_pct:  env_or("RISK_LIQUIDATION_BUFFER_PCT", 5.0)?,
            },
            max_consecutive_failures: env_or("RISK_MAX_CONSECUTIVE_FAILS", 3)?,
            retry: RetryPolicy {
                max_attempts,
                delay: Duration::from_millis(env_or("EXEC_RETRY_DELAY_MS", 1_000)?),
            },
            timings: ExecutionTimings {
                leverage_settle: Duration::from_millis(env_or("EXEC_LEVERAGE_SETTLE_MS", 500)?),
                fill_settle:     Duration::from_millis(env_or("EXEC_FILL_SETTLE_MS", 1_000)?),
            },
            market_data_url: std::env::var("MARKET_DATA_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            paper_balance:   env_or("PAPER_BALANCE", 10_000.0)?,
            bind_addr,
            monitor_enabled: env_or("MONITOR_ENABLED", true)?,
            log_file:        log_file_setting(std::env::var("LOG_FILE").ok()),
        })
    }
}
