//! # engine
//!
//! Turns accepted decisions into exchange calls.
//!
//! * [`planner`]      — sizing and protective prices (pure)
//! * [`retry`]        — retry policy for order submission
//! * [`executor`]     — per-symbol FLAT → OPENING → OPEN → CLOSING state machine
//! * [`orchestrator`] — the cycle: aggregate → decide → gate → execute → record

pub mod executor;
pub mod orchestrator;
pub mod planner;
pub mod retry;

use std::time::Duration;

/// Fixed waits inside an open sequence.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionTimings {
    /// After the leverage change, before the entry order.
    pub leverage_settle: Duration,
    /// After the entry fill, before protective orders.
    pub fill_settle:     Duration,
}

impl Default for ExecutionTimings {
    fn default() -> Self {
        Self {
            leverage_settle: Duration::from_millis(500),
            fill_settle:     Duration::from_millis(1_000),
        }
    }
}

#[cfg(test)]
impl ExecutionTimings {
    pub fn immediate() -> Self {
        Self { leverage_settle: Duration::ZERO, fill_settle: Duration::ZERO }
    }
}
