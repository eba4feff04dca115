//! # history — rolling in-memory decision log
//!
//! Bounded, append-only, oldest evicted first.  Feeds prompt context and the
//! monitor surface; never consulted by risk logic.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{Action, Decision};

pub const HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct DecisionRecord {
    pub id:               Uuid,
    pub timestamp:        DateTime<Utc>,
    pub symbol:           String,
    pub action:           Action,
    pub confidence:       f64,
    pub leverage:         u32,
    pub position_percent: f64,
    pub reason:           String,
    /// Live price when the decision was taken (0 when unknown).
    pub price:            f64,
    pub fallback:         bool,
}

impl DecisionRecord {
    pub fn from_decision(decision: &Decision, price: f64) -> Self {
        Self {
            id:               Uuid::new_v4(),
            timestamp:        Utc::now(),
            symbol:           decision.symbol.clone(),
            action:           decision.action,
            confidence:       decision.confidence,
            leverage:         decision.leverage,
            position_percent: decision.position_percent,
            reason:           decision.reason.clone(),
            price,
            fallback:         decision.is_fallback(),
        }
    }
}

#[derive(Debug)]
pub struct DecisionHistory {
    records:  VecDeque<DecisionRecord>,
    capacity: usize,
}

impl Default for DecisionHistory {
    fn default() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }
}

impl DecisionHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { records: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn push(&mut self, record: DecisionRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Oldest first.
    pub fn all(&self) -> Vec<DecisionRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn get(&self, id: Uuid) -> Option<DecisionRecord> {
        self.records.iter().find(|r| r.id == id).cloned()
    }

    /// The last `n` records, oldest first.
    pub fn recent(&self, n: usize) -> Vec<DecisionRecord> {
        let skip = self.records.len().saturating_sub(n);
        self.records.iter().skip(skip).cloned().collect()
    }

    /// The last `n` records for `symbol`, oldest first.
    pub fn recent_for(&self, symbol: &str, n: usize) -> Vec<DecisionRecord> {
        let mut out: Vec<DecisionRecord> = self
            .records
            .iter()
            .rev()
            .filter(|r| r.symbol == symbol)
            .take(n)
            .cloned()
            .collect();
        out.reverse();
        out
    }
}
