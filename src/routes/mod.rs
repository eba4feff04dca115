//! # routes
//!
//! Axum handlers for the monitor surface.  Every handler shares
//! [`SharedState`](crate::state::SharedState) with the cycle orchestrator.

pub mod monitor;
pub mod risk;
