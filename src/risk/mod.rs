//! Risk management for the paper portfolio.
//!
//! A single gatekeeper sits between signal generation and the ledger:
//! - Concurrent position capacity
//! - Allocation-capped trade sizing with a minimum notional
//! - Daily loss limit on new exposure
//! - Per-symbol cooldown and losing-streak lockout

mod manager;

pub use manager::{RiskManager, Veto};
