//! # Momentum Paper Trader
//!
//! A paper-trading engine that scans crypto spot markets, evaluates simple
//! momentum signals, and tracks every simulated trade in a virtual ledger
//! with a full audit trail. No order ever leaves the machine.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `market`: Coinbase Exchange market data client and snapshot types
//! - `strategy`: Universe scanning and signal evaluation
//! - `risk`: Proposal sizing and the veto gates
//! - `portfolio`: The virtual ledger and its value types
//! - `engine`: The cycle loop wiring scan, evaluate, review, apply
//! - `recorder`: CSV/in-memory audit journals
//! - `persistence`: SQLite-based ledger state persistence
//! - `replay`: Deterministic re-runs over recorded snapshots
//! - `utils`: Shared decimal arithmetic

pub mod config;
pub mod engine;
pub mod market;
pub mod persistence;
pub mod portfolio;
pub mod recorder;
pub mod replay;
pub mod risk;
pub mod strategy;
pub mod utils;

pub use config::Config;
