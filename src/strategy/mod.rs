//! Signal generation.
//!
//! Contains the decision-making half of the system:
//! - Universe scanning into per-cycle snapshot batches
//! - Price-series indicators (SMA, RSI, realized volatility)
//! - Momentum evaluation into ENTER / EXIT / HOLD signals

pub mod indicators;

mod evaluator;
mod scanner;

pub use evaluator::{SignalAction, SignalEvaluation, SignalEvaluator};
pub use scanner::{MarketScanner, ScanReport};
