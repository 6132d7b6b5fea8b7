//! Deterministic replay of recorded market snapshots.
//!
//! Feeds CSV-recorded batches through the same engine the live loop uses,
//! with the recorded timestamps as the clock, and rolls the outcome up
//! into performance metrics.

mod data;
mod engine;
mod metrics;

pub use data::{CsvSnapshotLoader, SnapshotBatch};
pub use engine::{ReplayEngine, ReplayOutcome};
pub use metrics::{EquityPoint, ReplayMetrics};
