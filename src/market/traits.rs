//! Venue-agnostic market data abstraction.
//!
//! The engine never talks to a venue directly; it pulls prices through
//! `MarketDataSource` so the same decision path runs against the live
//! Coinbase client, the scripted mock, or nothing at all (replay feeds
//! snapshots straight into the engine).

use crate::market::types::{Candle, MarketSnapshot};
use async_trait::async_trait;
use thiserror::Error;

/// Data-acquisition failures. Per-symbol failures are recoverable (the
/// symbol sits out the cycle); a venue-level failure means nothing can be
/// fetched until the next cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarketDataError {
    /// The venue answered but could not serve this symbol (unknown product,
    /// malformed payload, non-success status).
    #[error("symbol {symbol} unavailable: {reason}")]
    SymbolUnavailable { symbol: String, reason: String },

    /// The venue could not be reached at all (transport error, timeout at
    /// the HTTP layer).
    #[error("data source unavailable: {0}")]
    DataSourceUnavailable(String),
}

impl MarketDataError {
    pub fn symbol_unavailable(symbol: &str, reason: impl Into<String>) -> Self {
        Self::SymbolUnavailable {
            symbol: symbol.to_string(),
            reason: reason.into(),
        }
    }
}

/// A pull-based source of per-symbol price observations.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Fetch the current price observation for one symbol.
    async fn get_price(&self, symbol: &str) -> Result<MarketSnapshot, MarketDataError>;

    /// Fetch up to `limit` recent candles (oldest first) for history
    /// backfill. `granularity_secs` is the candle width.
    async fn get_candles(
        &self,
        symbol: &str,
        granularity_secs: u32,
        limit: usize,
    ) -> Result<Vec<Candle>, MarketDataError>;
}
