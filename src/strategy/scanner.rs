//! Universe scanner that gathers one snapshot per configured symbol.

use crate::config::MarketConfig;
use crate::market::{MarketDataError, MarketDataSource, MarketSnapshot};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, instrument, trace, warn};

/// Why a symbol was left out of a cycle's batch.
#[derive(Debug, Clone, Copy)]
enum SkipReason {
    Stale,
    BadPrice,
}

/// Per-cycle scan accounting, logged at the end of every sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub requested: usize,
    pub fetched: usize,
    pub skipped_unavailable: usize,
    pub skipped_stale: usize,
    pub skipped_bad_price: usize,
}

/// Sweeps the configured universe and returns the usable snapshots, in
/// universe order.
///
/// A symbol-level failure skips that symbol and moves on; the cycle only
/// aborts when every symbol failed at the venue level, which is the
/// signature of an outage rather than a delisted product.
pub struct MarketScanner {
    config: MarketConfig,
}

impl MarketScanner {
    pub fn new(config: MarketConfig) -> Self {
        Self { config }
    }

    #[instrument(skip(self, source, now))]
    pub async fn scan(
        &self,
        source: &dyn MarketDataSource,
        now: DateTime<Utc>,
    ) -> Result<(Vec<MarketSnapshot>, ScanReport), MarketDataError> {
        let mut snapshots = Vec::with_capacity(self.config.universe.len());
        let mut report = ScanReport::default();
        let mut venue_errors = 0usize;
        let mut last_venue_error = String::new();

        for symbol in &self.config.universe {
            report.requested += 1;
            match source.get_price(symbol).await {
                Ok(snapshot) => match self.admit(&snapshot, now) {
                    None => {
                        report.fetched += 1;
                        snapshots.push(snapshot);
                    }
                    Some(SkipReason::Stale) => {
                        warn!(
                            symbol,
                            age_secs = snapshot.age(now).num_seconds(),
                            "Skipping stale snapshot"
                        );
                        report.skipped_stale += 1;
                    }
                    Some(SkipReason::BadPrice) => {
                        warn!(symbol, price = %snapshot.price, "Skipping non-positive price");
                        report.skipped_bad_price += 1;
                    }
                },
                Err(MarketDataError::SymbolUnavailable { reason, .. }) => {
                    warn!(symbol, reason, "Symbol unavailable, skipping");
                    report.skipped_unavailable += 1;
                }
                Err(MarketDataError::DataSourceUnavailable(reason)) => {
                    warn!(symbol, reason, "Venue-level failure");
                    report.skipped_unavailable += 1;
                    venue_errors += 1;
                    last_venue_error = reason;
                }
            }
        }

        // Every single symbol failing at the transport level means the venue
        // itself is down; surface that so the engine can sit the cycle out.
        if report.requested > 0 && venue_errors == report.requested {
            return Err(MarketDataError::DataSourceUnavailable(last_venue_error));
        }

        info!(
            requested = report.requested,
            fetched = report.fetched,
            skipped_unavailable = report.skipped_unavailable,
            skipped_stale = report.skipped_stale,
            skipped_bad_price = report.skipped_bad_price,
            "Universe scan complete"
        );

        Ok((snapshots, report))
    }

    fn admit(&self, snapshot: &MarketSnapshot, now: DateTime<Utc>) -> Option<SkipReason> {
        if snapshot.price <= Decimal::ZERO {
            return Some(SkipReason::BadPrice);
        }
        if snapshot.age(now) > self.config.staleness_threshold() {
            trace!(symbol = %snapshot.symbol, "Snapshot older than staleness threshold");
            return Some(SkipReason::Stale);
        }
        None
    }
}
