//! Scripted in-memory data source for tests and offline runs.

use crate::market::traits::{MarketDataError, MarketDataSource};
use crate::market::types::{Candle, MarketSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct MockDataInner {
    /// Scripted price sequences per symbol. Each `get_price` consumes one
    /// value; the final value repeats once a sequence is exhausted.
    prices: HashMap<String, VecDeque<Decimal>>,
    candles: HashMap<String, Vec<Candle>>,
    failing: HashSet<String>,
    /// Per-symbol timestamp overrides (for staleness scenarios).
    timestamp_overrides: HashMap<String, DateTime<Utc>>,
    venue_down: bool,
    now: Option<DateTime<Utc>>,
    price_calls: u64,
}

/// Data source whose every answer is scripted by the test.
#[derive(Clone, Default)]
pub struct MockDataSource {
    inner: Arc<RwLock<MockDataInner>>,
}

impl MockDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the clock used for snapshot timestamps.
    pub async fn set_time(&self, now: DateTime<Utc>) {
        self.inner.write().await.now = Some(now);
    }

    /// Script a single repeating price for a symbol.
    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        let mut inner = self.inner.write().await;
        inner
            .prices
            .insert(symbol.to_string(), VecDeque::from([price]));
    }

    /// Append a sequence of prices, consumed one per `get_price` call.
    pub async fn push_prices(&self, symbol: &str, prices: &[Decimal]) {
        let mut inner = self.inner.write().await;
        inner
            .prices
            .entry(symbol.to_string())
            .or_default()
            .extend(prices.iter().copied());
    }

    pub async fn set_candles(&self, symbol: &str, candles: Vec<Candle>) {
        self.inner
            .write()
            .await
            .candles
            .insert(symbol.to_string(), candles);
    }

    /// Make `get_price`/`get_candles` fail for one symbol.
    pub async fn fail_symbol(&self, symbol: &str) {
        self.inner.write().await.failing.insert(symbol.to_string());
    }

    pub async fn clear_failure(&self, symbol: &str) {
        self.inner.write().await.failing.remove(symbol);
    }

    /// Simulate the whole venue being unreachable.
    pub async fn set_venue_down(&self, down: bool) {
        self.inner.write().await.venue_down = down;
    }

    /// Override the timestamp attached to one symbol's snapshots.
    pub async fn set_snapshot_time(&self, symbol: &str, timestamp: DateTime<Utc>) {
        self.inner
            .write()
            .await
            .timestamp_overrides
            .insert(symbol.to_string(), timestamp);
    }

    pub async fn price_calls(&self) -> u64 {
        self.inner.read().await.price_calls
    }
}

#[async_trait]
impl MarketDataSource for MockDataSource {
    async fn get_price(&self, symbol: &str) -> Result<MarketSnapshot, MarketDataError> {
        let mut inner = self.inner.write().await;
        inner.price_calls += 1;

        if inner.venue_down {
            return Err(MarketDataError::DataSourceUnavailable(
                "scripted outage".to_string(),
            ));
        }
        if inner.failing.contains(symbol) {
            return Err(MarketDataError::symbol_unavailable(
                symbol,
                "scripted failure",
            ));
        }

        let queue = inner
            .prices
            .get_mut(symbol)
            .ok_or_else(|| MarketDataError::symbol_unavailable(symbol, "no scripted price"))?;
        // The last scripted price repeats forever.
        let price = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().copied()
        }
        .ok_or_else(|| MarketDataError::symbol_unavailable(symbol, "no scripted price"))?;

        let timestamp = inner
            .timestamp_overrides
            .get(symbol)
            .copied()
            .or(inner.now)
            .unwrap_or_else(Utc::now);

        Ok(MarketSnapshot {
            symbol: symbol.to_string(),
            price,
            volume: None,
            timestamp,
        })
    }

    async fn get_candles(
        &self,
        symbol: &str,
        _granularity_secs: u32,
        limit: usize,
    ) -> Result<Vec<Candle>, MarketDataError> {
        let inner = self.inner.read().await;

        if inner.venue_down {
            return Err(MarketDataError::DataSourceUnavailable(
                "scripted outage".to_string(),
            ));
        }
        if inner.failing.contains(symbol) {
            return Err(MarketDataError::symbol_unavailable(
                symbol,
                "scripted failure",
            ));
        }

        let candles = inner
            .candles
            .get(symbol)
            .ok_or_else(|| MarketDataError::symbol_unavailable(symbol, "no scripted candles"))?;

        let skip = candles.len().saturating_sub(limit);
        Ok(candles.iter().skip(skip).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_scripted_sequence_consumed_then_repeats() {
        let source = MockDataSource::new();
        source
            .push_prices("BTC-USD", &[dec!(100), dec!(101), dec!(102)])
            .await;

        assert_eq!(source.get_price("BTC-USD").await.unwrap().price, dec!(100));
        assert_eq!(source.get_price("BTC-USD").await.unwrap().price, dec!(101));
        assert_eq!(source.get_price("BTC-USD").await.unwrap().price, dec!(102));
        // Exhausted: last value repeats.
        assert_eq!(source.get_price("BTC-USD").await.unwrap().price, dec!(102));
        assert_eq!(source.price_calls().await, 4);
    }

    #[tokio::test]
    async fn test_unscripted_symbol_unavailable() {
        let source = MockDataSource::new();
        let err = source.get_price("ETH-USD").await.unwrap_err();
        assert!(matches!(err, MarketDataError::SymbolUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_venue_down_trumps_scripts() {
        let source = MockDataSource::new();
        source.set_price("BTC-USD", dec!(100)).await;
        source.set_venue_down(true).await;

        let err = source.get_price("BTC-USD").await.unwrap_err();
        assert!(matches!(err, MarketDataError::DataSourceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_pinned_clock_and_staleness_override() {
        let source = MockDataSource::new();
        let now = Utc.with_ymd_and_hms(2024, 3, 20, 12, 0, 0).unwrap();
        let old = now - chrono::Duration::hours(2);

        source.set_time(now).await;
        source.set_price("BTC-USD", dec!(100)).await;
        source.set_price("ETH-USD", dec!(200)).await;
        source.set_snapshot_time("ETH-USD", old).await;

        assert_eq!(source.get_price("BTC-USD").await.unwrap().timestamp, now);
        assert_eq!(source.get_price("ETH-USD").await.unwrap().timestamp, old);
    }

    #[tokio::test]
    async fn test_candle_limit_keeps_most_recent() {
        let source = MockDataSource::new();
        let base = Utc.with_ymd_and_hms(2024, 3, 20, 0, 0, 0).unwrap();
        let candles: Vec<Candle> = (0..5)
            .map(|i| Candle {
                time: base + chrono::Duration::seconds(300 * i),
                open: dec!(1),
                high: dec!(1),
                low: dec!(1),
                close: Decimal::from(i),
                volume: dec!(1),
            })
            .collect();
        source.set_candles("BTC-USD", candles).await;

        let got = source.get_candles("BTC-USD", 300, 2).await.unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].close, dec!(3));
        assert_eq!(got[1].close, dec!(4));
    }
}
