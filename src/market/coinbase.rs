//! Coinbase Exchange public REST client.
//!
//! Only public market-data endpoints are used; no authentication, no order
//! placement. Paper trades settle in the internal ledger, never on the venue.

use crate::config::MarketConfig;
use crate::market::traits::{MarketDataError, MarketDataSource};
use crate::market::types::{Candle, MarketSnapshot, ProductTicker, RawCandle};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{debug, instrument};

pub const DEFAULT_BASE_URL: &str = "https://api.exchange.coinbase.com";

/// Client for the Coinbase Exchange market-data API.
pub struct CoinbaseClient {
    http: Client,
    base_url: String,
}

impl CoinbaseClient {
    /// Create a new client from configuration.
    pub fn new(config: &MarketConfig) -> Result<Self> {
        Self::with_base_url(
            config.base_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    /// Create a client against an explicit base URL (tests point this at a
    /// local mock server).
    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    fn to_decimal(symbol: &str, field: &str, value: f64) -> Result<Decimal, MarketDataError> {
        Decimal::from_f64_retain(value).ok_or_else(|| {
            MarketDataError::symbol_unavailable(symbol, format!("invalid {field} value {value}"))
        })
    }
}

#[async_trait]
impl MarketDataSource for CoinbaseClient {
    #[instrument(skip(self))]
    async fn get_price(&self, symbol: &str) -> Result<MarketSnapshot, MarketDataError> {
        let url = format!("{}/products/{}/ticker", self.base_url, symbol);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| MarketDataError::DataSourceUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MarketDataError::symbol_unavailable(
                symbol,
                format!("HTTP {}", response.status()),
            ));
        }

        let ticker: ProductTicker = response.json().await.map_err(|e| {
            MarketDataError::symbol_unavailable(symbol, format!("bad ticker payload: {e}"))
        })?;

        debug!(symbol = %symbol, price = %ticker.price, "Fetched ticker");

        Ok(MarketSnapshot {
            symbol: symbol.to_string(),
            price: ticker.price,
            volume: ticker.volume,
            timestamp: ticker.time,
        })
    }

    #[instrument(skip(self))]
    async fn get_candles(
        &self,
        symbol: &str,
        granularity_secs: u32,
        limit: usize,
    ) -> Result<Vec<Candle>, MarketDataError> {
        let url = format!(
            "{}/products/{}/candles?granularity={}",
            self.base_url, symbol, granularity_secs
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| MarketDataError::DataSourceUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MarketDataError::symbol_unavailable(
                symbol,
                format!("HTTP {}", response.status()),
            ));
        }

        // Rows arrive newest first: [time, low, high, open, close, volume].
        let rows: Vec<RawCandle> = response.json().await.map_err(|e| {
            MarketDataError::symbol_unavailable(symbol, format!("bad candle payload: {e}"))
        })?;

        let mut candles = Vec::with_capacity(rows.len().min(limit));
        for (time, low, high, open, close, volume) in rows.into_iter().take(limit) {
            let time = DateTime::<Utc>::from_timestamp(time, 0).ok_or_else(|| {
                MarketDataError::symbol_unavailable(symbol, format!("invalid candle time {time}"))
            })?;

            candles.push(Candle {
                time,
                open: Self::to_decimal(symbol, "open", open)?,
                high: Self::to_decimal(symbol, "high", high)?,
                low: Self::to_decimal(symbol, "low", low)?,
                close: Self::to_decimal(symbol, "close", close)?,
                volume: Self::to_decimal(symbol, "volume", volume)?,
            });
        }

        // Oldest first so callers can append in chronological order.
        candles.reverse();

        debug!(symbol = %symbol, count = candles.len(), "Fetched candles");
        Ok(candles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn test_client(server: &MockServer) -> CoinbaseClient {
        CoinbaseClient::with_base_url(server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_get_price_parses_ticker() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/products/BTC-USD/ticker"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"trade_id": 1, "price": "50123.45", "size": "0.01",
                    "time": "2024-03-20T12:00:00Z", "bid": "50120", "ask": "50125",
                    "volume": "1234.5"}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let client = test_client(&server).await;
        let snapshot = client.get_price("BTC-USD").await.unwrap();

        assert_eq!(snapshot.symbol, "BTC-USD");
        assert_eq!(snapshot.price, dec!(50123.45));
        assert_eq!(snapshot.volume, Some(dec!(1234.5)));
    }

    #[tokio::test]
    async fn test_get_price_unknown_product_is_symbol_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/products/NOPE-USD/ticker"))
            .respond_with(ResponseTemplate::new(404).set_body_raw(
                r#"{"message": "NotFound"}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let client = test_client(&server).await;
        let err = client.get_price("NOPE-USD").await.unwrap_err();

        assert!(matches!(
            err,
            MarketDataError::SymbolUnavailable { ref symbol, .. } if symbol == "NOPE-USD"
        ));
    }

    #[tokio::test]
    async fn test_get_price_garbage_payload_is_symbol_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/products/BTC-USD/ticker"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("not json", "text/plain"))
            .mount(&server)
            .await;

        let client = test_client(&server).await;
        let err = client.get_price("BTC-USD").await.unwrap_err();
        assert!(matches!(err, MarketDataError::SymbolUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_venue_is_data_source_unavailable() {
        // Nothing listens on port 1; connection fails at the transport layer.
        let client =
            CoinbaseClient::with_base_url("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        let err = client.get_price("BTC-USD").await.unwrap_err();
        assert!(matches!(err, MarketDataError::DataSourceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_get_candles_reversed_oldest_first() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/products/ETH-USD/candles"))
            .and(query_param("granularity", "300"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                // Newest first, as the venue sends them.
                r#"[[1710936300, 95.0, 110.0, 100.0, 105.5, 10.0],
                    [1710936000, 90.0, 101.0, 95.0, 100.0, 20.0]]"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let client = test_client(&server).await;
        let candles = client.get_candles("ETH-USD", 300, 100).await.unwrap();

        assert_eq!(candles.len(), 2);
        assert!(candles[0].time < candles[1].time);
        assert_eq!(candles[0].close, dec!(100.0));
        assert_eq!(candles[1].close, dec!(105.5));
        assert_eq!(candles[1].volume, dec!(10.0));
    }

    #[tokio::test]
    async fn test_get_candles_respects_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/products/ETH-USD/candles"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"[[1710936600, 1.0, 1.0, 1.0, 3.0, 1.0],
                    [1710936300, 1.0, 1.0, 1.0, 2.0, 1.0],
                    [1710936000, 1.0, 1.0, 1.0, 1.0, 1.0]]"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let client = test_client(&server).await;
        let candles = client.get_candles("ETH-USD", 300, 2).await.unwrap();

        // The two newest rows survive the cut, returned oldest first.
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].close, dec!(2.0));
        assert_eq!(candles[1].close, dec!(3.0));
    }
}
