//! Market data types: domain values and Coinbase Exchange wire formats.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One observation of one symbol at one instant. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub price: Decimal,
    pub volume: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl MarketSnapshot {
    /// Age of this observation relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.timestamp
    }
}

/// One OHLCV candle, used to backfill price history at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Ticker payload from `GET /products/{product_id}/ticker`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductTicker {
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub volume: Option<Decimal>,
    pub time: DateTime<Utc>,
}

/// Candle row from `GET /products/{product_id}/candles`:
/// `[time, low, high, open, close, volume]`, newest first.
pub type RawCandle = (i64, f64, f64, f64, f64, f64);

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_ticker_deserializes_decimal_strings() {
        let json = r#"{
            "trade_id": 86326522,
            "price": "6268.48",
            "size": "0.00698254",
            "time": "2024-03-20T00:22:57.833Z",
            "bid": "6265.15",
            "ask": "6267.71",
            "volume": "53602.03940154"
        }"#;

        let ticker: ProductTicker = serde_json::from_str(json).unwrap();
        assert_eq!(ticker.price, dec!(6268.48));
        assert_eq!(ticker.volume, Some(dec!(53602.03940154)));
    }

    #[test]
    fn test_ticker_volume_optional() {
        let json = r#"{"price": "100.5", "time": "2024-03-20T00:00:00Z"}"#;
        let ticker: ProductTicker = serde_json::from_str(json).unwrap();
        assert_eq!(ticker.price, dec!(100.5));
        assert_eq!(ticker.volume, None);
    }

    #[test]
    fn test_snapshot_age() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 20, 12, 0, 0).unwrap();
        let snapshot = MarketSnapshot {
            symbol: "BTC-USD".to_string(),
            price: dec!(50000),
            volume: None,
            timestamp: ts,
        };

        let now = ts + chrono::Duration::seconds(600);
        assert_eq!(snapshot.age(now), chrono::Duration::seconds(600));
    }

}
