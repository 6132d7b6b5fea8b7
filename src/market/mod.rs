//! Market data acquisition.
//!
//! ## Coinbase Exchange
//! Public REST endpoints only (ticker, candles); no keys, no orders.
//! Trades are simulated in the internal ledger.
//!
//! ## Mock
//! Fully scripted source for tests and offline scenario runs.

pub mod coinbase;
pub mod mock;
mod traits;
mod types;

pub use coinbase::CoinbaseClient;
pub use mock::MockDataSource;
pub use traits::{MarketDataError, MarketDataSource};
pub use types::{Candle, MarketSnapshot, ProductTicker, RawCandle};
