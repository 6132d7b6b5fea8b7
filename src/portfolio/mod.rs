//! Core portfolio domain: positions, account state, trade records.
//!
//! Everything the audit trail is made of lives here. These are plain value
//! types; all mutation goes through [`ledger::PortfolioLedger`].

pub mod ledger;

pub use ledger::{LedgerError, PortfolioLedger};

use crate::utils::decimal::pct_change;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Latest known price per symbol, used to mark open positions.
pub type PriceMap = HashMap<String, Decimal>;

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(format!("unknown side: {other}")),
        }
    }
}

/// An open holding in one symbol. Exists only while quantity > 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Cash spent to open this position.
    pub fn cost_basis(&self) -> Decimal {
        self.quantity * self.entry_price
    }

    /// Value at the given mark price.
    pub fn market_value(&self, mark: Decimal) -> Decimal {
        self.quantity * mark
    }

    /// Mark-to-market P&L.
    pub fn unrealized_pnl(&self, mark: Decimal) -> Decimal {
        self.quantity * (mark - self.entry_price)
    }

    /// Mark-to-market return in percent of the entry price.
    pub fn unrealized_return_pct(&self, mark: Decimal) -> Decimal {
        pct_change(self.entry_price, mark)
    }

    pub fn held_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.opened_at
    }
}

/// The authoritative account state. One instance, owned by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub cash_balance: Decimal,
    pub positions: HashMap<String, Position>,
    pub realized_pnl_total: Decimal,
    pub day_start_balance: Decimal,
    pub day_start_date: NaiveDate,
}

/// A sized, risk-checked candidate trade awaiting ledger application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeProposal {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Append-only audit record for one applied trade. Never mutated; the
/// portfolio can be reconstructed by replaying these in trade_id order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub trade_id: u64,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub cash_balance_after: Decimal,
    pub realized_pnl_delta: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Audit record for a proposal the ledger refused. State is untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRejection {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Day-level roll-up for external reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub starting_balance: Decimal,
    pub ending_balance: Decimal,
    pub trades_count: u32,
    pub realized_pnl: Decimal,
}
