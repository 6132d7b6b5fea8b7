//! SQLite persistence for ledger state.
//!
//! Persists everything needed to resume a paper-trading session:
//! - Cash, open positions, and realized P&L
//! - Trade id sequence and daily counters
//! - Per-symbol cooldown timestamps
//! - Full trade and rejection history
//!
//! Decimals are stored as TEXT so no precision is lost on the way through
//! SQLite and back.

use crate::portfolio::{
    PortfolioLedger, PortfolioState, Position, Side, TradeEvent, TradeRejection,
};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// SQLite-backed state store.
pub struct PersistenceManager {
    conn: Connection,
}

impl PersistenceManager {
    /// Open (and if needed initialize) the database at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database dir: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        let manager = Self { conn };
        manager.init_schema()?;

        info!("Persistence initialized at {:?}", db_path.as_ref());
        Ok(manager)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            -- Ledger state (singleton row)
            CREATE TABLE IF NOT EXISTS ledger_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                cash_balance TEXT NOT NULL,
                realized_pnl_total TEXT NOT NULL,
                day_start_balance TEXT NOT NULL,
                day_start_date TEXT NOT NULL,
                initial_balance TEXT NOT NULL,
                next_trade_id INTEGER NOT NULL,
                trades_today INTEGER NOT NULL,
                consecutive_losses INTEGER NOT NULL,
                day_start_realized_pnl TEXT NOT NULL,
                last_saved TEXT NOT NULL
            );

            -- Open positions
            CREATE TABLE IF NOT EXISTS positions (
                symbol TEXT PRIMARY KEY,
                quantity TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                opened_at TEXT NOT NULL
            );

            -- Cooldowns from losing exits
            CREATE TABLE IF NOT EXISTS cooldowns (
                symbol TEXT PRIMARY KEY,
                lost_at TEXT NOT NULL
            );

            -- Applied trades
            CREATE TABLE IF NOT EXISTS trade_events (
                trade_id INTEGER PRIMARY KEY,
                timestamp TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity TEXT NOT NULL,
                price TEXT NOT NULL,
                cash_balance_after TEXT NOT NULL,
                realized_pnl_delta TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_timestamp ON trade_events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_symbol ON trade_events(symbol);

            -- Refused proposals
            CREATE TABLE IF NOT EXISTS trade_rejections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity TEXT NOT NULL,
                price TEXT NOT NULL,
                reason TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_rejections_timestamp ON trade_rejections(timestamp);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Save the full ledger in one transaction.
    pub fn save_ledger(&self, ledger: &PortfolioLedger, now: DateTime<Utc>) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        let state = ledger.state();

        tx.execute(
            r#"
            INSERT INTO ledger_state (id, cash_balance, realized_pnl_total, day_start_balance,
                                      day_start_date, initial_balance, next_trade_id,
                                      trades_today, consecutive_losses, day_start_realized_pnl,
                                      last_saved)
            VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                cash_balance = ?1,
                realized_pnl_total = ?2,
                day_start_balance = ?3,
                day_start_date = ?4,
                initial_balance = ?5,
                next_trade_id = ?6,
                trades_today = ?7,
                consecutive_losses = ?8,
                day_start_realized_pnl = ?9,
                last_saved = ?10
            "#,
            params![
                state.cash_balance.to_string(),
                state.realized_pnl_total.to_string(),
                state.day_start_balance.to_string(),
                state.day_start_date.to_string(),
                ledger.initial_balance().to_string(),
                ledger.next_trade_id(),
                ledger.trades_today(),
                ledger.consecutive_losses(),
                ledger.day_start_realized_pnl().to_string(),
                now.to_rfc3339(),
            ],
        )?;

        tx.execute("DELETE FROM positions", [])?;
        for position in state.positions.values() {
            tx.execute(
                "INSERT INTO positions (symbol, quantity, entry_price, opened_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    position.symbol,
                    position.quantity.to_string(),
                    position.entry_price.to_string(),
                    position.opened_at.to_rfc3339(),
                ],
            )?;
        }

        tx.execute("DELETE FROM cooldowns", [])?;
        for (symbol, lost_at) in ledger.cooldowns() {
            tx.execute(
                "INSERT INTO cooldowns (symbol, lost_at) VALUES (?1, ?2)",
                params![symbol, lost_at.to_rfc3339()],
            )?;
        }

        tx.commit()?;

        debug!(
            cash = %state.cash_balance,
            positions = state.positions.len(),
            next_trade_id = ledger.next_trade_id(),
            "Ledger saved"
        );
        Ok(())
    }

    /// Load the persisted ledger, or `None` when the database is fresh.
    pub fn load_ledger(&self) -> Result<Option<PortfolioLedger>> {
        type StateRow = (
            String,
            String,
            String,
            String,
            String,
            u64,
            u32,
            u32,
            String,
        );

        let state_row: Option<StateRow> = self
            .conn
            .query_row(
                r#"
                SELECT cash_balance, realized_pnl_total, day_start_balance, day_start_date,
                       initial_balance, next_trade_id, trades_today, consecutive_losses,
                       day_start_realized_pnl
                FROM ledger_state WHERE id = 1
                "#,
                [],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            cash_balance,
            realized_pnl_total,
            day_start_balance,
            day_start_date,
            initial_balance,
            next_trade_id,
            trades_today,
            consecutive_losses,
            day_start_realized_pnl,
        )) = state_row
        else {
            return Ok(None);
        };

        let mut stmt = self
            .conn
            .prepare("SELECT symbol, quantity, entry_price, opened_at FROM positions")?;
        let positions: HashMap<String, Position> = stmt
            .query_map([], |row| {
                let symbol: String = row.get(0)?;
                Ok((
                    symbol.clone(),
                    Position {
                        symbol,
                        quantity: parse_decimal(&row.get::<_, String>(1)?),
                        entry_price: parse_decimal(&row.get::<_, String>(2)?),
                        opened_at: parse_timestamp(&row.get::<_, String>(3)?),
                    },
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();

        let mut stmt = self
            .conn
            .prepare("SELECT symbol, lost_at FROM cooldowns")?;
        let cooldowns: HashMap<String, DateTime<Utc>> = stmt
            .query_map([], |row| {
                let symbol: String = row.get(0)?;
                let lost_at: String = row.get(1)?;
                Ok((symbol, parse_timestamp(&lost_at)))
            })?
            .filter_map(|r| r.ok())
            .collect();

        let state = PortfolioState {
            cash_balance: parse_decimal(&cash_balance),
            positions,
            realized_pnl_total: parse_decimal(&realized_pnl_total),
            day_start_balance: parse_decimal(&day_start_balance),
            day_start_date: parse_date(&day_start_date),
        };

        let ledger = PortfolioLedger::from_parts(
            state,
            parse_decimal(&initial_balance),
            next_trade_id,
            trades_today,
            consecutive_losses,
            parse_decimal(&day_start_realized_pnl),
            cooldowns,
        );

        info!(
            cash = %ledger.cash_balance(),
            positions = ledger.open_position_count(),
            next_trade_id = ledger.next_trade_id(),
            "Loaded ledger from database"
        );

        Ok(Some(ledger))
    }

    /// Append an applied trade. Replaces an existing row with the same id so
    /// a crash between journaling and the state save cannot wedge a restart.
    pub fn record_event(&self, event: &TradeEvent) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO trade_events
                (trade_id, timestamp, symbol, side, quantity, price,
                 cash_balance_after, realized_pnl_delta)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                event.trade_id,
                event.timestamp.to_rfc3339(),
                event.symbol,
                event.side.to_string(),
                event.quantity.to_string(),
                event.price.to_string(),
                event.cash_balance_after.to_string(),
                event.realized_pnl_delta.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Append a refused proposal.
    pub fn record_rejection(&self, rejection: &TradeRejection) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO trade_rejections (timestamp, symbol, side, quantity, price, reason)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                rejection.timestamp.to_rfc3339(),
                rejection.symbol,
                rejection.side.to_string(),
                rejection.quantity.to_string(),
                rejection.price.to_string(),
                rejection.reason,
            ],
        )?;
        Ok(())
    }

    /// Most recent applied trades, newest first.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<TradeEvent>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT trade_id, timestamp, symbol, side, quantity, price,
                   cash_balance_after, realized_pnl_delta
            FROM trade_events
            ORDER BY trade_id DESC
            LIMIT ?1
            "#,
        )?;

        let events: Vec<TradeEvent> = stmt
            .query_map([limit], |row| {
                Ok(TradeEvent {
                    trade_id: row.get(0)?,
                    timestamp: parse_timestamp(&row.get::<_, String>(1)?),
                    symbol: row.get(2)?,
                    side: Side::from_str(&row.get::<_, String>(3)?).unwrap_or(Side::Buy),
                    quantity: parse_decimal(&row.get::<_, String>(4)?),
                    price: parse_decimal(&row.get::<_, String>(5)?),
                    cash_balance_after: parse_decimal(&row.get::<_, String>(6)?),
                    realized_pnl_delta: parse_decimal(&row.get::<_, String>(7)?),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(events)
    }

    pub fn event_count(&self) -> Result<u64> {
        let count: u64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM trade_events", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn rejection_count(&self) -> Result<u64> {
        let count: u64 = self.conn.query_row(
            "SELECT COUNT(*) FROM trade_rejections",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn has_state(&self) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM ledger_state WHERE id = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Wipe everything. Used by the `--fresh` start flag.
    pub fn clear_all(&self) -> Result<()> {
        warn!("Clearing all persisted state");
        self.conn.execute_batch(
            r#"
            DELETE FROM ledger_state;
            DELETE FROM positions;
            DELETE FROM cooldowns;
            DELETE FROM trade_events;
            DELETE FROM trade_rejections;
            "#,
        )?;
        Ok(())
    }
}

// Row mappers stay lenient: a malformed cell degrades to a default rather
// than poisoning the whole load.
fn parse_decimal(text: &str) -> Decimal {
    Decimal::from_str(text).unwrap_or_default()
}

fn parse_timestamp(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_date(text: &str) -> NaiveDate {
    text.parse().unwrap_or_else(|_| Utc::now().date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::TradeProposal;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 20, 12, 0, 0).unwrap()
    }

    fn populated_ledger() -> PortfolioLedger {
        let mut ledger =
            PortfolioLedger::new(dec!(100), NaiveDate::from_ymd_opt(2024, 3, 20).unwrap());
        for (symbol, side, quantity, price) in [
            ("BTC-USD", Side::Buy, dec!(0.5), dec!(60)),
            ("ETH-USD", Side::Buy, dec!(1), dec!(30)),
            ("ETH-USD", Side::Sell, dec!(1), dec!(25)),
        ] {
            ledger
                .apply(&TradeProposal {
                    symbol: symbol.to_string(),
                    side,
                    quantity,
                    price,
                    timestamp: ts(),
                })
                .unwrap();
        }
        ledger
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let manager = PersistenceManager::new(":memory:").unwrap();
        let ledger = populated_ledger();

        manager.save_ledger(&ledger, ts()).unwrap();
        let loaded = manager.load_ledger().unwrap().unwrap();

        assert_eq!(loaded.state(), ledger.state());
        assert_eq!(loaded.initial_balance(), dec!(100));
        assert_eq!(loaded.next_trade_id(), 4);
        assert_eq!(loaded.trades_today(), 3);
        assert_eq!(loaded.consecutive_losses(), 1);
        assert_eq!(loaded.cooldowns().len(), 1);
        assert!(loaded.cooldowns().contains_key("ETH-USD"));

        let position = loaded.position("BTC-USD").unwrap();
        assert_eq!(position.quantity, dec!(0.5));
        assert_eq!(position.entry_price, dec!(60));
        assert_eq!(position.opened_at, ts());
    }

    #[test]
    fn test_load_from_empty_database() {
        let manager = PersistenceManager::new(":memory:").unwrap();
        assert!(manager.load_ledger().unwrap().is_none());
        assert!(!manager.has_state().unwrap());
    }

    #[test]
    fn test_save_overwrites_singleton() {
        let manager = PersistenceManager::new(":memory:").unwrap();
        let mut ledger = populated_ledger();

        manager.save_ledger(&ledger, ts()).unwrap();

        // Close the remaining position and save again.
        ledger
            .apply(&TradeProposal {
                symbol: "BTC-USD".to_string(),
                side: Side::Sell,
                quantity: dec!(0.5),
                price: dec!(66),
                timestamp: ts(),
            })
            .unwrap();
        manager.save_ledger(&ledger, ts()).unwrap();

        let loaded = manager.load_ledger().unwrap().unwrap();
        assert_eq!(loaded.open_position_count(), 0);
        assert_eq!(loaded.next_trade_id(), 5);
    }

    #[test]
    fn test_event_history_ordering_and_counts() {
        let manager = PersistenceManager::new(":memory:").unwrap();
        let mut ledger =
            PortfolioLedger::new(dec!(100), NaiveDate::from_ymd_opt(2024, 3, 20).unwrap());

        for symbol in ["AAA-USD", "BBB-USD"] {
            let event = ledger
                .apply(&TradeProposal {
                    symbol: symbol.to_string(),
                    side: Side::Buy,
                    quantity: dec!(0.1),
                    price: dec!(10),
                    timestamp: ts(),
                })
                .unwrap();
            manager.record_event(&event).unwrap();
        }

        let recent = manager.recent_events(10).unwrap();
        assert_eq!(recent.len(), 2);
        // Newest first.
        assert_eq!(recent[0].trade_id, 2);
        assert_eq!(recent[0].symbol, "BBB-USD");
        assert_eq!(recent[1].trade_id, 1);
        assert_eq!(manager.event_count().unwrap(), 2);
    }

    #[test]
    fn test_duplicate_trade_id_replaces_row() {
        let manager = PersistenceManager::new(":memory:").unwrap();
        let event = TradeEvent {
            trade_id: 1,
            symbol: "BTC-USD".to_string(),
            side: Side::Buy,
            quantity: dec!(0.5),
            price: dec!(60),
            cash_balance_after: dec!(70),
            realized_pnl_delta: Decimal::ZERO,
            timestamp: ts(),
        };

        manager.record_event(&event).unwrap();
        manager.record_event(&event).unwrap();

        assert_eq!(manager.event_count().unwrap(), 1);
    }

    #[test]
    fn test_rejections_recorded() {
        let manager = PersistenceManager::new(":memory:").unwrap();
        manager
            .record_rejection(&TradeRejection {
                symbol: "BTC-USD".to_string(),
                side: Side::Buy,
                quantity: dec!(2),
                price: dec!(60),
                reason: "insufficient funds: need 120, have 100".to_string(),
                timestamp: ts(),
            })
            .unwrap();

        assert_eq!(manager.rejection_count().unwrap(), 1);
    }

    #[test]
    fn test_clear_all_resets_database() {
        let manager = PersistenceManager::new(":memory:").unwrap();
        manager.save_ledger(&populated_ledger(), ts()).unwrap();
        manager.clear_all().unwrap();

        assert!(manager.load_ledger().unwrap().is_none());
        assert_eq!(manager.event_count().unwrap(), 0);
    }
}
