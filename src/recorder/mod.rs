//! The trade journal: an append-only record of everything the ledger did
//! and everything it refused to do.
//!
//! Recorders never influence decisions; they observe. The engine writes one
//! line per applied trade and one per rejection, so an auditor can replay
//! the session from the journal alone.

use crate::portfolio::{TradeEvent, TradeRejection};
use anyhow::{anyhow, Context, Result};
use chrono::SecondsFormat;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

#[cfg(test)]
use mockall::automock;

/// Sink for the trade journal.
#[cfg_attr(test, automock)]
pub trait TradeRecorder: Send + Sync {
    fn record_trade(&self, event: &TradeEvent) -> Result<()>;
    fn record_rejection(&self, rejection: &TradeRejection) -> Result<()>;
}

// ==================== In-memory recorder ====================

/// Keeps the journal in memory. Used by replays and tests, where the
/// interesting output is the collected events themselves.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    trades: Mutex<Vec<TradeEvent>>,
    rejections: Mutex<Vec<TradeRejection>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trades(&self) -> Vec<TradeEvent> {
        self.trades.lock().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn rejections(&self) -> Vec<TradeRejection> {
        self.rejections.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl TradeRecorder for MemoryRecorder {
    fn record_trade(&self, event: &TradeEvent) -> Result<()> {
        self.trades
            .lock()
            .map_err(|_| anyhow!("trade buffer mutex poisoned"))?
            .push(event.clone());
        Ok(())
    }

    fn record_rejection(&self, rejection: &TradeRejection) -> Result<()> {
        self.rejections
            .lock()
            .map_err(|_| anyhow!("rejection buffer mutex poisoned"))?
            .push(rejection.clone());
        Ok(())
    }
}

// ==================== CSV recorder ====================

const TRADES_HEADER: &str =
    "trade_id,timestamp,symbol,side,quantity,price,cash_balance_after,realized_pnl_delta";
const REJECTIONS_HEADER: &str = "timestamp,symbol,side,quantity,price,reason";

/// Appends the journal to two CSV files, one for applied trades and one for
/// rejections. Headers are written only when a file starts out empty, so
/// restarting the process keeps appending to the same journal.
pub struct CsvRecorder {
    trades: Mutex<File>,
    rejections: Mutex<File>,
}

impl CsvRecorder {
    pub fn new<P: AsRef<Path>>(trades_path: P, rejections_path: P) -> Result<Self> {
        let trades = open_journal(trades_path.as_ref(), TRADES_HEADER)?;
        let rejections = open_journal(rejections_path.as_ref(), REJECTIONS_HEADER)?;

        info!(
            trades = %trades_path.as_ref().display(),
            rejections = %rejections_path.as_ref().display(),
            "Trade journal opened"
        );

        Ok(Self {
            trades: Mutex::new(trades),
            rejections: Mutex::new(rejections),
        })
    }
}

impl TradeRecorder for CsvRecorder {
    fn record_trade(&self, event: &TradeEvent) -> Result<()> {
        let mut file = self
            .trades
            .lock()
            .map_err(|_| anyhow!("trade journal mutex poisoned"))?;
        writeln!(
            file,
            "{},{},{},{},{},{},{},{}",
            event.trade_id,
            event.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            event.symbol,
            event.side,
            event.quantity,
            event.price,
            event.cash_balance_after,
            event.realized_pnl_delta,
        )
        .context("Failed to append trade event")?;
        Ok(())
    }

    fn record_rejection(&self, rejection: &TradeRejection) -> Result<()> {
        let mut file = self
            .rejections
            .lock()
            .map_err(|_| anyhow!("rejection journal mutex poisoned"))?;
        writeln!(
            file,
            "{},{},{},{},{},{}",
            rejection.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            rejection.symbol,
            rejection.side,
            rejection.quantity,
            rejection.price,
            quote_field(&rejection.reason),
        )
        .context("Failed to append trade rejection")?;
        Ok(())
    }
}

fn open_journal(path: &Path, header: &str) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create journal dir: {}", parent.display()))?;
        }
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open journal: {}", path.display()))?;

    if file.metadata()?.len() == 0 {
        writeln!(file, "{header}")?;
    }

    Ok(file)
}

/// Rejection reasons are free text and may contain commas, so the field is
/// always quoted.
fn quote_field(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}
