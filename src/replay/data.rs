//! Historical snapshot loading for replay runs.

use crate::market::MarketSnapshot;
use crate::portfolio::PriceMap;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// All snapshots sharing one timestamp; one replay step.
#[derive(Debug, Clone)]
pub struct SnapshotBatch {
    pub timestamp: DateTime<Utc>,
    pub snapshots: Vec<MarketSnapshot>,
}

impl SnapshotBatch {
    pub fn get(&self, symbol: &str) -> Option<&MarketSnapshot> {
        self.snapshots.iter().find(|s| s.symbol == symbol)
    }

    pub fn prices(&self) -> PriceMap {
        self.snapshots
            .iter()
            .map(|s| (s.symbol.clone(), s.price))
            .collect()
    }
}

/// Loads recorded snapshots from CSV, grouped per timestamp.
///
/// Expected format (volume is optional):
/// ```csv
/// timestamp,symbol,price,volume
/// 2024-01-01T00:00:00Z,BTC-USD,42000.50,1250000
/// ```
#[derive(Debug, Clone)]
pub struct CsvSnapshotLoader {
    batches: Vec<SnapshotBatch>,
    symbols: Vec<String>,
}

impl CsvSnapshotLoader {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot CSV: {}", path.display()))?;

        Self::from_csv_content(&content)
    }

    pub fn from_csv_content(content: &str) -> Result<Self> {
        let mut rows: Vec<CsvRow> = Vec::new();

        for (line_num, line) in content.lines().enumerate() {
            // Skip header
            if line_num == 0 && line.starts_with("timestamp") {
                continue;
            }

            if line.trim().is_empty() {
                continue;
            }

            let row = CsvRow::parse(line)
                .with_context(|| format!("Failed to parse line {}: {}", line_num + 1, line))?;
            rows.push(row);
        }

        if rows.is_empty() {
            anyhow::bail!("Snapshot CSV contains no data rows");
        }

        // Group by timestamp; rows of one timestamp keep file order.
        let mut by_timestamp: HashMap<DateTime<Utc>, Vec<MarketSnapshot>> = HashMap::new();
        let mut all_symbols: HashSet<String> = HashSet::new();

        for row in rows {
            all_symbols.insert(row.symbol.clone());
            by_timestamp
                .entry(row.timestamp)
                .or_default()
                .push(MarketSnapshot {
                    symbol: row.symbol,
                    price: row.price,
                    volume: row.volume,
                    timestamp: row.timestamp,
                });
        }

        let mut batches: Vec<SnapshotBatch> = by_timestamp
            .into_iter()
            .map(|(timestamp, snapshots)| SnapshotBatch {
                timestamp,
                snapshots,
            })
            .collect();

        batches.sort_by_key(|b| b.timestamp);

        let mut symbols: Vec<String> = all_symbols.into_iter().collect();
        symbols.sort();

        Ok(Self { batches, symbols })
    }

    pub fn batches(&self) -> &[SnapshotBatch] {
        &self.batches
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// First and last batch timestamps.
    pub fn range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match (self.batches.first(), self.batches.last()) {
            (Some(first), Some(last)) => Some((first.timestamp, last.timestamp)),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

/// Internal struct for parsing CSV rows.
#[derive(Debug)]
struct CsvRow {
    timestamp: DateTime<Utc>,
    symbol: String,
    price: Decimal,
    volume: Option<Decimal>,
}

impl CsvRow {
    fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() < 3 {
            anyhow::bail!(
                "Expected at least 3 columns (timestamp,symbol,price[,volume]), got {}",
                parts.len()
            );
        }

        let timestamp = parts[0]
            .trim()
            .parse()
            .with_context(|| format!("Invalid timestamp: {}", parts[0]))?;
        let symbol = parts[1].trim().to_string();
        let price: Decimal = parts[2]
            .trim()
            .parse()
            .with_context(|| format!("Invalid price: {}", parts[2]))?;
        if price <= Decimal::ZERO {
            anyhow::bail!("Price must be positive, got {price}");
        }

        let volume = match parts.get(3).map(|v| v.trim()) {
            None | Some("") => None,
            Some(v) => Some(
                v.parse()
                    .with_context(|| format!("Invalid volume: {v}"))?,
            ),
        };

        Ok(Self {
            timestamp,
            symbol,
            price,
            volume,
        })
    }
}
