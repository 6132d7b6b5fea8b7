//! Drives the trading engine over recorded snapshot batches.

use crate::config::Config;
use crate::engine::TradingEngine;
use crate::portfolio::{PortfolioLedger, TradeEvent, TradeRejection};
use crate::recorder::MemoryRecorder;
use crate::replay::data::SnapshotBatch;
use crate::replay::metrics::{EquityPoint, ReplayMetrics};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Everything a finished replay produced.
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    pub metrics: ReplayMetrics,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<TradeEvent>,
    pub rejections: Vec<TradeRejection>,
}

impl ReplayOutcome {
    /// Write the equity curve as CSV, one row per batch.
    pub fn write_equity_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut file = File::create(path)
            .with_context(|| format!("Failed to create report file: {}", path.display()))?;

        writeln!(
            file,
            "timestamp,cash_balance,position_value,total_equity,drawdown,position_count"
        )?;
        for point in &self.equity_curve {
            writeln!(
                file,
                "{},{},{},{},{},{}",
                point
                    .timestamp
                    .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                point.cash_balance,
                point.position_value,
                point.total_equity,
                point.drawdown,
                point.position_count,
            )?;
        }

        Ok(())
    }
}

/// Replays recorded batches through a fresh [`TradingEngine`].
///
/// The clock is the recorded timestamps; nothing reads the wall clock, so
/// one file and one config always produce the same trade sequence.
pub struct ReplayEngine {
    config: Config,
}

impl ReplayEngine {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn run(&self, batches: &[SnapshotBatch]) -> Result<ReplayOutcome> {
        anyhow::ensure!(!batches.is_empty(), "replay data contains no batches");

        let initial_balance = self.config.portfolio.starting_balance;
        let first_day = batches[0].timestamp.date_naive();

        let recorder = Arc::new(MemoryRecorder::new());
        let ledger = PortfolioLedger::new(initial_balance, first_day);
        let mut engine = TradingEngine::new(self.config.clone(), recorder.clone(), ledger);

        info!(
            batches = batches.len(),
            start = %batches[0].timestamp,
            end = %batches[batches.len() - 1].timestamp,
            %initial_balance,
            "Starting replay"
        );

        let mut equity_curve: Vec<EquityPoint> = Vec::with_capacity(batches.len());
        let mut peak_equity = initial_balance;
        let mut vetoed_signals = 0u64;

        for batch in batches {
            let report = engine.process_snapshots(&batch.snapshots, batch.timestamp)?;
            vetoed_signals += report.vetoes as u64;

            let ledger = engine.ledger();
            let equity = ledger.equity(engine.marks());
            if equity > peak_equity {
                peak_equity = equity;
            }
            equity_curve.push(EquityPoint::new(
                batch.timestamp,
                ledger.cash_balance(),
                equity - ledger.cash_balance(),
                ledger.open_position_count(),
                peak_equity,
            ));
        }

        let trades = recorder.trades();
        let rejections = recorder.rejections();
        let metrics = ReplayMetrics::calculate(
            &equity_curve,
            initial_balance,
            &trades,
            rejections.len() as u64,
            vetoed_signals,
        );

        info!(
            trades = trades.len(),
            rejections = rejections.len(),
            final_equity = %equity_curve.last().map(|p| p.total_equity).unwrap_or(initial_balance),
            "Replay complete"
        );

        Ok(ReplayOutcome {
            metrics,
            equity_curve,
            trades,
            rejections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::Side;
    use crate::replay::data::CsvSnapshotLoader;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.portfolio.starting_balance = dec!(100);
        config.portfolio.quantity_increment = dec!(0.0001);
        config.market.universe = vec!["BTC-USD".to_string()];

        config.signal.min_history_length = 5;
        config.signal.short_window = 2;
        config.signal.long_window = 4;
        config.signal.rsi_period = 3;
        config.signal.volatility_window = 3;
        config.signal.entry_threshold_pct = dec!(5);
        config.signal.min_trend_strength_pct = Decimal::ZERO;
        config.signal.rsi_entry_floor = Decimal::ZERO;
        config.signal.rsi_entry_ceiling = dec!(100);
        config.signal.min_volatility_pct = Decimal::ZERO;
        config.signal.max_volatility_pct = dec!(100);
        config.signal.take_profit_pct = dec!(1);
        config.signal.stop_loss_pct = dec!(1.5);

        config.risk.max_position_fraction = dec!(0.3);
        config.risk.min_trade_notional = dec!(5);
        config
    }

    /// One row per six-minute step, flat then pump then take-profit.
    fn round_trip_csv() -> String {
        let prices = ["100", "100", "100", "100", "100", "110", "115"];
        let mut csv = String::from("timestamp,symbol,price\n");
        for (i, price) in prices.iter().enumerate() {
            csv.push_str(&format!(
                "2024-03-20T12:{:02}:00Z,BTC-USD,{}\n",
                i * 6,
                price
            ));
        }
        csv
    }

    #[test]
    fn test_round_trip_replay() {
        let loader = CsvSnapshotLoader::from_csv_content(&round_trip_csv()).unwrap();
        let outcome = ReplayEngine::new(test_config())
            .run(loader.batches())
            .unwrap();

        assert_eq!(outcome.trades.len(), 2);
        assert_eq!(outcome.trades[0].side, Side::Buy);
        assert_eq!(outcome.trades[1].side, Side::Sell);
        assert_eq!(outcome.trades[1].realized_pnl_delta, dec!(1.3635));

        assert_eq!(outcome.equity_curve.len(), 7);
        assert_eq!(
            outcome.equity_curve.last().unwrap().total_equity,
            dec!(101.3635)
        );
        assert_eq!(outcome.metrics.entries, 1);
        assert_eq!(outcome.metrics.exits, 1);
        assert_eq!(outcome.metrics.total_return, dec!(1.3635));
        assert_eq!(outcome.metrics.win_rate, dec!(100));
        assert_eq!(outcome.metrics.max_drawdown, Decimal::ZERO);
    }

    #[test]
    fn test_replay_is_deterministic() {
        let loader = CsvSnapshotLoader::from_csv_content(&round_trip_csv()).unwrap();
        let replay = ReplayEngine::new(test_config());

        let first = replay.run(loader.batches()).unwrap();
        let second = replay.run(loader.batches()).unwrap();

        assert_eq!(first.trades, second.trades);
        assert_eq!(first.metrics.total_return, second.metrics.total_return);
        assert_eq!(
            first.equity_curve.last().unwrap().total_equity,
            second.equity_curve.last().unwrap().total_equity
        );
    }

    #[test]
    fn test_no_batches_is_an_error() {
        let err = ReplayEngine::new(test_config()).run(&[]).unwrap_err();
        assert!(err.to_string().contains("no batches"));
    }

    #[test]
    fn test_equity_csv_report() {
        let loader = CsvSnapshotLoader::from_csv_content(&round_trip_csv()).unwrap();
        let outcome = ReplayEngine::new(test_config())
            .run(loader.batches())
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("equity.csv");
        outcome.write_equity_csv(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 8); // header + 7 batches
        assert!(lines[0].starts_with("timestamp,cash_balance"));
        assert!(lines[7].contains("101.3635"));
    }
}
