//! The trading engine.
//!
//! One object owns the whole decision loop: scan the universe, update price
//! histories, evaluate signals, review them against risk, and apply the
//! survivors to the ledger. The ledger is owned exclusively by the engine
//! and every mutation happens on this single path, so each trade is atomic
//! by construction.
//!
//! `process_snapshots` is the deterministic core: it takes a snapshot batch
//! and an explicit clock and never reads the wall clock itself. The live
//! loop and the replay driver both feed it; same batches in, same trades
//! out.

use crate::config::Config;
use crate::market::{MarketDataSource, MarketSnapshot};
use crate::portfolio::{PortfolioLedger, PriceMap, TradeEvent, TradeRejection};
use crate::recorder::TradeRecorder;
use crate::risk::RiskManager;
use crate::strategy::{MarketScanner, ScanReport, SignalAction, SignalEvaluation, SignalEvaluator};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// What one cycle did, for logging and for the outer loop's bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub scan: ScanReport,
    pub evaluations: usize,
    pub entry_signals: usize,
    pub exit_signals: usize,
    /// Signals refused by a risk gate.
    pub vetoes: usize,
    /// Trades the ledger applied this cycle, in application order.
    pub events: Vec<TradeEvent>,
    /// Proposals the ledger refused this cycle.
    pub rejections: Vec<TradeRejection>,
    pub rolled_over: bool,
}

impl CycleReport {
    pub fn trades_applied(&self) -> usize {
        self.events.len()
    }
}

/// Owns the ledger and runs the scan-evaluate-review-apply loop.
///
/// The data source is not owned; the live loop and the backfill pass one
/// in, and the replay driver feeds batches straight to
/// [`process_snapshots`](Self::process_snapshots) without one.
pub struct TradingEngine {
    config: Config,
    scanner: MarketScanner,
    evaluator: SignalEvaluator,
    risk: RiskManager,
    ledger: PortfolioLedger,
    recorder: Arc<dyn TradeRecorder>,
    /// Rolling close-price history per symbol, oldest first.
    histories: HashMap<String, Vec<Decimal>>,
    /// Last admitted price per symbol; the mark set for equity.
    marks: PriceMap,
}

impl TradingEngine {
    /// Wire an engine around an existing ledger (fresh or restored).
    pub fn new(config: Config, recorder: Arc<dyn TradeRecorder>, ledger: PortfolioLedger) -> Self {
        let scanner = MarketScanner::new(config.market.clone());
        let evaluator = SignalEvaluator::new(config.signal.clone());
        let risk = RiskManager::new(config.risk.clone(), config.portfolio.quantity_increment);

        Self {
            config,
            scanner,
            evaluator,
            risk,
            ledger,
            recorder,
            histories: HashMap::new(),
            marks: PriceMap::new(),
        }
    }

    pub fn ledger(&self) -> &PortfolioLedger {
        &self.ledger
    }

    pub fn marks(&self) -> &PriceMap {
        &self.marks
    }

    /// Seed price histories from recent candles so the evaluator does not
    /// start cold. A symbol that fails to backfill just warms up live.
    pub async fn backfill_history(&mut self, source: &dyn MarketDataSource) -> Result<()> {
        if !self.config.market.backfill_on_start {
            return Ok(());
        }

        let granularity = self.config.market.candle_granularity_secs as u32;
        let limit = self.config.market.history_limit;

        for symbol in self.config.market.universe.clone() {
            match source.get_candles(&symbol, granularity, limit).await {
                Ok(candles) => {
                    let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();
                    debug!(symbol, candles = closes.len(), "Backfilled history");
                    self.histories.insert(symbol, closes);
                }
                Err(e) => {
                    warn!(symbol, error = %e, "Backfill failed, starting cold");
                }
            }
        }

        info!(
            symbols = self.histories.len(),
            "History backfill complete"
        );
        Ok(())
    }

    /// Run one live cycle: scan the universe, then process the batch.
    #[instrument(skip(self, source))]
    pub async fn run_cycle(
        &mut self,
        source: &dyn MarketDataSource,
        now: DateTime<Utc>,
    ) -> Result<CycleReport> {
        let (snapshots, scan) = self.scanner.scan(source, now).await?;
        let mut report = self.process_snapshots(&snapshots, now)?;
        report.scan = scan;

        info!(
            fetched = scan.fetched,
            entries = report.entry_signals,
            exits = report.exit_signals,
            applied = report.trades_applied(),
            vetoes = report.vetoes,
            cash = %self.ledger.cash_balance(),
            positions = self.ledger.open_position_count(),
            "Cycle complete"
        );
        Ok(report)
    }

    /// The deterministic core: fold one snapshot batch into the ledger.
    ///
    /// Exits are processed before entries so capacity freed by a close is
    /// available in the same cycle. Entries are ranked by score, with the
    /// symbol name as the tie-break, so contested capacity resolves the
    /// same way on every run.
    pub fn process_snapshots(
        &mut self,
        snapshots: &[MarketSnapshot],
        now: DateTime<Utc>,
    ) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        // Fold the batch into histories and marks before deciding anything,
        // so the rollover anchor and the evaluations see the same prices.
        for snapshot in snapshots {
            let history = self.histories.entry(snapshot.symbol.clone()).or_default();
            history.push(snapshot.price);
            let limit = self.config.market.history_limit;
            if history.len() > limit {
                let excess = history.len() - limit;
                history.drain(..excess);
            }
            self.marks.insert(snapshot.symbol.clone(), snapshot.price);
        }

        report.rolled_over = self
            .ledger
            .rollover_if_new_day(now.date_naive(), &self.marks);

        let mut exits: Vec<SignalEvaluation> = Vec::new();
        let mut entries: Vec<SignalEvaluation> = Vec::new();

        for snapshot in snapshots {
            let Some(history) = self.histories.get(&snapshot.symbol) else {
                continue;
            };
            let evaluation = self.evaluator.evaluate(
                &snapshot.symbol,
                history,
                self.ledger.position(&snapshot.symbol),
                now,
            );
            report.evaluations += 1;
            match evaluation.action {
                SignalAction::Exit => exits.push(evaluation),
                SignalAction::Enter => entries.push(evaluation),
                SignalAction::Hold => {}
            }
        }

        report.exit_signals = exits.len();
        report.entry_signals = entries.len();

        entries.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.symbol.cmp(&b.symbol)));

        for evaluation in exits.iter().chain(entries.iter()) {
            self.decide_and_apply(evaluation, now, &mut report)?;
        }

        Ok(report)
    }

    fn decide_and_apply(
        &mut self,
        evaluation: &SignalEvaluation,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Result<()> {
        let proposal = match self.risk.review(evaluation, &self.ledger, &self.marks, now) {
            Ok(proposal) => proposal,
            Err(veto) => {
                debug!(
                    symbol = %evaluation.symbol,
                    action = %evaluation.action,
                    %veto,
                    "Signal vetoed"
                );
                report.vetoes += 1;
                return Ok(());
            }
        };

        match self.ledger.apply(&proposal) {
            Ok(event) => {
                info!(
                    trade_id = event.trade_id,
                    symbol = %event.symbol,
                    side = %event.side,
                    quantity = %event.quantity,
                    price = %event.price,
                    cash = %event.cash_balance_after,
                    realized_pnl = %event.realized_pnl_delta,
                    "Trade applied"
                );
                self.recorder.record_trade(&event)?;
                report.events.push(event);
            }
            Err(err) => {
                warn!(symbol = %proposal.symbol, side = %proposal.side, %err, "Proposal rejected");
                let rejection = TradeRejection {
                    symbol: proposal.symbol.clone(),
                    side: proposal.side,
                    quantity: proposal.quantity,
                    price: proposal.price,
                    reason: err.to_string(),
                    timestamp: proposal.timestamp,
                };
                self.recorder.record_rejection(&rejection)?;
                report.rejections.push(rejection);
            }
        }

        Ok(())
    }
}
