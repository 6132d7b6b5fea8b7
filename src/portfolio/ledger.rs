//! The portfolio ledger: sole owner and mutator of account state.
//!
//! `apply` validates every precondition before touching state, so a failed
//! trade is a strict no-op. Exclusive ownership (the engine holds the ledger
//! by value and applies proposals sequentially) is what makes each mutation
//! indivisible; nothing else in the crate can reach the state.

use crate::portfolio::{
    DailySummary, Position, PortfolioState, PriceMap, Side, TradeEvent, TradeProposal,
};
use crate::utils::decimal::safe_div;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

/// Precondition violations `apply` can refuse with. The proposal is dropped,
/// state stays as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("insufficient funds: need {required}, have {available}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },

    #[error("position already open for {symbol}")]
    DuplicatePosition { symbol: String },

    #[error("no open position for {symbol} matching the proposal")]
    NoOpenPosition { symbol: String },
}

/// Authoritative state machine for virtual cash and open positions.
#[derive(Debug, Clone)]
pub struct PortfolioLedger {
    state: PortfolioState,
    initial_balance: Decimal,
    next_trade_id: u64,
    trades_today: u32,
    consecutive_losses: u32,
    /// Realized P&L total at the last rollover; the difference to the
    /// current total is today's realized P&L.
    day_start_realized_pnl: Decimal,
    /// Per-symbol timestamp of the last losing exit.
    cooldowns: HashMap<String, DateTime<Utc>>,
}

impl PortfolioLedger {
    /// Fresh ledger holding only cash.
    pub fn new(starting_balance: Decimal, today: NaiveDate) -> Self {
        Self {
            state: PortfolioState {
                cash_balance: starting_balance,
                positions: HashMap::new(),
                realized_pnl_total: Decimal::ZERO,
                day_start_balance: starting_balance,
                day_start_date: today,
            },
            initial_balance: starting_balance,
            next_trade_id: 1,
            trades_today: 0,
            consecutive_losses: 0,
            day_start_realized_pnl: Decimal::ZERO,
            cooldowns: HashMap::new(),
        }
    }

    /// Rebuild a ledger from persisted parts.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        state: PortfolioState,
        initial_balance: Decimal,
        next_trade_id: u64,
        trades_today: u32,
        consecutive_losses: u32,
        day_start_realized_pnl: Decimal,
        cooldowns: HashMap<String, DateTime<Utc>>,
    ) -> Self {
        Self {
            state,
            initial_balance,
            next_trade_id,
            trades_today,
            consecutive_losses,
            day_start_realized_pnl,
            cooldowns,
        }
    }

    // ==================== Mutation ====================

    /// Apply an accepted proposal. Validates first, mutates second; on any
    /// error the ledger is exactly as it was before the call.
    pub fn apply(&mut self, proposal: &TradeProposal) -> Result<TradeEvent, LedgerError> {
        match proposal.side {
            Side::Buy => self.apply_buy(proposal),
            Side::Sell => self.apply_sell(proposal),
        }
    }

    fn apply_buy(&mut self, proposal: &TradeProposal) -> Result<TradeEvent, LedgerError> {
        let cost = proposal.quantity * proposal.price;

        if cost > self.state.cash_balance {
            return Err(LedgerError::InsufficientFunds {
                required: cost,
                available: self.state.cash_balance,
            });
        }
        if self.state.positions.contains_key(&proposal.symbol) {
            return Err(LedgerError::DuplicatePosition {
                symbol: proposal.symbol.clone(),
            });
        }

        self.state.cash_balance -= cost;
        self.state.positions.insert(
            proposal.symbol.clone(),
            Position {
                symbol: proposal.symbol.clone(),
                quantity: proposal.quantity,
                entry_price: proposal.price,
                opened_at: proposal.timestamp,
            },
        );
        self.trades_today += 1;

        debug!(
            symbol = %proposal.symbol,
            quantity = %proposal.quantity,
            price = %proposal.price,
            cash = %self.state.cash_balance,
            "Opened position"
        );

        Ok(self.emit(proposal, Decimal::ZERO))
    }

    fn apply_sell(&mut self, proposal: &TradeProposal) -> Result<TradeEvent, LedgerError> {
        let position = self
            .state
            .positions
            .get(&proposal.symbol)
            .ok_or_else(|| LedgerError::NoOpenPosition {
                symbol: proposal.symbol.clone(),
            })?;

        // Partial exits are not a thing; a quantity mismatch means the
        // proposal does not describe the position we hold.
        if position.quantity != proposal.quantity {
            return Err(LedgerError::NoOpenPosition {
                symbol: proposal.symbol.clone(),
            });
        }

        let pnl = proposal.quantity * (proposal.price - position.entry_price);

        self.state.cash_balance += proposal.quantity * proposal.price;
        self.state.realized_pnl_total += pnl;
        self.state.positions.remove(&proposal.symbol);
        self.trades_today += 1;

        if pnl < Decimal::ZERO {
            self.consecutive_losses += 1;
            self.cooldowns
                .insert(proposal.symbol.clone(), proposal.timestamp);
        } else {
            self.consecutive_losses = 0;
            self.cooldowns.remove(&proposal.symbol);
        }

        debug!(
            symbol = %proposal.symbol,
            pnl = %pnl,
            cash = %self.state.cash_balance,
            streak = self.consecutive_losses,
            "Closed position"
        );

        Ok(self.emit(proposal, pnl))
    }

    fn emit(&mut self, proposal: &TradeProposal, realized_pnl_delta: Decimal) -> TradeEvent {
        let event = TradeEvent {
            trade_id: self.next_trade_id,
            symbol: proposal.symbol.clone(),
            side: proposal.side,
            quantity: proposal.quantity,
            price: proposal.price,
            cash_balance_after: self.state.cash_balance,
            realized_pnl_delta,
            timestamp: proposal.timestamp,
        };
        self.next_trade_id += 1;
        event
    }

    /// Advance the day-start anchors when the calendar date has moved on.
    /// Returns true when a rollover happened; calling again on the same date
    /// is a no-op. This is the only mutation path besides `apply`.
    pub fn rollover_if_new_day(&mut self, today: NaiveDate, marks: &PriceMap) -> bool {
        if today <= self.state.day_start_date {
            return false;
        }

        let equity = self.equity(marks);
        info!(
            date = %today,
            day_start_balance = %equity,
            "Daily rollover"
        );

        self.state.day_start_balance = equity;
        self.state.day_start_date = today;
        self.day_start_realized_pnl = self.state.realized_pnl_total;
        self.trades_today = 0;
        self.consecutive_losses = 0;
        true
    }

    // ==================== Read-only views ====================

    pub fn cash_balance(&self) -> Decimal {
        self.state.cash_balance
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.state.positions.get(symbol)
    }

    pub fn positions(&self) -> &HashMap<String, Position> {
        &self.state.positions
    }

    pub fn open_position_count(&self) -> usize {
        self.state.positions.len()
    }

    pub fn realized_pnl_total(&self) -> Decimal {
        self.state.realized_pnl_total
    }

    pub fn initial_balance(&self) -> Decimal {
        self.initial_balance
    }

    pub fn day_start_balance(&self) -> Decimal {
        self.state.day_start_balance
    }

    pub fn day_start_date(&self) -> NaiveDate {
        self.state.day_start_date
    }

    pub fn trades_today(&self) -> u32 {
        self.trades_today
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    pub fn next_trade_id(&self) -> u64 {
        self.next_trade_id
    }

    pub fn day_start_realized_pnl(&self) -> Decimal {
        self.day_start_realized_pnl
    }

    pub fn cooldowns(&self) -> &HashMap<String, DateTime<Utc>> {
        &self.cooldowns
    }

    pub fn state(&self) -> &PortfolioState {
        &self.state
    }

    /// True while `symbol` is still inside the cooldown window after a
    /// losing exit.
    pub fn in_cooldown(
        &self,
        symbol: &str,
        now: DateTime<Utc>,
        cooldown: chrono::Duration,
    ) -> bool {
        match self.cooldowns.get(symbol) {
            Some(lost_at) => now - *lost_at < cooldown,
            None => false,
        }
    }

    /// Mark-to-market P&L across open positions. Symbols without a mark are
    /// valued at entry (zero unrealized contribution).
    pub fn unrealized_pnl(&self, marks: &PriceMap) -> Decimal {
        self.state
            .positions
            .values()
            .map(|p| p.unrealized_pnl(self.mark_for(p, marks)))
            .sum()
    }

    /// Cash plus the mark-to-market value of open positions.
    pub fn equity(&self, marks: &PriceMap) -> Decimal {
        let positions_value: Decimal = self
            .state
            .positions
            .values()
            .map(|p| p.market_value(self.mark_for(p, marks)))
            .sum();
        self.state.cash_balance + positions_value
    }

    /// Signed equity change since the day-start anchor, as a fraction of the
    /// anchor. Losing days are negative.
    pub fn daily_return_fraction(&self, marks: &PriceMap) -> Decimal {
        safe_div(
            self.equity(marks) - self.state.day_start_balance,
            self.state.day_start_balance,
        )
    }

    pub fn daily_summary(&self, marks: &PriceMap) -> DailySummary {
        DailySummary {
            date: self.state.day_start_date,
            starting_balance: self.state.day_start_balance,
            ending_balance: self.equity(marks),
            trades_count: self.trades_today,
            realized_pnl: self.state.realized_pnl_total - self.day_start_realized_pnl,
        }
    }

    fn mark_for(&self, position: &Position, marks: &PriceMap) -> Decimal {
        marks
            .get(&position.symbol)
            .copied()
            .unwrap_or(position.entry_price)
    }
}
