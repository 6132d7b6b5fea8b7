//! Momentum signal evaluation.
//!
//! The evaluator is a pure decision function: price history, the optional
//! open position, and the cycle clock go in, one `SignalEvaluation` comes
//! out. It holds no mutable state and never touches the clock itself, so
//! replaying the same inputs always reproduces the same signal.

use crate::config::SignalConfig;
use crate::portfolio::Position;
use crate::strategy::indicators;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, trace};

/// What the evaluator wants done with a symbol this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Enter,
    Exit,
    Hold,
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalAction::Enter => write!(f, "ENTER"),
            SignalAction::Exit => write!(f, "EXIT"),
            SignalAction::Hold => write!(f, "HOLD"),
        }
    }
}

/// Outcome of evaluating one symbol in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvaluation {
    pub symbol: String,
    pub action: SignalAction,
    /// Ranking strength; entries with higher scores are preferred when
    /// capacity is contested.
    pub score: Decimal,
    /// Price the decision was made against.
    pub basis_price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Evaluates price histories into entry and exit signals.
pub struct SignalEvaluator {
    config: SignalConfig,
}

impl SignalEvaluator {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }

    /// Evaluate one symbol. With an open position only exit rules are
    /// considered; without one only entry rules are.
    pub fn evaluate(
        &self,
        symbol: &str,
        prices: &[Decimal],
        position: Option<&Position>,
        now: DateTime<Utc>,
    ) -> SignalEvaluation {
        match position {
            Some(position) => self.evaluate_exit(symbol, prices, position, now),
            None => self.evaluate_entry(symbol, prices, now),
        }
    }

    fn evaluate_entry(
        &self,
        symbol: &str,
        prices: &[Decimal],
        now: DateTime<Utc>,
    ) -> SignalEvaluation {
        let basis_price = match prices.last() {
            Some(price) => *price,
            None => return self.hold(symbol, Decimal::ZERO, now),
        };

        if prices.len() < self.config.min_history_length {
            trace!(
                symbol,
                have = prices.len(),
                need = self.config.min_history_length,
                "Holding: insufficient history"
            );
            return self.hold(symbol, basis_price, now);
        }

        let (Some(change), Some(trend), Some(rsi), Some(volatility)) = (
            indicators::change_pct(prices, self.config.short_window),
            indicators::trend_strength_pct(
                prices,
                self.config.short_window,
                self.config.long_window,
            ),
            indicators::rsi(prices, self.config.rsi_period),
            indicators::volatility_pct(prices, self.config.volatility_window),
        ) else {
            trace!(symbol, "Holding: indicators not yet warm");
            return self.hold(symbol, basis_price, now);
        };

        // 1. The primary trigger: recent move must clear the entry threshold
        if change < self.config.entry_threshold_pct {
            trace!(symbol, %change, "Holding: move below entry threshold");
            return self.hold(symbol, basis_price, now);
        }

        // 2. Trend confirmation: short SMA leading the long SMA
        if trend < self.config.min_trend_strength_pct {
            trace!(symbol, %trend, "Holding: trend too weak");
            return self.hold(symbol, basis_price, now);
        }

        // 3. RSI band: skip oversold chop and overbought blow-offs
        if rsi < self.config.rsi_entry_floor || rsi > self.config.rsi_entry_ceiling {
            trace!(symbol, %rsi, "Holding: RSI outside entry band");
            return self.hold(symbol, basis_price, now);
        }

        // 4. Volatility band: dead markets don't move, wild ones gap
        if volatility < self.config.min_volatility_pct
            || volatility > self.config.max_volatility_pct
        {
            trace!(symbol, %volatility, "Holding: volatility outside band");
            return self.hold(symbol, basis_price, now);
        }

        let score =
            trend * dec!(10) + (self.config.max_volatility_pct - volatility) / dec!(10);

        debug!(
            symbol,
            %change,
            %trend,
            %rsi,
            %volatility,
            %score,
            "Entry signal"
        );

        SignalEvaluation {
            symbol: symbol.to_string(),
            action: SignalAction::Enter,
            score,
            basis_price,
            timestamp: now,
        }
    }

    fn evaluate_exit(
        &self,
        symbol: &str,
        prices: &[Decimal],
        position: &Position,
        now: DateTime<Utc>,
    ) -> SignalEvaluation {
        let basis_price = prices.last().copied().unwrap_or(position.entry_price);
        let return_pct = position.unrealized_return_pct(basis_price);

        let reason = if return_pct >= self.config.take_profit_pct {
            Some("take profit")
        } else if return_pct <= -self.config.stop_loss_pct {
            Some("stop loss")
        } else if position.held_for(now) >= self.config.max_holding_duration() {
            Some("max holding time")
        } else {
            None
        };

        match reason {
            Some(reason) => {
                debug!(
                    symbol,
                    %return_pct,
                    held_secs = position.held_for(now).num_seconds(),
                    reason,
                    "Exit signal"
                );
                SignalEvaluation {
                    symbol: symbol.to_string(),
                    action: SignalAction::Exit,
                    score: return_pct,
                    basis_price,
                    timestamp: now,
                }
            }
            None => self.hold(symbol, basis_price, now),
        }
    }

    fn hold(&self, symbol: &str, basis_price: Decimal, now: DateTime<Utc>) -> SignalEvaluation {
        SignalEvaluation {
            symbol: symbol.to_string(),
            action: SignalAction::Hold,
            score: Decimal::ZERO,
            basis_price,
            timestamp: now,
        }
    }
}
