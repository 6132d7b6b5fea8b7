//! Pre-trade risk review.
//!
//! Every actionable signal passes through here before it may touch the
//! ledger. Entries run the full gate sequence in a fixed order, so when
//! several rules would refuse a trade the reported veto is always the
//! earliest gate. Exits are never blocked: risk limits stop new exposure,
//! they must not trap existing exposure.

use crate::config::RiskConfig;
use crate::portfolio::{PortfolioLedger, PriceMap, Side, TradeProposal};
use crate::strategy::{SignalAction, SignalEvaluation};
use crate::utils::decimal::{floor_to_increment, safe_div};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::fmt;
use tracing::{debug, trace};

/// Why an entry was refused. A veto is advisory, not an error: the engine
/// counts it and moves on to the next signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Veto {
    MaxPositionsReached {
        open: usize,
        limit: u32,
    },
    PositionTooSmall {
        notional: Decimal,
        minimum: Decimal,
    },
    DailyLossLimitReached {
        loss_fraction: Decimal,
        limit: Decimal,
    },
    CoolingDown {
        symbol: String,
    },
    LosingStreakLockout {
        losses: u32,
        limit: u32,
    },
    NothingToExit {
        symbol: String,
    },
    NotActionable,
}

impl fmt::Display for Veto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Veto::MaxPositionsReached { open, limit } => {
                write!(f, "max concurrent positions reached ({open}/{limit})")
            }
            Veto::PositionTooSmall { notional, minimum } => {
                write!(f, "position too small (notional {notional} < minimum {minimum})")
            }
            Veto::DailyLossLimitReached { loss_fraction, limit } => write!(
                f,
                "daily loss limit reached ({:.2}% >= {:.2}%)",
                loss_fraction * dec!(100),
                limit * dec!(100)
            ),
            Veto::CoolingDown { symbol } => write!(f, "cooldown active for {symbol}"),
            Veto::LosingStreakLockout { losses, limit } => {
                write!(f, "losing streak lockout ({losses}/{limit} consecutive losses)")
            }
            Veto::NothingToExit { symbol } => write!(f, "no open position to exit for {symbol}"),
            Veto::NotActionable => write!(f, "signal not actionable"),
        }
    }
}

/// Turns actionable evaluations into sized trade proposals, or refuses them.
///
/// The manager is stateless; everything it needs to decide lives in the
/// ledger and the current marks, so the same inputs always produce the same
/// decision. A `max_losing_streak` of zero disables the streak gate.
pub struct RiskManager {
    config: RiskConfig,
    quantity_increment: Decimal,
}

impl RiskManager {
    pub fn new(config: RiskConfig, quantity_increment: Decimal) -> Self {
        Self {
            config,
            quantity_increment,
        }
    }

    /// Review one evaluation against the current portfolio.
    pub fn review(
        &self,
        evaluation: &SignalEvaluation,
        ledger: &PortfolioLedger,
        marks: &PriceMap,
        now: DateTime<Utc>,
    ) -> Result<TradeProposal, Veto> {
        match evaluation.action {
            SignalAction::Enter => self.review_entry(evaluation, ledger, marks, now),
            SignalAction::Exit => self.review_exit(evaluation, ledger),
            SignalAction::Hold => Err(Veto::NotActionable),
        }
    }

    fn review_entry(
        &self,
        evaluation: &SignalEvaluation,
        ledger: &PortfolioLedger,
        marks: &PriceMap,
        now: DateTime<Utc>,
    ) -> Result<TradeProposal, Veto> {
        // 1. Concurrent position cap
        let open = ledger.open_position_count();
        if open >= self.config.max_concurrent_positions as usize {
            trace!(symbol = %evaluation.symbol, open, "Veto: at position capacity");
            return Err(Veto::MaxPositionsReached {
                open,
                limit: self.config.max_concurrent_positions,
            });
        }

        // 2. Size the trade inside the allocation cap
        let allocation = ledger.cash_balance() * self.config.max_position_fraction;
        let quantity = floor_to_increment(
            safe_div(allocation, evaluation.basis_price),
            self.quantity_increment,
        );
        let notional = quantity * evaluation.basis_price;
        if quantity <= Decimal::ZERO || notional < self.config.min_trade_notional {
            trace!(symbol = %evaluation.symbol, %notional, "Veto: below minimum notional");
            return Err(Veto::PositionTooSmall {
                notional,
                minimum: self.config.min_trade_notional,
            });
        }

        // 3. Daily loss limit gates new exposure only
        let daily_return = ledger.daily_return_fraction(marks);
        if daily_return <= -self.config.max_daily_loss_fraction {
            debug!(
                symbol = %evaluation.symbol,
                %daily_return,
                "Veto: daily loss limit reached"
            );
            return Err(Veto::DailyLossLimitReached {
                loss_fraction: -daily_return,
                limit: self.config.max_daily_loss_fraction,
            });
        }

        // 4. Per-symbol cooldown after a losing exit
        if ledger.in_cooldown(&evaluation.symbol, now, self.config.cooldown_duration()) {
            trace!(symbol = %evaluation.symbol, "Veto: cooling down");
            return Err(Veto::CoolingDown {
                symbol: evaluation.symbol.clone(),
            });
        }

        // 5. Losing streak lockout until the next daily rollover
        let losses = ledger.consecutive_losses();
        if self.config.max_losing_streak > 0 && losses >= self.config.max_losing_streak {
            debug!(losses, "Veto: losing streak lockout");
            return Err(Veto::LosingStreakLockout {
                losses,
                limit: self.config.max_losing_streak,
            });
        }

        debug!(
            symbol = %evaluation.symbol,
            %quantity,
            price = %evaluation.basis_price,
            %notional,
            "Entry approved"
        );

        Ok(TradeProposal {
            symbol: evaluation.symbol.clone(),
            side: Side::Buy,
            quantity,
            price: evaluation.basis_price,
            timestamp: evaluation.timestamp,
        })
    }

    /// Exits pass unconditionally with the full held quantity.
    fn review_exit(
        &self,
        evaluation: &SignalEvaluation,
        ledger: &PortfolioLedger,
    ) -> Result<TradeProposal, Veto> {
        let position = ledger
            .position(&evaluation.symbol)
            .ok_or_else(|| Veto::NothingToExit {
                symbol: evaluation.symbol.clone(),
            })?;

        Ok(TradeProposal {
            symbol: evaluation.symbol.clone(),
            side: Side::Sell,
            quantity: position.quantity,
            price: evaluation.basis_price,
            timestamp: evaluation.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    // =========================================================================
    // Test Helpers
    // =========================================================================

    fn test_config() -> RiskConfig {
        RiskConfig {
            max_concurrent_positions: 1,
            max_position_fraction: dec!(0.3),
            max_daily_loss_fraction: dec!(0.05),
            cooldown_duration_secs: 1800,
            max_losing_streak: 3,
            min_trade_notional: dec!(5),
        }
    }

    fn manager() -> RiskManager {
        RiskManager::new(test_config(), dec!(0.0001))
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 20, 12, 0, 0).unwrap()
    }

    fn ledger() -> PortfolioLedger {
        PortfolioLedger::new(dec!(100), NaiveDate::from_ymd_opt(2024, 3, 20).unwrap())
    }

    fn enter(symbol: &str, price: Decimal) -> SignalEvaluation {
        SignalEvaluation {
            symbol: symbol.to_string(),
            action: SignalAction::Enter,
            score: dec!(1),
            basis_price: price,
            timestamp: now(),
        }
    }

    fn exit(symbol: &str, price: Decimal) -> SignalEvaluation {
        SignalEvaluation {
            symbol: symbol.to_string(),
            action: SignalAction::Exit,
            score: Decimal::ZERO,
            basis_price: price,
            timestamp: now(),
        }
    }

    fn buy(ledger: &mut PortfolioLedger, symbol: &str, quantity: Decimal, price: Decimal) {
        ledger
            .apply(&TradeProposal {
                symbol: symbol.to_string(),
                side: Side::Buy,
                quantity,
                price,
                timestamp: now(),
            })
            .unwrap();
    }

    fn sell(ledger: &mut PortfolioLedger, symbol: &str, quantity: Decimal, price: Decimal) {
        ledger
            .apply(&TradeProposal {
                symbol: symbol.to_string(),
                side: Side::Sell,
                quantity,
                price,
                timestamp: now(),
            })
            .unwrap();
    }

    // =========================================================================
    // Sizing
    // =========================================================================

    #[test]
    fn test_entry_sized_to_allocation_cap() {
        let proposal = manager()
            .review(&enter("BTC-USD", dec!(10)), &ledger(), &PriceMap::new(), now())
            .unwrap();

        // 30% of 100 cash at price 10 buys exactly 3.
        assert_eq!(proposal.side, Side::Buy);
        assert_eq!(proposal.quantity, dec!(3.0000));
        assert_eq!(proposal.price, dec!(10));
    }

    #[test]
    fn test_quantity_floored_so_cost_stays_under_cap() {
        let proposal = manager()
            .review(&enter("BTC-USD", dec!(7)), &ledger(), &PriceMap::new(), now())
            .unwrap();

        // 30 / 7 = 4.2857142..., floored to the 0.0001 increment.
        assert_eq!(proposal.quantity, dec!(4.2857));
        assert!(proposal.quantity * proposal.price <= dec!(30));
    }

    #[test]
    fn test_tiny_allocation_vetoed_below_min_notional() {
        let mut small = ledger();
        // Drain cash down to 10 so allocation is 3, under the 5 minimum.
        buy(&mut small, "ETH-USD", dec!(0.9), dec!(100));
        let mut config = test_config();
        config.max_concurrent_positions = 2;
        let manager = RiskManager::new(config, dec!(0.0001));

        let veto = manager
            .review(&enter("BTC-USD", dec!(10)), &small, &PriceMap::new(), now())
            .unwrap_err();

        assert!(matches!(veto, Veto::PositionTooSmall { .. }));
    }

    // =========================================================================
    // Gate order
    // =========================================================================

    #[test]
    fn test_capacity_gate_fires_first() {
        let mut full = ledger();
        buy(&mut full, "ETH-USD", dec!(0.1), dec!(100));

        let veto = manager()
            .review(&enter("BTC-USD", dec!(10)), &full, &PriceMap::new(), now())
            .unwrap_err();

        assert_eq!(
            veto,
            Veto::MaxPositionsReached { open: 1, limit: 1 }
        );
    }

    #[test]
    fn test_daily_loss_blocks_new_entries() {
        let mut bruised = ledger();
        // Realize a 6% loss against the 100 day-start balance.
        buy(&mut bruised, "ETH-USD", dec!(1), dec!(50));
        sell(&mut bruised, "ETH-USD", dec!(1), dec!(44));

        let veto = manager()
            .review(&enter("BTC-USD", dec!(10)), &bruised, &PriceMap::new(), now())
            .unwrap_err();

        assert!(matches!(veto, Veto::DailyLossLimitReached { .. }));
    }

    #[test]
    fn test_daily_loss_counts_unrealized_drawdown() {
        let mut underwater = ledger();
        buy(&mut underwater, "ETH-USD", dec!(1), dec!(50));
        let mut config = test_config();
        config.max_concurrent_positions = 2;
        let manager = RiskManager::new(config, dec!(0.0001));

        // Marked at 43, the open position is 7 under water: 7% of day start.
        let marks: PriceMap = [("ETH-USD".to_string(), dec!(43))].into_iter().collect();

        let veto = manager
            .review(&enter("BTC-USD", dec!(10)), &underwater, &marks, now())
            .unwrap_err();

        assert!(matches!(veto, Veto::DailyLossLimitReached { .. }));
    }

    #[test]
    fn test_cooldown_blocks_reentry_until_window_passes() {
        let mut ledger = ledger();
        // A small losing round trip: 1% day loss, under the daily limit.
        buy(&mut ledger, "BTC-USD", dec!(1), dec!(10));
        sell(&mut ledger, "BTC-USD", dec!(1), dec!(9));

        let during = now() + chrono::Duration::minutes(10);
        let veto = manager()
            .review(&enter("BTC-USD", dec!(10)), &ledger, &PriceMap::new(), during)
            .unwrap_err();
        assert_eq!(
            veto,
            Veto::CoolingDown {
                symbol: "BTC-USD".to_string()
            }
        );

        // Same symbol clears once the window has elapsed; streak is 1 so the
        // lockout gate stays quiet.
        let after = now() + chrono::Duration::minutes(31);
        let proposal = manager()
            .review(&enter("BTC-USD", dec!(10)), &ledger, &PriceMap::new(), after)
            .unwrap();
        assert_eq!(proposal.side, Side::Buy);
    }

    #[test]
    fn test_cooldown_is_per_symbol() {
        let mut ledger = ledger();
        buy(&mut ledger, "BTC-USD", dec!(1), dec!(10));
        sell(&mut ledger, "BTC-USD", dec!(1), dec!(9));

        // A different symbol is not in cooldown.
        let during = now() + chrono::Duration::minutes(10);
        let proposal = manager()
            .review(&enter("ETH-USD", dec!(10)), &ledger, &PriceMap::new(), during)
            .unwrap();
        assert_eq!(proposal.symbol, "ETH-USD");
    }

    #[test]
    fn test_losing_streak_locks_out_fresh_symbols() {
        let mut ledger = ledger();
        // Three losing round trips on distinct symbols: total 3% day loss,
        // each loss on its own symbol so cooldown never masks the streak.
        for symbol in ["AAA-USD", "BBB-USD", "CCC-USD"] {
            buy(&mut ledger, symbol, dec!(1), dec!(10));
            sell(&mut ledger, symbol, dec!(1), dec!(9));
        }
        assert_eq!(ledger.consecutive_losses(), 3);

        let veto = manager()
            .review(&enter("DDD-USD", dec!(10)), &ledger, &PriceMap::new(), now())
            .unwrap_err();

        assert_eq!(veto, Veto::LosingStreakLockout { losses: 3, limit: 3 });
    }

    #[test]
    fn test_zero_streak_limit_disables_lockout() {
        let mut ledger = ledger();
        for symbol in ["AAA-USD", "BBB-USD", "CCC-USD"] {
            buy(&mut ledger, symbol, dec!(1), dec!(10));
            sell(&mut ledger, symbol, dec!(1), dec!(9));
        }

        let mut config = test_config();
        config.max_losing_streak = 0;
        let manager = RiskManager::new(config, dec!(0.0001));

        assert!(manager
            .review(&enter("DDD-USD", dec!(10)), &ledger, &PriceMap::new(), now())
            .is_ok());
    }

    // =========================================================================
    // Exits
    // =========================================================================

    #[test]
    fn test_exit_passes_with_full_quantity() {
        let mut ledger = ledger();
        buy(&mut ledger, "BTC-USD", dec!(2.5), dec!(10));

        let proposal = manager()
            .review(&exit("BTC-USD", dec!(12)), &ledger, &PriceMap::new(), now())
            .unwrap();

        assert_eq!(proposal.side, Side::Sell);
        assert_eq!(proposal.quantity, dec!(2.5));
        assert_eq!(proposal.price, dec!(12));
    }

    #[test]
    fn test_exit_allowed_past_daily_loss_limit() {
        let mut bruised = ledger();
        buy(&mut bruised, "ETH-USD", dec!(1), dec!(50));
        sell(&mut bruised, "ETH-USD", dec!(1), dec!(44));
        buy(&mut bruised, "BTC-USD", dec!(1), dec!(10));

        // Entries are blocked, but the open position can still be closed.
        let proposal = manager()
            .review(&exit("BTC-USD", dec!(9)), &bruised, &PriceMap::new(), now())
            .unwrap();
        assert_eq!(proposal.side, Side::Sell);
    }

    #[test]
    fn test_exit_without_position_vetoed() {
        let veto = manager()
            .review(&exit("BTC-USD", dec!(12)), &ledger(), &PriceMap::new(), now())
            .unwrap_err();

        assert_eq!(
            veto,
            Veto::NothingToExit {
                symbol: "BTC-USD".to_string()
            }
        );
    }
}
