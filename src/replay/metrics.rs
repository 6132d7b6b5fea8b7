//! Performance metrics for replay runs.

use crate::portfolio::{Side, TradeEvent};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

/// A point on the equity curve, one per processed batch.
#[derive(Debug, Clone, Serialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub cash_balance: Decimal,
    /// Mark-to-market value of all open positions.
    pub position_value: Decimal,
    pub total_equity: Decimal,
    /// Fractional drawdown from the running equity peak.
    pub drawdown: Decimal,
    pub position_count: usize,
}

impl EquityPoint {
    pub fn new(
        timestamp: DateTime<Utc>,
        cash_balance: Decimal,
        position_value: Decimal,
        position_count: usize,
        peak_equity: Decimal,
    ) -> Self {
        let total_equity = cash_balance + position_value;
        let drawdown = if peak_equity > Decimal::ZERO {
            (peak_equity - total_equity) / peak_equity
        } else {
            Decimal::ZERO
        };

        Self {
            timestamp,
            cash_balance,
            position_value,
            total_equity,
            drawdown,
            position_count,
        }
    }
}

/// Replay performance roll-up.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayMetrics {
    // Returns
    /// Final equity minus starting balance
    pub total_return: Decimal,
    /// Total return as percentage of the starting balance
    pub total_return_pct: Decimal,
    /// Realized P&L booked by exits
    pub realized_pnl: Decimal,

    // Risk
    /// Maximum fractional drawdown
    pub max_drawdown: Decimal,
    /// Duration of the maximum drawdown in hours
    pub max_drawdown_duration_hours: i64,
    /// Sharpe ratio over per-batch equity returns (0 risk-free rate)
    pub sharpe_ratio: Decimal,

    // Activity
    pub entries: u64,
    pub exits: u64,
    pub total_trades: u64,
    /// Proposals the ledger refused
    pub rejected_trades: u64,
    /// Signals a risk gate refused
    pub vetoed_signals: u64,
    /// Profitable exits / total exits, as a percentage
    pub win_rate: Decimal,
    /// Gross profit / gross loss across exits
    pub profit_factor: Decimal,

    // Time
    pub duration_days: f64,
}

impl ReplayMetrics {
    pub fn calculate(
        equity_curve: &[EquityPoint],
        initial_balance: Decimal,
        trades: &[TradeEvent],
        rejected_trades: u64,
        vetoed_signals: u64,
    ) -> Self {
        if equity_curve.is_empty() {
            return Self::empty();
        }

        let first = &equity_curve[0];
        let last = &equity_curve[equity_curve.len() - 1];

        let duration = last.timestamp - first.timestamp;
        let duration_days = duration.num_seconds() as f64 / 86400.0;
        let duration_years = duration_days / 365.0;

        let total_return = last.total_equity - initial_balance;
        let total_return_pct = if initial_balance > Decimal::ZERO {
            total_return / initial_balance * dec!(100)
        } else {
            Decimal::ZERO
        };

        let (max_drawdown, max_dd_duration) = calculate_max_drawdown(equity_curve);

        let returns = calculate_period_returns(equity_curve);
        let sharpe_ratio = calculate_sharpe(&returns, duration_years);

        let entries = trades.iter().filter(|t| t.side == Side::Buy).count() as u64;
        let exit_events: Vec<&TradeEvent> =
            trades.iter().filter(|t| t.side == Side::Sell).collect();
        let exits = exit_events.len() as u64;

        let realized_pnl: Decimal = exit_events.iter().map(|t| t.realized_pnl_delta).sum();
        let wins = exit_events
            .iter()
            .filter(|t| t.realized_pnl_delta > Decimal::ZERO)
            .count() as u64;

        let win_rate = if exits > 0 {
            Decimal::from(wins) / Decimal::from(exits) * dec!(100)
        } else {
            Decimal::ZERO
        };

        let gross_profit: Decimal = exit_events
            .iter()
            .filter(|t| t.realized_pnl_delta > Decimal::ZERO)
            .map(|t| t.realized_pnl_delta)
            .sum();
        let gross_loss: Decimal = exit_events
            .iter()
            .filter(|t| t.realized_pnl_delta < Decimal::ZERO)
            .map(|t| -t.realized_pnl_delta)
            .sum();
        let profit_factor = if gross_loss > Decimal::ZERO {
            gross_profit / gross_loss
        } else if gross_profit > Decimal::ZERO {
            // No losing exit at all; cap instead of dividing by zero.
            dec!(100)
        } else {
            Decimal::ZERO
        };

        Self {
            total_return,
            total_return_pct,
            realized_pnl,
            max_drawdown,
            max_drawdown_duration_hours: max_dd_duration,
            sharpe_ratio,
            entries,
            exits,
            total_trades: trades.len() as u64,
            rejected_trades,
            vetoed_signals,
            win_rate,
            profit_factor,
            duration_days,
        }
    }

    /// Metrics for a replay that produced no equity curve.
    pub fn empty() -> Self {
        Self {
            total_return: Decimal::ZERO,
            total_return_pct: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            max_drawdown_duration_hours: 0,
            sharpe_ratio: Decimal::ZERO,
            entries: 0,
            exits: 0,
            total_trades: 0,
            rejected_trades: 0,
            vetoed_signals: 0,
            win_rate: Decimal::ZERO,
            profit_factor: Decimal::ZERO,
            duration_days: 0.0,
        }
    }

    /// Format metrics as a summary string.
    pub fn summary(&self) -> String {
        format!(
            r#"═══════════════════════════════════════════════
REPLAY RESULTS ({:.1} days)
═══════════════════════════════════════════════
RETURNS
  Total Return:      ${:.2} ({:.2}%)
  Realized P&L:      ${:.2}

RISK
  Max Drawdown:      {:.2}%
  Sharpe Ratio:      {:.3}

ACTIVITY
  Trades Applied:    {}
  Entries / Exits:   {} / {}
  Rejected:          {}
  Vetoed Signals:    {}
  Win Rate:          {:.1}%
  Profit Factor:     {:.2}
═══════════════════════════════════════════════"#,
            self.duration_days,
            self.total_return,
            self.total_return_pct,
            self.realized_pnl,
            self.max_drawdown * dec!(100),
            self.sharpe_ratio,
            self.total_trades,
            self.entries,
            self.exits,
            self.rejected_trades,
            self.vetoed_signals,
            self.win_rate,
            self.profit_factor,
        )
    }
}

/// Per-batch equity returns.
fn calculate_period_returns(equity_curve: &[EquityPoint]) -> Vec<Decimal> {
    if equity_curve.len() < 2 {
        return vec![];
    }

    equity_curve
        .windows(2)
        .map(|w| {
            let prev = &w[0];
            let curr = &w[1];
            if prev.total_equity > Decimal::ZERO {
                (curr.total_equity - prev.total_equity) / prev.total_equity
            } else {
                Decimal::ZERO
            }
        })
        .collect()
}

/// Maximum drawdown and its duration.
fn calculate_max_drawdown(equity_curve: &[EquityPoint]) -> (Decimal, i64) {
    if equity_curve.is_empty() {
        return (Decimal::ZERO, 0);
    }

    let mut peak = equity_curve[0].total_equity;
    let mut max_dd = Decimal::ZERO;
    let mut max_dd_start: Option<DateTime<Utc>> = None;
    let mut max_dd_duration: i64 = 0;
    let mut current_dd_start: Option<DateTime<Utc>> = None;

    for point in equity_curve {
        if point.total_equity > peak {
            peak = point.total_equity;
            current_dd_start = None;
        } else {
            let dd = if peak > Decimal::ZERO {
                (peak - point.total_equity) / peak
            } else {
                Decimal::ZERO
            };
            if dd > max_dd {
                max_dd = dd;
                if current_dd_start.is_none() {
                    current_dd_start = Some(point.timestamp);
                }
                max_dd_start = current_dd_start;
            }
        }

        if let Some(start) = max_dd_start {
            let duration = (point.timestamp - start).num_hours();
            if duration > max_dd_duration {
                max_dd_duration = duration;
            }
        }
    }

    (max_dd, max_dd_duration)
}

/// Sharpe ratio over per-batch returns, annualized, 0 risk-free rate.
/// Statistics run at the f64 boundary; only the result comes back.
fn calculate_sharpe(returns: &[Decimal], duration_years: f64) -> Decimal {
    if returns.is_empty() || duration_years <= 0.0 {
        return Decimal::ZERO;
    }

    let returns_f64: Vec<f64> = returns
        .iter()
        .map(|r| r.to_string().parse::<f64>().unwrap_or(0.0))
        .collect();

    let n = returns_f64.len() as f64;
    let mean = returns_f64.iter().sum::<f64>() / n;
    let variance = returns_f64.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    if std_dev < 1e-10 {
        return Decimal::ZERO;
    }

    let periods_per_year = n / duration_years;
    let annualized_return = mean * periods_per_year;
    let annualized_std = std_dev * periods_per_year.sqrt();

    let sharpe = annualized_return / annualized_std;
    Decimal::from_f64_retain(sharpe).unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 20, hour, 0, 0).unwrap()
    }

    fn point(hour: u32, equity: Decimal, peak: Decimal) -> EquityPoint {
        EquityPoint::new(ts(hour), equity, Decimal::ZERO, 0, peak)
    }

    fn sell(pnl: Decimal) -> TradeEvent {
        TradeEvent {
            trade_id: 1,
            symbol: "BTC-USD".to_string(),
            side: Side::Sell,
            quantity: dec!(1),
            price: dec!(100),
            cash_balance_after: dec!(100),
            realized_pnl_delta: pnl,
            timestamp: ts(0),
        }
    }

    fn buy() -> TradeEvent {
        TradeEvent {
            trade_id: 1,
            symbol: "BTC-USD".to_string(),
            side: Side::Buy,
            quantity: dec!(1),
            price: dec!(100),
            cash_balance_after: dec!(0),
            realized_pnl_delta: Decimal::ZERO,
            timestamp: ts(0),
        }
    }

    #[test]
    fn test_equity_point_drawdown() {
        let point = EquityPoint::new(ts(0), dec!(70), dec!(25), 2, dec!(100));

        assert_eq!(point.total_equity, dec!(95));
        assert_eq!(point.drawdown, dec!(0.05));
    }

    #[test]
    fn test_max_drawdown_walk() {
        let curve = vec![
            point(0, dec!(100), dec!(100)),
            point(1, dec!(105), dec!(105)),
            point(2, dec!(95), dec!(105)),
            point(3, dec!(110), dec!(110)),
        ];

        let (max_dd, _) = calculate_max_drawdown(&curve);
        // 105 down to 95 = 9.52%.
        assert!(max_dd > dec!(0.09) && max_dd < dec!(0.10));
    }

    #[test]
    fn test_period_returns() {
        let curve = vec![
            point(0, dec!(100), dec!(100)),
            point(1, dec!(101), dec!(101)),
            point(2, dec!(100), dec!(101)),
        ];

        let returns = calculate_period_returns(&curve);
        assert_eq!(returns.len(), 2);
        assert_eq!(returns[0], dec!(0.01));
        assert!(returns[1] < Decimal::ZERO);
    }

    #[test]
    fn test_trade_rollup() {
        let trades = vec![buy(), sell(dec!(3)), buy(), sell(dec!(-1)), buy(), sell(dec!(2))];
        let curve = vec![point(0, dec!(100), dec!(100)), point(6, dec!(104), dec!(104))];

        let metrics = ReplayMetrics::calculate(&curve, dec!(100), &trades, 1, 4);

        assert_eq!(metrics.entries, 3);
        assert_eq!(metrics.exits, 3);
        assert_eq!(metrics.total_trades, 6);
        assert_eq!(metrics.realized_pnl, dec!(4));
        assert_eq!(metrics.rejected_trades, 1);
        assert_eq!(metrics.vetoed_signals, 4);
        // 2 of 3 exits made money.
        assert_eq!(metrics.win_rate.round_dp(2), dec!(66.67));
        assert_eq!(metrics.profit_factor, dec!(5));
        assert_eq!(metrics.total_return, dec!(4));
        assert_eq!(metrics.total_return_pct, dec!(4));
    }

    #[test]
    fn test_no_losses_caps_profit_factor() {
        let trades = vec![buy(), sell(dec!(2))];
        let curve = vec![point(0, dec!(100), dec!(100)), point(1, dec!(102), dec!(102))];

        let metrics = ReplayMetrics::calculate(&curve, dec!(100), &trades, 0, 0);
        assert_eq!(metrics.profit_factor, dec!(100));
        assert_eq!(metrics.win_rate, dec!(100));
    }

    #[test]
    fn test_empty_curve_yields_empty_metrics() {
        let metrics = ReplayMetrics::calculate(&[], dec!(100), &[], 0, 0);
        assert_eq!(metrics.total_trades, 0);
        assert_eq!(metrics.duration_days, 0.0);
    }

    #[test]
    fn test_summary_format() {
        let trades = vec![buy(), sell(dec!(1.5))];
        let curve = vec![
            point(0, dec!(100), dec!(100)),
            point(12, dec!(101.5), dec!(101.5)),
        ];

        let metrics = ReplayMetrics::calculate(&curve, dec!(100), &trades, 0, 2);
        let summary = metrics.summary();

        assert!(summary.contains("REPLAY RESULTS"));
        assert!(summary.contains("1.50"));
        assert!(summary.contains("Win Rate"));
    }
}
