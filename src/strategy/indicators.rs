//! Price-series indicators used by the signal evaluator.
//!
//! Every function is pure: the same input slice always yields the same
//! output, and insufficient history yields `None` rather than a guess.
//! Prices are expected oldest-first.

use crate::utils::decimal::pct_change;
use rust_decimal::Decimal;

/// Simple moving average of the last `period` prices.
pub fn sma(prices: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || prices.len() < period {
        return None;
    }
    let window = &prices[prices.len() - period..];
    let sum: Decimal = window.iter().sum();
    Some(sum / Decimal::from(period as u64))
}

/// Percentage change over the last `window` periods: from the price
/// `window` steps back to the latest price. Signed, in percent.
pub fn change_pct(prices: &[Decimal], window: usize) -> Option<Decimal> {
    if window == 0 || prices.len() < window + 1 {
        return None;
    }
    let from = prices[prices.len() - 1 - window];
    let to = prices[prices.len() - 1];
    Some(pct_change(from, to))
}

/// Short-SMA distance above the long SMA, in percent. Positive while the
/// short average leads, negative while it lags.
pub fn trend_strength_pct(prices: &[Decimal], short: usize, long: usize) -> Option<Decimal> {
    let short_sma = sma(prices, short)?;
    let long_sma = sma(prices, long)?;
    Some(pct_change(long_sma, short_sma))
}

/// Relative Strength Index with Wilder smoothing.
///
/// Needs `period + 1` prices: the first `period` deltas seed the averages,
/// any remaining deltas are smoothed in. Returns a value in `[0, 100]`.
pub fn rsi(prices: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || prices.len() < period + 1 {
        return None;
    }

    let deltas: Vec<Decimal> = prices.windows(2).map(|w| w[1] - w[0]).collect();
    let period_dec = Decimal::from(period as u64);

    let mut avg_gain: Decimal = deltas[..period]
        .iter()
        .filter(|d| **d > Decimal::ZERO)
        .sum::<Decimal>()
        / period_dec;
    let mut avg_loss: Decimal = deltas[..period]
        .iter()
        .filter(|d| **d < Decimal::ZERO)
        .map(|d| -*d)
        .sum::<Decimal>()
        / period_dec;

    for delta in &deltas[period..] {
        let (gain, loss) = if *delta > Decimal::ZERO {
            (*delta, Decimal::ZERO)
        } else {
            (Decimal::ZERO, -*delta)
        };
        avg_gain = (avg_gain * (period_dec - Decimal::ONE) + gain) / period_dec;
        avg_loss = (avg_loss * (period_dec - Decimal::ONE) + loss) / period_dec;
    }

    if avg_loss.is_zero() {
        return Some(Decimal::ONE_HUNDRED);
    }

    let rs = avg_gain / avg_loss;
    Some(Decimal::ONE_HUNDRED - Decimal::ONE_HUNDRED / (Decimal::ONE + rs))
}

/// Realized volatility: population standard deviation of the per-period
/// percentage returns across the last `window` periods, in percent.
pub fn volatility_pct(prices: &[Decimal], window: usize) -> Option<Decimal> {
    if window < 2 || prices.len() < window + 1 {
        return None;
    }

    let tail = &prices[prices.len() - window - 1..];
    let returns: Vec<f64> = tail
        .windows(2)
        .map(|w| {
            pct_change(w[0], w[1])
                .to_string()
                .parse::<f64>()
                .unwrap_or(0.0)
        })
        .collect();

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;

    Decimal::from_f64_retain(variance.sqrt())
}
