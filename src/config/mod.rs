//! Configuration management for the paper trading engine.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Candle widths the venue serves.
const VALID_GRANULARITIES: [u64; 6] = [60, 300, 900, 3600, 21600, 86400];

/// Parameter presets mirroring the two supported trading temperaments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingProfile {
    Safe,
    Aggressive,
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Virtual account parameters
    #[serde(default)]
    pub portfolio: PortfolioConfig,
    /// Market data source settings
    #[serde(default)]
    pub market: MarketConfig,
    /// Signal evaluation thresholds
    #[serde(default)]
    pub signal: SignalConfig,
    /// Risk gating parameters
    #[serde(default)]
    pub risk: RiskConfig,
    /// Cycle scheduling
    #[serde(default)]
    pub engine: EngineConfig,
    /// Trade log destinations
    #[serde(default)]
    pub recorder: RecorderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioConfig {
    /// Virtual cash the ledger starts with, in USD
    #[serde(default = "default_starting_balance")]
    pub starting_balance: Decimal,
    /// Minimum tradable quantity increment; buy sizing floors to this
    #[serde(default = "default_quantity_increment")]
    pub quantity_increment: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Base URL of the market data API
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Products scanned every cycle, in this order
    #[serde(default = "default_universe")]
    pub universe: Vec<String>,
    /// Per-request HTTP timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Snapshots older than this are excluded from the cycle
    #[serde(default = "default_staleness_threshold")]
    pub staleness_threshold_secs: u64,
    /// Candle width for history backfill (venue supports 60/300/900/3600/21600/86400)
    #[serde(default = "default_candle_granularity")]
    pub candle_granularity_secs: u64,
    /// Snapshots of history kept per symbol
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Backfill history from candles on live startup
    #[serde(default = "default_backfill_on_start")]
    pub backfill_on_start: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Below this many snapshots the evaluator always holds
    #[serde(default = "default_min_history_length")]
    pub min_history_length: usize,
    /// Snapshots in the short momentum window
    #[serde(default = "default_short_window")]
    pub short_window: usize,
    /// Snapshots in the long trend window
    #[serde(default = "default_long_window")]
    pub long_window: usize,
    /// RSI lookback
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,
    /// Returns sampled for the volatility estimate
    #[serde(default = "default_volatility_window")]
    pub volatility_window: usize,
    /// Short-window move (in %) required to consider an entry
    #[serde(default = "default_entry_threshold_pct")]
    pub entry_threshold_pct: Decimal,
    /// Fast-over-slow SMA strength (in %) required to confirm the trend
    #[serde(default = "default_min_trend_strength_pct")]
    pub min_trend_strength_pct: Decimal,
    /// RSI band for entries: below the floor is a falling knife
    #[serde(default = "default_rsi_entry_floor")]
    pub rsi_entry_floor: Decimal,
    /// RSI band for entries: above the ceiling is overbought
    #[serde(default = "default_rsi_entry_ceiling")]
    pub rsi_entry_ceiling: Decimal,
    /// Volatility band (stdev of per-step returns, in %): too quiet wastes a slot
    #[serde(default = "default_min_volatility_pct")]
    pub min_volatility_pct: Decimal,
    /// Volatility band upper edge: too wild for the position sizing model
    #[serde(default = "default_max_volatility_pct")]
    pub max_volatility_pct: Decimal,
    /// Unrealized gain (in %) that triggers an exit
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: Decimal,
    /// Unrealized loss (in %, positive number) that triggers an exit
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: Decimal,
    /// Positions older than this are exited regardless of P&L
    #[serde(default = "default_max_holding_duration")]
    pub max_holding_duration_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Open positions allowed at once
    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: u32,
    /// Fraction of cash a single entry may consume (0-1]
    #[serde(default = "default_max_position_fraction")]
    pub max_position_fraction: Decimal,
    /// Daily equity loss (fraction of the day-start balance) that locks out entries
    #[serde(default = "default_max_daily_loss_fraction")]
    pub max_daily_loss_fraction: Decimal,
    /// No re-entry into a symbol for this long after a losing exit
    #[serde(default = "default_cooldown_duration")]
    pub cooldown_duration_secs: u64,
    /// Consecutive losing exits that lock out entries until the next day
    #[serde(default = "default_max_losing_streak")]
    pub max_losing_streak: u32,
    /// Entries below this notional are vetoed (venue minimum order)
    #[serde(default = "default_min_trade_notional")]
    pub min_trade_notional: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between live decision cycles
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// CSV file receiving one row per applied trade
    #[serde(default = "default_trades_csv")]
    pub trades_csv: String,
    /// CSV file receiving one row per rejected trade
    #[serde(default = "default_rejections_csv")]
    pub rejections_csv: String,
    /// SQLite database for durable ledger state
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

// Default value functions

fn default_starting_balance() -> Decimal {
    Decimal::new(100, 0) // $100
}

fn default_quantity_increment() -> Decimal {
    Decimal::new(1, 8) // 0.00000001
}

fn default_base_url() -> String {
    crate::market::coinbase::DEFAULT_BASE_URL.to_string()
}

fn default_universe() -> Vec<String> {
    [
        "BTC-USD", "ETH-USD", "SOL-USD", "DOGE-USD", "AVAX-USD", "LINK-USD", "XRP-USD", "LTC-USD",
        "ADA-USD", "DOT-USD", "UNI-USD", "ATOM-USD", "ALGO-USD", "FIL-USD", "NEAR-USD",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_staleness_threshold() -> u64 {
    900 // 15 minutes = 3 candle widths
}

fn default_candle_granularity() -> u64 {
    300
}

fn default_history_limit() -> usize {
    100
}

fn default_backfill_on_start() -> bool {
    true
}

fn default_min_history_length() -> usize {
    30
}

fn default_short_window() -> usize {
    9
}

fn default_long_window() -> usize {
    21
}

fn default_rsi_period() -> usize {
    14
}

fn default_volatility_window() -> usize {
    20
}

fn default_entry_threshold_pct() -> Decimal {
    Decimal::new(5, 1) // 0.5%
}

fn default_min_trend_strength_pct() -> Decimal {
    Decimal::new(2, 1) // 0.2%
}

fn default_rsi_entry_floor() -> Decimal {
    Decimal::new(40, 0)
}

fn default_rsi_entry_ceiling() -> Decimal {
    Decimal::new(65, 0)
}

fn default_min_volatility_pct() -> Decimal {
    Decimal::new(2, 1) // 0.2%
}

fn default_max_volatility_pct() -> Decimal {
    Decimal::new(3, 0) // 3%
}

fn default_take_profit_pct() -> Decimal {
    Decimal::new(1, 0) // 1%
}

fn default_stop_loss_pct() -> Decimal {
    Decimal::new(15, 1) // 1.5%
}

fn default_max_holding_duration() -> u64 {
    86400 // one day
}

fn default_max_concurrent_positions() -> u32 {
    1
}

fn default_max_position_fraction() -> Decimal {
    Decimal::new(30, 2) // 0.30
}

fn default_max_daily_loss_fraction() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_cooldown_duration() -> u64 {
    1800 // 30 minutes
}

fn default_max_losing_streak() -> u32 {
    3
}

fn default_min_trade_notional() -> Decimal {
    Decimal::new(5, 0) // $5 venue minimum order
}

fn default_cycle_interval() -> u64 {
    360
}

fn default_trades_csv() -> String {
    "trades.csv".to_string()
}

fn default_rejections_csv() -> String {
    "rejections.csv".to_string()
}

fn default_db_path() -> String {
    "paper_trader.db".to_string()
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration, optionally from an explicit file path.
    ///
    /// The implicit `config.toml` is optional; a path given on the command
    /// line must exist.
    pub fn load_from(path: Option<&str>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let file = match path {
            Some(p) => config::File::with_name(p).required(true),
            None => config::File::with_name("config").required(false),
        };

        let config = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::default().separator("__").prefix("MPT"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Replace the signal and risk sections with a profile's preset values.
    pub fn apply_profile(&mut self, profile: TradingProfile) {
        match profile {
            TradingProfile::Safe => {
                self.signal = SignalConfig::default();
                self.risk = RiskConfig::default();
            }
            TradingProfile::Aggressive => {
                self.signal = SignalConfig::aggressive();
                self.risk = RiskConfig::aggressive();
            }
        }
    }

    /// Validate configuration values. Any violation is fatal at startup.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.portfolio.starting_balance > Decimal::ZERO,
            "starting_balance must be positive"
        );

        anyhow::ensure!(
            self.portfolio.quantity_increment > Decimal::ZERO,
            "quantity_increment must be positive"
        );

        anyhow::ensure!(
            !self.market.universe.is_empty(),
            "universe must contain at least one symbol"
        );

        anyhow::ensure!(
            VALID_GRANULARITIES.contains(&self.market.candle_granularity_secs),
            "candle_granularity_secs must be one of {:?}",
            VALID_GRANULARITIES
        );

        anyhow::ensure!(
            self.signal.min_history_length >= 2,
            "min_history_length must be at least 2"
        );

        anyhow::ensure!(
            self.signal.short_window < self.signal.long_window,
            "short_window must be shorter than long_window"
        );

        anyhow::ensure!(
            self.signal.entry_threshold_pct > Decimal::ZERO,
            "entry_threshold_pct must be positive"
        );

        anyhow::ensure!(
            self.signal.take_profit_pct > Decimal::ZERO,
            "take_profit_pct must be positive"
        );

        anyhow::ensure!(
            self.signal.stop_loss_pct > Decimal::ZERO,
            "stop_loss_pct must be positive (it measures a loss)"
        );

        anyhow::ensure!(
            self.signal.rsi_entry_floor < self.signal.rsi_entry_ceiling,
            "rsi_entry_floor must be below rsi_entry_ceiling"
        );

        anyhow::ensure!(
            self.signal.min_volatility_pct < self.signal.max_volatility_pct,
            "min_volatility_pct must be below max_volatility_pct"
        );

        anyhow::ensure!(
            self.risk.max_concurrent_positions >= 1,
            "max_concurrent_positions must be at least 1"
        );

        anyhow::ensure!(
            self.risk.max_position_fraction > Decimal::ZERO
                && self.risk.max_position_fraction <= Decimal::ONE,
            "max_position_fraction must be in (0, 1]"
        );

        anyhow::ensure!(
            self.risk.max_daily_loss_fraction > Decimal::ZERO
                && self.risk.max_daily_loss_fraction < Decimal::ONE,
            "max_daily_loss_fraction must be in (0, 1)"
        );

        anyhow::ensure!(
            self.risk.min_trade_notional >= Decimal::ZERO,
            "min_trade_notional cannot be negative"
        );

        Ok(())
    }
}

impl MarketConfig {
    pub fn staleness_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.staleness_threshold_secs as i64)
    }
}

impl SignalConfig {
    /// Preset used by the aggressive profile: earlier entries, wider exits.
    pub fn aggressive() -> Self {
        Self {
            entry_threshold_pct: Decimal::new(3, 1), // 0.3%
            rsi_entry_floor: Decimal::new(35, 0),
            rsi_entry_ceiling: Decimal::new(70, 0),
            take_profit_pct: Decimal::new(2, 0), // 2%
            stop_loss_pct: Decimal::new(3, 0),   // 3%
            ..Self::default()
        }
    }

    pub fn max_holding_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_holding_duration_secs as i64)
    }
}

impl RiskConfig {
    /// Preset used by the aggressive profile: more slots, bigger bets.
    pub fn aggressive() -> Self {
        Self {
            max_concurrent_positions: 3,
            max_position_fraction: Decimal::new(50, 2),  // 0.50
            max_daily_loss_fraction: Decimal::new(8, 2), // 0.08
            ..Self::default()
        }
    }

    pub fn cooldown_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_duration_secs as i64)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            portfolio: PortfolioConfig::default(),
            market: MarketConfig::default(),
            signal: SignalConfig::default(),
            risk: RiskConfig::default(),
            engine: EngineConfig::default(),
            recorder: RecorderConfig::default(),
        }
    }
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            starting_balance: default_starting_balance(),
            quantity_increment: default_quantity_increment(),
        }
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            universe: default_universe(),
            request_timeout_secs: default_request_timeout(),
            staleness_threshold_secs: default_staleness_threshold(),
            candle_granularity_secs: default_candle_granularity(),
            history_limit: default_history_limit(),
            backfill_on_start: default_backfill_on_start(),
        }
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            min_history_length: default_min_history_length(),
            short_window: default_short_window(),
            long_window: default_long_window(),
            rsi_period: default_rsi_period(),
            volatility_window: default_volatility_window(),
            entry_threshold_pct: default_entry_threshold_pct(),
            min_trend_strength_pct: default_min_trend_strength_pct(),
            rsi_entry_floor: default_rsi_entry_floor(),
            rsi_entry_ceiling: default_rsi_entry_ceiling(),
            min_volatility_pct: default_min_volatility_pct(),
            max_volatility_pct: default_max_volatility_pct(),
            take_profit_pct: default_take_profit_pct(),
            stop_loss_pct: default_stop_loss_pct(),
            max_holding_duration_secs: default_max_holding_duration(),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_concurrent_positions: default_max_concurrent_positions(),
            max_position_fraction: default_max_position_fraction(),
            max_daily_loss_fraction: default_max_daily_loss_fraction(),
            cooldown_duration_secs: default_cooldown_duration(),
            max_losing_streak: default_max_losing_streak(),
            min_trade_notional: default_min_trade_notional(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: default_cycle_interval(),
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            trades_csv: default_trades_csv(),
            rejections_csv: default_rejections_csv(),
            db_path: default_db_path(),
        }
    }
}
