//! Momentum Paper Trader - Main Entry Point
//!
//! Runs the live paper-trading loop by default; `replay` and `status`
//! subcommands cover offline work against recorded data and saved state.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use momentum_paper_trader::config::{Config, TradingProfile};
use momentum_paper_trader::engine::TradingEngine;
use momentum_paper_trader::market::{CoinbaseClient, MarketDataError};
use momentum_paper_trader::persistence::PersistenceManager;
use momentum_paper_trader::portfolio::PortfolioLedger;
use momentum_paper_trader::recorder::CsvRecorder;
use momentum_paper_trader::replay::{CsvSnapshotLoader, ReplayEngine};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Momentum Paper Trader CLI
#[derive(Parser)]
#[command(name = "momentum-paper-trader")]
#[command(version, about = "Momentum paper trading against Coinbase spot data")]
struct Cli {
    /// Path to a TOML config file (default: optional ./config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Parameter profile replacing the signal and risk sections
    #[arg(short, long, value_enum)]
    profile: Option<ProfileArg>,

    /// Discard the persisted ledger and start from a clean slate
    #[arg(long)]
    fresh: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded snapshot CSV through the decision pipeline
    Replay {
        /// Path to CSV data file (timestamp,symbol,price[,volume])
        #[arg(short, long)]
        data: String,

        /// Write the equity curve to this CSV file
        #[arg(short, long)]
        report: Option<String>,
    },

    /// Show ledger status from the persisted database
    Status {
        /// Path to SQLite database
        #[arg(short, long, default_value = "paper_trader.db")]
        db: String,

        /// Show recent trades and cooldowns as well
        #[arg(short, long)]
        verbose: bool,
    },
}

/// CLI-facing profile names, mapped onto [`TradingProfile`].
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProfileArg {
    Safe,
    Aggressive,
}

impl From<ProfileArg> for TradingProfile {
    fn from(arg: ProfileArg) -> Self {
        match arg {
            ProfileArg::Safe => TradingProfile::Safe,
            ProfileArg::Aggressive => TradingProfile::Aggressive,
        }
    }
}

/// Session counters for the periodic status report.
#[derive(Debug)]
struct AppMetrics {
    start_time: DateTime<Utc>,
    cycles_completed: u64,
    trades_applied: u64,
    rejections_recorded: u64,
    vetoes_observed: u64,
    rollovers: u64,
    errors_count: u64,
}

impl Default for AppMetrics {
    fn default() -> Self {
        Self {
            start_time: Utc::now(),
            cycles_completed: 0,
            trades_applied: 0,
            rejections_recorded: 0,
            vetoes_observed: 0,
            rollovers: 0,
            errors_count: 0,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize comprehensive logging
    init_logging()?;

    // Handle subcommands
    match &cli.command {
        Some(Commands::Replay { data, report }) => {
            let config = load_config(&cli)?;
            return run_replay(data, report.as_deref(), config);
        }
        Some(Commands::Status { db, verbose }) => {
            return show_status(db, *verbose);
        }
        None => {
            // Default: run the live paper-trading loop
        }
    }

    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║       Momentum Paper Trader v{} - Live Session          ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");
    info!("📝 PAPER TRADING - every fill is simulated, no order leaves this process");

    // Load and validate configuration; violations are fatal here
    let config = load_config(&cli)?;
    log_config(&config);

    // Market data client (read-only; prices and candles)
    let client = CoinbaseClient::new(&config.market)?;

    // SQLite persistence for the ledger and the trade journal
    let persistence = PersistenceManager::new(&config.recorder.db_path)?;

    if cli.fresh {
        persistence.clear_all()?;
        info!("🧹 [PERSISTENCE] Cleared persisted state (--fresh)");
    }

    // Resume the previous session's ledger if one was saved
    let ledger = match persistence.load_ledger()? {
        Some(ledger) => {
            info!(
                "📂 [PERSISTENCE] Restoring ledger from {}",
                config.recorder.db_path
            );
            info!(
                "   Cash: ${:.2}, Positions: {}, Realized PnL: ${:.4}",
                ledger.cash_balance(),
                ledger.open_position_count(),
                ledger.realized_pnl_total()
            );
            ledger
        }
        None => {
            info!(
                "📂 [PERSISTENCE] No previous ledger found, starting fresh with ${:.2}",
                config.portfolio.starting_balance
            );
            PortfolioLedger::new(config.portfolio.starting_balance, Utc::now().date_naive())
        }
    };

    let recorder = Arc::new(CsvRecorder::new(
        &config.recorder.trades_csv,
        &config.recorder.rejections_csv,
    )?);

    let mut engine = TradingEngine::new(config.clone(), recorder, ledger);

    // Seed price histories so the evaluator does not start cold
    engine.backfill_history(&client).await?;

    // Metrics tracking
    let mut metrics = AppMetrics::default();

    // Shutdown signal
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Shutdown signal received");
        shutdown_clone.store(true, Ordering::SeqCst);
    });

    info!(
        "🚀 Starting decision loop ({}s cycles)...",
        config.engine.cycle_interval_secs
    );
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut last_status_log = Utc::now();

    while !shutdown.load(Ordering::SeqCst) {
        let cycle_start = Utc::now();

        match engine.run_cycle(&client, cycle_start).await {
            Ok(report) => {
                metrics.cycles_completed += 1;
                metrics.trades_applied += report.trades_applied() as u64;
                metrics.rejections_recorded += report.rejections.len() as u64;
                metrics.vetoes_observed += report.vetoes as u64;
                if report.rolled_over {
                    metrics.rollovers += 1;
                    info!(
                        "📅 [LEDGER] Rolled over to trading day {}",
                        engine.ledger().day_start_date()
                    );
                }

                // Durable copies of everything the cycle produced
                for event in &report.events {
                    if let Err(e) = persistence.record_event(event) {
                        warn!(
                            "⚠️  [PERSISTENCE] Failed to record trade #{}: {}",
                            event.trade_id, e
                        );
                    }
                }
                for rejection in &report.rejections {
                    if let Err(e) = persistence.record_rejection(rejection) {
                        warn!("⚠️  [PERSISTENCE] Failed to record rejection: {}", e);
                    }
                }
                if let Err(e) = persistence.save_ledger(engine.ledger(), cycle_start) {
                    warn!("⚠️  [PERSISTENCE] Failed to save ledger: {}", e);
                } else if !report.events.is_empty() {
                    debug!("💾 [PERSISTENCE] Ledger checkpoint saved");
                }
            }
            Err(e) => {
                metrics.errors_count += 1;
                match e.downcast_ref::<MarketDataError>() {
                    Some(data_err) => {
                        warn!("⚠️  [SCAN] Venue unreachable, skipping cycle: {}", data_err);
                    }
                    None => {
                        error!("❌ [CYCLE] Cycle failed: {:#}", e);
                    }
                }
            }
        }

        // Periodic status report
        let now = Utc::now();
        if (now - last_status_log).num_minutes() >= 30 {
            log_status(&metrics, &engine);
            last_status_log = now;
        }

        let elapsed = (Utc::now() - cycle_start).num_milliseconds();
        debug!("⏱️  Cycle completed in {}ms", elapsed);

        // Sleep in one-second slices so Ctrl-C lands between slices, not
        // after a full interval
        let resume_at =
            Utc::now() + chrono::Duration::seconds(config.engine.cycle_interval_secs as i64);
        while !shutdown.load(Ordering::SeqCst) && Utc::now() < resume_at {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    // Save final state before shutdown
    info!("💾 [PERSISTENCE] Saving ledger before shutdown...");
    if let Err(e) = persistence.save_ledger(engine.ledger(), Utc::now()) {
        error!("❌ [PERSISTENCE] Failed to save final ledger: {}", e);
    } else {
        info!("✅ [PERSISTENCE] Final ledger saved");
    }

    let summary = engine.ledger().daily_summary(engine.marks());
    info!(
        "🧾 Daily summary for {}: start ${:.2}, end ${:.2}, trades {}, realized ${:.4}",
        summary.date,
        summary.starting_balance,
        summary.ending_balance,
        summary.trades_count,
        summary.realized_pnl
    );

    // Final status log
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("🏁 Final Statistics:");
    log_status(&metrics, &engine);

    info!("👋 Momentum paper trader shutdown complete");
    Ok(())
}

/// Initialize comprehensive logging with file output.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    // Create logs directory
    std::fs::create_dir_all("logs")?;

    // File appender for detailed logs
    let file_appender = tracing_appender::rolling::hourly("logs", "paper-trader.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(_guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("momentum_paper_trader=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Load configuration, apply any CLI profile, and validate. Validation
/// failures are fatal at startup.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load_from(cli.config.as_deref())?;
    if let Some(profile) = cli.profile {
        config.apply_profile(profile.into());
        info!("🔧 Applied {:?} parameter profile", profile);
    }
    config.validate()?;
    Ok(config)
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Data Source: {}", config.market.base_url);
    info!("   Universe: {} symbols", config.market.universe.len());
    info!("   Cycle Interval: {}s", config.engine.cycle_interval_secs);
    info!(
        "   Starting Balance: ${}",
        config.portfolio.starting_balance
    );
    info!("   Max Positions: {}", config.risk.max_concurrent_positions);
    info!(
        "   Position Cap: {:.0}% of cash",
        config.risk.max_position_fraction * dec!(100)
    );
    info!(
        "   Daily Loss Limit: {:.1}%",
        config.risk.max_daily_loss_fraction * dec!(100)
    );
    info!("   Cooldown: {}s", config.risk.cooldown_duration_secs);
    info!(
        "   Entry Threshold: {}% over {} snapshots",
        config.signal.entry_threshold_pct, config.signal.short_window
    );
    info!(
        "   Take Profit / Stop Loss: {}% / {}%",
        config.signal.take_profit_pct, config.signal.stop_loss_pct
    );
}

/// Log a comprehensive status report with account and activity counters.
fn log_status(metrics: &AppMetrics, engine: &TradingEngine) {
    let runtime = Utc::now() - metrics.start_time;
    let hours = runtime.num_hours();
    let minutes = runtime.num_minutes() % 60;

    let ledger = engine.ledger();
    let marks = engine.marks();
    let unrealized = ledger.unrealized_pnl(marks);
    let equity = ledger.equity(marks);

    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║                    STATUS REPORT                           ║");
    info!("╠════════════════════════════════════════════════════════════╣");
    info!(
        "║ Runtime: {}h {}m                                           ",
        hours, minutes
    );
    info!("╠════════════════════════════════════════════════════════════╣");
    info!("║ 💰 ACCOUNT                                                 ║");
    info!(
        "║    Initial Balance:     ${:>12.2}                     ",
        ledger.initial_balance()
    );
    info!(
        "║    Cash Balance:        ${:>12.2}                     ",
        ledger.cash_balance()
    );
    info!(
        "║    Unrealized PnL:      ${:>12.4}                     ",
        unrealized
    );
    info!(
        "║    Realized PnL:        ${:>12.4}                     ",
        ledger.realized_pnl_total()
    );
    info!(
        "║    Total Equity:        ${:>12.2}                     ",
        equity
    );
    info!("╠════════════════════════════════════════════════════════════╣");
    info!("║ 📈 ACTIVITY                                                ║");
    info!(
        "║    Cycles:             {:>6}                              ",
        metrics.cycles_completed
    );
    info!(
        "║    Trades Applied:     {:>6}                              ",
        metrics.trades_applied
    );
    info!(
        "║    Rejections:         {:>6}                              ",
        metrics.rejections_recorded
    );
    info!(
        "║    Risk Vetoes:        {:>6}                              ",
        metrics.vetoes_observed
    );
    info!(
        "║    Day Rollovers:      {:>6}                              ",
        metrics.rollovers
    );
    info!(
        "║    Errors:             {:>6}                              ",
        metrics.errors_count
    );
    info!("╠════════════════════════════════════════════════════════════╣");
    info!("║ 📅 TRADING DAY                                             ║");
    info!(
        "║    Day Start Balance:   ${:>12.2}                     ",
        ledger.day_start_balance()
    );
    info!(
        "║    Daily Return:       {:>6.2}%                            ",
        ledger.daily_return_fraction(marks) * dec!(100)
    );
    info!(
        "║    Trades Today:       {:>6}                              ",
        ledger.trades_today()
    );
    info!(
        "║    Consecutive Losses: {:>6}                              ",
        ledger.consecutive_losses()
    );
    info!(
        "║    Open Positions:     {:>6}                              ",
        ledger.open_position_count()
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    if !ledger.positions().is_empty() {
        let mut positions: Vec<_> = ledger.positions().iter().collect();
        positions.sort_by(|a, b| a.0.cmp(b.0));

        info!("╔════════════════════════════════════════════════════════════╗");
        info!("║                   OPEN POSITIONS                           ║");
        info!("╠════════════════════════════════════════════════════════════╣");
        for (symbol, position) in positions {
            let mark = marks.get(symbol).copied().unwrap_or(position.entry_price);
            let pnl = (mark - position.entry_price) * position.quantity;
            let status = if pnl >= Decimal::ZERO { "✅" } else { "⚠️" };
            info!(
                "║ {} {:12} | {} @ ${:.2} | Unreal: ${:>8.4}        ",
                status, symbol, position.quantity, position.entry_price, pnl
            );
        }
        info!("╚════════════════════════════════════════════════════════════╝");
    }
}

/// Replay a recorded snapshot CSV through the decision pipeline.
fn run_replay(data_path: &str, report_path: Option<&str>, config: Config) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║              REPLAY MODE                                   ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    info!("📊 Loading snapshots from: {}", data_path);
    let loader = CsvSnapshotLoader::new(data_path)?;

    if let Some((start, end)) = loader.range() {
        info!(
            "   Data range: {} to {}",
            start.format("%Y-%m-%d %H:%M"),
            end.format("%Y-%m-%d %H:%M")
        );
    }
    info!("   Symbols: {}", loader.symbols().len());
    info!("   Batches: {}", loader.len());
    info!(
        "💰 Initial balance: ${:.2}",
        config.portfolio.starting_balance
    );

    let engine = ReplayEngine::new(config);
    let outcome = engine.run(loader.batches())?;

    println!("\n{}", outcome.metrics.summary());

    if let Some(path) = report_path {
        outcome.write_equity_csv(path)?;
        info!("📁 Equity curve saved to: {}", path);
    }

    Ok(())
}

/// Show ledger status from persisted state.
fn show_status(db_path: &str, verbose: bool) -> Result<()> {
    use std::path::Path;

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              PAPER TRADER STATUS                           ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if !Path::new(db_path).exists() {
        println!("\n❌ Database not found: {}", db_path);
        println!("   The trader has not been started yet, or the database path is incorrect.");
        return Ok(());
    }

    let persistence = PersistenceManager::new(db_path)?;

    let Some(ledger) = persistence.load_ledger()? else {
        println!("\n❌ No saved ledger found in database.");
        println!("   The trader may not have run yet.");
        return Ok(());
    };

    // Calculate stats
    let realized = ledger.realized_pnl_total();
    let pnl_pct = if ledger.initial_balance() > Decimal::ZERO {
        (realized / ledger.initial_balance()) * dec!(100)
    } else {
        Decimal::ZERO
    };

    println!("\n📊 Account Summary");
    println!("   ├─ Initial Balance:   ${:.2}", ledger.initial_balance());
    println!("   ├─ Cash Balance:      ${:.2}", ledger.cash_balance());
    println!("   ├─ Realized PnL:      ${:.4} ({:+.2}%)", realized, pnl_pct);
    println!("   ├─ Trading Day:       {}", ledger.day_start_date());
    println!(
        "   └─ Day Start Balance: ${:.2}",
        ledger.day_start_balance()
    );

    println!("\n📈 Activity");
    println!("   ├─ Recorded Trades:   {}", persistence.event_count()?);
    println!("   ├─ Rejections:        {}", persistence.rejection_count()?);
    println!("   ├─ Trades Today:      {}", ledger.trades_today());
    println!("   └─ Open Positions:    {}", ledger.open_position_count());

    if !ledger.positions().is_empty() {
        println!("\n🔓 Open Positions");
        let mut positions: Vec<_> = ledger.positions().iter().collect();
        positions.sort_by(|a, b| a.0.cmp(b.0));
        for (symbol, position) in positions {
            println!("   ┌─ {}", symbol);
            println!(
                "   ├─ Quantity: {} @ ${:.2}",
                position.quantity, position.entry_price
            );
            println!(
                "   └─ Opened:   {}",
                position.opened_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
    }

    if verbose {
        let events = persistence.recent_events(10)?;
        if !events.is_empty() {
            println!("\n🧾 Recent Trades");
            for event in &events {
                println!(
                    "   ├─ #{} {} {} {} @ ${:.2} | pnl {:+.4} | cash ${:.2}",
                    event.trade_id,
                    event.side,
                    event.symbol,
                    event.quantity,
                    event.price,
                    event.realized_pnl_delta,
                    event.cash_balance_after
                );
            }
        }

        if !ledger.cooldowns().is_empty() {
            println!("\n⏳ Cooldowns (last losing exit)");
            let mut cooldowns: Vec<_> = ledger.cooldowns().iter().collect();
            cooldowns.sort_by(|a, b| a.0.cmp(b.0));
            for (symbol, lost_at) in cooldowns {
                println!(
                    "   ├─ {}: {}",
                    symbol,
                    lost_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
        }
    }

    println!();
    Ok(())
}
