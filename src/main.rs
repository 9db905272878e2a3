//! Margin Rebalancer - Main Entry Point
//!
//! Drives the polling loop: snapshot the margin account, run the sell
//! pass, run the buy pass, persist the allowance ledger, sleep.

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use margin_rebalancer::config::Config;
use margin_rebalancer::exchange::{BinanceClient, MarginExchange};
use margin_rebalancer::ledger::AllowanceLedger;
use margin_rebalancer::notify::TelegramNotifier;
use margin_rebalancer::persistence::LedgerStore;
use margin_rebalancer::strategy::{
    BalanceSnapshotter, CycleOutcome, RebalanceEngine, ValuedPosition,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Margin Rebalancer CLI
#[derive(Parser)]
#[command(name = "margin-rebalancer")]
#[command(version, about = "Threshold rebalancing for a Binance cross-margin account")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the persisted allowance ledger and recent trades
    Status {
        /// Path to the SQLite database
        #[arg(short, long, default_value = "data/rebalancer.db")]
        db: String,

        /// Number of recent trades to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    if let Some(Commands::Status { db, limit }) = cli.command {
        return show_status(&db, limit);
    }

    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║          Margin Rebalancer v{}                          ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    // Load configuration
    let config = Config::load()?;
    config.validate()?;
    log_config(&config);

    // Initialize the exchange client and align request timestamps
    let client = BinanceClient::new(&config.binance, &config.trading.quote_asset)?;
    client.sync_time().await;

    // Open storage
    if let Some(parent) = Path::new(&config.storage.db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = LedgerStore::new(&config.storage.db_path)?;

    // Load the ledger, or run the one-time first scan
    let mut ledger = match store.load_ledger()? {
        Some(ledger) => {
            info!(assets = ledger.len(), "Allowance ledger restored");
            ledger
        }
        None => {
            let ledger = AllowanceLedger::bootstrap(&client, &config.trading).await?;
            store.save_ledger(&ledger)?;
            ledger
        }
    };

    let notifier = TelegramNotifier::new(&config.telegram)?;
    let snapshotter = BalanceSnapshotter::new(config.trading.quote_asset.clone());
    let mut engine = RebalanceEngine::new(
        &config.trading,
        Utc::now().date_naive(),
        StdRng::from_entropy(),
    );

    // Shutdown signal
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        shutdown_clone.store(true, Ordering::SeqCst);
    });

    info!("Starting trading loop");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut cycle_count: u64 = 0;
    let mut last_summary = Utc::now();

    while !shutdown.load(Ordering::SeqCst) {
        cycle_count += 1;
        engine.roll_daily(Utc::now().date_naive());

        // One poll cycle. Any failure is logged and the loop continues
        // after the normal sleep; a transient outage never kills the bot.
        match run_cycle(
            &client,
            &snapshotter,
            &mut engine,
            &mut ledger,
            &store,
            &notifier,
            &config,
            cycle_count,
        )
        .await
        {
            Ok((outcome, positions)) => {
                let elapsed = (Utc::now() - last_summary).num_seconds();
                if outcome.traded() && elapsed >= config.schedule.summary_interval_secs as i64 {
                    log_summary(&positions, &config.trading.quote_asset);
                    last_summary = Utc::now();
                }
            }
            Err(e) => {
                error!(cycle = cycle_count, error = %e, "Cycle failed, retrying next interval");
            }
        }

        tokio::time::sleep(Duration::from_secs(config.schedule.check_interval_secs)).await;
    }

    // Persist allowance state one last time on the way out
    if let Err(e) = store.save_ledger(&ledger) {
        error!(error = %e, "Failed to save ledger on shutdown");
    }

    info!("Margin Rebalancer shutdown complete");
    Ok(())
}

/// One iteration: snapshot, sell pass, buy pass.
#[allow(clippy::too_many_arguments)]
async fn run_cycle<E: MarginExchange>(
    exchange: &E,
    snapshotter: &BalanceSnapshotter,
    engine: &mut RebalanceEngine<StdRng>,
    ledger: &mut AllowanceLedger,
    store: &LedgerStore,
    notifier: &TelegramNotifier,
    config: &Config,
    cycle_count: u64,
) -> Result<(CycleOutcome, Vec<ValuedPosition>)> {
    let positions = snapshotter.snapshot(exchange, ledger).await?;

    let available = positions
        .iter()
        .find(|p| p.asset == config.trading.quote_asset)
        .map(|p| p.quote_value)
        .unwrap_or_default();
    info!(
        "--- Cycle {} --- Available {}: {:.2} ---",
        cycle_count, config.trading.quote_asset, available
    );

    let sells = engine
        .sell_pass(exchange, &positions, ledger, store, notifier)
        .await?;
    let buys = engine
        .buy_pass(exchange, &positions, ledger, store, notifier)
        .await?;

    debug!(sells, buys, "Cycle complete");
    Ok((CycleOutcome { sells, buys }, positions))
}

/// Initialize comprehensive logging with file output.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    // Create logs directory
    std::fs::create_dir_all("logs")?;

    // File appender for detailed logs
    let file_appender = tracing_appender::rolling::hourly("logs", "margin-rebalancer.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(_guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("margin_rebalancer=debug".parse()?)
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

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("Configuration:");
    info!("   Quote Asset: {}", config.trading.quote_asset);
    info!("   Sell Threshold: {}", config.trading.sell_threshold);
    info!("   Buy Threshold: {}", config.trading.buy_threshold);
    info!("   Buy Sizing: {:?}", config.trading.buy_sizing);
    info!(
        "   Buy Range: {} - {}",
        config.trading.buy_min, config.trading.buy_max
    );
    info!("   Daily Buy Limit: {}", config.trading.daily_buy_limit);
    info!(
        "   Check Interval: {}s",
        config.schedule.check_interval_secs
    );
    if config.telegram.enabled {
        info!("   Telegram notifications: enabled");
    } else {
        warn!("   Telegram notifications: disabled");
    }
}

/// Log the per-asset summary after an active cycle.
fn log_summary(positions: &[ValuedPosition], quote_asset: &str) {
    info!(
        "--- Summary ({}) ---",
        Utc::now().format("%Y-%m-%d %H:%M:%S")
    );
    for position in positions {
        info!(
            "{}: balance={:.6}, value={:.2} {}",
            position.asset, position.net_quantity, position.quote_value, quote_asset
        );
    }
}

/// Show the persisted ledger and recent trades.
fn show_status(db_path: &str, limit: usize) -> Result<()> {
    if !Path::new(db_path).exists() {
        println!("Database not found: {}", db_path);
        println!("The rebalancer has not run yet, or the path is wrong.");
        return Ok(());
    }

    let store = LedgerStore::new(db_path)?;

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              ALLOWANCE LEDGER STATUS                       ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    match store.load_ledger()? {
        Some(ledger) => {
            println!("\nTracked assets: {}", ledger.len());
            for asset in ledger.iter() {
                match &asset.symbol {
                    Some(symbol) => println!(
                        "   {:8} {:12} rights={} sells={}",
                        asset.asset, symbol, asset.buy_rights, asset.sells_executed
                    ),
                    None => println!("   {:8} (no quote pair, excluded)", asset.asset),
                }
            }
        }
        None => {
            println!("\nNo ledger saved yet; the first scan has not run.");
        }
    }

    let trades = store.recent_trades(limit)?;
    if !trades.is_empty() {
        println!("\nRecent trades (newest first):");
        for trade in &trades {
            let daily = trade
                .daily_remaining
                .map(|v| format!(" daily_left={:.2}", v))
                .unwrap_or_default();
            println!(
                "   {} {:4} {:8} qty={:.6} price={:.6} value={:.2} left={:.2} rights={}{}",
                trade.timestamp.format("%Y-%m-%d %H:%M:%S"),
                trade.action.as_str(),
                trade.asset,
                trade.quantity,
                trade.price,
                trade.total_value,
                trade.remaining_value,
                trade.buy_rights,
                daily
            );
        }
    }

    println!();
    Ok(())
}
