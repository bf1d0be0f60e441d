//! Solana Autotrader
//!
//! Standing-instruction engine: limit orders with protective exits,
//! dollar-cost-average schedules and copy-trading mirrors, evaluated
//! continuously against live prices.

mod api;
mod engine;
mod error;
mod models;
mod plan;
mod store;
mod trading;
mod wallet;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use rust_decimal_macros::dec;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::{BroadcastFeed, HttpPriceOracle, PriceOracle, SimulatedGateway, StaticPriceOracle};
use crate::engine::Engine;
use crate::models::{Frequency, InstructionKind};
use crate::plan::InstructionPlan;
use crate::trading::{scheduler, EngineConfig};
use crate::wallet::Wallet;

/// Standing-instruction trading engine CLI.
#[derive(Parser)]
#[command(name = "autotrader")]
#[command(about = "Limit orders, DCA schedules and copy trading on autopilot", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new wallet
    Wallet,

    /// Preview the execution times of a DCA schedule
    Schedule {
        /// daily, weekly or monthly
        #[arg(short, long, default_value = "daily")]
        frequency: String,

        /// Total run length, e.g. 7days, 4weeks, 3months
        #[arg(short, long, default_value = "7days")]
        duration: String,

        /// First execution (RFC 3339); defaults to now
        #[arg(short, long)]
        start: Option<DateTime<Utc>>,
    },

    /// Show current configuration
    Config,

    /// Load an instruction plan and run the engine until Ctrl+C
    Run {
        /// Instruction plan (JSON)
        #[arg(short, long)]
        plan: PathBuf,

        /// Price API base URL; sample prices are used when omitted
        #[arg(long, env = "AUTOTRADER_PRICE_URL")]
        price_url: Option<String>,

        /// Extra tokens to quote besides those in the plan
        #[arg(short, long, value_delimiter = ',')]
        tokens: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = EngineConfig::from_env();

    match cli.command {
        Commands::Wallet => {
            let generated = Wallet::generate();

            println!("\n=== New Wallet ===");
            println!("Address:     {}", generated.address);
            println!("Private Key: {}", generated.private_key);
            println!("\nStore the key as WALLET_PRIVATE_KEY in your .env to use it with 'autotrader run'.");
        }

        Commands::Schedule {
            frequency,
            duration,
            start,
        } => {
            let frequency: Frequency = frequency.parse()?;
            let start = start.unwrap_or_else(Utc::now);
            let intervals = scheduler::schedule(start, frequency, &duration)?;

            println!("\n=== DCA Schedule ({} for {}) ===", frequency, duration);
            println!("{:>4}  {}", "#", "EXECUTION TIME");
            println!("{}", "-".repeat(32));
            for (i, at) in intervals.iter().enumerate() {
                println!("{:>4}  {}", i + 1, at.format("%Y-%m-%d %H:%M UTC"));
            }
            println!("\nTotal executions: {}", intervals.len());
        }

        Commands::Config => {
            println!("\n=== Engine Configuration ===\n");
            println!("Cadence:");
            println!("  Order Check Interval: {}s", config.order_check_interval_secs);
            println!("  DCA Check Interval:   {}s", config.dca_check_interval_secs);

            println!("\nExecution:");
            println!("  Default Slippage:     {}%", config.default_slippage * dec!(100));

            println!("\nCopy Trading:");
            println!("  Stop Loss:            {}%", config.copy_stop_loss_pct * dec!(100));
            println!("  Activity Buffer:      {}", config.activity_buffer);
        }

        Commands::Run {
            plan,
            price_url,
            tokens,
        } => {
            let plan = InstructionPlan::load(&plan)?;
            if plan.is_empty() {
                println!("Plan has no instructions. Nothing to run.");
                return Ok(());
            }

            let oracle: Arc<dyn PriceOracle> = match price_url {
                Some(url) => {
                    let mut watched = plan.tokens();
                    watched.extend(tokens);
                    watched.sort();
                    watched.dedup();
                    info!(url = %url, tokens = watched.len(), "Using HTTP price oracle");
                    Arc::new(HttpPriceOracle::with_base_url(url, watched)?)
                }
                None => {
                    warn!("No price URL configured, using sample prices");
                    Arc::new(StaticPriceOracle::with_sample_prices())
                }
            };

            let feed = Arc::new(BroadcastFeed::new(config.activity_buffer));
            let engine = Engine::new(config, Arc::new(SimulatedGateway::new()), oracle)
                .with_feed(feed);

            let wallet = Wallet::from_env()?;
            let address = engine.connect_wallet(wallet).await;

            let applied = plan.apply(&engine).await?;

            println!("\n=== Solana Autotrader ===");
            println!("Wallet:         {}", address);
            println!("Mode:           DRY RUN (simulated fills)");
            println!("Limit Orders:   {}", applied.orders.len());
            println!("DCA Strategies: {}", applied.strategies.len());
            println!("Copy Configs:   {}", applied.copies.len());
            println!("\nPress Ctrl+C to stop.\n");

            if let Err(e) = engine.run().await {
                tracing::error!(error = %e, "Engine error");
            }

            // Show final stats
            let stats = engine.get_stats().await;
            println!("\n{}", stats);

            println!("{:<42} {:<12} {:>10}", "INSTRUCTION", "KIND", "STATUS");
            println!("{}", "-".repeat(66));
            for kind in [InstructionKind::LimitOrder, InstructionKind::Dca, InstructionKind::CopyTrade] {
                for snapshot in engine.list(kind).await {
                    println!(
                        "{:<42} {:<12} {:>10}",
                        truncate(snapshot.id(), 40),
                        kind.id_prefix(),
                        snapshot.status_label()
                    );
                }
            }
        }
    }

    Ok(())
}

/// Truncate a string to max length with ellipsis.
fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len.saturating_sub(3)])
    }
}
