//! Deposit tracker binary
//!
//! Polls the chain tip on a fixed interval, stores every transaction sent
//! to the tracked contract, and alerts a Telegram chat for each new one.

use anyhow::{Context, Result};
use clap::Parser;
use deposit_tracker::config::RawTrackerConfig;
use deposit_tracker::notifier::DEFAULT_QUEUE_CAPACITY;
use deposit_tracker::tracker::initial_cursor;
use deposit_tracker::{RocksDepositStore, RpcClient, Scheduler, TelegramNotifier, TrackingLoop};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const NOTIFIER_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Deposit contract tracker
#[derive(Parser)]
#[command(name = "tracker")]
#[command(about = "Record transactions sent to a contract and send alerts for new ones")]
struct Args {
    /// RPC endpoint URL (e.g., https://eth.llamarpc.com)
    #[arg(short, long, env = "RPC_URL")]
    rpc_url: Option<String>,

    /// Alchemy API key, used when no RPC URL is given
    #[arg(long, env = "ALCHEMY_API_KEY", hide_env_values = true)]
    alchemy_api_key: Option<String>,

    /// Contract address to track (defaults to the beacon deposit contract)
    #[arg(short, long, env = "DEPOSIT_CONTRACT")]
    contract: Option<String>,

    /// Path to RocksDB database directory
    #[arg(short, long, env = "DEPOSIT_DB_PATH", default_value = "./deposits_db")]
    db_path: PathBuf,

    /// Seconds between ticks
    #[arg(long, default_value_t = 5)]
    poll_interval_secs: u64,

    /// Upper bound in seconds for each provider call
    #[arg(long, default_value_t = 10)]
    rpc_timeout_secs: u64,

    /// First block to scan (defaults to the tip at startup)
    #[arg(long)]
    start_block: Option<u64>,

    /// Resume from the cursor checkpoint stored in the database
    #[arg(long)]
    resume: bool,

    /// Do not advance past a block whose deposit failed to persist
    #[arg(long)]
    halt_on_persist_failure: bool,

    /// Telegram bot token
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    telegram_bot_token: Option<String>,

    /// Telegram chat id receiving alerts
    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    telegram_chat_id: Option<String>,

    /// Signature line appended to each alert
    #[arg(long, env = "NOTIFY_SIGNATURE")]
    signature: Option<String>,
}

impl From<Args> for RawTrackerConfig {
    fn from(args: Args) -> Self {
        RawTrackerConfig {
            rpc_url: args.rpc_url,
            alchemy_api_key: args.alchemy_api_key,
            contract: args.contract,
            db_path: args.db_path,
            poll_interval_secs: args.poll_interval_secs,
            rpc_timeout_secs: args.rpc_timeout_secs,
            start_block: args.start_block,
            resume: args.resume,
            halt_on_persist_failure: args.halt_on_persist_failure,
            telegram_bot_token: args.telegram_bot_token,
            telegram_chat_id: args.telegram_chat_id,
            signature: args.signature,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = RawTrackerConfig::from(Args::parse())
        .build()
        .context("Invalid configuration")?;

    info!("Starting deposit tracker");
    config.log_summary();

    let rpc = RpcClient::new(config.rpc_url.clone(), config.settings.rpc_timeout)
        .context("Failed to create RPC client")?;

    let store = RocksDepositStore::open(&config.db_path)
        .with_context(|| format!("Failed to open database at {:?}", config.db_path))?;

    let cursor = initial_cursor(&store, config.start_block, config.resume)
        .context("Failed to load cursor checkpoint")?;
    if cursor.is_unset() {
        info!("Cursor unset, scanning starts at the current tip");
    } else {
        info!("Resuming after block {}", cursor.last_processed_block());
    }

    let (notifier, notifier_task) =
        TelegramNotifier::spawn(config.telegram.clone(), DEFAULT_QUEUE_CAPACITY)
            .context("Failed to start notifier")?;

    let tracker = TrackingLoop::new(rpc, store, notifier, config.contract, config.settings.clone())
        .with_cursor(cursor);
    let scheduler = Scheduler::new(tracker, config.poll_interval);

    // Handle Ctrl+C gracefully
    tokio::select! {
        _ = scheduler.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    // Wait for an in-flight tick before closing the store
    let tracker = scheduler.tracker();
    let last = tracker.lock().await.cursor().last_processed_block();

    // Dropping the loop drops the notifier, which closes the queue
    drop(tracker);
    drop(scheduler);
    match tokio::time::timeout(NOTIFIER_DRAIN_TIMEOUT, notifier_task).await {
        Ok(_) => info!("Pending notifications delivered"),
        Err(_) => warn!(
            "Notifications still pending after {:?}, dropping them",
            NOTIFIER_DRAIN_TIMEOUT
        ),
    }

    info!("Tracker stopped at block {}", last);
    Ok(())
}
