//! CLI implementation for depositctl
//!
//! Operator access to the deposit store: list recorded deposits, look one
//! up, insert one by hand, and inspect or reset the tracker's cursor
//! checkpoint. All commands output pretty JSON.
//!
//! Read commands open the database read-only, so they work while the
//! tracker is running. Write commands need the tracker stopped.

use crate::records::{normalize_hash, DepositRecord};
use crate::store::{AppendOutcome, DepositStore, RocksDepositStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;

/// Deposit store CLI tool
#[derive(Parser)]
#[command(name = "depositctl")]
#[command(about = "Inspect and maintain the deposit store")]
pub struct Cli {
    /// Path to the RocksDB database directory
    #[arg(short, long, env = "DEPOSIT_DB_PATH", default_value = "./deposits_db")]
    db_path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List all recorded deposits
    List,
    /// Show the deposit with the given transaction hash
    Get {
        /// Transaction hash (hex, with or without 0x prefix)
        hash: String,
    },
    /// Record a deposit manually (no-op if the hash is already stored)
    Add {
        /// Block number
        #[arg(long)]
        block_number: u64,
        /// Block timestamp (RFC 3339 or Unix epoch seconds)
        #[arg(long)]
        timestamp: String,
        /// Gas price in wei (decimal)
        #[arg(long)]
        fee: String,
        /// Transaction hash (hex, with or without 0x prefix)
        #[arg(long)]
        hash: String,
        /// Raw transaction input (hex)
        #[arg(long, default_value = "0x")]
        pubkey: String,
    },
    /// Get the tracker's cursor checkpoint
    GetCursor,
    /// Overwrite the tracker's cursor checkpoint
    SetCursor {
        /// Last processed block number
        block: u64,
    },
}

impl Commands {
    fn is_read_only(&self) -> bool {
        matches!(
            self,
            Commands::List | Commands::Get { .. } | Commands::GetCursor
        )
    }
}

/// Parse a timestamp given as RFC 3339 text or Unix epoch seconds.
fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<i64>() {
        return DateTime::<Utc>::from_timestamp(secs, 0)
            .with_context(|| format!("Timestamp out of range: {}", secs));
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp: {}", s))
}

/// Validate a decimal fee string.
fn parse_fee(s: &str) -> Result<String> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        anyhow::bail!("Fee must be a decimal integer, got {:?}", s);
    }
    Ok(s.to_string())
}

/// Build a record from the `add` arguments.
fn manual_record(
    block_number: u64,
    timestamp: &str,
    fee: &str,
    hash: &str,
    pubkey: &str,
) -> Result<DepositRecord> {
    let hash = normalize_hash(hash);
    if hash.len() <= 2 {
        anyhow::bail!("Transaction hash must not be empty");
    }
    Ok(DepositRecord {
        block_number,
        block_timestamp: parse_timestamp(timestamp)?,
        fee: parse_fee(fee)?,
        hash,
        pubkey: pubkey.trim().to_string(),
    })
}

/// Execute a command against a store and return its JSON output.
fn execute(store: &impl DepositStore, command: Commands) -> Result<Value> {
    let result = match command {
        Commands::List => {
            let deposits = store.list_all().context("Failed to list deposits")?;
            json!({ "count": deposits.len(), "deposits": deposits })
        }
        Commands::Get { hash } => {
            let deposit = store.get(&hash).context("Failed to read deposit")?;
            json!({ "found": deposit.is_some(), "deposit": deposit })
        }
        Commands::Add {
            block_number,
            timestamp,
            fee,
            hash,
            pubkey,
        } => {
            let record = manual_record(block_number, &timestamp, &fee, &hash, &pubkey)?;
            let outcome = store.append(&record).context("Failed to store deposit")?;
            let status = match outcome {
                AppendOutcome::Inserted => {
                    tracing::info!("Manual deposit added: {}", record.hash);
                    "inserted"
                }
                AppendOutcome::AlreadyPresent => "already_present",
            };
            json!({ "status": status, "deposit": record })
        }
        Commands::GetCursor => {
            let cursor = store.load_cursor().context("Failed to read cursor")?;
            json!({ "last_processed_block": cursor })
        }
        Commands::SetCursor { block } => {
            store.save_cursor(block).context("Failed to write cursor")?;
            json!({ "status": "ok", "last_processed_block": block })
        }
    };
    Ok(result)
}

/// Run the CLI command and print JSON output.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let store = if cli.command.is_read_only() {
        RocksDepositStore::open_read_only(&cli.db_path)
            .with_context(|| format!("Failed to open database at {:?}", cli.db_path))?
    } else {
        RocksDepositStore::open(&cli.db_path).with_context(|| {
            format!(
                "Failed to open database at {:?} for writing (stop the tracker before modifying the store)",
                cli.db_path
            )
        })?
    };

    let result = execute(&store, cli.command)?;

    // Pretty print JSON
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
