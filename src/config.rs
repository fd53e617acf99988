//! Tracker configuration
//!
//! Assembles the settings the tracker binary needs from command-line
//! arguments and environment variables, and parses addresses given by
//! the operator.

use crate::notifier::TelegramConfig;
use crate::tracker::{PersistFailurePolicy, TrackerSettings};
use alloy_primitives::Address;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Ethereum beacon chain deposit contract on mainnet.
pub const DEFAULT_DEPOSIT_CONTRACT: &str = "0x00000000219ab540356cBB839Cbe05303d7705Fa";

/// Default signature line appended to every notification.
pub const DEFAULT_SIGNATURE: &str = "- deposit-tracker";

const ALCHEMY_MAINNET_URL: &str = "https://eth-mainnet.g.alchemy.com/v2";

/// Everything needed to start the tracker.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// JSON-RPC endpoint of the chain-data provider
    pub rpc_url: String,
    /// Contract whose incoming transactions are recorded
    pub contract: Address,
    /// RocksDB directory
    pub db_path: PathBuf,
    /// Delay between scheduled ticks
    pub poll_interval: Duration,
    /// Scan starts at this block instead of the tip at startup
    pub start_block: Option<u64>,
    /// Resume from the cursor checkpoint stored in the database
    pub resume: bool,
    pub settings: TrackerSettings,
    pub telegram: TelegramConfig,
}

impl TrackerConfig {
    /// Log the effective configuration without secrets.
    pub fn log_summary(&self) {
        tracing::info!("Contract: 0x{:x}", self.contract);
        tracing::info!("Database: {:?}", self.db_path);
        tracing::info!(
            "Poll interval: {:?}, RPC timeout: {:?}, on persist failure: {:?}",
            self.poll_interval,
            self.settings.rpc_timeout,
            self.settings.persist_failure_policy
        );
        if !self.telegram.is_configured() {
            tracing::warn!("Telegram not configured, notifications will only be logged");
        }
    }
}

/// Raw, unvalidated settings as collected by the command line.
#[derive(Debug, Clone, Default)]
pub struct RawTrackerConfig {
    pub rpc_url: Option<String>,
    pub alchemy_api_key: Option<String>,
    pub contract: Option<String>,
    pub db_path: PathBuf,
    pub poll_interval_secs: u64,
    pub rpc_timeout_secs: u64,
    pub start_block: Option<u64>,
    pub resume: bool,
    pub halt_on_persist_failure: bool,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub signature: Option<String>,
}

impl RawTrackerConfig {
    /// Validate and convert into a [`TrackerConfig`].
    pub fn build(self) -> Result<TrackerConfig> {
        let rpc_url = resolve_rpc_url(self.rpc_url, self.alchemy_api_key)?;

        let contract_str = self
            .contract
            .as_deref()
            .unwrap_or(DEFAULT_DEPOSIT_CONTRACT);
        let contract = parse_address(contract_str)
            .with_context(|| format!("Invalid contract address: {}", contract_str))?;

        if self.poll_interval_secs == 0 {
            anyhow::bail!("Poll interval must be at least one second");
        }
        if self.rpc_timeout_secs == 0 {
            anyhow::bail!("RPC timeout must be at least one second");
        }
        if self.start_block.is_some() && self.resume {
            anyhow::bail!("--start-block and --resume are mutually exclusive");
        }

        let persist_failure_policy = if self.halt_on_persist_failure {
            PersistFailurePolicy::HaltBlock
        } else {
            PersistFailurePolicy::SkipRecord
        };

        Ok(TrackerConfig {
            rpc_url,
            contract,
            db_path: self.db_path,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            start_block: self.start_block,
            resume: self.resume,
            settings: TrackerSettings {
                rpc_timeout: Duration::from_secs(self.rpc_timeout_secs),
                persist_failure_policy,
            },
            telegram: TelegramConfig {
                bot_token: self.telegram_bot_token.unwrap_or_default(),
                chat_id: self.telegram_chat_id.unwrap_or_default(),
                signature: self
                    .signature
                    .unwrap_or_else(|| DEFAULT_SIGNATURE.to_string()),
            },
        })
    }
}

/// Pick the provider endpoint.
///
/// An explicit RPC URL wins; otherwise an Alchemy API key selects the
/// Alchemy mainnet endpoint.
pub fn resolve_rpc_url(rpc_url: Option<String>, alchemy_api_key: Option<String>) -> Result<String> {
    match (rpc_url, alchemy_api_key) {
        (Some(url), _) if !url.trim().is_empty() => Ok(url.trim().to_string()),
        (_, Some(key)) if !key.trim().is_empty() => {
            Ok(format!("{}/{}", ALCHEMY_MAINNET_URL, key.trim()))
        }
        _ => anyhow::bail!("No provider configured: set --rpc-url or ALCHEMY_API_KEY"),
    }
}

/// Parse an address from a hex string.
///
/// Accepts addresses with or without 0x prefix, in any letter case.
pub fn parse_address(s: &str) -> Result<Address> {
    let s = s.trim();
    let s = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    let bytes = hex::decode(s).with_context(|| format!("Invalid hex address: {}", s))?;

    if bytes.len() != 20 {
        anyhow::bail!("Address must be 20 bytes (40 hex chars), got {} bytes", bytes.len());
    }

    Ok(Address::from_slice(&bytes))
}
