//! Deposit tracker - durable log of transactions sent to a contract
//!
//! Follows the chain tip block by block, records every transaction
//! addressed to the tracked contract (by default the beacon chain deposit
//! contract) in RocksDB, and sends a best-effort Telegram alert for each
//! new deposit.

pub mod cli;
pub mod config;
pub mod error;
pub mod filter;
pub mod keys;
pub mod notifier;
pub mod records;
pub mod rpc;
pub mod scheduler;
pub mod store;
pub mod tracker;
pub mod types;

// Re-export the main types for convenience
pub use error::{NotificationError, PersistenceError, ProviderError, TickError};
pub use notifier::{Notifier, TelegramConfig, TelegramNotifier};
pub use records::DepositRecord;
pub use rpc::{ChainClient, RpcClient};
pub use scheduler::Scheduler;
pub use store::{AppendOutcome, DepositStore, RocksDepositStore};
pub use tracker::{ScanCursor, TrackingLoop};
