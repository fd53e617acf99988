//! Error types for the tracking engine
//!
//! Each external boundary (chain provider, deposit store, notification
//! channel) gets its own error enum so the tracking loop can decide
//! per kind whether to abort the tick, skip a record, or just log.

use std::time::Duration;
use thiserror::Error;

/// Chain-data retrieval failed.
///
/// Aborts the remainder of the current tick. The next scheduled tick
/// retries from the last fully processed block.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP transport failure (connect, TLS, body read).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The node answered with a JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The node answered without a `result` field.
    #[error("RPC response to {0} missing 'result' field")]
    MissingResult(&'static str),

    /// The payload could not be decoded into the expected type.
    #[error("failed to decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },

    /// The node does not (yet) know the requested block.
    #[error("block {0} is not available")]
    BlockUnavailable(u64),

    /// The call did not complete within the configured bound.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
}

/// A record or checkpoint could not be durably stored or read back.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] rocksdb::Error),

    #[error("missing column family '{0}'")]
    MissingColumnFamily(&'static str),

    #[error("failed to encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: postcard::Error,
    },

    #[error("failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: postcard::Error,
    },

    #[error("corrupt {what}: {reason}")]
    Corrupt { what: &'static str, reason: String },

    #[error("store write lock poisoned")]
    LockPoisoned,
}

/// An outbound alert could not be delivered.
///
/// Only ever logged. Never affects the cursor or stored records.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Telegram API returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("notification queue is full")]
    QueueFull,

    #[error("notification worker has stopped")]
    QueueClosed,
}

/// Why a tick stopped before reaching the chain tip.
#[derive(Debug, Error)]
pub enum TickError {
    #[error("failed to fetch chain tip: {0}")]
    Tip(#[source] ProviderError),

    #[error("failed to fetch block {block}: {source}")]
    Block {
        block: u64,
        #[source]
        source: ProviderError,
    },

    #[error("halted at block {block} after failing to persist {hash}: {source}")]
    Persist {
        block: u64,
        hash: String,
        #[source]
        source: PersistenceError,
    },
}
