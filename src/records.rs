//! Deposit records
//!
//! A deposit record is an immutable fact about a transaction sent to the
//! tracked contract. Records are postcard-encoded in the store and
//! rendered as camelCase JSON by the CLI, matching the field names
//! existing consumers of the deposit log expect.

use crate::types::Transaction;
use alloy_primitives::U256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A deposit observed on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositRecord {
    /// Height of the containing block
    pub block_number: u64,
    /// Timestamp of the containing block
    pub block_timestamp: DateTime<Utc>,
    /// Gas price of the transaction in wei, as decimal text.
    ///
    /// This is the price bid per unit of gas, not the total fee paid
    /// (which would need `gasUsed` from the receipt).
    pub fee: String,
    /// Transaction hash, `0x`-prefixed lowercase hex. Natural key.
    pub hash: String,
    /// Raw transaction input, `0x`-prefixed hex. Not validated.
    pub pubkey: String,
}

impl DepositRecord {
    /// Hash in the canonical form used as the store's uniqueness key.
    pub fn hash_key(&self) -> String {
        normalize_hash(&self.hash)
    }
}

/// Lowercase a transaction hash and make sure it carries a `0x` prefix.
pub fn normalize_hash(hash: &str) -> String {
    let hash = hash.trim().to_ascii_lowercase();
    if hash.starts_with("0x") {
        hash
    } else {
        format!("0x{}", hash)
    }
}

/// Map a matched transaction and its block metadata to a deposit record.
///
/// Transactions without `gasPrice` fall back to `maxFeePerGas`, then zero.
pub fn to_record(
    tx: &Transaction,
    block_number: u64,
    block_timestamp: DateTime<Utc>,
) -> DepositRecord {
    let fee = tx
        .gas_price
        .or(tx.max_fee_per_gas)
        .unwrap_or(U256::ZERO);

    DepositRecord {
        block_number,
        block_timestamp,
        fee: fee.to_string(),
        hash: format!("0x{:x}", tx.hash),
        pubkey: format!("0x{}", hex::encode(&tx.input)),
    }
}
