//! Deposit filtering
//!
//! Selects the transactions of a block that are addressed to the tracked
//! contract. Addresses are compared as parsed 20-byte values, so the hex
//! case used by the provider or the operator does not matter.

use crate::types::Transaction;
use alloy_primitives::Address;

/// Check if a transaction is sent to `target`.
///
/// Contract creations (no recipient) never match.
pub fn is_deposit(tx: &Transaction, target: Address) -> bool {
    tx.to == Some(target)
}

/// Return the transactions addressed to `target`, in block order.
pub fn filter_deposits(transactions: &[Transaction], target: Address) -> Vec<&Transaction> {
    transactions
        .iter()
        .filter(|tx| is_deposit(tx, target))
        .collect()
}
