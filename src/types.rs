//! Ethereum JSON-RPC types
//!
//! Blocks and transactions as returned by `eth_getBlockByNumber` with
//! full transaction objects. Only the fields the deposit tracker reads
//! are decoded; everything else in the payload is ignored.

use crate::error::ProviderError;
use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

/// Ethereum block with full transaction details.
#[derive(Debug, Clone, Deserialize)]
pub struct Block {
    /// Block number (hex quantity in JSON)
    #[serde(deserialize_with = "deserialize_hex_u64")]
    pub number: u64,

    /// Block timestamp, Unix epoch seconds (hex quantity in JSON)
    #[serde(deserialize_with = "deserialize_hex_u64")]
    pub timestamp: u64,

    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Block timestamp as a UTC point in time.
    pub fn timestamp_utc(&self) -> Result<DateTime<Utc>, ProviderError> {
        i64::try_from(self.timestamp)
            .ok()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .ok_or_else(|| ProviderError::Decode {
                what: "block timestamp",
                reason: format!("{} is out of range", self.timestamp),
            })
    }
}

/// Ethereum transaction.
#[derive(Debug, Clone, Deserialize)]
pub struct Transaction {
    #[serde(deserialize_with = "deserialize_hex_b256")]
    pub hash: B256,

    /// Recipient address (None for contract creation)
    #[serde(default, deserialize_with = "deserialize_hex_address_opt")]
    pub to: Option<Address>,

    /// Gas price. Nodes report the effective price for EIP-1559 transactions.
    #[serde(rename = "gasPrice", default, deserialize_with = "deserialize_hex_u256_opt")]
    pub gas_price: Option<U256>,

    #[serde(rename = "maxFeePerGas", default, deserialize_with = "deserialize_hex_u256_opt")]
    pub max_fee_per_gas: Option<U256>,

    /// Call data ("0x" for plain transfers)
    #[serde(default, deserialize_with = "deserialize_hex_bytes")]
    pub input: Vec<u8>,
}

// Hex deserialization helpers

/// Strip the `0x` prefix and pad odd-length strings with a leading zero.
///
/// Nodes return quantities without leading zeros ("0x1"), which `hex`
/// refuses to decode as-is.
fn normalize_hex(s: &str) -> String {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.len() % 2 == 1 {
        format!("0{}", s)
    } else {
        s.to_string()
    }
}

fn decode_hex<E: serde::de::Error>(s: &str) -> Result<Vec<u8>, E> {
    hex::decode(normalize_hex(s)).map_err(E::custom)
}

fn decode_fixed<E: serde::de::Error>(s: &str, len: usize, what: &str) -> Result<Vec<u8>, E> {
    let bytes = decode_hex::<E>(s)?;
    if bytes.len() != len {
        return Err(E::custom(format!(
            "Expected {} bytes for {}, got {}",
            len,
            what,
            bytes.len()
        )));
    }
    Ok(bytes)
}

/// Parse a hex quantity string ("0x1b4") into a u64.
pub(crate) fn parse_quantity(s: &str) -> Result<u64, std::num::ParseIntError> {
    u64::from_str_radix(s.strip_prefix("0x").unwrap_or(s), 16)
}

fn deserialize_hex_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_quantity(&s).map_err(serde::de::Error::custom)
}

fn deserialize_hex_u256_opt<'de, D>(deserializer: D) -> Result<Option<U256>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(s) => {
            let bytes = decode_hex::<D::Error>(&s)?;
            if bytes.len() > 32 {
                return Err(serde::de::Error::custom("quantity exceeds 32 bytes"));
            }
            Ok(Some(U256::from_be_slice(&bytes)))
        }
        None => Ok(None),
    }
}

fn deserialize_hex_b256<'de, D>(deserializer: D) -> Result<B256, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let bytes = decode_fixed::<D::Error>(&s, 32, "hash")?;
    Ok(B256::from_slice(&bytes))
}

/// `null`, missing and `"0x"` all mean "no recipient".
fn deserialize_hex_address_opt<'de, D>(deserializer: D) -> Result<Option<Address>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(s) if !normalize_hex(&s).is_empty() => {
            let bytes = decode_fixed::<D::Error>(&s, 20, "address")?;
            Ok(Some(Address::from_slice(&bytes)))
        }
        _ => Ok(None),
    }
}

fn deserialize_hex_bytes<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    decode_hex::<D::Error>(&s)
}
