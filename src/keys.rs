//! Key encoding utilities
//!
//! All keys use a single-byte prefix followed by binary data.
//! This keeps keys deterministic and lexicographically ordered in RocksDB.

/// Meta id of the scan cursor checkpoint.
pub const META_CURSOR: u8 = 0x01;

/// Encode a deposit key.
///
/// Format: byte 'D' (0x44) + block_number (8 bytes, big-endian) + hash (ASCII)
///
/// Iterating the deposits column family therefore yields records ordered
/// by block, then by hash.
pub fn encode_deposit_key(block_number: u64, hash_key: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(9 + hash_key.len());
    key.push(b'D');
    key.extend_from_slice(&block_number.to_be_bytes());
    key.extend_from_slice(hash_key.as_bytes());
    key
}

/// Encode a hash index key.
///
/// Format: byte 'H' (0x48) + hash (ASCII, normalized lowercase)
pub fn encode_hash_index_key(hash_key: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + hash_key.len());
    key.push(b'H');
    key.extend_from_slice(hash_key.as_bytes());
    key
}

/// Encode a meta key.
///
/// Format: byte 'M' (0x4D) + meta_id (1 byte)
pub fn encode_meta_key(meta_id: u8) -> Vec<u8> {
    vec![b'M', meta_id]
}
