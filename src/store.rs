//! DepositStore trait and RocksDB implementation
//!
//! Provides durable, idempotent storage for deposit records plus the
//! tracking loop's cursor checkpoint.

use crate::error::PersistenceError;
use crate::keys::{encode_deposit_key, encode_hash_index_key, encode_meta_key, META_CURSOR};
use crate::records::{normalize_hash, DepositRecord};
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Mutex;

const CF_DEPOSITS: &str = "deposits";
const CF_HASHES: &str = "deposit_hashes";
const CF_META: &str = "meta";

/// Result of a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The record was new and has been written.
    Inserted,
    /// A record with the same hash was already stored; nothing was written.
    AlreadyPresent,
}

/// Trait defining the interface for deposit storage.
///
/// `append` is idempotent by transaction hash, so the tracking loop may
/// replay a block range without creating duplicate records.
pub trait DepositStore: Send + Sync {
    /// Durably store a record unless one with the same hash exists.
    fn append(&self, record: &DepositRecord) -> Result<AppendOutcome, PersistenceError>;

    /// List every stored record, ordered by block number then hash.
    fn list_all(&self) -> Result<Vec<DepositRecord>, PersistenceError>;

    /// Look up a record by transaction hash (any case, with or without `0x`).
    fn get(&self, hash: &str) -> Result<Option<DepositRecord>, PersistenceError>;

    /// Get the last checkpointed cursor position.
    fn load_cursor(&self) -> Result<Option<u64>, PersistenceError>;

    /// Checkpoint the cursor position.
    fn save_cursor(&self, block: u64) -> Result<(), PersistenceError>;
}

/// RocksDB-backed implementation of DepositStore.
///
/// Column families:
/// - deposits: postcard-encoded records keyed by (block, hash)
/// - deposit_hashes: hash -> deposit key, the uniqueness index
/// - meta: cursor checkpoint
pub struct RocksDepositStore {
    db: DB,
    /// Serializes the check-then-write in `append`.
    write_lock: Mutex<()>,
}

impl RocksDepositStore {
    /// Open or create a RocksDB database at the given path.
    ///
    /// Creates all required column families if they don't exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PersistenceError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let column_families = vec![
            ColumnFamilyDescriptor::new(CF_DEPOSITS, Options::default()),
            ColumnFamilyDescriptor::new(CF_HASHES, Options::default()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, column_families)?;

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    /// Open an existing database without taking its lock.
    ///
    /// Works while another process holds the database open for writing and
    /// sees everything that process had written at the time of opening.
    /// Writes through this handle fail.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self, PersistenceError> {
        let db = DB::open_cf_for_read_only(
            &Options::default(),
            path,
            [CF_DEPOSITS, CF_HASHES, CF_META],
            false,
        )?;

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    fn decode_record(value: &[u8]) -> Result<DepositRecord, PersistenceError> {
        postcard::from_bytes(value).map_err(|source| PersistenceError::Decode {
            what: "deposit record",
            source,
        })
    }

    fn get_cf(&self, name: &'static str) -> Result<&rocksdb::ColumnFamily, PersistenceError> {
        self.db
            .cf_handle(name)
            .ok_or(PersistenceError::MissingColumnFamily(name))
    }
}

impl DepositStore for RocksDepositStore {
    fn append(&self, record: &DepositRecord) -> Result<AppendOutcome, PersistenceError> {
        let deposits = self.get_cf(CF_DEPOSITS)?;
        let hashes = self.get_cf(CF_HASHES)?;

        let hash_key = record.hash_key();
        let index_key = encode_hash_index_key(&hash_key);
        let deposit_key = encode_deposit_key(record.block_number, &hash_key);
        let value = postcard::to_allocvec(record).map_err(|source| PersistenceError::Encode {
            what: "deposit record",
            source,
        })?;

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| PersistenceError::LockPoisoned)?;

        if self.db.get_cf(hashes, &index_key)?.is_some() {
            return Ok(AppendOutcome::AlreadyPresent);
        }

        // Record and index land together or not at all
        let mut batch = WriteBatch::default();
        batch.put_cf(deposits, &deposit_key, &value);
        batch.put_cf(hashes, &index_key, &deposit_key);
        self.db.write(batch)?;

        Ok(AppendOutcome::Inserted)
    }

    fn list_all(&self) -> Result<Vec<DepositRecord>, PersistenceError> {
        let cf = self.get_cf(CF_DEPOSITS)?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            records.push(Self::decode_record(&value)?);
        }
        Ok(records)
    }

    fn get(&self, hash: &str) -> Result<Option<DepositRecord>, PersistenceError> {
        let hashes = self.get_cf(CF_HASHES)?;
        let deposits = self.get_cf(CF_DEPOSITS)?;

        let index_key = encode_hash_index_key(&normalize_hash(hash));
        let Some(deposit_key) = self.db.get_cf(hashes, &index_key)? else {
            return Ok(None);
        };
        match self.db.get_cf(deposits, &deposit_key)? {
            Some(value) => Ok(Some(Self::decode_record(&value)?)),
            None => Err(PersistenceError::Corrupt {
                what: "deposit hash index",
                reason: format!("{} points at a missing record", normalize_hash(hash)),
            }),
        }
    }

    fn load_cursor(&self) -> Result<Option<u64>, PersistenceError> {
        let cf = self.get_cf(CF_META)?;
        let key = encode_meta_key(META_CURSOR);
        match self.db.get_cf(cf, &key)? {
            Some(bytes) => {
                let bytes: [u8; 8] =
                    bytes
                        .as_slice()
                        .try_into()
                        .map_err(|_| PersistenceError::Corrupt {
                            what: "cursor checkpoint",
                            reason: format!("expected 8 bytes, got {}", bytes.len()),
                        })?;
                Ok(Some(u64::from_be_bytes(bytes)))
            }
            None => Ok(None),
        }
    }

    fn save_cursor(&self, block: u64) -> Result<(), PersistenceError> {
        let cf = self.get_cf(CF_META)?;
        let key = encode_meta_key(META_CURSOR);
        self.db.put_cf(cf, &key, block.to_be_bytes())?;
        Ok(())
    }
}
