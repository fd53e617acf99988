//! Deposit tracking loop
//!
//! Each tick computes the block range between the scan cursor and the
//! chain tip, then for every block in ascending order: fetch, filter,
//! map, append, notify, and finally advance the cursor. A provider
//! failure stops the tick but keeps the progress already made; the next
//! tick resumes from the cursor.

use crate::error::{PersistenceError, ProviderError, TickError};
use crate::filter::filter_deposits;
use crate::notifier::Notifier;
use crate::records::to_record;
use crate::rpc::ChainClient;
use crate::store::{AppendOutcome, DepositStore};
use alloy_primitives::Address;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What to do when a matched deposit cannot be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistFailurePolicy {
    /// Log, move on to the next deposit, and still advance the cursor
    /// past the block. The failed deposit is not revisited.
    #[default]
    SkipRecord,
    /// Stop the tick without advancing past the block, so the next tick
    /// retries it. Deposits already stored are skipped on replay.
    HaltBlock,
}

/// Tunables of the tracking loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerSettings {
    /// Upper bound for every provider call
    pub rpc_timeout: Duration,
    pub persist_failure_policy: PersistFailurePolicy,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            rpc_timeout: Duration::from_secs(10),
            persist_failure_policy: PersistFailurePolicy::SkipRecord,
        }
    }
}

/// Highest fully processed block.
///
/// Starts unset. Only moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanCursor {
    last_processed_block: Option<u64>,
}

impl ScanCursor {
    /// A cursor that has not seen the chain yet.
    pub fn unset() -> Self {
        Self::default()
    }

    /// A cursor positioned as if `block` was already processed.
    pub fn after(block: u64) -> Self {
        Self {
            last_processed_block: Some(block),
        }
    }

    pub fn is_unset(&self) -> bool {
        self.last_processed_block.is_none()
    }

    /// Last processed block, `0` while unset.
    pub fn last_processed_block(&self) -> u64 {
        self.last_processed_block.unwrap_or(0)
    }

    /// Move the cursor to `block`. Never moves it backwards.
    pub fn advance(&mut self, block: u64) {
        let next = match self.last_processed_block {
            Some(current) if current >= block => current,
            _ => block,
        };
        self.last_processed_block = Some(next);
    }
}

/// Summary of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Chain tip observed at the start of the tick
    pub tip: u64,
    /// Cursor before the tick
    pub cursor_before: u64,
    /// Cursor after the tick
    pub cursor_after: u64,
    pub blocks_processed: u64,
    /// Deposits newly written to the store
    pub inserted: usize,
    /// Deposits that were already stored
    pub already_present: usize,
    /// Deposits whose append failed
    pub failed: usize,
}

/// Orchestrates chain client, filter, store and notifier.
///
/// Owns the scan cursor; nothing else writes it. Ticks take `&mut self`,
/// and the scheduler keeps at most one tick in flight.
pub struct TrackingLoop<C, S, N> {
    chain: C,
    store: S,
    notifier: N,
    contract: Address,
    cursor: ScanCursor,
    settings: TrackerSettings,
}

impl<C, S, N> TrackingLoop<C, S, N>
where
    C: ChainClient,
    S: DepositStore,
    N: Notifier,
{
    /// Create a tracking loop with an unset cursor.
    pub fn new(chain: C, store: S, notifier: N, contract: Address, settings: TrackerSettings) -> Self {
        Self {
            chain,
            store,
            notifier,
            contract,
            cursor: ScanCursor::unset(),
            settings,
        }
    }

    /// Replace the starting cursor.
    pub fn with_cursor(mut self, cursor: ScanCursor) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn cursor(&self) -> ScanCursor {
        self.cursor
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    #[cfg(test)]
    pub(crate) fn chain(&self) -> &C {
        &self.chain
    }

    /// Run one tick: process every block from the cursor up to the tip.
    pub async fn tick(&mut self) -> Result<TickReport, TickError> {
        let timeout = self.settings.rpc_timeout;
        let tip = bounded(timeout, "eth_blockNumber", self.chain.latest_block_number())
            .await
            .map_err(TickError::Tip)?;

        if self.cursor.is_unset() {
            let start = tip.saturating_sub(1);
            self.cursor.advance(start);
            info!("Cursor initialized to block {} (tip {})", start, tip);
        }

        let cursor_before = self.cursor.last_processed_block();
        let mut report = TickReport {
            tip,
            cursor_before,
            cursor_after: cursor_before,
            ..Default::default()
        };

        if cursor_before >= tip {
            debug!("Up to date. Cursor: {}, tip: {}", cursor_before, tip);
            return Ok(report);
        }

        debug!("Processing blocks {} to {}", cursor_before + 1, tip);
        for block_number in (cursor_before + 1)..=tip {
            if let Err(e) = self.process_block(block_number, &mut report).await {
                warn!(
                    "Tick aborted at block {} after {} blocks, cursor stays at {}",
                    block_number,
                    report.blocks_processed,
                    self.cursor.last_processed_block()
                );
                return Err(e);
            }
        }

        Ok(report)
    }

    async fn process_block(
        &mut self,
        block_number: u64,
        report: &mut TickReport,
    ) -> Result<(), TickError> {
        let fetch = self.chain.block_with_transactions(block_number);
        let block = bounded(self.settings.rpc_timeout, "eth_getBlockByNumber", fetch)
            .await
            .map_err(|source| TickError::Block {
                block: block_number,
                source,
            })?;
        let timestamp = block.timestamp_utc().map_err(|source| TickError::Block {
            block: block_number,
            source,
        })?;

        let deposits = filter_deposits(&block.transactions, self.contract);
        if !deposits.is_empty() {
            info!("Block {}: {} deposit(s) matched", block_number, deposits.len());
        }

        for tx in deposits {
            let record = to_record(tx, block_number, timestamp);
            match self.store.append(&record) {
                Ok(AppendOutcome::Inserted) => {
                    info!("New deposit saved: {}", record.hash);
                    report.inserted += 1;
                    self.notifier.notify(&record);
                }
                Ok(AppendOutcome::AlreadyPresent) => {
                    debug!("Deposit {} already stored, skipping", record.hash);
                    report.already_present += 1;
                }
                Err(source) => {
                    error!("Error saving deposit {} to database: {}", record.hash, source);
                    report.failed += 1;
                    if self.settings.persist_failure_policy == PersistFailurePolicy::HaltBlock {
                        return Err(TickError::Persist {
                            block: block_number,
                            hash: record.hash,
                            source,
                        });
                    }
                }
            }
        }

        self.cursor.advance(block_number);
        report.blocks_processed += 1;
        report.cursor_after = block_number;
        self.checkpoint(block_number);
        Ok(())
    }

    /// Persist the cursor. The in-memory cursor stays authoritative.
    fn checkpoint(&self, block_number: u64) {
        if let Err(e) = self.store.save_cursor(block_number) {
            warn!("Failed to checkpoint cursor at block {}: {}", block_number, e);
        }
    }
}

/// Resolve the starting cursor from configuration and the stored checkpoint.
pub fn initial_cursor<S: DepositStore>(
    store: &S,
    start_block: Option<u64>,
    resume: bool,
) -> Result<ScanCursor, PersistenceError> {
    if let Some(start) = start_block {
        return Ok(ScanCursor::after(start.saturating_sub(1)));
    }
    if resume {
        if let Some(block) = store.load_cursor()? {
            return Ok(ScanCursor::after(block));
        }
    }
    Ok(ScanCursor::unset())
}

/// Bound a provider call; expiry is reported as a provider error.
async fn bounded<T>(
    timeout: Duration,
    operation: &'static str,
    fut: impl Future<Output = Result<T, ProviderError>>,
) -> Result<T, ProviderError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout { operation, timeout }),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory collaborators for exercising the loop.

    use super::*;
    use crate::records::DepositRecord;
    use crate::types::{Block, Transaction};
    use alloy_primitives::{address, B256, U256};
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    pub const CONTRACT: Address = address!("dddddddddddddddddddddddddddddddddddddddd");

    pub fn deposit_tx(hash: B256) -> Transaction {
        Transaction {
            hash,
            to: Some(CONTRACT),
            gas_price: Some(U256::from(20_000_000_000u64)),
            max_fee_per_gas: None,
            input: vec![0xab; 4],
        }
    }

    pub fn other_tx(hash: B256) -> Transaction {
        Transaction {
            to: Some(Address::repeat_byte(0x02)),
            ..deposit_tx(hash)
        }
    }

    /// Chain with a fixed tip, scripted blocks, and injectable failures.
    #[derive(Default)]
    pub struct FakeChain {
        pub tip: Mutex<u64>,
        pub blocks: Mutex<HashMap<u64, Vec<Transaction>>>,
        pub failing: Mutex<HashSet<u64>>,
        pub fetched: Mutex<Vec<u64>>,
        pub slow_blocks: Mutex<HashMap<u64, Duration>>,
        pub delay: Option<Duration>,
    }

    impl FakeChain {
        pub fn with_tip(tip: u64) -> Self {
            let chain = Self::default();
            *chain.tip.lock().unwrap() = tip;
            chain
        }

        pub fn set_tip(&self, tip: u64) {
            *self.tip.lock().unwrap() = tip;
        }

        pub fn put_block(&self, number: u64, txs: Vec<Transaction>) {
            self.blocks.lock().unwrap().insert(number, txs);
        }

        pub fn fail_block(&self, number: u64) {
            self.failing.lock().unwrap().insert(number);
        }

        pub fn heal_block(&self, number: u64) {
            self.failing.lock().unwrap().remove(&number);
        }

        pub fn slow_block(&self, number: u64, delay: Duration) {
            self.slow_blocks.lock().unwrap().insert(number, delay);
        }

        pub fn fetched(&self) -> Vec<u64> {
            self.fetched.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChainClient for FakeChain {
        async fn latest_block_number(&self) -> Result<u64, ProviderError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(*self.tip.lock().unwrap())
        }

        async fn block_with_transactions(&self, number: u64) -> Result<Block, ProviderError> {
            self.fetched.lock().unwrap().push(number);
            let delay = self.slow_blocks.lock().unwrap().get(&number).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing.lock().unwrap().contains(&number) {
                return Err(ProviderError::BlockUnavailable(number));
            }
            Ok(Block {
                number,
                timestamp: 1_704_067_200 + number,
                transactions: self
                    .blocks
                    .lock()
                    .unwrap()
                    .get(&number)
                    .cloned()
                    .unwrap_or_default(),
            })
        }
    }

    /// Store idempotent by hash, with per-hash injectable failures.
    pub struct MemoryStore {
        pub records: Mutex<Vec<DepositRecord>>,
        pub rejecting: Mutex<HashSet<String>>,
        pub cursor: Mutex<Option<u64>>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self {
                records: Mutex::new(Vec::new()),
                rejecting: Mutex::new(HashSet::new()),
                cursor: Mutex::new(None),
            }
        }

        pub fn reject(&self, hash: &str) {
            self.rejecting.lock().unwrap().insert(hash.to_string());
        }

        pub fn accept(&self, hash: &str) {
            self.rejecting.lock().unwrap().remove(hash);
        }

        pub fn records(&self) -> Vec<DepositRecord> {
            self.records.lock().unwrap().clone()
        }
    }

    impl DepositStore for MemoryStore {
        fn append(&self, record: &DepositRecord) -> Result<AppendOutcome, PersistenceError> {
            if self.rejecting.lock().unwrap().contains(&record.hash) {
                return Err(PersistenceError::Corrupt {
                    what: "deposit record",
                    reason: "rejected by test".to_string(),
                });
            }
            let mut records = self.records.lock().unwrap();
            if records.iter().any(|r| r.hash_key() == record.hash_key()) {
                return Ok(AppendOutcome::AlreadyPresent);
            }
            records.push(record.clone());
            Ok(AppendOutcome::Inserted)
        }

        fn list_all(&self) -> Result<Vec<DepositRecord>, PersistenceError> {
            Ok(self.records())
        }

        fn get(&self, hash: &str) -> Result<Option<DepositRecord>, PersistenceError> {
            let key = crate::records::normalize_hash(hash);
            Ok(self.records().into_iter().find(|r| r.hash_key() == key))
        }

        fn load_cursor(&self) -> Result<Option<u64>, PersistenceError> {
            Ok(*self.cursor.lock().unwrap())
        }

        fn save_cursor(&self, block: u64) -> Result<(), PersistenceError> {
            *self.cursor.lock().unwrap() = Some(block);
            Ok(())
        }
    }

    /// Notifier that remembers what it was asked to send.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<String>>,
    }

    impl RecordingNotifier {
        pub fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, record: &DepositRecord) {
            self.sent.lock().unwrap().push(record.hash.clone());
        }
    }

    pub type TestLoop = TrackingLoop<FakeChain, MemoryStore, RecordingNotifier>;

    pub fn test_loop(chain: FakeChain) -> TestLoop {
        TrackingLoop::new(
            chain,
            MemoryStore::new(),
            RecordingNotifier::default(),
            CONTRACT,
            TrackerSettings::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::store::RocksDepositStore;
    use alloy_primitives::B256;
    use tempfile::TempDir;

    fn hash_str(hash: B256) -> String {
        format!("0x{:x}", hash)
    }

    #[test]
    fn test_cursor_never_moves_backwards() {
        let mut cursor = ScanCursor::unset();
        assert!(cursor.is_unset());
        assert_eq!(cursor.last_processed_block(), 0);

        cursor.advance(10);
        cursor.advance(7);
        assert_eq!(cursor.last_processed_block(), 10);
        cursor.advance(11);
        assert_eq!(cursor.last_processed_block(), 11);
    }

    #[tokio::test]
    async fn test_first_tick_starts_at_tip() {
        // Tip 100, cursor unset, nothing to match
        let mut tracker = test_loop(FakeChain::with_tip(100));

        let report = tracker.tick().await.unwrap();

        assert_eq!(tracker.cursor().last_processed_block(), 100);
        assert_eq!(report.blocks_processed, 1);
        assert_eq!(tracker.chain.fetched(), vec![100]);
        assert!(tracker.store().records().is_empty());
    }

    #[tokio::test]
    async fn test_tick_records_deposit_in_range() {
        let chain = FakeChain::with_tip(105);
        let hash = B256::repeat_byte(0xaa);
        chain.put_block(103, vec![other_tx(B256::repeat_byte(0x01)), deposit_tx(hash)]);
        let mut tracker = test_loop(chain).with_cursor(ScanCursor::after(100));

        let report = tracker.tick().await.unwrap();

        let records = tracker.store().records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].block_number, 103);
        assert_eq!(records[0].hash, hash_str(hash));
        assert_eq!(records[0].fee, "20000000000");
        assert_eq!(tracker.cursor().last_processed_block(), 105);
        assert_eq!(tracker.notifier().sent(), vec![hash_str(hash)]);
        assert_eq!(report.inserted, 1);
        // Every block in (cursor, tip] fetched once, in order
        assert_eq!(tracker.chain.fetched(), vec![101, 102, 103, 104, 105]);
    }

    #[tokio::test]
    async fn test_provider_error_preserves_progress() {
        let chain = FakeChain::with_tip(105);
        let hash = B256::repeat_byte(0xaa);
        chain.put_block(103, vec![deposit_tx(hash)]);
        chain.put_block(105, vec![deposit_tx(B256::repeat_byte(0xbb))]);
        chain.fail_block(104);
        let mut tracker = test_loop(chain).with_cursor(ScanCursor::after(100));

        let err = tracker.tick().await.unwrap_err();

        assert!(matches!(err, TickError::Block { block: 104, .. }));
        assert_eq!(tracker.cursor().last_processed_block(), 103);
        let records = tracker.store().records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].block_number, 103);
        assert_eq!(tracker.store().load_cursor().unwrap(), Some(103));

        // Next tick resumes at 104
        tracker.chain.heal_block(104);
        tracker.tick().await.unwrap();
        assert_eq!(tracker.cursor().last_processed_block(), 105);
        assert_eq!(tracker.chain.fetched(), vec![101, 102, 103, 104, 104, 105]);
        assert_eq!(tracker.store().records().len(), 2);
    }

    #[tokio::test]
    async fn test_tip_failure_leaves_cursor_untouched() {
        let slow = FakeChain {
            delay: Some(Duration::from_secs(1)),
            ..FakeChain::with_tip(60)
        };
        let mut tracker = test_loop(slow).with_cursor(ScanCursor::after(50));
        tracker.settings.rpc_timeout = Duration::from_millis(1);

        let err = tracker.tick().await.unwrap_err();
        assert!(matches!(
            err,
            TickError::Tip(ProviderError::Timeout { .. })
        ));
        assert_eq!(tracker.cursor().last_processed_block(), 50);
        assert!(tracker.chain.fetched().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_fetch_timeout_stops_before_block() {
        let chain = FakeChain::with_tip(104);
        chain.put_block(101, vec![deposit_tx(B256::repeat_byte(0xaa))]);
        chain.put_block(103, vec![deposit_tx(B256::repeat_byte(0xbb))]);
        chain.slow_block(102, Duration::from_secs(30));
        let mut tracker = test_loop(chain).with_cursor(ScanCursor::after(100));

        let err = tracker.tick().await.unwrap_err();

        assert!(matches!(
            err,
            TickError::Block {
                block: 102,
                source: ProviderError::Timeout { .. }
            }
        ));
        assert_eq!(tracker.cursor().last_processed_block(), 101);
        assert_eq!(tracker.store().records().len(), 1);
        assert_eq!(tracker.chain.fetched(), vec![101, 102]);

        // Provider recovers; the tick picks up at 102
        tracker.chain.slow_blocks.lock().unwrap().clear();
        tracker.tick().await.unwrap();
        assert_eq!(tracker.cursor().last_processed_block(), 104);
        assert_eq!(tracker.store().records().len(), 2);
    }

    #[tokio::test]
    async fn test_persistence_failure_does_not_block_cursor() {
        let chain = FakeChain::with_tip(106);
        let ok = B256::repeat_byte(0x01);
        let bad = B256::repeat_byte(0x02);
        chain.put_block(106, vec![deposit_tx(ok), deposit_tx(bad)]);
        let mut tracker = test_loop(chain).with_cursor(ScanCursor::after(105));
        tracker.store().reject(&hash_str(bad));

        let report = tracker.tick().await.unwrap();

        assert_eq!(tracker.cursor().last_processed_block(), 106);
        let records = tracker.store().records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].hash, hash_str(ok));
        assert_eq!(report.failed, 1);
        assert_eq!(tracker.notifier().sent(), vec![hash_str(ok)]);
    }

    #[tokio::test]
    async fn test_halt_policy_retries_block_next_tick() {
        let chain = FakeChain::with_tip(106);
        let ok = B256::repeat_byte(0x01);
        let bad = B256::repeat_byte(0x02);
        chain.put_block(106, vec![deposit_tx(ok), deposit_tx(bad)]);
        let mut tracker = test_loop(chain).with_cursor(ScanCursor::after(105));
        tracker.settings.persist_failure_policy = PersistFailurePolicy::HaltBlock;
        tracker.store().reject(&hash_str(bad));

        let err = tracker.tick().await.unwrap_err();
        assert!(matches!(err, TickError::Persist { block: 106, .. }));
        assert_eq!(tracker.cursor().last_processed_block(), 105);

        tracker.store().accept(&hash_str(bad));
        let report = tracker.tick().await.unwrap();
        assert_eq!(tracker.cursor().last_processed_block(), 106);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.already_present, 1);
        assert_eq!(tracker.store().records().len(), 2);
        // The replayed deposit is not announced twice
        assert_eq!(
            tracker.notifier().sent(),
            vec![hash_str(ok), hash_str(bad)]
        );
    }

    #[tokio::test]
    async fn test_reprocessing_range_does_not_duplicate() {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksDepositStore::open(temp_dir.path()).unwrap();
        let chain = FakeChain::with_tip(105);
        let hash = B256::repeat_byte(0xaa);
        chain.put_block(103, vec![deposit_tx(hash)]);

        let mut tracker = TrackingLoop::new(
            chain,
            store,
            RecordingNotifier::default(),
            CONTRACT,
            TrackerSettings::default(),
        )
        .with_cursor(ScanCursor::after(100));
        tracker.tick().await.unwrap();

        // Cursor reset, same range again
        tracker.cursor = ScanCursor::after(100);
        let report = tracker.tick().await.unwrap();

        assert_eq!(report.already_present, 1);
        let records = tracker.store().list_all().unwrap();
        assert_eq!(records.iter().filter(|r| r.hash == hash_str(hash)).count(), 1);
        assert_eq!(tracker.notifier().sent().len(), 1);
    }

    #[tokio::test]
    async fn test_cursor_monotonic_across_ticks() {
        let chain = FakeChain::with_tip(10);
        let mut tracker = test_loop(chain);
        let mut last = 0;
        for tip in [10, 12, 12, 11, 15] {
            tracker.chain.set_tip(tip);
            let _ = tracker.tick().await;
            let now = tracker.cursor().last_processed_block();
            assert!(now >= last);
            last = now;
        }
        assert_eq!(last, 15);
        assert_eq!(tracker.chain.fetched(), vec![10, 11, 12, 13, 14, 15]);
    }

    #[test]
    fn test_initial_cursor() {
        let store = MemoryStore::new();
        assert!(initial_cursor(&store, None, false).unwrap().is_unset());
        assert!(initial_cursor(&store, None, true).unwrap().is_unset());

        store.save_cursor(77).unwrap();
        assert_eq!(initial_cursor(&store, None, true).unwrap(), ScanCursor::after(77));
        assert!(initial_cursor(&store, None, false).unwrap().is_unset());
        assert_eq!(
            initial_cursor(&store, Some(100), false).unwrap(),
            ScanCursor::after(99)
        );
        assert_eq!(initial_cursor(&store, Some(0), false).unwrap(), ScanCursor::after(0));
    }
}
