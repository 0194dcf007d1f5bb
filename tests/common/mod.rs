#![allow(dead_code)] // Each test binary uses a different subset of the fixtures

//! Shared fixtures for the integration tests: a deterministic engine
//! configuration, record generators routed to specific shards, and an
//! [`IncomeStore`] wrapper that injects faults into chosen shards.

pub mod strategies;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use daily_income_engine::config::EngineConfig;
use daily_income_engine::database::{InMemoryIncomeStore, IncomeStore, MemoryTx};
use daily_income_engine::error::{StoreError, StoreResult};
use daily_income_engine::models::{RunKey, ShardIndex, ShardLayout, StagedRecord};
use daily_income_engine::orchestration::DailyIncomeService;
use daily_income_engine::services::StaticIncomeSource;

pub fn run_key() -> RunKey {
    RunKey::new(NaiveDate::from_ymd_opt(2024, 6, 30).unwrap())
}

pub fn other_run_key() -> RunKey {
    RunKey::new(NaiveDate::from_ymd_opt(2024, 7, 1).unwrap())
}

/// Reference configuration with the inter-chunk pause disabled
pub fn test_config(shard_count: u32) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.sharding.shard_count = shard_count;
    config.aggregation.chunk_pause_ms = 0;
    config.executor.shutdown_grace_seconds = 0;
    config.aggregation.shutdown_grace_seconds = 0;
    config
}

/// `count` records for `run_key`, all owned by `shard`
pub fn records_for_shard(
    layout: ShardLayout,
    shard: ShardIndex,
    count: usize,
    run_key: RunKey,
) -> Vec<StagedRecord> {
    (0u64..)
        .map(|i| format!("C{i:08}"))
        .filter(|client| layout.shard_of(client) == shard)
        .take(count)
        .map(|client| StagedRecord::new(client, "P001", run_key))
        .collect()
}

/// Source with `rows_per_shard(shard)` records in every shard
pub fn source_with(
    layout: ShardLayout,
    run_key: RunKey,
    rows_per_shard: impl Fn(ShardIndex) -> usize,
) -> StaticIncomeSource {
    let source = StaticIncomeSource::new();
    for shard in layout.indices() {
        source.insert(
            shard,
            records_for_shard(layout, shard, rows_per_shard(shard), run_key),
        );
    }
    source
}

#[derive(Debug, Default)]
struct Faults {
    /// Remaining staging-insert failures per shard
    staging_failures: HashMap<ShardIndex, usize>,
    /// Remaining delays before a shard's staging insert
    staging_delays: HashMap<ShardIndex, (usize, Duration)>,
    /// Consolidated-insert call number (1-based, per shard) that fails
    consolidated_failure_at: HashMap<ShardIndex, usize>,
    consolidated_calls: HashMap<ShardIndex, usize>,
    /// Delay before counting a shard's pending rows
    pending_delays: HashMap<ShardIndex, Duration>,
    staging_calls: HashMap<ShardIndex, usize>,
}

/// In-memory store with scriptable per-shard faults
pub struct FaultInjectingStore {
    inner: InMemoryIncomeStore,
    faults: Mutex<Faults>,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

impl FaultInjectingStore {
    pub fn new(layout: ShardLayout) -> Self {
        Self {
            inner: InMemoryIncomeStore::new(layout),
            faults: Mutex::new(Faults::default()),
            commits: AtomicUsize::new(0),
            rollbacks: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &InMemoryIncomeStore {
        &self.inner
    }

    /// Fail the next `times` staging inserts of `shard`
    pub fn fail_staging(&self, shard: ShardIndex, times: usize) {
        self.faults.lock().staging_failures.insert(shard, times);
    }

    /// Delay the next `times` staging inserts of `shard` by `delay`
    pub fn delay_staging(&self, shard: ShardIndex, times: usize, delay: Duration) {
        self.faults
            .lock()
            .staging_delays
            .insert(shard, (times, delay));
    }

    /// Fail the `chunk`-th consolidated insert carrying rows of `shard`
    pub fn fail_consolidated_chunk(&self, shard: ShardIndex, chunk: usize) {
        self.faults
            .lock()
            .consolidated_failure_at
            .insert(shard, chunk);
    }

    /// Delay every pending-row count of `shard` by `delay`
    pub fn delay_consolidation(&self, shard: ShardIndex, delay: Duration) {
        self.faults.lock().pending_delays.insert(shard, delay);
    }

    pub fn staging_calls(&self, shard: ShardIndex) -> usize {
        self.faults
            .lock()
            .staging_calls
            .get(&shard)
            .copied()
            .unwrap_or(0)
    }

    pub fn consolidated_calls(&self, shard: ShardIndex) -> usize {
        self.faults
            .lock()
            .consolidated_calls
            .get(&shard)
            .copied()
            .unwrap_or(0)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IncomeStore for FaultInjectingStore {
    type Tx = MemoryTx;

    fn shard_table_name(&self, shard: ShardIndex) -> String {
        self.inner.shard_table_name(shard)
    }

    async fn begin(&self) -> StoreResult<MemoryTx> {
        self.inner.begin().await
    }

    async fn commit(&self, tx: MemoryTx) -> StoreResult<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        self.inner.commit(tx).await
    }

    async fn rollback(&self, tx: MemoryTx) -> StoreResult<()> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.inner.rollback(tx).await
    }

    async fn truncate_staging(&self, tx: &mut MemoryTx, shard: ShardIndex) -> StoreResult<u64> {
        self.inner.truncate_staging(tx, shard).await
    }

    async fn insert_staging(
        &self,
        tx: &mut MemoryTx,
        shard: ShardIndex,
        records: &[StagedRecord],
    ) -> StoreResult<u64> {
        let (fail, delay) = {
            let mut faults = self.faults.lock();
            *faults.staging_calls.entry(shard).or_insert(0) += 1;
            let fail = match faults.staging_failures.get_mut(&shard) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            };
            let delay = match faults.staging_delays.get_mut(&shard) {
                Some((remaining, delay)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(*delay)
                }
                _ => None,
            };
            (fail, delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(StoreError::database(
                "insert_staging",
                format!("injected failure on shard {shard}"),
            ));
        }
        self.inner.insert_staging(tx, shard, records).await
    }

    async fn delete_by_run_key(
        &self,
        tx: &mut MemoryTx,
        shard: ShardIndex,
        run_key: RunKey,
    ) -> StoreResult<u64> {
        self.inner.delete_by_run_key(tx, shard, run_key).await
    }

    async fn promote_staging(
        &self,
        tx: &mut MemoryTx,
        shard: ShardIndex,
        run_key: RunKey,
    ) -> StoreResult<u64> {
        self.inner.promote_staging(tx, shard, run_key).await
    }

    async fn count_pending(
        &self,
        tx: &mut MemoryTx,
        shard: ShardIndex,
        run_key: RunKey,
    ) -> StoreResult<u64> {
        let delay = self.faults.lock().pending_delays.get(&shard).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.count_pending(tx, shard, run_key).await
    }

    async fn select_page(
        &self,
        tx: &mut MemoryTx,
        shard: ShardIndex,
        run_key: RunKey,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<StagedRecord>> {
        self.inner
            .select_page(tx, shard, run_key, offset, limit)
            .await
    }

    async fn insert_consolidated(
        &self,
        tx: &mut MemoryTx,
        rows: &[StagedRecord],
    ) -> StoreResult<u64> {
        if let Some(first) = rows.first() {
            let shard = self.inner.layout().shard_of(&first.client_id);
            let mut faults = self.faults.lock();
            let calls = faults.consolidated_calls.entry(shard).or_insert(0);
            *calls += 1;
            let call = *calls;
            if faults.consolidated_failure_at.get(&shard) == Some(&call) {
                return Err(StoreError::database(
                    "insert_consolidated",
                    format!("injected failure on shard {shard} chunk {call}"),
                ));
            }
        }
        self.inner.insert_consolidated(tx, rows).await
    }

    async fn delete_consolidated(&self, tx: &mut MemoryTx, run_key: RunKey) -> StoreResult<u64> {
        self.inner.delete_consolidated(tx, run_key).await
    }

    async fn count_consolidated(&self, tx: &mut MemoryTx, run_key: RunKey) -> StoreResult<u64> {
        self.inner.count_consolidated(tx, run_key).await
    }
}

pub type TestService = DailyIncomeService<FaultInjectingStore, StaticIncomeSource>;

/// Service over a fault-injecting store, with `rows_per_shard` records per shard
pub fn service_with(
    config: EngineConfig,
    rows_per_shard: impl Fn(ShardIndex) -> usize,
) -> (TestService, Arc<FaultInjectingStore>) {
    let layout = config.shard_layout();
    let store = Arc::new(FaultInjectingStore::new(layout));
    let source = Arc::new(source_with(layout, run_key(), rows_per_shard));
    let service = DailyIncomeService::new(Arc::clone(&store), source, Arc::new(config));
    (service, store)
}

/// Committed destination rows across every shard
pub fn destination_total(store: &FaultInjectingStore, run_key: RunKey) -> usize {
    let inner = store.inner();
    inner
        .layout()
        .indices()
        .map(|shard| inner.destination_rows(shard, run_key).len())
        .sum()
}
