//! In-memory [`IncomeStore`] backend.
//!
//! Shard tables live in a `DashMap`; the consolidated table sits behind a
//! `parking_lot::RwLock`. A transaction copies each shard it touches on first
//! use and buffers consolidated writes, so nothing is visible to other
//! transactions until commit and a dropped transaction leaves no trace.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::IncomeStore;
use crate::error::{StoreError, StoreResult};
use crate::models::{RecordKey, RunKey, ShardIndex, ShardLayout, StagedRecord};

#[derive(Debug, Clone, Default)]
struct ShardTables {
    staging: Vec<StagedRecord>,
    destination: BTreeMap<RecordKey, StagedRecord>,
}

#[derive(Debug, Clone)]
enum ConsolidatedOp {
    Upsert(Vec<StagedRecord>),
    DeleteRunKey(RunKey),
}

/// Open in-memory transaction
#[derive(Debug)]
pub struct MemoryTx {
    id: u64,
    shards: HashMap<ShardIndex, ShardTables>,
    consolidated_ops: Vec<ConsolidatedOp>,
}

impl MemoryTx {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Process-local store, used by tests and single-node dry runs
#[derive(Debug)]
pub struct InMemoryIncomeStore {
    layout: ShardLayout,
    shards: DashMap<ShardIndex, ShardTables>,
    consolidated: RwLock<BTreeMap<RecordKey, StagedRecord>>,
    next_tx: AtomicU64,
}

impl InMemoryIncomeStore {
    pub fn new(layout: ShardLayout) -> Self {
        let shards = DashMap::new();
        for shard in layout.indices() {
            shards.insert(shard, ShardTables::default());
        }
        Self {
            layout,
            shards,
            consolidated: RwLock::new(BTreeMap::new()),
            next_tx: AtomicU64::new(1),
        }
    }

    pub fn layout(&self) -> ShardLayout {
        self.layout
    }

    /// Write rows straight into a shard destination, outside any transaction
    pub fn seed_destination(&self, shard: ShardIndex, records: Vec<StagedRecord>) {
        if let Some(mut tables) = self.shards.get_mut(&shard) {
            for record in records {
                tables.destination.insert(record.key(), record);
            }
        }
    }

    /// Committed destination rows of `shard` for `run_key`
    pub fn destination_rows(&self, shard: ShardIndex, run_key: RunKey) -> Vec<StagedRecord> {
        self.shards
            .get(&shard)
            .map(|tables| {
                tables
                    .destination
                    .values()
                    .filter(|r| r.run_key == run_key)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Committed staged rows of `shard`
    pub fn staging_len(&self, shard: ShardIndex) -> usize {
        self.shards
            .get(&shard)
            .map(|tables| tables.staging.len())
            .unwrap_or(0)
    }

    /// Committed consolidated rows for `run_key`
    pub fn consolidated_rows(&self, run_key: RunKey) -> Vec<StagedRecord> {
        self.consolidated
            .read()
            .values()
            .filter(|r| r.run_key == run_key)
            .cloned()
            .collect()
    }

    fn shard_mut<'a>(
        &self,
        tx: &'a mut MemoryTx,
        shard: ShardIndex,
    ) -> StoreResult<&'a mut ShardTables> {
        if !self.layout.contains(shard) {
            return Err(StoreError::InvalidIdentifier(format!("shard {shard}")));
        }
        Ok(tx.shards.entry(shard).or_insert_with(|| {
            self.shards
                .get(&shard)
                .map(|tables| tables.value().clone())
                .unwrap_or_default()
        }))
    }

    /// Consolidated view for `run_key` including the transaction's own writes
    fn consolidated_view(
        &self,
        tx: &MemoryTx,
        run_key: RunKey,
    ) -> BTreeMap<RecordKey, StagedRecord> {
        let mut view: BTreeMap<RecordKey, StagedRecord> = self
            .consolidated
            .read()
            .iter()
            .filter(|(key, _)| key.run_key == run_key)
            .map(|(key, record)| (key.clone(), record.clone()))
            .collect();
        for op in &tx.consolidated_ops {
            apply_consolidated_op(&mut view, op);
        }
        view.retain(|key, _| key.run_key == run_key);
        view
    }
}

impl Default for InMemoryIncomeStore {
    fn default() -> Self {
        Self::new(ShardLayout::default())
    }
}

fn apply_consolidated_op(table: &mut BTreeMap<RecordKey, StagedRecord>, op: &ConsolidatedOp) {
    match op {
        ConsolidatedOp::Upsert(rows) => {
            for row in rows {
                table.insert(row.key(), row.clone());
            }
        }
        ConsolidatedOp::DeleteRunKey(run_key) => {
            table.retain(|key, _| key.run_key != *run_key);
        }
    }
}

#[async_trait]
impl IncomeStore for InMemoryIncomeStore {
    type Tx = MemoryTx;

    fn shard_table_name(&self, shard: ShardIndex) -> String {
        format!("memory_income_{shard}")
    }

    async fn begin(&self) -> StoreResult<MemoryTx> {
        Ok(MemoryTx {
            id: self.next_tx.fetch_add(1, Ordering::Relaxed),
            shards: HashMap::new(),
            consolidated_ops: Vec::new(),
        })
    }

    async fn commit(&self, tx: MemoryTx) -> StoreResult<()> {
        debug!(
            tx = tx.id,
            shards = tx.shards.len(),
            consolidated_ops = tx.consolidated_ops.len(),
            "Committing in-memory transaction"
        );
        for (shard, tables) in tx.shards {
            self.shards.insert(shard, tables);
        }
        if !tx.consolidated_ops.is_empty() {
            let mut consolidated = self.consolidated.write();
            for op in &tx.consolidated_ops {
                apply_consolidated_op(&mut consolidated, op);
            }
        }
        Ok(())
    }

    async fn rollback(&self, tx: MemoryTx) -> StoreResult<()> {
        debug!(tx = tx.id, "Rolling back in-memory transaction");
        Ok(())
    }

    async fn truncate_staging(&self, tx: &mut MemoryTx, shard: ShardIndex) -> StoreResult<u64> {
        let tables = self.shard_mut(tx, shard)?;
        let removed = tables.staging.len() as u64;
        tables.staging.clear();
        Ok(removed)
    }

    async fn insert_staging(
        &self,
        tx: &mut MemoryTx,
        shard: ShardIndex,
        records: &[StagedRecord],
    ) -> StoreResult<u64> {
        let tables = self.shard_mut(tx, shard)?;
        tables.staging.extend_from_slice(records);
        Ok(records.len() as u64)
    }

    async fn delete_by_run_key(
        &self,
        tx: &mut MemoryTx,
        shard: ShardIndex,
        run_key: RunKey,
    ) -> StoreResult<u64> {
        let tables = self.shard_mut(tx, shard)?;
        let before = tables.destination.len();
        tables.destination.retain(|key, _| key.run_key != run_key);
        Ok((before - tables.destination.len()) as u64)
    }

    async fn promote_staging(
        &self,
        tx: &mut MemoryTx,
        shard: ShardIndex,
        run_key: RunKey,
    ) -> StoreResult<u64> {
        let tables = self.shard_mut(tx, shard)?;
        let mut promoted = BTreeSet::new();
        for record in tables.staging.iter().filter(|r| r.run_key == run_key) {
            let key = record.key();
            tables.destination.insert(key.clone(), record.clone());
            promoted.insert(key);
        }
        Ok(promoted.len() as u64)
    }

    async fn count_pending(
        &self,
        tx: &mut MemoryTx,
        shard: ShardIndex,
        run_key: RunKey,
    ) -> StoreResult<u64> {
        let tables = self.shard_mut(tx, shard)?;
        Ok(tables
            .destination
            .keys()
            .filter(|key| key.run_key == run_key)
            .count() as u64)
    }

    async fn select_page(
        &self,
        tx: &mut MemoryTx,
        shard: ShardIndex,
        run_key: RunKey,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<StagedRecord>> {
        let tables = self.shard_mut(tx, shard)?;
        Ok(tables
            .destination
            .values()
            .filter(|r| r.run_key == run_key)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn insert_consolidated(
        &self,
        tx: &mut MemoryTx,
        rows: &[StagedRecord],
    ) -> StoreResult<u64> {
        tx.consolidated_ops.push(ConsolidatedOp::Upsert(rows.to_vec()));
        Ok(rows.len() as u64)
    }

    async fn delete_consolidated(&self, tx: &mut MemoryTx, run_key: RunKey) -> StoreResult<u64> {
        let existing = self.consolidated_view(tx, run_key).len() as u64;
        tx.consolidated_ops.push(ConsolidatedOp::DeleteRunKey(run_key));
        Ok(existing)
    }

    async fn count_consolidated(&self, tx: &mut MemoryTx, run_key: RunKey) -> StoreResult<u64> {
        Ok(self.consolidated_view(tx, run_key).len() as u64)
    }
}
