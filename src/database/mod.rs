//! # Income Store
//!
//! Transactional persistence for the per-shard staging and destination tables and
//! for the consolidated table.
//!
//! Every write-bearing unit of work opens its own transaction through
//! [`IncomeStore::begin`] and passes the handle explicitly to each operation;
//! nothing is bound to the calling task. A dropped handle rolls back.

pub mod memory;
pub mod postgres;

pub use memory::{InMemoryIncomeStore, MemoryTx};
pub use postgres::PgIncomeStore;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::models::{RunKey, ShardIndex, StagedRecord};

/// Storage backend for staged, shard-destination and consolidated income rows
#[async_trait]
pub trait IncomeStore: Send + Sync + 'static {
    /// Open transaction; committed or rolled back explicitly, rolled back on drop
    type Tx: Send + 'static;

    /// Physical name of a shard's destination table, for reporting
    fn shard_table_name(&self, shard: ShardIndex) -> String;

    async fn begin(&self) -> StoreResult<Self::Tx>;

    async fn commit(&self, tx: Self::Tx) -> StoreResult<()>;

    async fn rollback(&self, tx: Self::Tx) -> StoreResult<()>;

    /// Remove every staged row of `shard`
    async fn truncate_staging(&self, tx: &mut Self::Tx, shard: ShardIndex) -> StoreResult<u64>;

    async fn insert_staging(
        &self,
        tx: &mut Self::Tx,
        shard: ShardIndex,
        records: &[StagedRecord],
    ) -> StoreResult<u64>;

    /// Remove destination rows of `shard` for `run_key`
    async fn delete_by_run_key(
        &self,
        tx: &mut Self::Tx,
        shard: ShardIndex,
        run_key: RunKey,
    ) -> StoreResult<u64>;

    /// Copy staged rows for `run_key` into the shard destination
    async fn promote_staging(
        &self,
        tx: &mut Self::Tx,
        shard: ShardIndex,
        run_key: RunKey,
    ) -> StoreResult<u64>;

    /// Destination rows of `shard` awaiting consolidation for `run_key`
    async fn count_pending(
        &self,
        tx: &mut Self::Tx,
        shard: ShardIndex,
        run_key: RunKey,
    ) -> StoreResult<u64>;

    /// Stable page of pending rows, ordered by client then product
    async fn select_page(
        &self,
        tx: &mut Self::Tx,
        shard: ShardIndex,
        run_key: RunKey,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<StagedRecord>>;

    /// Upsert rows into the consolidated table, keyed by (client, product, run key)
    async fn insert_consolidated(
        &self,
        tx: &mut Self::Tx,
        rows: &[StagedRecord],
    ) -> StoreResult<u64>;

    async fn delete_consolidated(&self, tx: &mut Self::Tx, run_key: RunKey) -> StoreResult<u64>;

    async fn count_consolidated(&self, tx: &mut Self::Tx, run_key: RunKey) -> StoreResult<u64>;
}
