//! Income source.
//!
//! The per-client income calculation itself lives outside the engine. A source
//! returns the candidate records for one shard and run key; the shard worker
//! stages and commits them.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::ComputationError;
use crate::models::{RunKey, ShardIndex, ShardLayout, StagedRecord};

/// Produces candidate records for one shard
#[async_trait]
pub trait IncomeSource: Send + Sync + 'static {
    async fn compute(
        &self,
        shard: ShardIndex,
        run_key: RunKey,
    ) -> Result<Vec<StagedRecord>, ComputationError>;
}

/// Source backed by a fixed set of precomputed records
#[derive(Debug, Default)]
pub struct StaticIncomeSource {
    records: DashMap<ShardIndex, Vec<StagedRecord>>,
}

impl StaticIncomeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route every record to the shard that owns its client
    pub fn from_records(
        layout: ShardLayout,
        records: impl IntoIterator<Item = StagedRecord>,
    ) -> Self {
        let source = Self::new();
        for record in records {
            let shard = layout.shard_of(&record.client_id);
            source.records.entry(shard).or_default().push(record);
        }
        source
    }

    /// Append records to a shard as-is, without routing
    pub fn insert(&self, shard: ShardIndex, records: impl IntoIterator<Item = StagedRecord>) {
        self.records.entry(shard).or_default().extend(records);
    }

    pub fn len(&self) -> usize {
        self.records.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl IncomeSource for StaticIncomeSource {
    async fn compute(
        &self,
        shard: ShardIndex,
        run_key: RunKey,
    ) -> Result<Vec<StagedRecord>, ComputationError> {
        Ok(self
            .records
            .get(&shard)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.run_key == run_key)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
