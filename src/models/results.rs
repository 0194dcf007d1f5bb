//! Transient result objects.
//!
//! None of these are persisted: each is produced at a task or phase boundary and
//! consumed immediately by the component that decides what happens next.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;

use super::{RunKey, ShardIndex};
use crate::error::ShardFailure;

/// Outcome of one shard's stage + commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardResult {
    pub shard_index: ShardIndex,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
    /// 0 for the initial fan-out, 1.. for retries
    pub attempt: u32,
    pub rows_committed: u64,
}

impl ShardResult {
    pub fn success(shard_index: ShardIndex, rows_committed: u64, duration_ms: u64) -> Self {
        Self {
            shard_index,
            success: true,
            error: None,
            duration_ms,
            attempt: 0,
            rows_committed,
        }
    }

    pub fn failure(shard_index: ShardIndex, error: impl Display, duration_ms: u64) -> Self {
        Self {
            shard_index,
            success: false,
            error: Some(error.to_string()),
            duration_ms,
            attempt: 0,
            rows_committed: 0,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn is_failure(&self) -> bool {
        !self.success
    }
}

/// All shard results of one computation fan-out
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchProcessResult {
    results: Vec<ShardResult>,
    total_count: usize,
    success_count: usize,
    failure_count: usize,
}

impl BatchProcessResult {
    pub fn new(mut results: Vec<ShardResult>) -> Self {
        results.sort_by_key(|r| r.shard_index);
        let total_count = results.len();
        let success_count = results.iter().filter(|r| r.is_success()).count();
        Self {
            results,
            total_count,
            success_count,
            failure_count: total_count - success_count,
        }
    }

    /// Replace the entry of every retried shard with its retry outcome
    pub fn merge_retries(&self, retries: Vec<ShardResult>) -> Self {
        let mut by_shard: BTreeMap<ShardIndex, ShardResult> = self
            .results
            .iter()
            .cloned()
            .map(|r| (r.shard_index, r))
            .collect();
        for retry in retries {
            by_shard.insert(retry.shard_index, retry);
        }
        Self::new(by_shard.into_values().collect())
    }

    pub fn results(&self) -> &[ShardResult] {
        &self.results
    }

    pub fn total_count(&self) -> usize {
        self.total_count
    }

    pub fn success_count(&self) -> usize {
        self.success_count
    }

    pub fn failure_count(&self) -> usize {
        self.failure_count
    }

    pub fn is_all_success(&self) -> bool {
        self.failure_count == 0
    }

    pub fn has_failures(&self) -> bool {
        self.failure_count > 0
    }

    pub fn successes(&self) -> Vec<&ShardResult> {
        self.results.iter().filter(|r| r.is_success()).collect()
    }

    pub fn failures(&self) -> Vec<&ShardResult> {
        self.results.iter().filter(|r| r.is_failure()).collect()
    }

    pub fn failed_indices(&self) -> Vec<ShardIndex> {
        self.failures().iter().map(|r| r.shard_index).collect()
    }

    /// Failed shards with their causes, as listed in an abort
    pub fn shard_failures(&self) -> Vec<ShardFailure> {
        self.failures()
            .into_iter()
            .map(|r| ShardFailure {
                shard_index: r.shard_index,
                cause: r.error.clone().unwrap_or_else(|| "unknown".to_string()),
            })
            .collect()
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_count == 0 {
            0.0
        } else {
            self.success_count as f64 / self.total_count as f64
        }
    }

    pub fn total_rows_committed(&self) -> u64 {
        self.results.iter().map(|r| r.rows_committed).sum()
    }
}

/// Outcome of consolidating one shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSummaryResult {
    pub shard_index: ShardIndex,
    pub table_name: String,
    /// Rows found pending when the shard's transaction started
    pub pending_rows: u64,
    pub affected_rows: u64,
    pub chunk_size: usize,
    pub chunk_count: usize,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

impl TableSummaryResult {
    pub fn success(
        shard_index: ShardIndex,
        table_name: impl Into<String>,
        pending_rows: u64,
        affected_rows: u64,
        duration_ms: u64,
    ) -> Self {
        Self {
            shard_index,
            table_name: table_name.into(),
            pending_rows,
            affected_rows,
            chunk_size: 0,
            chunk_count: 0,
            duration_ms,
            success: true,
            error: None,
        }
    }

    pub fn failure(
        shard_index: ShardIndex,
        table_name: impl Into<String>,
        error: impl Display,
        duration_ms: u64,
    ) -> Self {
        Self {
            shard_index,
            table_name: table_name.into(),
            pending_rows: 0,
            affected_rows: 0,
            chunk_size: 0,
            chunk_count: 0,
            duration_ms,
            success: false,
            error: Some(error.to_string()),
        }
    }

    pub fn with_chunking(mut self, chunk_size: usize, chunk_count: usize) -> Self {
        self.chunk_size = chunk_size;
        self.chunk_count = chunk_count;
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

/// Run-level roll-up of every shard's consolidation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryResult {
    pub run_key: RunKey,
    pub total_time_ms: u64,
    pub total_shards: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub total_affected_rows: u64,
    pub per_shard_results: BTreeMap<ShardIndex, TableSummaryResult>,
    pub failure_messages: Vec<String>,
}

impl SummaryResult {
    pub fn new(run_key: RunKey, total_shards: usize) -> Self {
        Self {
            run_key,
            total_time_ms: 0,
            total_shards,
            success_count: 0,
            failure_count: 0,
            total_affected_rows: 0,
            per_shard_results: BTreeMap::new(),
            failure_messages: Vec::new(),
        }
    }

    pub fn add_table_result(&mut self, result: TableSummaryResult) {
        if result.is_success() {
            self.success_count += 1;
            self.total_affected_rows += result.affected_rows;
        } else {
            self.failure_count += 1;
            self.failure_messages.push(format!(
                "shard {}: {}",
                result.shard_index,
                result.error.as_deref().unwrap_or("unknown")
            ));
        }
        self.per_shard_results.insert(result.shard_index, result);
    }

    pub fn set_total_time_ms(&mut self, total_time_ms: u64) {
        self.total_time_ms = total_time_ms;
    }

    pub fn is_all_success(&self) -> bool {
        self.failure_count == 0
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_shards == 0 {
            0.0
        } else {
            self.success_count as f64 / self.total_shards as f64
        }
    }

    /// Rows pending across all successfully consolidated shards
    pub fn total_pending_rows(&self) -> u64 {
        self.per_shard_results
            .values()
            .filter(|r| r.is_success())
            .map(|r| r.pending_rows)
            .sum()
    }
}
