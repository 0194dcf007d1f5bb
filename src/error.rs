//! Error types for the daily income engine.
//!
//! Shard- and chunk-level failures are captured into result objects at their task
//! boundary; only [`EngineError`] values end a run.

use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigurationError;
use crate::models::{RunKey, ShardIndex};

/// Failure reported by an [`crate::database::IncomeStore`] backend
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("Database error during {operation}: {reason}")]
    Database { operation: String, reason: String },
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid identifier '{0}'")]
    InvalidIdentifier(String),
}

impl StoreError {
    pub fn database(operation: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Database {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure of one shard's stage/commit unit of work
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComputationError {
    #[error("Shard {shard} failed during {operation}: {source}")]
    Store {
        shard: ShardIndex,
        operation: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("Income source failed for shard {shard}: {reason}")]
    Source { shard: ShardIndex, reason: String },
    #[error("Record for client {client_id} belongs to shard {expected}, not shard {shard}")]
    MisroutedRecord {
        shard: ShardIndex,
        client_id: String,
        expected: ShardIndex,
    },
    #[error("Shard {shard} produced more than one record for client {client_id}, product {product_code}")]
    DuplicateRecord {
        shard: ShardIndex,
        client_id: String,
        product_code: String,
    },
    #[error("Record for client {client_id} carries run key {found}, expected {expected}")]
    RunKeyMismatch {
        client_id: String,
        expected: RunKey,
        found: RunKey,
    },
}

impl ComputationError {
    pub fn store(shard: ShardIndex, operation: &'static str, source: StoreError) -> Self {
        Self::Store {
            shard,
            operation,
            source,
        }
    }
}

/// Failure raised by a [`crate::execution::ConcurrencyManager`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    #[error("Executor {executor} rejected {submitted} tasks (capacity {capacity})")]
    Rejected {
        executor: String,
        submitted: usize,
        capacity: usize,
    },
}

/// One failed shard, as listed in an abort
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardFailure {
    pub shard_index: ShardIndex,
    pub cause: String,
}

impl std::fmt::Display for ShardFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "shard {}: {}", self.shard_index, self.cause)
    }
}

fn format_failures(failures: &[ShardFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Run-level errors surfaced to the trigger
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("Run {run_key} aborted after {} shard failures: {}", .failures.len(), format_failures(.failures))]
    Abort {
        run_key: RunKey,
        failures: Vec<ShardFailure>,
    },

    #[error("Consolidation of shard {shard} failed at chunk {chunk}/{total_chunks}: {reason}")]
    AggregationChunk {
        shard: ShardIndex,
        chunk: usize,
        total_chunks: usize,
        reason: String,
    },

    #[error("Timeout error for operation {operation}: {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error(transparent)]
    Rejected(#[from] ExecutorError),

    #[error("Summary for {run_key} incomplete: {failure_count} shard(s) failed: {}", .messages.join("; "))]
    SummaryIncomplete {
        run_key: RunKey,
        failure_count: usize,
        messages: Vec<String>,
    },

    #[error("Consolidated store holds {actual} rows for {run_key}, expected {expected}")]
    ConsolidationMismatch {
        run_key: RunKey,
        expected: u64,
        actual: u64,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<ConfigurationError> for EngineError {
    fn from(err: ConfigurationError) -> Self {
        EngineError::Configuration(err.to_string())
    }
}

impl EngineError {
    /// Whether the run ended through the abort policy rather than a store fault
    pub fn is_abort(&self) -> bool {
        matches!(self, EngineError::Abort { .. })
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
