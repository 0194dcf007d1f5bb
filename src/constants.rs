//! # System Constants
//!
//! Reference values that define the operational boundaries of the daily income
//! engine. Every value here is only a default: the live value always comes from
//! [`crate::config::EngineConfig`].

use serde::{Deserialize, Serialize};

/// Structured log operation names, shared by the orchestration and aggregation
/// phases so that log queries can filter on a stable vocabulary.
pub mod events {
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_COMPLETED: &str = "run.completed";
    pub const RUN_ABORTED: &str = "run.aborted";

    pub const SHARD_STARTED: &str = "shard.started";
    pub const SHARD_COMMITTED: &str = "shard.committed";
    pub const SHARD_FAILED: &str = "shard.failed";
    pub const SHARD_RETRY_REQUESTED: &str = "shard.retry_requested";
    pub const SHARD_CLEANED: &str = "shard.cleaned";

    pub const SUMMARY_STARTED: &str = "summary.started";
    pub const SUMMARY_CHUNK_WRITTEN: &str = "summary.chunk_written";
    pub const SUMMARY_CHUNK_FAILED: &str = "summary.chunk_failed";
    pub const SUMMARY_SHARD_COMPLETED: &str = "summary.shard_completed";
    pub const SUMMARY_SHARD_FAILED: &str = "summary.shard_failed";
}

/// Deployment-wide defaults
pub mod system {
    /// Reference shard count for a deployment
    pub const DEFAULT_SHARD_COUNT: u32 = 16;

    /// Shards allowed to fail before a run aborts instead of retrying
    pub const DEFAULT_FAILURE_ABORT_THRESHOLD: usize = 3;

    /// Wall-clock bound for the computation fan-out (30 minutes)
    pub const DEFAULT_PIPELINE_TIMEOUT_SECONDS: u64 = 30 * 60;

    /// Store-level bound on one shard transaction (5 minutes)
    pub const DEFAULT_SHARD_TRANSACTION_TIMEOUT_SECONDS: u64 = 300;

    /// Wall-clock bound for the summarization fan-out (5 minutes)
    pub const DEFAULT_SUMMARY_TIMEOUT_SECONDS: u64 = 300;

    /// Grace period granted to in-flight tasks when an executor is torn down
    pub const DEFAULT_SHUTDOWN_GRACE_SECONDS: u64 = 60;

    /// Grace period of the summarization executor
    pub const DEFAULT_SUMMARY_SHUTDOWN_GRACE_SECONDS: u64 = 30;

    /// Lower bound of the executor work queue
    pub const MIN_QUEUE_CAPACITY: usize = 10;

    /// Pause between two consolidation chunks of the same shard
    pub const DEFAULT_CHUNK_PAUSE_MS: u64 = 10;

    /// Emit a progress line every N consolidation chunks
    pub const DEFAULT_PROGRESS_LOG_INTERVAL: usize = 10;

    pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// Worker name prefixes, one per executor flavour
pub mod workers {
    pub const CALCULATION_WORKER_PREFIX: &str = "daily-income-worker";
    pub const SUMMARY_WORKER_PREFIX: &str = "summary-worker";
}

/// Reference batch sizing thresholds
pub mod batch {
    pub const MIN_SIZE: usize = 100;
    pub const DEFAULT_SIZE: usize = 1000;
    pub const MAX_SIZE: usize = 5000;
    pub const SMALL_THRESHOLD: usize = 10_000;
    pub const MEDIUM_THRESHOLD: usize = 50_000;
    pub const LARGE_THRESHOLD: usize = 100_000;
    pub const MEDIUM_BATCH_SIZE: usize = 2000;
    pub const LARGE_BATCH_SIZE: usize = 3000;
}

/// Default table naming used by the Postgres store
pub mod tables {
    pub const SHARD_TABLE_PREFIX: &str = "tbclientdlyincome";
    pub const STAGING_TABLE_PREFIX: &str = "tbclientdlyincometmp";
    pub const CONSOLIDATED_TABLE: &str = "tbclientdlyincome";
}

/// Terminal outcome of one engine run, as reported to the trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every shard committed on the first attempt
    Success,
    /// Some shards failed and every one of them succeeded on retry
    RetrySuccess,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Success => write!(f, "success"),
            RunOutcome::RetrySuccess => write!(f, "retry_success"),
        }
    }
}
