//! # Calculation Orchestrator
//!
//! Fans one [`ShardWorker`] task per shard out onto a fresh
//! [`ConcurrencyManager`], folds every task outcome into a [`ShardResult`] and
//! resolves the run:
//!
//! - no failures: done
//! - at most `failure_abort_threshold` failures: retry each failed shard once,
//!   sequentially, each retry bounded by the shard transaction timeout; any
//!   failure surviving its retry aborts the run
//! - more failures: abort without retrying

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::ShardWorker;
use crate::config::EngineConfig;
use crate::constants::events;
use crate::database::IncomeStore;
use crate::error::{EngineError, EngineResult};
use crate::execution::{panic_message, ConcurrencyManager, ShardTask, TaskOutcome};
use crate::models::{BatchProcessResult, RunKey, ShardIndex, ShardResult};
use crate::services::IncomeSource;

pub struct CalculationOrchestrator<S, C> {
    worker: ShardWorker<S, C>,
    config: Arc<EngineConfig>,
}

impl<S, C> CalculationOrchestrator<S, C>
where
    S: IncomeStore,
    C: IncomeSource,
{
    pub fn new(worker: ShardWorker<S, C>, config: Arc<EngineConfig>) -> Self {
        Self { worker, config }
    }

    /// Compute and commit every shard for `run_key`
    #[instrument(skip_all, fields(run_key = %run_key))]
    pub async fn run(&self, run_key: RunKey) -> EngineResult<BatchProcessResult> {
        let shards: Vec<ShardIndex> = self.config.shard_layout().indices().collect();
        let timeout = self.config.pipeline.pipeline_timeout();

        info!(
            event = events::RUN_STARTED,
            run_key = %run_key,
            shard_count = shards.len(),
            timeout_seconds = timeout.as_secs(),
            "🚀 CALCULATION: Fanning out shard computation"
        );

        let tasks: Vec<ShardTask<ShardResult>> = shards
            .iter()
            .map(|&shard| {
                let worker = self.worker.clone();
                async move { worker.run_to_result(shard, run_key, 0).await }.boxed()
            })
            .collect();

        let manager = ConcurrencyManager::new(self.config.calculation_executor_settings());
        let report = manager.run_all(tasks, timeout).await?;
        let elapsed_ms = report.elapsed.as_millis() as u64;

        let results = shards
            .iter()
            .zip(report.outcomes)
            .map(|(&shard, outcome)| match outcome {
                TaskOutcome::Completed(result) => result,
                TaskOutcome::Panicked(message) => {
                    ShardResult::failure(shard, format!("shard task panicked: {message}"), 0)
                }
                TaskOutcome::TimedOut => ShardResult::failure(
                    shard,
                    EngineError::Timeout {
                        operation: format!("shard {shard} computation"),
                        timeout,
                    },
                    elapsed_ms,
                ),
                TaskOutcome::Cancelled => {
                    ShardResult::failure(shard, "shard task cancelled before start", 0)
                }
            })
            .collect();

        let batch = BatchProcessResult::new(results);
        info!(
            run_key = %run_key,
            total = batch.total_count(),
            succeeded = batch.success_count(),
            failed = batch.failure_count(),
            elapsed_ms = elapsed_ms,
            "📊 CALCULATION: Fan-out collected"
        );

        self.resolve(run_key, batch).await
    }

    /// Apply the retry/abort policy to a collected fan-out
    pub async fn resolve(
        &self,
        run_key: RunKey,
        batch: BatchProcessResult,
    ) -> EngineResult<BatchProcessResult> {
        if batch.is_all_success() {
            return Ok(batch);
        }

        let threshold = self.config.pipeline.failure_abort_threshold;
        if batch.failure_count() > threshold {
            let failures = batch.shard_failures();
            error!(
                event = events::RUN_ABORTED,
                run_key = %run_key,
                failed = batch.failure_count(),
                threshold = threshold,
                failed_shards = ?batch.failed_indices(),
                "🛑 CALCULATION: Too many shard failures, aborting without retry"
            );
            return Err(EngineError::Abort { run_key, failures });
        }

        warn!(
            run_key = %run_key,
            failed = batch.failure_count(),
            threshold = threshold,
            failed_shards = ?batch.failed_indices(),
            "🔁 CALCULATION: Retrying failed shards"
        );

        let mut retries = Vec::with_capacity(batch.failure_count());
        for shard in batch.failed_indices() {
            retries.push(self.retry_shard(shard, run_key).await);
        }

        let merged = batch.merge_retries(retries);
        if merged.is_all_success() {
            info!(
                run_key = %run_key,
                retried = batch.failure_count(),
                "✅ CALCULATION: Every failed shard succeeded on retry"
            );
            Ok(merged)
        } else {
            let failures = merged.shard_failures();
            error!(
                event = events::RUN_ABORTED,
                run_key = %run_key,
                failed_shards = ?merged.failed_indices(),
                "🛑 CALCULATION: Shards still failing after retry, aborting"
            );
            Err(EngineError::Abort { run_key, failures })
        }
    }

    /// One bounded retry; a retry outliving the shard transaction timeout or
    /// panicking counts as failed
    async fn retry_shard(&self, shard: ShardIndex, run_key: RunKey) -> ShardResult {
        let bound = self.config.pipeline.per_shard_transaction_timeout();
        let attempt =
            AssertUnwindSafe(self.worker.run_to_result(shard, run_key, 1)).catch_unwind();

        match tokio::time::timeout(bound, attempt).await {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => {
                let message = panic_message(payload.as_ref());
                error!(
                    run_key = %run_key,
                    shard = shard.value(),
                    panic = %message,
                    "💥 CALCULATION: Shard retry panicked"
                );
                ShardResult::failure(shard, format!("shard retry panicked: {message}"), 0)
                    .with_attempt(1)
            }
            Err(_) => {
                warn!(
                    run_key = %run_key,
                    shard = shard.value(),
                    timeout_seconds = bound.as_secs(),
                    "⏰ CALCULATION: Shard retry exceeded transaction timeout"
                );
                ShardResult::failure(
                    shard,
                    EngineError::Timeout {
                        operation: format!("shard {shard} retry"),
                        timeout: bound,
                    },
                    bound.as_millis() as u64,
                )
                .with_attempt(1)
            }
        }
    }
}
