//! # Aggregator
//!
//! Copies every shard's committed rows for a run key into the consolidated
//! table. Each shard runs in one transaction of its own: count the pending rows,
//! size the chunks, then page through the shard and upsert chunk by chunk. A
//! failing chunk rolls the shard back and is reported in the [`SummaryResult`];
//! chunks are not retried.
//!
//! Shards run concurrently on a dedicated executor sized to the shard count.

use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::config::EngineConfig;
use crate::constants::events;
use crate::database::IncomeStore;
use crate::error::{EngineError, EngineResult, StoreError};
use crate::execution::{BatchPlan, ConcurrencyManager, ShardTask, TaskOutcome};
use crate::logging::{log_chunk_operation, log_shard_operation};
use crate::models::{RunKey, ShardIndex, SummaryResult, TableSummaryResult};

pub struct Aggregator<S> {
    store: Arc<S>,
    config: Arc<EngineConfig>,
}

impl<S> Clone for Aggregator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
        }
    }
}

/// Rows moved for one shard
struct ShardCopy {
    pending_rows: u64,
    affected_rows: u64,
    plan: BatchPlan,
}

impl<S> Aggregator<S>
where
    S: IncomeStore,
{
    pub fn new(store: Arc<S>, config: Arc<EngineConfig>) -> Self {
        Self { store, config }
    }

    /// Consolidate every shard for `run_key`
    #[instrument(skip_all, fields(run_key = %run_key))]
    pub async fn summarize(&self, run_key: RunKey) -> EngineResult<SummaryResult> {
        let started = Instant::now();
        let shards: Vec<ShardIndex> = self.config.shard_layout().indices().collect();
        let timeout = self.config.pipeline.summary_timeout();

        info!(
            event = events::SUMMARY_STARTED,
            run_key = %run_key,
            shard_count = shards.len(),
            replace_existing = self.config.aggregation.replace_existing,
            "📥 SUMMARY: Consolidating shards"
        );

        if self.config.aggregation.replace_existing {
            let cleared = self.clear_consolidated(run_key).await?;
            if cleared > 0 {
                info!(
                    run_key = %run_key,
                    cleared = cleared,
                    "🧹 SUMMARY: Cleared previous consolidated rows"
                );
            }
        }

        let tasks: Vec<ShardTask<TableSummaryResult>> = shards
            .iter()
            .map(|&shard| {
                let aggregator = self.clone();
                async move { aggregator.summarize_shard(shard, run_key).await }.boxed()
            })
            .collect();

        let manager = ConcurrencyManager::new(self.config.summary_executor_settings());
        let report = manager.run_all(tasks, timeout).await?;

        let mut summary = SummaryResult::new(run_key, shards.len());
        for (shard, outcome) in shards.iter().copied().zip(report.outcomes) {
            let result = match outcome {
                TaskOutcome::Completed(result) => result,
                TaskOutcome::Panicked(message) => self.unfinished(
                    shard,
                    format!("summary task panicked: {message}"),
                    report.elapsed,
                ),
                TaskOutcome::TimedOut => {
                    self.unfinished(shard, "summary timed out".to_string(), report.elapsed)
                }
                TaskOutcome::Cancelled => self.unfinished(
                    shard,
                    "summary cancelled before start".to_string(),
                    Duration::ZERO,
                ),
            };
            summary.add_table_result(result);
        }
        summary.set_total_time_ms(started.elapsed().as_millis() as u64);

        log_summary_report(&summary);
        Ok(summary)
    }

    /// Delete consolidated rows for `run_key` in a transaction of its own
    pub async fn clear_consolidated(&self, run_key: RunKey) -> EngineResult<u64> {
        let mut tx = self.store.begin().await?;
        match self.store.delete_consolidated(&mut tx, run_key).await {
            Ok(removed) => {
                self.store.commit(tx).await?;
                Ok(removed)
            }
            Err(err) => {
                if let Err(rollback_err) = self.store.rollback(tx).await {
                    warn!(error = %rollback_err, "⚠️ SUMMARY: Rollback failed after clear error");
                }
                Err(err.into())
            }
        }
    }

    /// Check that the consolidated table holds exactly the rows the summary copied
    pub async fn validate(&self, summary: &SummaryResult) -> EngineResult<()> {
        let run_key = summary.run_key;
        let mut tx = self.store.begin().await?;
        let counted = self.store.count_consolidated(&mut tx, run_key).await;
        self.store.rollback(tx).await?;
        let actual = counted?;
        let expected = summary.total_pending_rows();

        if actual != expected {
            error!(
                run_key = %run_key,
                expected = expected,
                actual = actual,
                "❌ SUMMARY: Consolidated row count does not match pending rows"
            );
            return Err(EngineError::ConsolidationMismatch {
                run_key,
                expected,
                actual,
            });
        }

        info!(run_key = %run_key, rows = actual, "✅ SUMMARY: Consolidated row count verified");
        Ok(())
    }

    /// Consolidate one shard in one transaction
    pub async fn summarize_shard(
        &self,
        shard: ShardIndex,
        run_key: RunKey,
    ) -> TableSummaryResult {
        let started = Instant::now();
        let table = self.store.shard_table_name(shard);

        let mut tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(err) => {
                return TableSummaryResult::failure(
                    shard,
                    table,
                    err,
                    started.elapsed().as_millis() as u64,
                )
            }
        };

        let copy = match self.copy_shard(&mut tx, shard, run_key).await {
            Ok(copy) => copy,
            Err(err) => {
                if let Err(rollback_err) = self.store.rollback(tx).await {
                    warn!(
                        shard = shard.value(),
                        error = %rollback_err,
                        "⚠️ SUMMARY: Rollback failed after chunk error"
                    );
                }
                let duration_ms = started.elapsed().as_millis() as u64;
                log_shard_operation(
                    events::SUMMARY_SHARD_FAILED,
                    run_key,
                    shard,
                    "rolled_back",
                    Some(duration_ms),
                    Some(&err.to_string()),
                );
                return TableSummaryResult::failure(shard, table, err, duration_ms);
            }
        };

        if let Err(err) = self.store.commit(tx).await {
            return TableSummaryResult::failure(
                shard,
                table,
                err,
                started.elapsed().as_millis() as u64,
            );
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        log_shard_operation(
            events::SUMMARY_SHARD_COMPLETED,
            run_key,
            shard,
            "consolidated",
            Some(duration_ms),
            Some(&format!(
                "pending={} affected={} chunks={}",
                copy.pending_rows, copy.affected_rows, copy.plan.total_batches
            )),
        );

        TableSummaryResult::success(
            shard,
            table,
            copy.pending_rows,
            copy.affected_rows,
            duration_ms,
        )
        .with_chunking(copy.plan.batch_size, copy.plan.total_batches)
    }

    /// Failed result for a shard whose task never reported back
    fn unfinished(
        &self,
        shard: ShardIndex,
        message: String,
        elapsed: Duration,
    ) -> TableSummaryResult {
        TableSummaryResult::failure(
            shard,
            self.store.shard_table_name(shard),
            message,
            elapsed.as_millis() as u64,
        )
    }

    async fn copy_shard(
        &self,
        tx: &mut S::Tx,
        shard: ShardIndex,
        run_key: RunKey,
    ) -> EngineResult<ShardCopy> {
        let pending_rows = self.store.count_pending(tx, shard, run_key).await?;
        let plan = BatchPlan::for_total(pending_rows as usize, &self.config.batch);
        if plan.is_empty() {
            return Ok(ShardCopy {
                pending_rows,
                affected_rows: 0,
                plan,
            });
        }

        let progress_interval = self.config.aggregation.progress_log_interval.max(1);
        let pause = self.config.aggregation.chunk_pause();
        let mut affected_rows = 0;

        for (index, (offset, len)) in plan.windows().enumerate() {
            let chunk = index + 1;
            let chunk_error = |err: StoreError| {
                log_chunk_operation(
                    events::SUMMARY_CHUNK_FAILED,
                    run_key,
                    shard,
                    chunk,
                    plan.total_batches,
                    0,
                    affected_rows,
                );
                EngineError::AggregationChunk {
                    shard,
                    chunk,
                    total_chunks: plan.total_batches,
                    reason: err.to_string(),
                }
            };

            let rows = self
                .store
                .select_page(tx, shard, run_key, offset, len)
                .await
                .map_err(chunk_error)?;
            let written = self
                .store
                .insert_consolidated(tx, &rows)
                .await
                .map_err(chunk_error)?;
            affected_rows += written;

            log_chunk_operation(
                events::SUMMARY_CHUNK_WRITTEN,
                run_key,
                shard,
                chunk,
                plan.total_batches,
                written,
                affected_rows,
            );
            if chunk % progress_interval == 0 || chunk == plan.total_batches {
                info!(
                    shard = shard.value(),
                    chunk = chunk,
                    total_chunks = plan.total_batches,
                    rows = affected_rows,
                    pending = pending_rows,
                    "📦 SUMMARY: Progress"
                );
            }

            if chunk < plan.total_batches && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }

        Ok(ShardCopy {
            pending_rows,
            affected_rows,
            plan,
        })
    }
}

/// Human-readable run report
fn log_summary_report(summary: &SummaryResult) {
    info!(
        run_key = %summary.run_key,
        total_time_ms = summary.total_time_ms,
        total_shards = summary.total_shards,
        succeeded = summary.success_count,
        failed = summary.failure_count,
        total_rows = summary.total_affected_rows,
        success_rate = %format!("{:.2}%", summary.success_rate() * 100.0),
        "📋 SUMMARY REPORT: {} shards consolidated for {}",
        summary.success_count,
        summary.run_key
    );
    for message in &summary.failure_messages {
        warn!(run_key = %summary.run_key, failure = %message, "📋 SUMMARY REPORT: Failure");
    }
}
