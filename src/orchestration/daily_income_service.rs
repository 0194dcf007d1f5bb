//! # Daily Income Service
//!
//! Entry point for one run: compute and commit every shard, consolidate, then
//! verify that the consolidated table holds exactly the rows that were pending.

use serde::Serialize;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::{Aggregator, CalculationOrchestrator, ShardWorker};
use crate::config::EngineConfig;
use crate::constants::{events, RunOutcome};
use crate::database::IncomeStore;
use crate::error::{EngineError, EngineResult};
use crate::logging::log_error;
use crate::models::{BatchProcessResult, RunKey, SummaryResult};
use crate::services::IncomeSource;

/// Everything the trigger learns about a successful run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub run_key: RunKey,
    pub outcome: RunOutcome,
    pub batch: BatchProcessResult,
    pub summary: SummaryResult,
    pub elapsed_ms: u64,
}

pub struct DailyIncomeService<S, C> {
    worker: ShardWorker<S, C>,
    orchestrator: CalculationOrchestrator<S, C>,
    aggregator: Aggregator<S>,
    config: Arc<EngineConfig>,
}

impl<S, C> DailyIncomeService<S, C>
where
    S: IncomeStore,
    C: IncomeSource,
{
    pub fn new(store: Arc<S>, source: Arc<C>, config: Arc<EngineConfig>) -> Self {
        let worker = ShardWorker::new(Arc::clone(&store), source, config.shard_layout());
        Self {
            orchestrator: CalculationOrchestrator::new(worker.clone(), Arc::clone(&config)),
            aggregator: Aggregator::new(store, Arc::clone(&config)),
            worker,
            config,
        }
    }

    pub fn aggregator(&self) -> &Aggregator<S> {
        &self.aggregator
    }

    pub fn orchestrator(&self) -> &CalculationOrchestrator<S, C> {
        &self.orchestrator
    }

    /// Run both phases for `run_key`
    #[instrument(skip_all, fields(run_key = %run_key))]
    pub async fn calculate(&self, run_key: RunKey) -> EngineResult<RunReport> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        info!(
            run_id = %run_id,
            run_key = %run_key,
            shard_count = self.config.sharding.shard_count,
            "🧮 DAILY INCOME: Run started"
        );

        let batch = match self.orchestrator.run(run_key).await {
            Ok(batch) => batch,
            Err(err) => {
                log_error(
                    "daily_income_service",
                    "calculation_phase",
                    &err.to_string(),
                    Some(&format!("run_id={run_id} run_key={run_key}")),
                );
                return Err(err);
            }
        };
        let outcome = if batch.results().iter().any(|r| r.attempt > 0) {
            RunOutcome::RetrySuccess
        } else {
            RunOutcome::Success
        };

        let summary = self.aggregator.summarize(run_key).await?;
        if !summary.is_all_success() {
            error!(
                run_id = %run_id,
                run_key = %run_key,
                failed = summary.failure_count,
                "🛑 DAILY INCOME: Summary phase incomplete"
            );
            return Err(EngineError::SummaryIncomplete {
                run_key,
                failure_count: summary.failure_count,
                messages: summary.failure_messages.clone(),
            });
        }

        self.aggregator.validate(&summary).await?;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            event = events::RUN_COMPLETED,
            run_id = %run_id,
            run_key = %run_key,
            outcome = %outcome,
            rows = summary.total_affected_rows,
            elapsed_ms = elapsed_ms,
            "✅ DAILY INCOME: Run completed"
        );

        Ok(RunReport {
            run_id,
            run_key,
            outcome,
            batch,
            summary,
            elapsed_ms,
        })
    }

    /// Remove every trace of `run_key` from all shards and from the
    /// consolidated table; returns the number of shards cleaned
    ///
    /// A shard that fails to clean is logged and skipped.
    #[instrument(skip_all, fields(run_key = %run_key))]
    pub async fn cleanup_partial_data(&self, run_key: RunKey) -> EngineResult<usize> {
        let mut cleaned = 0;
        for shard in self.config.shard_layout().indices() {
            match self.worker.cleanup(shard, run_key).await {
                Ok(_) => cleaned += 1,
                Err(err) => warn!(
                    run_key = %run_key,
                    shard = shard.value(),
                    error = %err,
                    "⚠️ CLEANUP: Shard cleanup failed, continuing"
                ),
            }
        }

        let cleared = self.aggregator.clear_consolidated(run_key).await?;
        info!(
            run_key = %run_key,
            shards_cleaned = cleaned,
            consolidated_cleared = cleared,
            "🧹 CLEANUP: Partial data removed"
        );
        Ok(cleaned)
    }
}
