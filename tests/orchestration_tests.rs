//! End-to-end runs of the calculation and consolidation phases over the
//! in-memory store, with faults injected into chosen shards.

mod common;

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use common::*;
use daily_income_engine::constants::RunOutcome;
use daily_income_engine::error::{ComputationError, EngineError};
use daily_income_engine::models::{RunKey, ShardIndex, StagedRecord};
use daily_income_engine::orchestration::DailyIncomeService;
use daily_income_engine::services::{IncomeSource, StaticIncomeSource};

#[tokio::test]
async fn clean_run_commits_and_consolidates_every_shard() {
    let (service, store) = service_with(test_config(16), |_| 40);

    let report = service.calculate(run_key()).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Success);
    assert_eq!(report.batch.total_count(), 16);
    assert!(report.batch.is_all_success());
    assert_eq!(report.batch.total_rows_committed(), 640);
    assert_eq!(report.summary.success_count, 16);
    assert_eq!(report.summary.total_affected_rows, 640);
    assert_eq!(destination_total(&store, run_key()), 640);
    assert_eq!(store.inner().consolidated_rows(run_key()).len(), 640);
}

#[tokio::test]
async fn repeated_runs_leave_identical_state() {
    let (service, store) = service_with(test_config(8), |shard| 10 + shard.as_usize());

    let first = service.calculate(run_key()).await.unwrap();
    let destination_after_first = destination_total(&store, run_key());
    let consolidated_after_first = store.inner().consolidated_rows(run_key());

    let second = service.calculate(run_key()).await.unwrap();

    assert_eq!(first.outcome, RunOutcome::Success);
    assert_eq!(second.outcome, RunOutcome::Success);
    assert_eq!(destination_total(&store, run_key()), destination_after_first);
    assert_eq!(
        store.inner().consolidated_rows(run_key()).len(),
        consolidated_after_first.len()
    );
    assert_eq!(
        first.summary.total_affected_rows,
        second.summary.total_affected_rows
    );
    assert_ne!(first.run_id, second.run_id);
}

#[tokio::test]
async fn rows_of_other_run_keys_are_untouched() {
    let (service, store) = service_with(test_config(4), |_| 5);
    let layout = store.inner().layout();
    let shard = ShardIndex::new(2);
    store.inner().seed_destination(
        shard,
        records_for_shard(layout, shard, 7, other_run_key()),
    );

    service.calculate(run_key()).await.unwrap();

    assert_eq!(store.inner().destination_rows(shard, other_run_key()).len(), 7);
    assert!(store.inner().consolidated_rows(other_run_key()).is_empty());
}

#[tokio::test]
async fn single_failure_is_retried_and_run_succeeds() {
    let (service, store) = service_with(test_config(16), |_| 20);
    let failing = ShardIndex::new(3);
    store.fail_staging(failing, 1);

    let report = service.calculate(run_key()).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::RetrySuccess);
    assert!(report.batch.is_all_success());
    let retried = &report.batch.results()[3];
    assert_eq!(retried.shard_index, failing);
    assert_eq!(retried.attempt, 1);
    assert_eq!(store.staging_calls(failing), 2);
    assert_eq!(store.staging_calls(ShardIndex::new(4)), 1);
    assert_eq!(store.inner().destination_rows(failing, run_key()).len(), 20);
    assert_eq!(store.inner().consolidated_rows(run_key()).len(), 320);
}

#[tokio::test]
async fn failure_surviving_retry_aborts_without_touching_other_shards() {
    let (service, store) = service_with(test_config(16), |_| 12);
    let failing = ShardIndex::new(3);
    store.fail_staging(failing, 2);

    let err = service.calculate(run_key()).await.unwrap_err();

    match &err {
        EngineError::Abort { run_key: key, failures } => {
            assert_eq!(*key, run_key());
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].shard_index, failing);
            assert!(failures[0].cause.contains("injected failure"));
        }
        other => panic!("expected abort, got {other:?}"),
    }
    assert!(store.inner().destination_rows(failing, run_key()).is_empty());
    assert_eq!(store.inner().staging_len(failing), 0);
    assert_eq!(store.inner().destination_rows(ShardIndex::new(0), run_key()).len(), 12);
    assert_eq!(destination_total(&store, run_key()), 15 * 12);
    assert!(store.inner().consolidated_rows(run_key()).is_empty());
}

#[tokio::test]
async fn failures_at_threshold_are_still_retried() {
    let (service, store) = service_with(test_config(16), |_| 3);
    for shard in [1, 6, 11] {
        store.fail_staging(ShardIndex::new(shard), 1);
    }

    let report = service.calculate(run_key()).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::RetrySuccess);
    for shard in [1, 6, 11] {
        assert_eq!(store.staging_calls(ShardIndex::new(shard)), 2);
    }
}

#[tokio::test]
async fn failures_above_threshold_abort_without_retry() {
    let (service, store) = service_with(test_config(16), |_| 3);
    let failing = [0u32, 5, 9, 14];
    for shard in failing {
        store.fail_staging(ShardIndex::new(shard), 1);
    }

    let err = service.calculate(run_key()).await.unwrap_err();

    assert!(err.is_abort());
    if let EngineError::Abort { failures, .. } = &err {
        let shards: Vec<u32> = failures.iter().map(|f| f.shard_index.value()).collect();
        assert_eq!(shards, failing.to_vec());
    }
    for shard in failing {
        assert_eq!(store.staging_calls(ShardIndex::new(shard)), 1);
    }
    assert_eq!(destination_total(&store, run_key()), 12 * 3);
    assert!(err.to_string().contains("4 shard failures"));
}

#[tokio::test]
async fn misrouted_records_fail_their_shard() {
    let config = test_config(4);
    let layout = config.shard_layout();
    let store = Arc::new(FaultInjectingStore::new(layout));
    let source = StaticIncomeSource::new();
    let owner = ShardIndex::new(0);
    let wrong = ShardIndex::new(1);
    source.insert(wrong, records_for_shard(layout, owner, 1, run_key()));
    let service = DailyIncomeService::new(Arc::clone(&store), Arc::new(source), Arc::new(config));

    let err = service.calculate(run_key()).await.unwrap_err();

    match err {
        EngineError::Abort { failures, .. } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].shard_index, wrong);
            assert!(failures[0].cause.contains("belongs to shard 0"));
        }
        other => panic!("expected abort, got {other:?}"),
    }
    assert!(store.inner().destination_rows(wrong, run_key()).is_empty());
}

/// Source that panics the first time it is asked for one shard
struct PanicOnceSource {
    inner: StaticIncomeSource,
    shard: ShardIndex,
    panicked: AtomicBool,
}

#[async_trait]
impl IncomeSource for PanicOnceSource {
    async fn compute(
        &self,
        shard: ShardIndex,
        run_key: RunKey,
    ) -> Result<Vec<StagedRecord>, ComputationError> {
        if shard == self.shard && !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("income calculation crashed for shard {shard}");
        }
        self.inner.compute(shard, run_key).await
    }
}

#[tokio::test]
async fn panicking_shard_is_contained_and_retried() {
    let config = test_config(8);
    let layout = config.shard_layout();
    let store = Arc::new(FaultInjectingStore::new(layout));
    let source = Arc::new(PanicOnceSource {
        inner: source_with(layout, run_key(), |_| 6),
        shard: ShardIndex::new(4),
        panicked: AtomicBool::new(false),
    });
    let service = DailyIncomeService::new(Arc::clone(&store), source, Arc::new(config));

    let report = service.calculate(run_key()).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::RetrySuccess);
    assert_eq!(report.batch.results()[4].attempt, 1);
    assert_eq!(destination_total(&store, run_key()), 48);
}

#[tokio::test]
async fn shard_exceeding_pipeline_timeout_is_retried() {
    let mut config = test_config(4);
    config.pipeline.pipeline_timeout_seconds = 1;
    let (service, store) = service_with(config, |_| 4);
    let slow = ShardIndex::new(2);
    store.delay_staging(slow, 1, Duration::from_secs(5));

    let report = service.calculate(run_key()).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::RetrySuccess);
    let retried = &report.batch.results()[2];
    assert_eq!(retried.shard_index, slow);
    assert_eq!(retried.attempt, 1);
    assert_eq!(store.staging_calls(slow), 2);
    assert_eq!(store.inner().destination_rows(slow, run_key()).len(), 4);
}

#[tokio::test]
async fn retry_that_outlives_transaction_timeout_aborts() {
    let mut config = test_config(4);
    config.pipeline.pipeline_timeout_seconds = 1;
    config.pipeline.per_shard_transaction_timeout_seconds = 1;
    let (service, store) = service_with(config, |_| 4);
    let slow = ShardIndex::new(2);
    store.delay_staging(slow, 2, Duration::from_secs(4));

    let started = Instant::now();
    let err = service.calculate(run_key()).await.unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(4));
    match err {
        EngineError::Abort { failures, .. } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].shard_index, slow);
            assert!(failures[0].cause.contains("shard 2 retry"));
        }
        other => panic!("expected abort, got {other:?}"),
    }
    assert_eq!(store.staging_calls(slow), 2);
    assert!(store.inner().destination_rows(slow, run_key()).is_empty());
    assert_eq!(destination_total(&store, run_key()), 12);
}

#[tokio::test]
async fn reference_run_with_one_retry_and_a_large_shard() {
    let large = ShardIndex::new(3);
    let (service, store) = service_with(test_config(16), |shard| {
        if shard == large {
            12_345
        } else {
            100
        }
    });
    store.fail_staging(large, 1);

    let report = service.calculate(run_key()).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::RetrySuccess);
    assert_eq!(report.batch.failed_indices(), Vec::<ShardIndex>::new());
    let retried = &report.batch.results()[3];
    assert_eq!(retried.attempt, 1);
    assert_eq!(retried.rows_committed, 12_345);
    assert_eq!(store.staging_calls(large), 2);
    assert_eq!(store.inner().destination_rows(large, run_key()).len(), 12_345);

    let large_summary = &report.summary.per_shard_results[&large];
    assert_eq!(large_summary.pending_rows, 12_345);
    assert_eq!(large_summary.affected_rows, 12_345);
    assert_eq!(large_summary.chunk_size, 2000);
    assert_eq!(large_summary.chunk_count, 7);
    assert_eq!(store.consolidated_calls(large), 7);

    let layout = store.inner().layout();
    let consolidated = store.inner().consolidated_rows(run_key());
    let from_large = consolidated
        .iter()
        .filter(|row| layout.shard_of(&row.client_id) == large)
        .count();
    assert_eq!(from_large, 12_345);

    let small_summary = &report.summary.per_shard_results[&ShardIndex::new(0)];
    assert_eq!(small_summary.chunk_size, 100);
    assert_eq!(small_summary.chunk_count, 1);

    let expected = 15 * 100 + 12_345;
    assert_eq!(report.summary.total_affected_rows, expected);
    assert_eq!(store.inner().consolidated_rows(run_key()).len() as u64, expected);
}

#[tokio::test]
async fn cleanup_removes_every_trace_of_a_run() {
    let (service, store) = service_with(test_config(4), |_| 9);
    service.calculate(run_key()).await.unwrap();

    let cleaned = service.cleanup_partial_data(run_key()).await.unwrap();

    assert_eq!(cleaned, 4);
    assert_eq!(destination_total(&store, run_key()), 0);
    assert!(store.inner().consolidated_rows(run_key()).is_empty());

    let rerun = service.calculate(run_key()).await.unwrap();
    assert_eq!(rerun.summary.total_affected_rows, 36);
}
