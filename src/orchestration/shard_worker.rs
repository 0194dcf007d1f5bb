//! # Shard Worker
//!
//! Stages and commits one shard for one run key inside a single transaction:
//!
//! 1. truncate the shard's staging area
//! 2. obtain candidates from the [`IncomeSource`] and insert them into staging
//! 3. delete the shard's destination rows for the run key
//! 4. promote the staged rows into the destination
//!
//! Both phases replace rather than append, so processing the same shard twice
//! for a run key leaves the same destination rows. Any error rolls the whole
//! transaction back.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::constants::events;
use crate::database::IncomeStore;
use crate::error::ComputationError;
use crate::logging::log_shard_operation;
use crate::models::{RecordKey, RunKey, ShardIndex, ShardLayout, ShardResult, StagedRecord};
use crate::services::IncomeSource;

/// Row counts of one committed shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardCommit {
    pub shard: ShardIndex,
    pub run_key: RunKey,
    pub staged_rows: u64,
    pub replaced_rows: u64,
    pub committed_rows: u64,
    pub duration: Duration,
}

/// Per-shard stage + commit unit of work
pub struct ShardWorker<S, C> {
    store: Arc<S>,
    source: Arc<C>,
    layout: ShardLayout,
}

impl<S, C> Clone for ShardWorker<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            source: Arc::clone(&self.source),
            layout: self.layout,
        }
    }
}

impl<S, C> ShardWorker<S, C>
where
    S: IncomeStore,
    C: IncomeSource,
{
    pub fn new(store: Arc<S>, source: Arc<C>, layout: ShardLayout) -> Self {
        Self {
            store,
            source,
            layout,
        }
    }

    pub fn layout(&self) -> ShardLayout {
        self.layout
    }

    /// Stage and commit `shard` for `run_key` in one transaction
    pub async fn process(
        &self,
        shard: ShardIndex,
        run_key: RunKey,
    ) -> Result<ShardCommit, ComputationError> {
        let started = Instant::now();
        log_shard_operation(events::SHARD_STARTED, run_key, shard, "started", None, None);

        let mut tx = self
            .store
            .begin()
            .await
            .map_err(|e| ComputationError::store(shard, "begin", e))?;

        let counts = match self.stage_and_commit(&mut tx, shard, run_key).await {
            Ok(counts) => counts,
            Err(err) => {
                if let Err(rollback_err) = self.store.rollback(tx).await {
                    warn!(
                        shard = shard.value(),
                        run_key = %run_key,
                        error = %rollback_err,
                        "⚠️ SHARD: Rollback failed after shard error"
                    );
                }
                log_shard_operation(
                    events::SHARD_FAILED,
                    run_key,
                    shard,
                    "rolled_back",
                    Some(started.elapsed().as_millis() as u64),
                    Some(&err.to_string()),
                );
                return Err(err);
            }
        };

        self.store
            .commit(tx)
            .await
            .map_err(|e| ComputationError::store(shard, "commit", e))?;

        let (staged_rows, replaced_rows, committed_rows) = counts;
        let duration = started.elapsed();
        log_shard_operation(
            events::SHARD_COMMITTED,
            run_key,
            shard,
            "committed",
            Some(duration.as_millis() as u64),
            Some(&format!(
                "staged={staged_rows} replaced={replaced_rows} committed={committed_rows}"
            )),
        );

        Ok(ShardCommit {
            shard,
            run_key,
            staged_rows,
            replaced_rows,
            committed_rows,
            duration,
        })
    }

    /// Clean the shard, then process it again
    pub async fn retry(
        &self,
        shard: ShardIndex,
        run_key: RunKey,
        attempt: u32,
    ) -> Result<ShardCommit, ComputationError> {
        log_shard_operation(
            events::SHARD_RETRY_REQUESTED,
            run_key,
            shard,
            "retrying",
            None,
            Some(&format!("attempt={attempt}")),
        );
        self.cleanup(shard, run_key).await?;
        self.process(shard, run_key).await
    }

    /// Remove the shard's destination rows for `run_key` and empty its staging
    /// area, in a transaction of its own
    pub async fn cleanup(
        &self,
        shard: ShardIndex,
        run_key: RunKey,
    ) -> Result<u64, ComputationError> {
        let started = Instant::now();
        let mut tx = self
            .store
            .begin()
            .await
            .map_err(|e| ComputationError::store(shard, "begin", e))?;

        let removed = match self.clear_shard(&mut tx, shard, run_key).await {
            Ok(removed) => removed,
            Err(err) => {
                if let Err(rollback_err) = self.store.rollback(tx).await {
                    warn!(
                        shard = shard.value(),
                        error = %rollback_err,
                        "⚠️ SHARD: Rollback failed after cleanup error"
                    );
                }
                return Err(err);
            }
        };

        self.store
            .commit(tx)
            .await
            .map_err(|e| ComputationError::store(shard, "commit", e))?;

        log_shard_operation(
            events::SHARD_CLEANED,
            run_key,
            shard,
            "cleaned",
            Some(started.elapsed().as_millis() as u64),
            Some(&format!("removed={removed}")),
        );
        Ok(removed)
    }

    /// [`Self::process`] (or [`Self::retry`] for `attempt > 0`) folded into a
    /// [`ShardResult`]
    pub async fn run_to_result(
        &self,
        shard: ShardIndex,
        run_key: RunKey,
        attempt: u32,
    ) -> ShardResult {
        let started = Instant::now();
        let outcome = if attempt == 0 {
            self.process(shard, run_key).await
        } else {
            self.retry(shard, run_key, attempt).await
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(commit) => ShardResult::success(shard, commit.committed_rows, duration_ms),
            Err(err) => ShardResult::failure(shard, err, duration_ms),
        }
        .with_attempt(attempt)
    }

    async fn stage_and_commit(
        &self,
        tx: &mut S::Tx,
        shard: ShardIndex,
        run_key: RunKey,
    ) -> Result<(u64, u64, u64), ComputationError> {
        self.store
            .truncate_staging(tx, shard)
            .await
            .map_err(|e| ComputationError::store(shard, "truncate_staging", e))?;

        let candidates = self.source.compute(shard, run_key).await?;
        self.check_candidates(shard, run_key, &candidates)?;

        let staged = self
            .store
            .insert_staging(tx, shard, &candidates)
            .await
            .map_err(|e| ComputationError::store(shard, "insert_staging", e))?;
        debug!(shard = shard.value(), staged = staged, "Candidates staged");

        let replaced = self
            .store
            .delete_by_run_key(tx, shard, run_key)
            .await
            .map_err(|e| ComputationError::store(shard, "delete_by_run_key", e))?;

        let committed = self
            .store
            .promote_staging(tx, shard, run_key)
            .await
            .map_err(|e| ComputationError::store(shard, "promote_staging", e))?;

        Ok((staged, replaced, committed))
    }

    async fn clear_shard(
        &self,
        tx: &mut S::Tx,
        shard: ShardIndex,
        run_key: RunKey,
    ) -> Result<u64, ComputationError> {
        let removed = self
            .store
            .delete_by_run_key(tx, shard, run_key)
            .await
            .map_err(|e| ComputationError::store(shard, "delete_by_run_key", e))?;
        self.store
            .truncate_staging(tx, shard)
            .await
            .map_err(|e| ComputationError::store(shard, "truncate_staging", e))?;
        Ok(removed)
    }

    /// Every candidate must belong to this shard and this run, once
    fn check_candidates(
        &self,
        shard: ShardIndex,
        run_key: RunKey,
        candidates: &[StagedRecord],
    ) -> Result<(), ComputationError> {
        let mut seen: HashSet<RecordKey> = HashSet::with_capacity(candidates.len());
        for candidate in candidates {
            let owner = self.layout.shard_of(&candidate.client_id);
            if owner != shard {
                return Err(ComputationError::MisroutedRecord {
                    shard,
                    client_id: candidate.client_id.clone(),
                    expected: owner,
                });
            }
            if candidate.run_key != run_key {
                return Err(ComputationError::RunKeyMismatch {
                    client_id: candidate.client_id.clone(),
                    expected: run_key,
                    found: candidate.run_key,
                });
            }
            if !seen.insert(candidate.key()) {
                return Err(ComputationError::DuplicateRecord {
                    shard,
                    client_id: candidate.client_id.clone(),
                    product_code: candidate.product_code.clone(),
                });
            }
        }
        Ok(())
    }
}
