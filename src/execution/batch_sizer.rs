//! Batch sizing for chunked consolidation.
//!
//! A staircase over the pending row count: small volumes go in one or a few
//! default-sized chunks, large volumes in progressively larger chunks capped at
//! `max_size`.

use serde::Serialize;

use crate::config::BatchSizingConfig;

/// Chunk size for `total_count` pending rows
pub fn choose_batch_size(total_count: usize, config: &BatchSizingConfig) -> usize {
    if total_count <= config.min_size {
        total_count
    } else if total_count <= config.default_size || total_count <= config.small {
        config.default_size
    } else if total_count <= config.medium {
        config.medium_batch_size
    } else if total_count <= config.large {
        config.large_batch_size
    } else {
        config.max_size
    }
}

/// Chunking of one shard's pending rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchPlan {
    pub total: usize,
    pub batch_size: usize,
    pub total_batches: usize,
}

impl BatchPlan {
    pub fn for_total(total: usize, config: &BatchSizingConfig) -> Self {
        let batch_size = choose_batch_size(total, config);
        let total_batches = if total == 0 || batch_size == 0 {
            0
        } else {
            total.div_ceil(batch_size)
        };
        Self {
            total,
            batch_size,
            total_batches,
        }
    }

    /// `(offset, len)` of every chunk, in order
    pub fn windows(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.total_batches).map(move |batch| {
            let offset = batch * self.batch_size;
            (offset, self.batch_size.min(self.total - offset))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.total_batches == 0
    }
}
