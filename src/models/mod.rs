//! # Data Model
//!
//! Shard addressing, the staged/consolidated income record, and the transient
//! result objects produced by the orchestration and aggregation phases.

pub mod record;
pub mod results;
pub mod shard;

pub use record::{RecordKey, RunKey, StagedRecord};
pub use results::{BatchProcessResult, ShardResult, SummaryResult, TableSummaryResult};
pub use shard::{ShardIndex, ShardLayout};
