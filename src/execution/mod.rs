//! # Execution
//!
//! Bounded task execution and batch sizing shared by the computation and
//! consolidation phases.

pub mod batch_sizer;
pub mod concurrency_manager;

pub use batch_sizer::{choose_batch_size, BatchPlan};
pub(crate) use concurrency_manager::panic_message;
pub use concurrency_manager::{
    ConcurrencyManager, ExecutionReport, ExecutorSettings, ShardTask, TaskOutcome,
};
