//! # Orchestration
//!
//! The two phases of a run and their composition:
//!
//! - [`ShardWorker`] stages and commits one shard in one transaction
//! - [`CalculationOrchestrator`] fans shard work out, collects results and applies
//!   the retry/abort policy
//! - [`Aggregator`] consolidates every shard's rows in chunks
//! - [`DailyIncomeService`] runs both phases for a run key and validates the result

pub mod aggregator;
pub mod calculation_orchestrator;
pub mod daily_income_service;
pub mod shard_worker;

pub use aggregator::Aggregator;
pub use calculation_orchestrator::CalculationOrchestrator;
pub use daily_income_service::{DailyIncomeService, RunReport};
pub use shard_worker::{ShardCommit, ShardWorker};
