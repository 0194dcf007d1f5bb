#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Daily Income Engine
//!
//! Sharded parallel batch computation and consolidation of client daily income.
//!
//! ## Overview
//!
//! Client income data is horizontally partitioned into a fixed number of shards
//! (16 in the reference deployment). A run for one run key (a calendar date)
//! has two phases:
//!
//! 1. **Calculation**: every shard is staged and committed in parallel, each in an
//!    independent transaction. A few failed shards are retried once; too many
//!    failures abort the run.
//! 2. **Consolidation**: every shard's rows are copied into one consolidated
//!    table, in chunks sized from the shard's pending volume, again one
//!    transaction per shard.
//!
//! Both phases are idempotent for a run key, so a failed run can simply be
//! triggered again.
//!
//! ## Module Organization
//!
//! - [`models`] - Shard addressing, income records and result objects
//! - [`database`] - The transactional [`IncomeStore`] and its backends
//! - [`services`] - The external [`IncomeSource`]
//! - [`execution`] - Bounded fan-out executor and batch sizing
//! - [`orchestration`] - Shard worker, orchestrator, aggregator and the run service
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup and helpers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use daily_income_engine::config::EngineConfig;
//! use daily_income_engine::database::InMemoryIncomeStore;
//! use daily_income_engine::models::RunKey;
//! use daily_income_engine::orchestration::DailyIncomeService;
//! use daily_income_engine::services::StaticIncomeSource;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! daily_income_engine::logging::init_structured_logging();
//!
//! let config = Arc::new(EngineConfig::default());
//! let store = Arc::new(InMemoryIncomeStore::new(config.shard_layout()));
//! let source = Arc::new(StaticIncomeSource::new());
//!
//! let service = DailyIncomeService::new(store, source, config);
//! let report = service.calculate("2024-06-30".parse::<RunKey>()?).await?;
//! println!("consolidated {} rows", report.summary.total_affected_rows);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod execution;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod services;

pub use config::{ConfigManager, EngineConfig};
pub use constants::RunOutcome;
pub use database::{InMemoryIncomeStore, IncomeStore, PgIncomeStore};
pub use error::{ComputationError, EngineError, EngineResult, StoreError};
pub use models::{
    BatchProcessResult, RunKey, ShardIndex, ShardLayout, ShardResult, StagedRecord, SummaryResult,
    TableSummaryResult,
};
pub use orchestration::{
    Aggregator, CalculationOrchestrator, DailyIncomeService, RunReport, ShardWorker,
};
pub use services::{IncomeSource, StaticIncomeSource};
