//! # Services
//!
//! Collaborators the engine calls out to.

pub mod income_source;

pub use income_source::{IncomeSource, StaticIncomeSource};
