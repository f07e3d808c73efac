//! # rankpool common library
//!
//! Shared code for the ranking engine and its binary:
//! - Domain catalog (play levels, cohorts, test types, metrics)
//! - Database initialization, migrations and row models
//! - Bootstrap configuration loading
//! - Error type and timestamp helpers

pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use catalog::{Cohort, Metric, PlayLevel, TestMetrics, TestType, COMPOSITE_COMPONENTS};
pub use error::{Error, Result};
