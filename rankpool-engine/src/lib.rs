//! # rankpool engine
//!
//! Percentile ranking of athlete test results against a reference
//! population that grows with admitted athlete results.
//!
//! **Components:**
//! - [`admission`] decides whether a test joins the contribution [`ledger`]
//! - [`thresholds`] rebuilds the 101-point tables per (metric, cohort)
//! - [`query`] answers percentile lookups from those tables
//! - [`snapshot`] keeps the immutable ranking history
//! - [`composite`] averages the six force-profile components
//! - [`seed`] imports the baseline reference pool
//! - [`pipeline`] runs one incoming test record through all of the above
//! - [`api`] exposes the engine over HTTP

pub mod admission;
pub mod api;
pub mod athletes;
pub mod composite;
pub mod engine;
pub mod ledger;
pub mod pipeline;
pub mod query;
pub mod seed;
pub mod snapshot;
pub mod thresholds;
pub mod utils;

pub use engine::{Engine, EngineConfig};
pub use pipeline::{ProcessReport, ProcessStatus, TestRecord};
