//! Percentile Query Service
//!
//! Answers "what percentile does this value reach" from the materialized
//! threshold tables. Resolution is one percentile point (101 buckets).

use rankpool_common::db::ThresholdRow;
use rankpool_common::{Cohort, Error, Metric, Result};
use sqlx::SqlitePool;

/// Read-only access to threshold tables
#[derive(Clone)]
pub struct PercentileQuery {
    pool: SqlitePool,
}

impl PercentileQuery {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Percentile rank of `value` within the (metric, cohort) population
    ///
    /// Returns `Ok(None)` when the pair has no table or an empty population;
    /// callers treat that as insufficient data, not as zero.
    pub async fn lookup(&self, value: f64, metric: Metric, cohort: Cohort) -> Result<Option<u8>> {
        if !value.is_finite() {
            return Err(Error::InvalidInput(format!("Value must be finite, got {}", value)));
        }

        // One statement, so the answer comes from a single committed table
        let (population, percentile): (Option<i64>, Option<i64>) = sqlx::query_as(
            r#"
            SELECT
                MAX(population),
                MAX(CASE WHEN value IS NOT NULL AND value <= ? THEN percentile END)
            FROM thresholds
            WHERE metric = ? AND cohort = ?
            "#,
        )
        .bind(value)
        .bind(metric.key())
        .bind(cohort.as_str())
        .fetch_one(&self.pool)
        .await?;

        match population {
            None | Some(0) => Ok(None),
            Some(_) => {
                let percentile = percentile.unwrap_or(0);
                u8::try_from(percentile).map(Some).map_err(|_| {
                    Error::Internal(format!("Stored percentile out of range: {}", percentile))
                })
            }
        }
    }

    /// Full 101-row table for a pair, ascending by percentile
    ///
    /// Errors with `NotFound` when the pair has never been built.
    pub async fn table(&self, metric: Metric, cohort: Cohort) -> Result<Vec<ThresholdRow>> {
        let rows = sqlx::query(
            r#"
            SELECT metric, cohort, percentile, value, population
            FROM thresholds
            WHERE metric = ? AND cohort = ?
            ORDER BY percentile
            "#,
        )
        .bind(metric.key())
        .bind(cohort.as_str())
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Err(Error::NotFound(format!("No threshold table for {} / {}", metric, cohort)));
        }

        rows.iter().map(ThresholdRow::from_row).collect()
    }
}
