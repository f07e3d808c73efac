//! Threshold Table and Recomputation
//!
//! A threshold table maps each percentile 0..=100 of one (metric, cohort)
//! population to the value an athlete must reach to be ranked there. Tables
//! are always rebuilt in full from the seed pool plus the contribution
//! ledger, never patched.
//!
//! **Rule:** nearest rank. For a sorted population of size N the value at
//! percentile p is `sorted[max(0, ceil(p * N / 100) - 1)]`, so ties resolve
//! to the lower index and the gate is inclusive of equal values.
//!
//! **Atomicity:** the 101 rows of one table are deleted and re-inserted in a
//! single transaction. Readers in WAL mode see either the old set or the new
//! one, never a mix.

use crate::utils::retry_on_lock;
use rankpool_common::{time, Cohort, Error, Metric, PlayLevel, Result};
use serde::Serialize;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

/// Number of rows in a complete threshold table (percentiles 0..=100)
pub const TABLE_ROWS: usize = 101;

/// Index into an ascending population of size `n` for percentile `p`
///
/// Integer form of `max(0, ceil(p/100 * n) - 1)`.
pub fn nearest_rank_index(percentile: u8, n: usize) -> usize {
    (percentile as usize * n).div_ceil(100).saturating_sub(1)
}

/// In-memory threshold table for one (metric, cohort) pair
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdTable {
    pub metric: Metric,
    pub cohort: Cohort,
    population: usize,
    values: Vec<Option<f64>>,
}

impl ThresholdTable {
    /// Build the 101 thresholds from raw reference values
    ///
    /// Non-finite values are dropped before ranking. An empty population
    /// yields 101 empty thresholds.
    pub fn build(metric: Metric, cohort: Cohort, mut population: Vec<f64>) -> Self {
        population.retain(|v| v.is_finite());
        population.sort_by(f64::total_cmp);

        let n = population.len();
        let values = (0..=100u8)
            .map(|p| {
                if n == 0 {
                    None
                } else {
                    Some(population[nearest_rank_index(p, n)])
                }
            })
            .collect();

        Self {
            metric,
            cohort,
            population: n,
            values,
        }
    }

    pub fn population(&self) -> usize {
        self.population
    }

    /// Threshold value at `percentile`, `None` when the table is empty
    pub fn value_at(&self, percentile: u8) -> Option<f64> {
        self.values.get(percentile as usize).copied().flatten()
    }

    /// `(percentile, value)` pairs in ascending percentile order
    pub fn rows(&self) -> impl Iterator<Item = (u8, Option<f64>)> + '_ {
        self.values.iter().enumerate().map(|(p, v)| (p as u8, *v))
    }

    /// Highest percentile whose threshold is at or below `value`
    ///
    /// Returns 0 when `value` is below every threshold and `None` when the
    /// table has no population.
    pub fn percentile_of(&self, value: f64) -> Option<u8> {
        if self.population == 0 {
            return None;
        }
        Some(
            self.rows()
                .filter(|(_, threshold)| threshold.is_some_and(|t| t <= value))
                .map(|(p, _)| p)
                .max()
                .unwrap_or(0),
        )
    }
}

/// Result of rebuilding one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebuildStats {
    pub metric: Metric,
    pub cohort: Cohort,
    pub population: usize,
}

/// Writes threshold tables
#[derive(Clone)]
pub struct ThresholdStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl ThresholdStore {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self { pool, max_lock_wait_ms }
    }

    /// Rebuild the table for one (metric, cohort) pair
    ///
    /// The whole transaction is retried when SQLite reports lock contention.
    pub async fn rebuild(&self, metric: Metric, cohort: Cohort) -> Result<RebuildStats> {
        let pool = &self.pool;
        let stats = retry_on_lock("rebuild_thresholds", self.max_lock_wait_ms, || async move {
            let mut tx = pool.begin().await?;
            let stats = rebuild_in_tx(&mut tx, metric, cohort).await?;
            tx.commit().await?;
            Ok(stats)
        })
        .await?;

        debug!(
            metric = %metric,
            cohort = %cohort,
            population = stats.population,
            "Threshold table rebuilt"
        );
        Ok(stats)
    }

    /// Rebuild the tables whose population contains values recorded at `level`
    pub async fn rebuild_for_level(
        &self,
        metric: Metric,
        level: PlayLevel,
    ) -> Result<Vec<RebuildStats>> {
        let mut rebuilt = Vec::with_capacity(2);
        for cohort in Cohort::containing(level) {
            rebuilt.push(self.rebuild(metric, cohort).await?);
        }
        Ok(rebuilt)
    }

    /// Rebuild every (metric, cohort) table
    pub async fn rebuild_all(&self) -> Result<Vec<RebuildStats>> {
        let mut rebuilt = Vec::with_capacity(Metric::ALL.len() * Cohort::ALL.len());
        for metric in Metric::ALL {
            for cohort in Cohort::ALL {
                rebuilt.push(self.rebuild(metric, cohort).await?);
            }
        }

        let populated = rebuilt.iter().filter(|s| s.population > 0).count();
        info!(
            tables = rebuilt.len(),
            populated,
            "Rebuilt all threshold tables"
        );
        Ok(rebuilt)
    }
}

async fn rebuild_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    metric: Metric,
    cohort: Cohort,
) -> Result<RebuildStats> {
    // Delete first so the write lock is taken before the population is read
    sqlx::query("DELETE FROM thresholds WHERE metric = ? AND cohort = ?")
        .bind(metric.key())
        .bind(cohort.as_str())
        .execute(&mut **tx)
        .await?;

    let population = gather_population(tx, metric, cohort).await?;
    let table = ThresholdTable::build(metric, cohort, population);
    let rebuilt_at = time::to_db(&time::now());
    let population_size = i64::try_from(table.population())
        .map_err(|_| Error::Internal(format!("Population too large for {} / {}", metric, cohort)))?;

    for (percentile, value) in table.rows() {
        sqlx::query(
            r#"
            INSERT INTO thresholds (metric, cohort, percentile, value, population, rebuilt_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(metric.key())
        .bind(cohort.as_str())
        .bind(percentile as i64)
        .bind(value)
        .bind(population_size)
        .bind(&rebuilt_at)
        .execute(&mut **tx)
        .await?;
    }

    Ok(RebuildStats {
        metric,
        cohort,
        population: table.population(),
    })
}

/// Seed pool plus ledger values for one cohort
async fn gather_population(
    tx: &mut Transaction<'_, Sqlite>,
    metric: Metric,
    cohort: Cohort,
) -> Result<Vec<f64>> {
    let values = match cohort {
        Cohort::Level(level) => {
            sqlx::query_scalar::<_, f64>(
                r#"
                SELECT value FROM seed_values WHERE metric = ? AND play_level = ?
                UNION ALL
                SELECT value FROM contributions WHERE metric = ? AND play_level = ?
                "#,
            )
            .bind(metric.key())
            .bind(level.as_str())
            .bind(metric.key())
            .bind(level.as_str())
            .fetch_all(&mut **tx)
            .await?
        }
        Cohort::Overall => {
            sqlx::query_scalar::<_, f64>(
                r#"
                SELECT value FROM seed_values WHERE metric = ?
                UNION ALL
                SELECT value FROM contributions WHERE metric = ?
                "#,
            )
            .bind(metric.key())
            .bind(metric.key())
            .fetch_all(&mut **tx)
            .await?
        }
    };
    Ok(values)
}
