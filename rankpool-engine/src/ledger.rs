//! Contribution Ledger
//!
//! Athlete results admitted into the reference population. At most one row
//! exists per (athlete, metric, play level); the UNIQUE constraint enforces
//! it even if two writers race past the admission lock.

use chrono::{DateTime, Utc};
use rankpool_common::db::ContributionRow;
use rankpool_common::{time, Metric, PlayLevel, Result};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::info;
use uuid::Uuid;

/// A value about to enter the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct NewContribution {
    pub athlete_id: Uuid,
    pub metric: Metric,
    pub play_level: PlayLevel,
    pub value: f64,
    pub test_id: String,
    pub test_date: DateTime<Utc>,
}

/// Insert unless the (athlete, metric, level) row already exists
///
/// Returns true when a row was written. An existing row is left untouched.
pub async fn insert_if_absent(
    tx: &mut Transaction<'_, Sqlite>,
    entry: &NewContribution,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO contributions (athlete_id, metric, play_level, value, test_id, test_date)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(athlete_id, metric, play_level) DO NOTHING
        "#,
    )
    .bind(entry.athlete_id.to_string())
    .bind(entry.metric.key())
    .bind(entry.play_level.as_str())
    .bind(entry.value)
    .bind(&entry.test_id)
    .bind(time::to_db(&entry.test_date))
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Replace the stored row with `entry`, or create it
///
/// This is the explicit reconciliation path; admission never calls it.
/// Returns the row that was replaced, if any.
pub async fn supersede(
    pool: &SqlitePool,
    entry: &NewContribution,
) -> Result<Option<ContributionRow>> {
    let mut tx = pool.begin().await?;

    let previous = sqlx::query(
        r#"
        SELECT id, athlete_id, metric, play_level, value, test_id, test_date
        FROM contributions
        WHERE athlete_id = ? AND metric = ? AND play_level = ?
        "#,
    )
    .bind(entry.athlete_id.to_string())
    .bind(entry.metric.key())
    .bind(entry.play_level.as_str())
    .fetch_optional(&mut *tx)
    .await?
    .map(|row| ContributionRow::from_row(&row))
    .transpose()?;

    sqlx::query(
        r#"
        INSERT INTO contributions (athlete_id, metric, play_level, value, test_id, test_date)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(athlete_id, metric, play_level) DO UPDATE SET
            value = excluded.value,
            test_id = excluded.test_id,
            test_date = excluded.test_date,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(entry.athlete_id.to_string())
    .bind(entry.metric.key())
    .bind(entry.play_level.as_str())
    .bind(entry.value)
    .bind(&entry.test_id)
    .bind(time::to_db(&entry.test_date))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(
        athlete_id = %entry.athlete_id,
        metric = %entry.metric,
        play_level = %entry.play_level,
        previous_test = previous.as_ref().map(|p| p.test_id.as_str()),
        test_id = %entry.test_id,
        "Contribution reconciled"
    );

    Ok(previous)
}

/// Ledger rows of one athlete, ordered by metric then level
pub async fn contributions_for_athlete(
    pool: &SqlitePool,
    athlete_id: Uuid,
) -> Result<Vec<ContributionRow>> {
    let rows = sqlx::query(
        r#"
        SELECT id, athlete_id, metric, play_level, value, test_id, test_date
        FROM contributions
        WHERE athlete_id = ?
        ORDER BY metric, play_level
        "#,
    )
    .bind(athlete_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(ContributionRow::from_row).collect()
}

/// Number of ledger rows in one (metric, level) population
pub async fn count_for_pair(pool: &SqlitePool, metric: Metric, level: PlayLevel) -> Result<i64> {
    let count =
        sqlx::query_scalar("SELECT COUNT(*) FROM contributions WHERE metric = ? AND play_level = ?")
            .bind(metric.key())
            .bind(level.as_str())
            .fetch_one(pool)
            .await?;
    Ok(count)
}
