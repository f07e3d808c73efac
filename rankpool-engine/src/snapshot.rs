//! Snapshot Log
//!
//! Append-only history of ranked metric values. A row records the play level
//! the athlete held at the time of the test and never changes it. A later
//! level change adds rows under the new level next to the old ones.
//!
//! The only in-place update is [`SnapshotLog::recalculate`], which touches
//! the two percentile columns and nothing else, guarded by an optimistic
//! `version` counter.

use crate::query::PercentileQuery;
use chrono::{DateTime, Utc};
use rankpool_common::db::SnapshotRow;
use rankpool_common::{time, Cohort, Error, Metric, PlayLevel, Result, TestType};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SNAPSHOT_COLUMNS: &str = "id, athlete_id, test_id, test_type, metric, value, play_level, \
                                test_date, percentile_level, percentile_overall, version, \
                                recorded_at";

/// One metric value to record
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry {
    pub athlete_id: Uuid,
    pub test_id: String,
    pub test_type: TestType,
    pub metric: Metric,
    pub value: f64,
    pub play_level: PlayLevel,
    pub test_date: DateTime<Utc>,
}

impl SnapshotEntry {
    fn from_existing(row: &SnapshotRow, play_level: PlayLevel) -> Self {
        Self {
            athlete_id: row.athlete_id,
            test_id: row.test_id.clone(),
            test_type: row.test_type,
            metric: row.metric,
            value: row.value,
            play_level,
            test_date: row.test_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotOutcome {
    Recorded(SnapshotRow),
    /// A row for this (athlete, metric, test, level) exists and was left as is
    AlreadyRecorded(SnapshotRow),
}

impl SnapshotOutcome {
    pub fn row(&self) -> &SnapshotRow {
        match self {
            SnapshotOutcome::Recorded(row) | SnapshotOutcome::AlreadyRecorded(row) => row,
        }
    }

    pub fn into_row(self) -> SnapshotRow {
        match self {
            SnapshotOutcome::Recorded(row) | SnapshotOutcome::AlreadyRecorded(row) => row,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, SnapshotOutcome::Recorded(_))
    }
}

/// Counts from a batch recalculation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecalculateSummary {
    pub examined: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Rows changed by a concurrent pass twice in a row
    pub conflicts: usize,
}

/// Optional narrowing of snapshot history queries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotFilter {
    pub play_level: Option<PlayLevel>,
    pub test_type: Option<TestType>,
}

#[derive(Clone)]
pub struct SnapshotLog {
    pool: SqlitePool,
    query: PercentileQuery,
}

impl SnapshotLog {
    pub fn new(pool: SqlitePool, query: PercentileQuery) -> Self {
        Self { pool, query }
    }

    async fn percentiles(
        &self,
        value: f64,
        metric: Metric,
        level: PlayLevel,
    ) -> Result<(Option<u8>, Option<u8>)> {
        let vs_level = self.query.lookup(value, metric, Cohort::Level(level)).await?;
        let vs_overall = self.query.lookup(value, metric, Cohort::Overall).await?;
        Ok((vs_level, vs_overall))
    }

    /// Rank `entry` against its level and the pooled population, then append it
    pub async fn record(&self, entry: &SnapshotEntry) -> Result<SnapshotOutcome> {
        if let Some(existing) = self
            .find(entry.athlete_id, entry.metric, &entry.test_id, entry.play_level)
            .await?
        {
            debug!(
                athlete_id = %entry.athlete_id,
                metric = %entry.metric,
                test_id = %entry.test_id,
                "Snapshot already recorded"
            );
            return Ok(SnapshotOutcome::AlreadyRecorded(existing));
        }

        let (vs_level, vs_overall) = self
            .percentiles(entry.value, entry.metric, entry.play_level)
            .await?;

        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO snapshots (
                athlete_id, test_id, test_type, metric, value, play_level, test_date,
                percentile_level, percentile_overall, version, recorded_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
            ON CONFLICT(athlete_id, metric, test_id, play_level) DO NOTHING
            RETURNING {}
            "#,
            SNAPSHOT_COLUMNS
        ))
        .bind(entry.athlete_id.to_string())
        .bind(&entry.test_id)
        .bind(entry.test_type.as_str())
        .bind(entry.metric.key())
        .bind(entry.value)
        .bind(entry.play_level.as_str())
        .bind(time::to_db(&entry.test_date))
        .bind(vs_level.map(i64::from))
        .bind(vs_overall.map(i64::from))
        .bind(time::to_db(&time::now()))
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(row) => Ok(SnapshotOutcome::Recorded(SnapshotRow::from_row(&row)?)),
            // Lost a race with an identical insert
            None => self
                .find(entry.athlete_id, entry.metric, &entry.test_id, entry.play_level)
                .await?
                .map(SnapshotOutcome::AlreadyRecorded)
                .ok_or_else(|| {
                    Error::Internal(format!(
                        "Snapshot for test {} vanished after conflict",
                        entry.test_id
                    ))
                }),
        }
    }

    /// Write rows under `level` for every (test, metric) the athlete has no
    /// row for at that level yet
    ///
    /// Rows under earlier levels are not modified.
    pub async fn restate_for_level(
        &self,
        athlete_id: Uuid,
        level: PlayLevel,
    ) -> Result<Vec<SnapshotRow>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM snapshots s
            WHERE s.athlete_id = ? AND s.play_level != ?
              AND NOT EXISTS (
                SELECT 1 FROM snapshots t
                WHERE t.athlete_id = s.athlete_id AND t.test_id = s.test_id
                  AND t.metric = s.metric AND t.play_level = ?
              )
            ORDER BY s.test_date, s.id DESC
            "#,
            SNAPSHOT_COLUMNS
        ))
        .bind(athlete_id.to_string())
        .bind(level.as_str())
        .bind(level.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut seen = HashSet::new();
        let mut written = Vec::new();
        for row in rows {
            let source = SnapshotRow::from_row(&row)?;
            if !seen.insert((source.test_id.clone(), source.metric)) {
                continue;
            }
            let outcome = self.record(&SnapshotEntry::from_existing(&source, level)).await?;
            if outcome.is_new() {
                written.push(outcome.into_row());
            }
        }

        info!(
            athlete_id = %athlete_id,
            play_level = %level,
            written = written.len(),
            "Restated snapshot history under new play level"
        );
        Ok(written)
    }

    /// Re-derive percentiles of existing rows from the current thresholds
    ///
    /// Only `percentile_level`, `percentile_overall` and `version` change.
    /// `test_ids` limits the pass to those tests.
    pub async fn recalculate(
        &self,
        athlete_id: Uuid,
        level: PlayLevel,
        test_ids: Option<&[String]>,
    ) -> Result<RecalculateSummary> {
        let filter = SnapshotFilter {
            play_level: Some(level),
            test_type: None,
        };
        let rows = self.for_athlete(athlete_id, &filter).await?;

        let mut summary = RecalculateSummary::default();
        for row in rows {
            if let Some(ids) = test_ids {
                if !ids.iter().any(|id| *id == row.test_id) {
                    continue;
                }
            }
            summary.examined += 1;

            match self.update_percentiles(&row).await? {
                UpdateResult::Updated => summary.updated += 1,
                UpdateResult::Unchanged => summary.unchanged += 1,
                UpdateResult::Stale => {
                    // Retry once against the row a concurrent pass left behind
                    let fresh = self.get(row.id).await?;
                    match self.update_percentiles(&fresh).await? {
                        UpdateResult::Updated => summary.updated += 1,
                        UpdateResult::Unchanged => summary.unchanged += 1,
                        UpdateResult::Stale => {
                            warn!(
                                snapshot_id = row.id,
                                "Snapshot recalculation lost a concurrent update"
                            );
                            summary.conflicts += 1;
                        }
                    }
                }
            }
        }

        info!(
            athlete_id = %athlete_id,
            play_level = %level,
            examined = summary.examined,
            updated = summary.updated,
            conflicts = summary.conflicts,
            "Recalculated snapshot percentiles"
        );
        Ok(summary)
    }

    async fn update_percentiles(&self, row: &SnapshotRow) -> Result<UpdateResult> {
        let (vs_level, vs_overall) = self.percentiles(row.value, row.metric, row.play_level).await?;
        if vs_level == row.percentile_vs_level && vs_overall == row.percentile_vs_overall {
            return Ok(UpdateResult::Unchanged);
        }

        let result = sqlx::query(
            r#"
            UPDATE snapshots
            SET percentile_level = ?, percentile_overall = ?, version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(vs_level.map(i64::from))
        .bind(vs_overall.map(i64::from))
        .bind(row.id)
        .bind(row.version)
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 1 {
            UpdateResult::Updated
        } else {
            UpdateResult::Stale
        })
    }

    pub async fn get(&self, id: i64) -> Result<SnapshotRow> {
        let row = sqlx::query(&format!("SELECT {} FROM snapshots WHERE id = ?", SNAPSHOT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Snapshot {}", id)))?;
        SnapshotRow::from_row(&row)
    }

    async fn find(
        &self,
        athlete_id: Uuid,
        metric: Metric,
        test_id: &str,
        level: PlayLevel,
    ) -> Result<Option<SnapshotRow>> {
        sqlx::query(&format!(
            r#"
            SELECT {} FROM snapshots
            WHERE athlete_id = ? AND metric = ? AND test_id = ? AND play_level = ?
            "#,
            SNAPSHOT_COLUMNS
        ))
        .bind(athlete_id.to_string())
        .bind(metric.key())
        .bind(test_id)
        .bind(level.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(|row| SnapshotRow::from_row(&row))
        .transpose()
    }

    /// History of one athlete, oldest first
    pub async fn for_athlete(
        &self,
        athlete_id: Uuid,
        filter: &SnapshotFilter,
    ) -> Result<Vec<SnapshotRow>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM snapshots
            WHERE athlete_id = ?
              AND (? IS NULL OR play_level = ?)
              AND (? IS NULL OR test_type = ?)
            ORDER BY test_date, id
            "#,
            SNAPSHOT_COLUMNS
        ))
        .bind(athlete_id.to_string())
        .bind(filter.play_level.map(|l| l.as_str()))
        .bind(filter.play_level.map(|l| l.as_str()))
        .bind(filter.test_type.map(|t| t.as_str()))
        .bind(filter.test_type.map(|t| t.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(SnapshotRow::from_row).collect()
    }

    /// Most recent row per metric at `level`
    pub async fn latest_per_metric(
        &self,
        athlete_id: Uuid,
        level: PlayLevel,
    ) -> Result<Vec<SnapshotRow>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM snapshots s
            WHERE s.athlete_id = ? AND s.play_level = ?
              AND s.id = (
                SELECT t.id FROM snapshots t
                WHERE t.athlete_id = s.athlete_id
                  AND t.play_level = s.play_level
                  AND t.metric = s.metric
                ORDER BY t.test_date DESC, t.id DESC
                LIMIT 1
              )
            ORDER BY s.metric
            "#,
            SNAPSHOT_COLUMNS
        ))
        .bind(athlete_id.to_string())
        .bind(level.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(SnapshotRow::from_row).collect()
    }

    /// Most recent row of one metric at `level`
    pub async fn latest_for_metric(
        &self,
        athlete_id: Uuid,
        metric: Metric,
        level: PlayLevel,
    ) -> Result<Option<SnapshotRow>> {
        Ok(self
            .latest_per_metric(athlete_id, level)
            .await?
            .into_iter()
            .find(|row| row.metric == metric))
    }
}

enum UpdateResult {
    Updated,
    Unchanged,
    Stale,
}
