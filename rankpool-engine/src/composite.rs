//! Composite Score Calculator
//!
//! Averages the six component percentiles of the force profile into one
//! score per athlete, level and day. Either all six components contribute to
//! both aggregates or nothing is written.

use crate::snapshot::{SnapshotFilter, SnapshotLog};
use chrono::{DateTime, NaiveDate, Utc};
use rankpool_common::db::{CompositeRow, SnapshotRow};
use rankpool_common::{time, Error, Metric, PlayLevel, Result, COMPOSITE_COMPONENTS};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};
use uuid::Uuid;

const COMPOSITE_COLUMNS: &str =
    "id, athlete_id, play_level, test_date, percentile_level, percentile_overall, component_count";

/// Why a composite could not be formed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompositeShortfall {
    pub play_level: PlayLevel,
    /// Components with no percentile against the level
    pub missing: Vec<Metric>,
    /// Components ranked against only one of the two populations
    pub mismatched: Vec<Metric>,
    pub level_count: usize,
    pub overall_count: usize,
}

/// The two averages of a complete component set
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CompositeScore {
    pub percentile_vs_level: f64,
    pub percentile_vs_overall: f64,
    pub test_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "composite", rename_all = "snake_case")]
pub enum CompositeOutcome {
    Written(CompositeRow),
    /// A composite already exists for that day and level
    AlreadyRecorded(CompositeRow),
    Incomplete(CompositeShortfall),
}

/// Results of the date-partitioned pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatedComposites {
    pub written: Vec<CompositeRow>,
    pub existing_days: usize,
    pub incomplete_days: usize,
}

/// Average the six components, or explain why not
///
/// `latest` holds at most one snapshot per component metric. Fails when
/// fewer than six components are ranked against the level, or when the
/// level and overall counts differ.
pub fn aggregate(
    play_level: PlayLevel,
    latest: &HashMap<Metric, SnapshotRow>,
) -> std::result::Result<CompositeScore, CompositeShortfall> {
    let mut missing = Vec::new();
    let mut mismatched = Vec::new();
    let mut level_sum = 0.0;
    let mut overall_sum = 0.0;
    let mut level_count = 0;
    let mut overall_count = 0;
    let mut test_date: Option<DateTime<Utc>> = None;

    for metric in COMPOSITE_COMPONENTS {
        let Some(row) = latest.get(&metric) else {
            missing.push(metric);
            continue;
        };

        match (row.percentile_vs_level, row.percentile_vs_overall) {
            (None, None) => missing.push(metric),
            (None, Some(_)) => {
                missing.push(metric);
                mismatched.push(metric);
            }
            (Some(_), None) => mismatched.push(metric),
            (Some(_), Some(_)) => {}
        }

        if let Some(p) = row.percentile_vs_level {
            level_sum += f64::from(p);
            level_count += 1;
        }
        if let Some(p) = row.percentile_vs_overall {
            overall_sum += f64::from(p);
            overall_count += 1;
        }
        test_date = Some(test_date.map_or(row.test_date, |d| d.max(row.test_date)));
    }

    let complete = level_count == COMPOSITE_COMPONENTS.len() && level_count == overall_count;
    match test_date {
        Some(test_date) if complete => Ok(CompositeScore {
            percentile_vs_level: level_sum / level_count as f64,
            percentile_vs_overall: overall_sum / overall_count as f64,
            test_date,
        }),
        _ => Err(CompositeShortfall {
            play_level,
            missing,
            mismatched,
            level_count,
            overall_count,
        }),
    }
}

/// Latest row per component metric among `rows`
fn latest_components<'a>(
    rows: impl IntoIterator<Item = &'a SnapshotRow>,
) -> HashMap<Metric, SnapshotRow> {
    let mut latest: HashMap<Metric, SnapshotRow> = HashMap::new();
    for row in rows {
        if !COMPOSITE_COMPONENTS.contains(&row.metric) {
            continue;
        }
        let newer = latest
            .get(&row.metric)
            .map_or(true, |current| (row.test_date, row.id) > (current.test_date, current.id));
        if newer {
            latest.insert(row.metric, row.clone());
        }
    }
    latest
}

#[derive(Clone)]
pub struct CompositeCalculator {
    pool: SqlitePool,
    snapshots: SnapshotLog,
}

impl CompositeCalculator {
    pub fn new(pool: SqlitePool, snapshots: SnapshotLog) -> Self {
        Self { pool, snapshots }
    }

    async fn level_history(&self, athlete_id: Uuid, level: PlayLevel) -> Result<Vec<SnapshotRow>> {
        let filter = SnapshotFilter {
            play_level: Some(level),
            test_type: None,
        };
        self.snapshots.for_athlete(athlete_id, &filter).await
    }

    /// Composite from the most recent snapshot of each component at `level`
    ///
    /// `as_of` ignores snapshots dated after it. The row is dated at the
    /// latest component test date.
    pub async fn compute(
        &self,
        athlete_id: Uuid,
        level: PlayLevel,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<CompositeOutcome> {
        let history = self.level_history(athlete_id, level).await?;
        let latest = latest_components(
            history
                .iter()
                .filter(|row| as_of.map_or(true, |cutoff| row.test_date <= cutoff)),
        );

        let score = match aggregate(level, &latest) {
            Ok(score) => score,
            Err(shortfall) => {
                debug!(
                    athlete_id = %athlete_id,
                    play_level = %level,
                    level_count = shortfall.level_count,
                    overall_count = shortfall.overall_count,
                    "Composite incomplete"
                );
                return Ok(CompositeOutcome::Incomplete(shortfall));
            }
        };

        self.write(athlete_id, level, &score).await
    }

    /// One composite per calendar day that has all six components at `level`
    ///
    /// Days that already have a composite are skipped. New rows are dated at
    /// 12:00 UTC of their day.
    pub async fn compute_by_date(
        &self,
        athlete_id: Uuid,
        level: PlayLevel,
    ) -> Result<DatedComposites> {
        let history = self.level_history(athlete_id, level).await?;

        let mut by_day: BTreeMap<NaiveDate, Vec<&SnapshotRow>> = BTreeMap::new();
        for row in history.iter().filter(|r| COMPOSITE_COMPONENTS.contains(&r.metric)) {
            by_day.entry(row.test_date.date_naive()).or_default().push(row);
        }

        let mut result = DatedComposites::default();
        for (day, rows) in by_day {
            if self.find_for_day(athlete_id, level, &time::noon(day)).await?.is_some() {
                result.existing_days += 1;
                continue;
            }

            let latest = latest_components(rows);
            match aggregate(level, &latest) {
                Ok(mut score) => {
                    score.test_date = time::noon(day);
                    let outcome = self.write(athlete_id, level, &score).await?;
                    if let CompositeOutcome::Written(row) = outcome {
                        result.written.push(row);
                    } else {
                        result.existing_days += 1;
                    }
                }
                Err(shortfall) => {
                    debug!(
                        athlete_id = %athlete_id,
                        day = %day,
                        level_count = shortfall.level_count,
                        overall_count = shortfall.overall_count,
                        "Skipping day without a complete component set"
                    );
                    result.incomplete_days += 1;
                }
            }
        }

        if !result.written.is_empty() {
            info!(
                athlete_id = %athlete_id,
                play_level = %level,
                written = result.written.len(),
                "Wrote dated composites"
            );
        }
        Ok(result)
    }

    async fn write(
        &self,
        athlete_id: Uuid,
        level: PlayLevel,
        score: &CompositeScore,
    ) -> Result<CompositeOutcome> {
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO composites (
                athlete_id, play_level, test_date, test_day,
                percentile_level, percentile_overall, component_count, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(athlete_id, play_level, test_day) DO NOTHING
            RETURNING {}
            "#,
            COMPOSITE_COLUMNS
        ))
        .bind(athlete_id.to_string())
        .bind(level.as_str())
        .bind(time::to_db(&score.test_date))
        .bind(time::day_key(&score.test_date))
        .bind(score.percentile_vs_level)
        .bind(score.percentile_vs_overall)
        .bind(COMPOSITE_COMPONENTS.len() as i64)
        .bind(time::to_db(&time::now()))
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            let row = CompositeRow::from_row(&row)?;
            info!(
                athlete_id = %athlete_id,
                play_level = %level,
                test_date = %row.test_date,
                percentile_vs_level = row.percentile_vs_level,
                "Composite recorded"
            );
            return Ok(CompositeOutcome::Written(row));
        }

        self.find_for_day(athlete_id, level, &score.test_date)
            .await?
            .map(CompositeOutcome::AlreadyRecorded)
            .ok_or_else(|| Error::Internal("Composite vanished after conflict".to_string()))
    }

    async fn find_for_day(
        &self,
        athlete_id: Uuid,
        level: PlayLevel,
        date: &DateTime<Utc>,
    ) -> Result<Option<CompositeRow>> {
        sqlx::query(&format!(
            "SELECT {} FROM composites WHERE athlete_id = ? AND play_level = ? AND test_day = ?",
            COMPOSITE_COLUMNS
        ))
        .bind(athlete_id.to_string())
        .bind(level.as_str())
        .bind(time::day_key(date))
        .fetch_optional(&self.pool)
        .await?
        .map(|row| CompositeRow::from_row(&row))
        .transpose()
    }

    /// Composite history of one athlete, oldest first
    pub async fn for_athlete(
        &self,
        athlete_id: Uuid,
        level: Option<PlayLevel>,
    ) -> Result<Vec<CompositeRow>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM composites
            WHERE athlete_id = ? AND (? IS NULL OR play_level = ?)
            ORDER BY test_date, id
            "#,
            COMPOSITE_COLUMNS
        ))
        .bind(athlete_id.to_string())
        .bind(level.map(|l| l.as_str()))
        .bind(level.map(|l| l.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(CompositeRow::from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ts;
    use rankpool_common::TestType;

    fn row(
        id: i64,
        metric: Metric,
        level_pct: Option<u8>,
        overall_pct: Option<u8>,
        date: DateTime<Utc>,
    ) -> SnapshotRow {
        SnapshotRow {
            id,
            athlete_id: Uuid::nil(),
            test_id: format!("t{}", id),
            test_type: metric.test_type(),
            metric,
            value: 1.0,
            play_level: PlayLevel::College,
            test_date: date,
            percentile_vs_level: level_pct,
            percentile_vs_overall: overall_pct,
            version: 0,
            recorded_at: date,
        }
    }

    fn full_set(level_pcts: [u8; 6]) -> HashMap<Metric, SnapshotRow> {
        COMPOSITE_COMPONENTS
            .iter()
            .zip(level_pcts)
            .enumerate()
            .map(|(i, (metric, p))| {
                let date = ts(2025, 5, 1 + i as u32);
                (*metric, row(i as i64, *metric, Some(p), Some(50), date))
            })
            .collect()
    }

    #[test]
    fn test_aggregate_means_six_components() {
        let score = aggregate(PlayLevel::College, &full_set([80, 75, 90, 60, 70, 85])).unwrap();
        assert!((score.percentile_vs_level - 76.67).abs() < 0.01);
        assert_eq!(score.percentile_vs_overall, 50.0);
        assert_eq!(score.test_date, ts(2025, 5, 6));
    }

    #[test]
    fn test_aggregate_rejects_five_components() {
        let mut set = full_set([80, 75, 90, 60, 70, 85]);
        set.remove(&Metric::HjRsi);

        let shortfall = aggregate(PlayLevel::College, &set).unwrap_err();
        assert_eq!(shortfall.missing, vec![Metric::HjRsi]);
        assert_eq!(shortfall.level_count, 5);
        assert_eq!(shortfall.overall_count, 5);
    }

    #[test]
    fn test_aggregate_rejects_mismatched_counts() {
        let mut set = full_set([80, 75, 90, 60, 70, 85]);
        if let Some(r) = set.get_mut(&Metric::PpuPeakTakeoffForce) {
            r.percentile_vs_overall = None;
        }

        let shortfall = aggregate(PlayLevel::College, &set).unwrap_err();
        assert!(shortfall.missing.is_empty());
        assert_eq!(shortfall.mismatched, vec![Metric::PpuPeakTakeoffForce]);
        assert_eq!(shortfall.level_count, 6);
        assert_eq!(shortfall.overall_count, 5);
    }

    #[test]
    fn test_latest_components_ignores_cmj_and_older_rows() {
        let old = row(1, Metric::HjRsi, Some(10), Some(10), ts(2025, 1, 1));
        let new = row(2, Metric::HjRsi, Some(90), Some(90), ts(2025, 2, 1));
        let cmj = row(3, Metric::CmjPeakPower, Some(50), Some(50), ts(2025, 3, 1));
        assert_eq!(cmj.test_type, TestType::Cmj);

        let latest = latest_components([&new, &old, &cmj]);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[&Metric::HjRsi].percentile_vs_level, Some(90));
    }
}
