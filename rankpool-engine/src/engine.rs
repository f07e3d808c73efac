//! Ranking engine facade
//!
//! Owns the database pool and one instance of every component. All state is
//! passed in through [`EngineConfig`]; nothing is global.

use crate::admission::AdmissionGate;
use crate::athletes;
use crate::composite::{CompositeCalculator, CompositeOutcome, DatedComposites};
use crate::ledger::{self, NewContribution};
use crate::query::PercentileQuery;
use crate::seed::{self, SeedLoadSummary};
use crate::snapshot::{RecalculateSummary, SnapshotFilter, SnapshotLog};
use crate::thresholds::{RebuildStats, ThresholdStore};
use chrono::{DateTime, Utc};
use rankpool_common::config::DEFAULT_MAX_LOCK_WAIT_MS;
use rankpool_common::db::{self, CompositeRow, ContributionRow, SnapshotRow, ThresholdRow};
use rankpool_common::{Cohort, Error, Metric, PlayLevel, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

/// Construction-time settings
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Lock retry budget; falls back to the database setting when `None`
    pub max_lock_wait_ms: Option<u64>,
}

/// Result of a play-level change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelChangeReport {
    pub athlete_id: Uuid,
    pub previous: Option<PlayLevel>,
    pub current: PlayLevel,
    /// New snapshot rows written under the new level
    pub restated: usize,
    pub composites: DatedComposites,
}

/// Result of an explicit ledger reconciliation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub previous: ContributionRow,
    pub current: ContributionRow,
    pub changed: bool,
    pub rebuilt: Vec<RebuildStats>,
}

#[derive(Clone)]
pub struct Engine {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
    thresholds: ThresholdStore,
    query: PercentileQuery,
    gate: AdmissionGate,
    snapshots: SnapshotLog,
    composites: CompositeCalculator,
}

impl Engine {
    /// Build an engine on an initialized database
    pub async fn new(pool: SqlitePool, config: &EngineConfig) -> Result<Self> {
        let max_lock_wait_ms = match config.max_lock_wait_ms {
            Some(ms) => ms,
            None => {
                db::load_setting_u64(&pool, db::MAX_LOCK_WAIT_SETTING, DEFAULT_MAX_LOCK_WAIT_MS)
                    .await?
            }
        };

        let query = PercentileQuery::new(pool.clone());
        let snapshots = SnapshotLog::new(pool.clone(), query.clone());

        Ok(Self {
            thresholds: ThresholdStore::new(pool.clone(), max_lock_wait_ms),
            gate: AdmissionGate::new(pool.clone(), max_lock_wait_ms),
            composites: CompositeCalculator::new(pool.clone(), snapshots.clone()),
            query,
            snapshots,
            max_lock_wait_ms,
            pool,
        })
    }

    /// Open (creating if needed) the database at `db_path` and build an engine
    pub async fn open(db_path: &Path, config: &EngineConfig) -> Result<Self> {
        let pool = db::init_database(db_path).await?;
        Self::new(pool, config).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn max_lock_wait_ms(&self) -> u64 {
        self.max_lock_wait_ms
    }

    pub fn thresholds(&self) -> &ThresholdStore {
        &self.thresholds
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn snapshots(&self) -> &SnapshotLog {
        &self.snapshots
    }

    pub fn composites(&self) -> &CompositeCalculator {
        &self.composites
    }

    /// Percentile of `value` in the (metric, cohort) population
    pub async fn percentile(
        &self,
        value: f64,
        metric: Metric,
        cohort: Cohort,
    ) -> Result<Option<u8>> {
        self.query.lookup(value, metric, cohort).await
    }

    pub async fn threshold_table(
        &self,
        metric: Metric,
        cohort: Cohort,
    ) -> Result<Vec<ThresholdRow>> {
        self.query.table(metric, cohort).await
    }

    pub async fn rebuild_all(&self) -> Result<Vec<RebuildStats>> {
        self.thresholds.rebuild_all().await
    }

    /// Import a baseline CSV and rebuild every table it touched
    pub async fn load_seed_csv(
        &self,
        path: &Path,
        source: Option<&str>,
    ) -> Result<SeedLoadSummary> {
        let summary = seed::load_seed_file(&self.pool, path, source).await?;

        let metrics: BTreeSet<Metric> = summary.affected.iter().map(|(m, _)| *m).collect();
        for (metric, level) in &summary.affected {
            self.thresholds.rebuild(*metric, Cohort::Level(*level)).await?;
        }
        for metric in metrics {
            self.thresholds.rebuild(metric, Cohort::Overall).await?;
        }

        Ok(summary)
    }

    /// Move an athlete to a new play level
    ///
    /// Existing history stays as recorded. Every (test, metric) already in
    /// the log gets a new row ranked under the new level, then the dated
    /// composites for that level are filled in.
    pub async fn change_play_level(
        &self,
        athlete_id: Uuid,
        level: PlayLevel,
    ) -> Result<LevelChangeReport> {
        let previous = athletes::set_play_level(&self.pool, athlete_id, level).await?;
        let restated = self.snapshots.restate_for_level(athlete_id, level).await?;
        let composites = self.composites.compute_by_date(athlete_id, level).await?;

        info!(
            athlete_id = %athlete_id,
            previous = ?previous,
            current = %level,
            restated = restated.len(),
            "Play level changed"
        );

        Ok(LevelChangeReport {
            athlete_id,
            previous,
            current: level,
            restated: restated.len(),
            composites,
        })
    }

    async fn resolve_level(&self, athlete_id: Uuid, level: Option<PlayLevel>) -> Result<PlayLevel> {
        match level {
            Some(level) => Ok(level),
            None => athletes::current_play_level(&self.pool, athlete_id)
                .await?
                .ok_or_else(|| {
                    Error::NotFound(format!("No play level recorded for athlete {}", athlete_id))
                }),
        }
    }

    /// Re-rank stored snapshots against current thresholds
    ///
    /// `level` defaults to the athlete's current level.
    pub async fn recalculate(
        &self,
        athlete_id: Uuid,
        level: Option<PlayLevel>,
        test_ids: Option<&[String]>,
    ) -> Result<RecalculateSummary> {
        let level = self.resolve_level(athlete_id, level).await?;
        self.snapshots.recalculate(athlete_id, level, test_ids).await
    }

    /// Composite from the latest components, at the current level by default
    pub async fn compute_composite(
        &self,
        athlete_id: Uuid,
        level: Option<PlayLevel>,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<CompositeOutcome> {
        let level = self.resolve_level(athlete_id, level).await?;
        self.composites.compute(athlete_id, level, as_of).await
    }

    /// Replace a ledger row with the athlete's most recent value at that level
    ///
    /// Only an existing contribution can be reconciled; this never creates
    /// one, so the first-test rule still holds.
    pub async fn reconcile(
        &self,
        athlete_id: Uuid,
        metric: Metric,
        level: PlayLevel,
    ) -> Result<ReconcileReport> {
        let previous = ledger::contributions_for_athlete(&self.pool, athlete_id)
            .await?
            .into_iter()
            .find(|c| c.metric == metric && c.play_level == level)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "No contribution for athlete {} / {} / {}",
                    athlete_id, metric, level
                ))
            })?;

        let latest = self
            .snapshots
            .latest_for_metric(athlete_id, metric, level)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "No snapshot of {} at {} for athlete {}",
                    metric, level, athlete_id
                ))
            })?;

        let changed = latest.test_id != previous.test_id || latest.value != previous.value;
        if !changed {
            return Ok(ReconcileReport {
                current: previous.clone(),
                previous,
                changed,
                rebuilt: Vec::new(),
            });
        }

        let entry = NewContribution {
            athlete_id,
            metric,
            play_level: level,
            value: latest.value,
            test_id: latest.test_id.clone(),
            test_date: latest.test_date,
        };
        ledger::supersede(&self.pool, &entry).await?;
        let rebuilt = self.thresholds.rebuild_for_level(metric, level).await?;

        Ok(ReconcileReport {
            current: ContributionRow {
                id: previous.id,
                athlete_id,
                metric,
                play_level: level,
                value: entry.value,
                test_id: entry.test_id,
                test_date: entry.test_date,
            },
            previous,
            changed,
            rebuilt,
        })
    }

    pub async fn snapshot_history(
        &self,
        athlete_id: Uuid,
        filter: &SnapshotFilter,
    ) -> Result<Vec<SnapshotRow>> {
        self.snapshots.for_athlete(athlete_id, filter).await
    }

    pub async fn composite_history(
        &self,
        athlete_id: Uuid,
        level: Option<PlayLevel>,
    ) -> Result<Vec<CompositeRow>> {
        self.composites.for_athlete(athlete_id, level).await
    }

    /// Latest snapshot per metric, at the current level by default
    pub async fn current_percentiles(
        &self,
        athlete_id: Uuid,
        level: Option<PlayLevel>,
    ) -> Result<Vec<SnapshotRow>> {
        let level = self.resolve_level(athlete_id, level).await?;
        self.snapshots.latest_per_metric(athlete_id, level).await
    }

    pub async fn contributions(&self, athlete_id: Uuid) -> Result<Vec<ContributionRow>> {
        ledger::contributions_for_athlete(&self.pool, athlete_id).await
    }
}
