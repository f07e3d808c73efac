//! Ingestion pipeline
//!
//! Runs one validated test record through the engine, in order:
//! parse metrics, admission, threshold rebuild for admitted pairs,
//! snapshots, then dated composites. Each stage is an explicit call; there
//! are no database triggers.

use crate::admission::{AdmissionCandidate, AdmissionDecision};
use crate::athletes;
use crate::composite::DatedComposites;
use crate::engine::Engine;
use crate::snapshot::SnapshotEntry;
use crate::thresholds::RebuildStats;
use chrono::{DateTime, Utc};
use rankpool_common::catalog::resolve_field;
use rankpool_common::db::SnapshotRow;
use rankpool_common::{Error, PlayLevel, Result, TestMetrics, TestType};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};
use uuid::Uuid;

/// Test record handed over by the ingestion collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRecord {
    pub athlete_id: Uuid,
    #[serde(deserialize_with = "lenient_test_type")]
    pub test_type: TestType,
    pub test_id: String,
    pub test_date: DateTime<Utc>,
    /// Level as of the test; empty or absent means unknown
    #[serde(default, deserialize_with = "lenient_play_level")]
    pub play_level: Option<PlayLevel>,
    /// Field name to value; nulls are allowed and ignored
    #[serde(default)]
    pub metrics: BTreeMap<String, Option<f64>>,
}

fn lenient_test_type<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<TestType, D::Error> {
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

fn lenient_play_level<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<PlayLevel>, D::Error> {
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(level) => level.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Metric fields of a record, resolved against the catalog
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMetrics {
    pub metrics: TestMetrics,
    /// Field names with no metric definition for this test type
    pub unmapped: Vec<String>,
    /// Known fields whose value is null or not finite
    pub invalid: Vec<String>,
}

/// Resolve field names through the static (test type, field) table
pub fn parse_metrics(test_type: TestType, fields: &BTreeMap<String, Option<f64>>) -> ParsedMetrics {
    let mut parsed = ParsedMetrics {
        metrics: TestMetrics::empty(test_type),
        unmapped: Vec::new(),
        invalid: Vec::new(),
    };

    for (field, value) in fields {
        let Some(metric) = resolve_field(test_type, field) else {
            parsed.unmapped.push(field.clone());
            continue;
        };
        match value {
            Some(v) if v.is_finite() => {
                parsed.metrics.set(metric, *v);
            }
            _ => parsed.invalid.push(field.clone()),
        }
    }

    parsed
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Processed,
    /// No level on the record or the athlete; admission and snapshots skipped
    MissingPlayLevel,
    /// Nothing in the record maps to a ranked metric
    NoRankedMetrics,
}

/// What one record did to the engine's state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessReport {
    pub athlete_id: Uuid,
    pub test_id: String,
    pub test_type: TestType,
    pub status: ProcessStatus,
    pub play_level: Option<PlayLevel>,
    pub unmapped_metrics: Vec<String>,
    pub invalid_values: Vec<String>,
    pub admission: Option<AdmissionDecision>,
    pub rebuilt: Vec<RebuildStats>,
    pub snapshots: Vec<SnapshotRow>,
    pub duplicate_snapshots: usize,
    pub composites: Option<DatedComposites>,
}

impl ProcessReport {
    fn new(record: &TestRecord, parsed: &ParsedMetrics, status: ProcessStatus) -> Self {
        Self {
            athlete_id: record.athlete_id,
            test_id: record.test_id.clone(),
            test_type: record.test_type,
            status,
            play_level: None,
            unmapped_metrics: parsed.unmapped.clone(),
            invalid_values: parsed.invalid.clone(),
            admission: None,
            rebuilt: Vec::new(),
            snapshots: Vec::new(),
            duplicate_snapshots: 0,
            composites: None,
        }
    }
}

impl Engine {
    /// Process one test record end to end
    ///
    /// Unmapped fields are logged and skipped; they never abort the record.
    /// A missing play level is reported, not raised.
    pub async fn process(&self, record: &TestRecord) -> Result<ProcessReport> {
        if record.test_id.trim().is_empty() {
            return Err(Error::InvalidInput("test_id must not be empty".to_string()));
        }

        let parsed = parse_metrics(record.test_type, &record.metrics);
        for field in &parsed.unmapped {
            warn!(
                athlete_id = %record.athlete_id,
                test_type = %record.test_type,
                field = %field,
                "Skipping unmapped metric"
            );
        }
        for field in &parsed.invalid {
            warn!(
                athlete_id = %record.athlete_id,
                test_type = %record.test_type,
                field = %field,
                "Skipping metric without a finite value"
            );
        }

        athletes::ensure_athlete(self.pool(), record.athlete_id, record.play_level).await?;

        let values = parsed.metrics.values();
        if values.is_empty() {
            return Ok(ProcessReport::new(record, &parsed, ProcessStatus::NoRankedMetrics));
        }

        let level = match record.play_level {
            Some(level) => Some(level),
            None => athletes::current_play_level(self.pool(), record.athlete_id).await?,
        };

        let candidate = AdmissionCandidate {
            athlete_id: record.athlete_id,
            test_id: record.test_id.clone(),
            test_date: record.test_date,
            play_level: level,
            metrics: parsed.metrics,
        };
        let decision = self.gate().consider(&candidate).await?;

        let Some(level) = level else {
            let mut report = ProcessReport::new(record, &parsed, ProcessStatus::MissingPlayLevel);
            report.admission = Some(decision);
            return Ok(report);
        };

        let mut report = ProcessReport::new(record, &parsed, ProcessStatus::Processed);
        report.play_level = Some(level);

        for metric in decision.admitted_metrics() {
            report.rebuilt.extend(self.thresholds().rebuild_for_level(*metric, level).await?);
        }
        report.admission = Some(decision);

        for (metric, value) in values {
            let entry = SnapshotEntry {
                athlete_id: record.athlete_id,
                test_id: record.test_id.clone(),
                test_type: record.test_type,
                metric,
                value,
                play_level: level,
                test_date: record.test_date,
            };
            let outcome = self.snapshots().record(&entry).await?;
            if outcome.is_new() {
                report.snapshots.push(outcome.into_row());
            } else {
                report.duplicate_snapshots += 1;
            }
        }

        let dated = self
            .composites()
            .compute_by_date(record.athlete_id, level)
            .await?;
        report.composites = Some(dated);

        info!(
            athlete_id = %record.athlete_id,
            test_type = %record.test_type,
            test_id = %record.test_id,
            play_level = %level,
            admitted = report.admission.as_ref().is_some_and(|d| d.admitted()),
            snapshots = report.snapshots.len(),
            "Processed test record"
        );

        Ok(report)
    }
}
