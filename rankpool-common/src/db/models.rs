//! Database models

use crate::catalog::{Cohort, Metric, PlayLevel, TestType};
use crate::{time, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|e| Error::Internal(format!("Invalid stored athlete id '{}': {}", raw, e)))
}

fn parse_percentile(raw: Option<i64>) -> Result<Option<u8>> {
    raw.map(|p| {
        u8::try_from(p)
            .map_err(|_| Error::Internal(format!("Stored percentile out of range: {}", p)))
    })
    .transpose()
}

/// One admitted athlete result in the contribution ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributionRow {
    pub id: i64,
    pub athlete_id: Uuid,
    pub metric: Metric,
    pub play_level: PlayLevel,
    pub value: f64,
    pub test_id: String,
    pub test_date: DateTime<Utc>,
}

impl ContributionRow {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            athlete_id: parse_uuid(row.try_get::<&str, _>("athlete_id")?)?,
            metric: row.try_get::<&str, _>("metric")?.parse()?,
            play_level: row.try_get::<&str, _>("play_level")?.parse()?,
            value: row.try_get("value")?,
            test_id: row.try_get("test_id")?,
            test_date: time::from_db(row.try_get::<&str, _>("test_date")?)?,
        })
    }
}

/// One point of a materialized percentile table
///
/// `value` is `None` (with population 0) when the pair is known but has no
/// reference values yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRow {
    pub metric: Metric,
    pub cohort: Cohort,
    pub percentile: u8,
    pub value: Option<f64>,
    pub population: i64,
}

impl ThresholdRow {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            metric: row.try_get::<&str, _>("metric")?.parse()?,
            cohort: row.try_get::<&str, _>("cohort")?.parse()?,
            percentile: parse_percentile(Some(row.try_get("percentile")?))?.unwrap_or(0),
            value: row.try_get("value")?,
            population: row.try_get("population")?,
        })
    }
}

/// Immutable record of one ranked metric from one test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub id: i64,
    pub athlete_id: Uuid,
    pub test_id: String,
    pub test_type: TestType,
    pub metric: Metric,
    pub value: f64,
    /// Play level as of the test, never rewritten
    pub play_level: PlayLevel,
    pub test_date: DateTime<Utc>,
    pub percentile_vs_level: Option<u8>,
    pub percentile_vs_overall: Option<u8>,
    pub version: i64,
    pub recorded_at: DateTime<Utc>,
}

impl SnapshotRow {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            athlete_id: parse_uuid(row.try_get::<&str, _>("athlete_id")?)?,
            test_id: row.try_get("test_id")?,
            test_type: row.try_get::<&str, _>("test_type")?.parse()?,
            metric: row.try_get::<&str, _>("metric")?.parse()?,
            value: row.try_get("value")?,
            play_level: row.try_get::<&str, _>("play_level")?.parse()?,
            test_date: time::from_db(row.try_get::<&str, _>("test_date")?)?,
            percentile_vs_level: parse_percentile(row.try_get("percentile_level")?)?,
            percentile_vs_overall: parse_percentile(row.try_get("percentile_overall")?)?,
            version: row.try_get("version")?,
            recorded_at: time::from_db(row.try_get::<&str, _>("recorded_at")?)?,
        })
    }
}

/// Aggregate of the six composite components for one day and level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeRow {
    pub id: i64,
    pub athlete_id: Uuid,
    pub play_level: PlayLevel,
    pub test_date: DateTime<Utc>,
    pub percentile_vs_level: f64,
    pub percentile_vs_overall: f64,
    pub component_count: i64,
}

impl CompositeRow {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            athlete_id: parse_uuid(row.try_get::<&str, _>("athlete_id")?)?,
            play_level: row.try_get::<&str, _>("play_level")?.parse()?,
            test_date: time::from_db(row.try_get::<&str, _>("test_date")?)?,
            percentile_vs_level: row.try_get("percentile_level")?,
            percentile_vs_overall: row.try_get("percentile_overall")?,
            component_count: row.try_get("component_count")?,
        })
    }
}
