//! Reference Seed Pool loader
//!
//! Imports a baseline CSV export (one athlete per row, `playing_level` plus
//! one column per metric) into `seed_values`. Seed values are never updated
//! or deleted. A source tag is loaded at most once.

use rankpool_common::{Error, Metric, PlayLevel, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

/// Baseline export column names
const SEED_COLUMNS: &[(&str, Metric)] = &[
    ("peak_takeoff_power_cmj", Metric::CmjPeakPower),
    ("peak_power_per_bw_cmj", Metric::CmjPeakPowerBm),
    ("peak_takeoff_power_sj", Metric::SjPeakPower),
    ("peak_power_per_bw_sj", Metric::SjPeakPowerBm),
    ("best_rsi_flight_contact_ht", Metric::HjRsi),
    ("peak_takeoff_force_pp", Metric::PpuPeakTakeoffForce),
    ("net_peak_vertical_force_imtp", Metric::ImtpNetPeakForce),
    ("relative_strength", Metric::ImtpRelativeStrength),
];

const LEVEL_COLUMN: &str = "playing_level";

fn column_metric(header: &str) -> Option<Metric> {
    SEED_COLUMNS
        .iter()
        .find(|(name, _)| *name == header)
        .map(|(_, metric)| *metric)
        .or_else(|| Metric::from_key(header))
}

/// One parsed seed observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeedValue {
    pub metric: Metric,
    pub play_level: PlayLevel,
    pub value: f64,
}

/// Parsed file contents plus what was dropped
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedSeed {
    pub values: Vec<SeedValue>,
    pub rows_read: usize,
    /// Rows whose level is missing or unknown
    pub skipped_rows: usize,
    /// Cells that are not finite numbers
    pub skipped_values: usize,
}

/// Parse a baseline CSV
///
/// Empty cells are absent measurements and are not counted as skipped.
pub fn parse_seed_csv<R: Read>(reader: R) -> Result<ParsedSeed> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let headers = csv_reader.headers().map_err(|e| Error::Csv(e.to_string()))?.clone();
    let level_idx = headers
        .iter()
        .position(|h| h == LEVEL_COLUMN)
        .ok_or_else(|| Error::Csv(format!("Missing '{}' column", LEVEL_COLUMN)))?;
    let metric_columns: Vec<(usize, Metric)> = headers
        .iter()
        .enumerate()
        .filter_map(|(idx, h)| column_metric(h).map(|m| (idx, m)))
        .collect();

    if metric_columns.is_empty() {
        return Err(Error::Csv("No metric columns recognized".to_string()));
    }

    let mut parsed = ParsedSeed::default();
    for record in csv_reader.records() {
        let record = record.map_err(|e| Error::Csv(e.to_string()))?;
        parsed.rows_read += 1;

        let Some(level) = record.get(level_idx).and_then(PlayLevel::normalize) else {
            parsed.skipped_rows += 1;
            continue;
        };

        for (idx, metric) in &metric_columns {
            let raw = record.get(*idx).unwrap_or("");
            if raw.is_empty() {
                continue;
            }
            match raw.parse::<f64>() {
                Ok(value) if value.is_finite() => parsed.values.push(SeedValue {
                    metric: *metric,
                    play_level: level,
                    value,
                }),
                _ => parsed.skipped_values += 1,
            }
        }
    }

    Ok(parsed)
}

/// Outcome of one load
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeedLoadSummary {
    pub source: String,
    pub rows_read: usize,
    pub values_inserted: usize,
    pub skipped_rows: usize,
    pub skipped_values: usize,
    /// The source tag was present before this call; nothing was written
    pub already_loaded: bool,
    /// (metric, level) pairs whose population gained values
    #[serde(skip)]
    pub affected: BTreeSet<(Metric, PlayLevel)>,
}

/// Insert parsed values under `source`, unless that source is already loaded
pub async fn store_seed(
    pool: &SqlitePool,
    source: &str,
    parsed: &ParsedSeed,
) -> Result<SeedLoadSummary> {
    let mut summary = SeedLoadSummary {
        source: source.to_string(),
        rows_read: parsed.rows_read,
        skipped_rows: parsed.skipped_rows,
        skipped_values: parsed.skipped_values,
        ..Default::default()
    };

    let mut tx = pool.begin().await?;

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM seed_values WHERE source = ?")
        .bind(source)
        .fetch_one(&mut *tx)
        .await?;
    if existing > 0 {
        warn!(source, existing, "Seed source already loaded, skipping");
        summary.already_loaded = true;
        return Ok(summary);
    }

    for seed in &parsed.values {
        sqlx::query(
            "INSERT INTO seed_values (source, metric, play_level, value) VALUES (?, ?, ?, ?)",
        )
        .bind(source)
        .bind(seed.metric.key())
        .bind(seed.play_level.as_str())
        .bind(seed.value)
        .execute(&mut *tx)
        .await?;
        summary.affected.insert((seed.metric, seed.play_level));
    }

    tx.commit().await?;
    summary.values_inserted = parsed.values.len();

    info!(
        source,
        rows = summary.rows_read,
        values = summary.values_inserted,
        skipped_rows = summary.skipped_rows,
        skipped_values = summary.skipped_values,
        "Seed pool loaded"
    );
    Ok(summary)
}

/// Parse and store a CSV file; the source tag defaults to the file name
pub async fn load_seed_file(
    pool: &SqlitePool,
    path: &Path,
    source: Option<&str>,
) -> Result<SeedLoadSummary> {
    let file = std::fs::File::open(path)?;
    let parsed = parse_seed_csv(file)?;
    let source = match source {
        Some(s) => s.to_string(),
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string()),
    };
    store_seed(pool, &source, &parsed).await
}
