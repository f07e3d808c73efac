//! Shared helpers for engine integration tests

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use rankpool_common::{Metric, PlayLevel, TestType};
use rankpool_engine::seed::{store_seed, ParsedSeed, SeedValue};
use rankpool_engine::{Engine, EngineConfig, TestRecord};
use std::collections::BTreeMap;
use tempfile::TempDir;
use uuid::Uuid;

/// Engine on a fresh database; keep the `TempDir` alive for the test
pub async fn setup_engine() -> (TempDir, Engine) {
    let dir = tempfile::tempdir().expect("Should create temp dir");
    let config = EngineConfig {
        max_lock_wait_ms: Some(2000),
    };
    let engine = Engine::open(&dir.path().join("rankpool.db"), &config)
        .await
        .expect("Should open engine");
    (dir, engine)
}

pub fn day(year: i32, month: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, d, 9, 30, 0).unwrap()
}

/// Store seed values for one pair under a unique source tag
pub async fn seed_pair(engine: &Engine, metric: Metric, level: PlayLevel, values: &[f64]) {
    let parsed = ParsedSeed {
        values: values
            .iter()
            .map(|v| SeedValue {
                metric,
                play_level: level,
                value: *v,
            })
            .collect(),
        rows_read: values.len(),
        ..Default::default()
    };
    let source = format!("test-{}", Uuid::new_v4());
    store_seed(engine.pool(), &source, &parsed)
        .await
        .expect("Should store seed values");
}

pub fn record(
    athlete_id: Uuid,
    test_type: TestType,
    test_id: &str,
    test_date: DateTime<Utc>,
    play_level: Option<PlayLevel>,
    metrics: &[(Metric, f64)],
) -> TestRecord {
    let metrics: BTreeMap<String, Option<f64>> = metrics
        .iter()
        .map(|(m, v)| (m.key().to_string(), Some(*v)))
        .collect();
    TestRecord {
        athlete_id,
        test_type,
        test_id: test_id.to_string(),
        test_date,
        play_level,
        metrics,
    }
}

pub fn hop(
    athlete_id: Uuid,
    test_id: &str,
    date: DateTime<Utc>,
    level: PlayLevel,
    rsi: f64,
) -> TestRecord {
    record(athlete_id, TestType::Hj, test_id, date, Some(level), &[(Metric::HjRsi, rsi)])
}
