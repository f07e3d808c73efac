//! Ingestion pipeline and maintenance operations

mod common;

use common::{day, hop, record, seed_pair, setup_engine};
use rankpool_common::{Cohort, Error, Metric, PlayLevel, TestType, COMPOSITE_COMPONENTS};
use rankpool_engine::admission::AdmissionDecision;
use rankpool_engine::composite::CompositeOutcome;
use rankpool_engine::snapshot::SnapshotFilter;
use rankpool_engine::{Engine, ProcessStatus, TestRecord};
use std::io::Write;
use uuid::Uuid;

/// Six component records for one day, ranking at the given values when the
/// tables are seeded with 1..=100
fn full_day(
    athlete: Uuid,
    date_tag: &str,
    level: Option<PlayLevel>,
    date: chrono::DateTime<chrono::Utc>,
) -> Vec<TestRecord> {
    vec![
        record(
            athlete,
            TestType::Sj,
            &format!("sj-{}", date_tag),
            date,
            level,
            &[(Metric::SjPeakPower, 80.0), (Metric::SjPeakPowerBm, 75.0)],
        ),
        record(
            athlete,
            TestType::Hj,
            &format!("hj-{}", date_tag),
            date,
            level,
            &[(Metric::HjRsi, 90.0)],
        ),
        record(
            athlete,
            TestType::Ppu,
            &format!("ppu-{}", date_tag),
            date,
            level,
            &[(Metric::PpuPeakTakeoffForce, 60.0)],
        ),
        record(
            athlete,
            TestType::Imtp,
            &format!("imtp-{}", date_tag),
            date,
            level,
            &[(Metric::ImtpNetPeakForce, 70.0), (Metric::ImtpRelativeStrength, 85.0)],
        ),
    ]
}

async fn seed_identity(engine: &Engine, level: PlayLevel) {
    let values: Vec<f64> = (1..=100).map(f64::from).collect();
    for metric in COMPOSITE_COMPONENTS {
        seed_pair(engine, metric, level, &values).await;
    }
    engine.rebuild_all().await.unwrap();
}

#[tokio::test]
async fn test_load_seed_csv_builds_touched_tables() {
    let (dir, engine) = setup_engine().await;
    let path = dir.path().join("baseline.csv");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "athlete,playing_level,best_rsi_flight_contact_ht,relative_strength").unwrap();
    writeln!(file, "a,College,1.0,").unwrap();
    writeln!(file, "b,College,2.0,2.9").unwrap();
    writeln!(file, "c,College,3.0,").unwrap();
    writeln!(file, "d,College,4.0,").unwrap();
    writeln!(file, "e,HS,1.5,").unwrap();
    drop(file);

    let summary = engine.load_seed_csv(&path, None).await.unwrap();
    assert_eq!(summary.source, "baseline.csv");
    assert_eq!(summary.rows_read, 5);
    assert_eq!(summary.values_inserted, 6);

    let college = engine
        .threshold_table(Metric::HjRsi, Cohort::Level(PlayLevel::College))
        .await
        .unwrap();
    assert_eq!(college[0].population, 4);
    let overall = engine.threshold_table(Metric::HjRsi, Cohort::Overall).await.unwrap();
    assert_eq!(overall[0].population, 5);

    let p = engine
        .percentile(2.5, Metric::HjRsi, Cohort::Level(PlayLevel::College))
        .await
        .unwrap();
    assert_eq!(p, Some(50));

    // Pairs the file never touched are not built
    let err = engine
        .threshold_table(Metric::CmjPeakPower, Cohort::Overall)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    let again = engine.load_seed_csv(&path, None).await.unwrap();
    assert!(again.already_loaded);
    let overall = engine.threshold_table(Metric::HjRsi, Cohort::Overall).await.unwrap();
    assert_eq!(overall[0].population, 5);
}

#[tokio::test]
async fn test_record_without_ranked_metrics() {
    let (_dir, engine) = setup_engine().await;
    let athlete = Uuid::new_v4();

    let mut rec = record(
        athlete,
        TestType::Cmj,
        "cmj-1",
        day(2025, 1, 3),
        Some(PlayLevel::Pro),
        &[],
    );
    rec.metrics.insert("jump_height_trial_value".to_string(), Some(0.45));
    rec.metrics.insert("peak_takeoff_power_trial_value".to_string(), None);

    let report = engine.process(&rec).await.unwrap();
    assert_eq!(report.status, ProcessStatus::NoRankedMetrics);
    assert_eq!(report.unmapped_metrics, vec!["jump_height_trial_value".to_string()]);
    assert_eq!(report.invalid_values, vec!["peak_takeoff_power_trial_value".to_string()]);
    assert!(report.admission.is_none());
}

#[tokio::test]
async fn test_blank_test_id_is_rejected() {
    let (_dir, engine) = setup_engine().await;
    let rec = hop(Uuid::new_v4(), "  ", day(2025, 1, 3), PlayLevel::Pro, 2.0);

    let err = engine.process(&rec).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_stored_level_used_when_record_has_none() {
    let (_dir, engine) = setup_engine().await;
    let athlete = Uuid::new_v4();

    engine
        .process(&hop(athlete, "hj-1", day(2025, 1, 3), PlayLevel::Youth, 1.2))
        .await
        .unwrap();
    let hop_without_level = record(
        athlete,
        TestType::Hj,
        "hj-2",
        day(2025, 1, 9),
        None,
        &[(Metric::HjRsi, 1.4)],
    );
    let report = engine.process(&hop_without_level).await.unwrap();

    assert_eq!(report.status, ProcessStatus::Processed);
    assert_eq!(report.play_level, Some(PlayLevel::Youth));
    assert!(report.admission.unwrap().admitted());
}

#[tokio::test]
async fn test_composites_are_partitioned_by_day() {
    let (_dir, engine) = setup_engine().await;
    seed_identity(&engine, PlayLevel::College).await;
    let athlete = Uuid::new_v4();
    let level = Some(PlayLevel::College);

    let mut records = full_day(athlete, "a", level, day(2025, 3, 1));
    // Move the SJ test to the previous day
    records[0].test_date = day(2025, 2, 28);
    for r in &records {
        let report = engine.process(r).await.unwrap();
        assert!(report.composites.unwrap().written.is_empty());
    }
    assert!(engine.composite_history(athlete, None).await.unwrap().is_empty());

    // The on-demand composite spans days and is dated at the latest component
    match engine.compute_composite(athlete, None, None).await.unwrap() {
        CompositeOutcome::Written(row) => {
            assert!((row.percentile_vs_level - 76.67).abs() < 0.01);
            assert_eq!(row.test_date, day(2025, 3, 1));
        }
        other => panic!("expected a new composite, got {:?}", other),
    }

    // A full second day yields its own dated row at noon
    for r in full_day(athlete, "b", level, day(2025, 4, 1)) {
        engine.process(&r).await.unwrap();
    }
    let history = engine.composite_history(athlete, Some(PlayLevel::College)).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].test_date.date_naive(), day(2025, 4, 1).date_naive());
    assert_eq!(history[1].test_date.format("%H:%M").to_string(), "12:00");
}

#[tokio::test]
async fn test_level_change_writes_composites_for_new_level() {
    let (_dir, engine) = setup_engine().await;
    seed_identity(&engine, PlayLevel::College).await;
    let athlete = Uuid::new_v4();

    for r in full_day(athlete, "a", Some(PlayLevel::HighSchool), day(2025, 3, 1)) {
        engine.process(&r).await.unwrap();
    }
    // No High School reference values, so nothing ranks at that level
    assert!(engine.composite_history(athlete, None).await.unwrap().is_empty());

    let change = engine.change_play_level(athlete, PlayLevel::College).await.unwrap();
    assert_eq!(change.previous, Some(PlayLevel::HighSchool));
    assert_eq!(change.restated, 6);
    assert_eq!(change.composites.written.len(), 1);
    assert!((change.composites.written[0].percentile_vs_level - 76.67).abs() < 0.01);

    let hs = engine
        .snapshot_history(
            athlete,
            &SnapshotFilter {
                play_level: Some(PlayLevel::HighSchool),
                test_type: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(hs.len(), 6);
    assert!(hs.iter().all(|s| s.percentile_vs_level.is_none() && s.version == 0));

    let current = engine.current_percentiles(athlete, None).await.unwrap();
    assert_eq!(current.len(), 6);
    assert!(current.iter().all(|s| s.play_level == PlayLevel::College));

    // Repeating the change restates nothing new
    let again = engine.change_play_level(athlete, PlayLevel::College).await.unwrap();
    assert_eq!(again.restated, 0);
    assert_eq!(again.composites.existing_days, 1);
}

#[tokio::test]
async fn test_recalculate_follows_pool_growth() {
    let (_dir, engine) = setup_engine().await;
    let values: Vec<f64> = (1..=10).map(|v| v as f64 * 10.0).collect();
    seed_pair(&engine, Metric::HjRsi, PlayLevel::College, &values).await;
    engine.rebuild_all().await.unwrap();

    let ranked = Uuid::new_v4();
    let report = engine
        .process(&hop(ranked, "r-1", day(2025, 5, 1), PlayLevel::College, 55.0))
        .await
        .unwrap();
    assert_eq!(report.snapshots[0].percentile_vs_level, Some(50));

    let other = Uuid::new_v4();
    engine
        .process(&hop(other, "o-1", day(2025, 5, 2), PlayLevel::College, 150.0))
        .await
        .unwrap();
    engine
        .process(&hop(other, "o-2", day(2025, 5, 9), PlayLevel::College, 150.0))
        .await
        .unwrap();

    let unrelated = vec!["o-1".to_string()];
    let skipped = engine.recalculate(ranked, None, Some(&unrelated)).await.unwrap();
    assert_eq!(skipped.examined, 0);

    let summary = engine.recalculate(ranked, None, None).await.unwrap();
    assert_eq!(summary.examined, 1);
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.conflicts, 0);

    let rows = engine.snapshot_history(ranked, &SnapshotFilter::default()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value, 55.0);
    assert_eq!(rows[0].percentile_vs_level, Some(45));
    assert_eq!(rows[0].version, 1);

    let repeat = engine.recalculate(ranked, None, None).await.unwrap();
    assert_eq!(repeat.unchanged, 1);
}

#[tokio::test]
async fn test_reconcile_replaces_contribution_with_latest() {
    let (_dir, engine) = setup_engine().await;
    let athlete = Uuid::new_v4();
    let college = PlayLevel::College;

    let hops = [
        ("hj-1", day(2025, 1, 1), 2.0),
        ("hj-2", day(2025, 2, 1), 2.3),
        ("hj-3", day(2025, 3, 1), 2.8),
    ];
    for (id, date, rsi) in hops {
        engine.process(&hop(athlete, id, date, college, rsi)).await.unwrap();
    }
    assert_eq!(engine.contributions(athlete).await.unwrap()[0].test_id, "hj-2");

    let report = engine.reconcile(athlete, Metric::HjRsi, college).await.unwrap();
    assert!(report.changed);
    assert_eq!(report.previous.test_id, "hj-2");
    assert_eq!(report.current.test_id, "hj-3");
    assert_eq!(report.current.value, 2.8);
    assert_eq!(report.rebuilt.len(), 2);

    let ledger = engine.contributions(athlete).await.unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].test_id, "hj-3");

    let table = engine
        .threshold_table(Metric::HjRsi, Cohort::Level(college))
        .await
        .unwrap();
    assert_eq!(table[0].population, 1);
    assert_eq!(table[0].value, Some(2.8));

    let unchanged = engine.reconcile(athlete, Metric::HjRsi, college).await.unwrap();
    assert!(!unchanged.changed);
    assert!(unchanged.rebuilt.is_empty());

    let err = engine.reconcile(athlete, Metric::HjRsi, PlayLevel::Pro).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_concurrent_admissions_all_reach_the_pool() {
    let (_dir, engine) = setup_engine().await;
    let level = PlayLevel::Pro;
    let athletes: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();

    for (i, athlete) in athletes.iter().enumerate() {
        engine
            .process(&hop(*athlete, &format!("first-{}", i), day(2025, 6, 1), level, 2.0))
            .await
            .unwrap();
    }

    let second: Vec<TestRecord> = athletes
        .iter()
        .enumerate()
        .map(|(i, a)| hop(*a, &format!("second-{}", i), day(2025, 6, 8), level, 2.0 + i as f64))
        .collect();
    let (a, b, c) = tokio::join!(
        engine.process(&second[0]),
        engine.process(&second[1]),
        engine.process(&second[2]),
    );
    for report in [a, b, c] {
        assert!(report.unwrap().admission.unwrap().admitted());
    }

    let table = engine
        .threshold_table(Metric::HjRsi, Cohort::Level(level))
        .await
        .unwrap();
    assert_eq!(table[0].population, 3);
    assert_eq!(table[100].value, Some(4.0));
}

#[tokio::test]
async fn test_resync_completing_a_test_makes_it_count() {
    let (_dir, engine) = setup_engine().await;
    let athlete = Uuid::new_v4();
    let college = Some(PlayLevel::College);
    let complete = [(Metric::ImtpNetPeakForce, 2900.0), (Metric::ImtpRelativeStrength, 3.4)];

    let partial = engine
        .process(&record(
            athlete,
            TestType::Imtp,
            "t1",
            day(2025, 7, 1),
            college,
            &[(Metric::ImtpNetPeakForce, 2900.0)],
        ))
        .await
        .unwrap();
    assert_eq!(partial.admission, Some(AdmissionDecision::NotQualifying));

    let resent = engine
        .process(&record(athlete, TestType::Imtp, "t1", day(2025, 7, 1), college, &complete))
        .await
        .unwrap();
    assert_eq!(resent.admission, Some(AdmissionDecision::FirstTest));

    let second = engine
        .process(&record(athlete, TestType::Imtp, "t2", day(2025, 7, 15), college, &complete))
        .await
        .unwrap();
    assert!(second.admission.unwrap().admitted());
    assert_eq!(engine.contributions(athlete).await.unwrap().len(), 2);
}
