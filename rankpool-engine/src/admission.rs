//! Admission Gate
//!
//! Decides whether a test's values join the contribution ledger.
//!
//! **Rule:** an athlete's first qualifying test of a type at a level is never
//! admitted. From the second qualifying test on, the metrics of that type are
//! admitted at that level, once per (athlete, metric, level).
//!
//! **Serialization:** check-then-insert runs under a lock keyed on
//! (athlete, test type, level) and inside one transaction, so two tests of
//! the same athlete cannot both see "first test" or both insert.

use crate::ledger::{self, NewContribution};
use crate::utils::{retry_on_lock, KeyedLocks};
use chrono::{DateTime, Utc};
use rankpool_common::{time, Metric, PlayLevel, Result, TestMetrics, TestType};
use serde::Serialize;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One test offered to the gate
#[derive(Debug, Clone)]
pub struct AdmissionCandidate {
    pub athlete_id: Uuid,
    pub test_id: String,
    pub test_date: DateTime<Utc>,
    pub play_level: Option<PlayLevel>,
    pub metrics: TestMetrics,
}

/// Outcome of [`AdmissionGate::consider`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AdmissionDecision {
    /// No play level, so there is no population to join
    MissingPlayLevel,
    /// Test lacks one or more metrics of its type
    NotQualifying,
    /// First qualifying test of this type at this level
    FirstTest,
    /// Values written to the ledger
    Admitted { metrics: Vec<Metric> },
    /// Every metric already has a ledger row for this level
    AlreadyContributed,
}

impl AdmissionDecision {
    pub fn admitted(&self) -> bool {
        matches!(self, AdmissionDecision::Admitted { .. })
    }

    /// Metrics whose populations changed
    pub fn admitted_metrics(&self) -> &[Metric] {
        match self {
            AdmissionDecision::Admitted { metrics } => metrics,
            _ => &[],
        }
    }
}

type AdmissionKey = (Uuid, TestType, PlayLevel);

#[derive(Clone)]
pub struct AdmissionGate {
    pool: SqlitePool,
    locks: KeyedLocks<AdmissionKey>,
    max_lock_wait_ms: u64,
}

impl AdmissionGate {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            locks: KeyedLocks::new(),
            max_lock_wait_ms,
        }
    }

    /// Register the test and admit its values if the rule allows
    ///
    /// Re-running for a test that was already admitted writes nothing and
    /// reports `AlreadyContributed`.
    pub async fn consider(&self, candidate: &AdmissionCandidate) -> Result<AdmissionDecision> {
        let Some(level) = candidate.play_level else {
            warn!(
                athlete_id = %candidate.athlete_id,
                test_id = %candidate.test_id,
                "Skipping admission: athlete has no play level"
            );
            return Ok(AdmissionDecision::MissingPlayLevel);
        };

        let test_type = candidate.metrics.test_type();
        let _guard = self.locks.acquire((candidate.athlete_id, test_type, level)).await;

        let pool = &self.pool;
        let decision = retry_on_lock("admission", self.max_lock_wait_ms, || async move {
            let mut tx = pool.begin().await?;
            let decision = decide_in_tx(&mut tx, candidate, level).await?;
            tx.commit().await?;
            Ok(decision)
        })
        .await?;

        match &decision {
            AdmissionDecision::Admitted { metrics } => info!(
                athlete_id = %candidate.athlete_id,
                test_type = %test_type,
                play_level = %level,
                test_id = %candidate.test_id,
                admitted = metrics.len(),
                "Admitted test values into contribution ledger"
            ),
            other => debug!(
                athlete_id = %candidate.athlete_id,
                test_type = %test_type,
                play_level = %level,
                test_id = %candidate.test_id,
                decision = ?other,
                "Test not admitted"
            ),
        }

        Ok(decision)
    }
}

async fn decide_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    candidate: &AdmissionCandidate,
    level: PlayLevel,
) -> Result<AdmissionDecision> {
    let test_type = candidate.metrics.test_type();
    let qualifying = candidate.metrics.is_complete();

    register_test(tx, candidate, level, qualifying).await?;

    if !qualifying {
        return Ok(AdmissionDecision::NotQualifying);
    }

    let prior: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM athlete_tests
        WHERE athlete_id = ? AND test_type = ? AND play_level = ?
          AND qualifying = 1 AND test_id != ?
        "#,
    )
    .bind(candidate.athlete_id.to_string())
    .bind(test_type.as_str())
    .bind(level.as_str())
    .bind(&candidate.test_id)
    .fetch_one(&mut **tx)
    .await?;

    if prior == 0 {
        return Ok(AdmissionDecision::FirstTest);
    }

    let mut admitted = Vec::new();
    for (metric, value) in candidate.metrics.values() {
        let entry = NewContribution {
            athlete_id: candidate.athlete_id,
            metric,
            play_level: level,
            value,
            test_id: candidate.test_id.clone(),
            test_date: candidate.test_date,
        };
        if ledger::insert_if_absent(tx, &entry).await? {
            admitted.push(metric);
        }
    }

    if admitted.is_empty() {
        Ok(AdmissionDecision::AlreadyContributed)
    } else {
        Ok(AdmissionDecision::Admitted { metrics: admitted })
    }
}

/// Record that the athlete took this test, once per (test id, type)
///
/// A re-sent test can move from non-qualifying to qualifying, never back.
async fn register_test(
    tx: &mut Transaction<'_, Sqlite>,
    candidate: &AdmissionCandidate,
    level: PlayLevel,
    qualifying: bool,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO athlete_tests
            (athlete_id, test_id, test_type, play_level, test_date, qualifying)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(athlete_id, test_id, test_type)
        DO UPDATE SET qualifying = MAX(athlete_tests.qualifying, excluded.qualifying)
        "#,
    )
    .bind(candidate.athlete_id.to_string())
    .bind(&candidate.test_id)
    .bind(candidate.metrics.test_type().as_str())
    .bind(level.as_str())
    .bind(time::to_db(&candidate.test_date))
    .bind(qualifying)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_pool, ts};

    fn hop_test(
        athlete_id: Uuid,
        test_id: &str,
        level: Option<PlayLevel>,
        rsi: Option<f64>,
    ) -> AdmissionCandidate {
        let mut metrics = TestMetrics::empty(TestType::Hj);
        if let Some(rsi) = rsi {
            metrics.set(Metric::HjRsi, rsi);
        }
        AdmissionCandidate {
            athlete_id,
            test_id: test_id.to_string(),
            test_date: ts(2025, 3, 1),
            play_level: level,
            metrics,
        }
    }

    #[tokio::test]
    async fn test_first_test_is_not_admitted() {
        let (_dir, pool) = test_pool().await;
        let gate = AdmissionGate::new(pool.clone(), 1000);
        let athlete = Uuid::new_v4();

        let decision = gate
            .consider(&hop_test(athlete, "t1", Some(PlayLevel::College), Some(2.1)))
            .await
            .unwrap();

        assert_eq!(decision, AdmissionDecision::FirstTest);
        assert!(ledger::contributions_for_athlete(&pool, athlete).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_test_admitted_once() {
        let (_dir, pool) = test_pool().await;
        let gate = AdmissionGate::new(pool.clone(), 1000);
        let athlete = Uuid::new_v4();

        gate.consider(&hop_test(athlete, "t1", Some(PlayLevel::College), Some(2.1)))
            .await
            .unwrap();
        let second = hop_test(athlete, "t2", Some(PlayLevel::College), Some(2.4));
        let decision = gate.consider(&second).await.unwrap();
        assert_eq!(
            decision,
            AdmissionDecision::Admitted {
                metrics: vec![Metric::HjRsi]
            }
        );

        // Repeating the same test is a no-op
        let again = gate.consider(&second).await.unwrap();
        assert_eq!(again, AdmissionDecision::AlreadyContributed);

        let rows = ledger::contributions_for_athlete(&pool, athlete).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].test_id, "t2");
        assert_eq!(rows[0].value, 2.4);
    }

    #[tokio::test]
    async fn test_incomplete_test_does_not_count_as_prior() {
        let (_dir, pool) = test_pool().await;
        let gate = AdmissionGate::new(pool.clone(), 1000);
        let athlete = Uuid::new_v4();

        let partial = gate
            .consider(&hop_test(athlete, "t1", Some(PlayLevel::Pro), None))
            .await
            .unwrap();
        assert_eq!(partial, AdmissionDecision::NotQualifying);

        let next = gate
            .consider(&hop_test(athlete, "t2", Some(PlayLevel::Pro), Some(1.9)))
            .await
            .unwrap();
        assert_eq!(next, AdmissionDecision::FirstTest);
    }

    #[tokio::test]
    async fn test_resent_complete_test_counts_as_prior() {
        let (_dir, pool) = test_pool().await;
        let gate = AdmissionGate::new(pool.clone(), 1000);
        let athlete = Uuid::new_v4();
        let college = Some(PlayLevel::College);

        let partial = gate.consider(&hop_test(athlete, "t1", college, None)).await.unwrap();
        assert_eq!(partial, AdmissionDecision::NotQualifying);

        let resent = gate
            .consider(&hop_test(athlete, "t1", college, Some(2.0)))
            .await
            .unwrap();
        assert_eq!(resent, AdmissionDecision::FirstTest);

        let second = gate
            .consider(&hop_test(athlete, "t2", college, Some(2.2)))
            .await
            .unwrap();
        assert!(second.admitted());
        let count = ledger::count_for_pair(&pool, Metric::HjRsi, PlayLevel::College)
            .await
            .unwrap();
        assert_eq!(count, 1);

        // An incomplete re-send does not demote the test again
        gate.consider(&hop_test(athlete, "t1", college, None)).await.unwrap();
        let qualifying: i64 =
            sqlx::query_scalar("SELECT qualifying FROM athlete_tests WHERE test_id = 't1'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(qualifying, 1);
    }

    #[tokio::test]
    async fn test_levels_are_counted_separately() {
        let (_dir, pool) = test_pool().await;
        let gate = AdmissionGate::new(pool.clone(), 1000);
        let athlete = Uuid::new_v4();

        gate.consider(&hop_test(athlete, "t1", Some(PlayLevel::HighSchool), Some(2.0)))
            .await
            .unwrap();
        let decision = gate
            .consider(&hop_test(athlete, "t2", Some(PlayLevel::College), Some(2.2)))
            .await
            .unwrap();

        assert_eq!(decision, AdmissionDecision::FirstTest);
    }

    #[tokio::test]
    async fn test_missing_play_level_skips_admission() {
        let (_dir, pool) = test_pool().await;
        let gate = AdmissionGate::new(pool.clone(), 1000);

        let decision = gate
            .consider(&hop_test(Uuid::new_v4(), "t1", None, Some(2.0)))
            .await
            .unwrap();

        assert_eq!(decision, AdmissionDecision::MissingPlayLevel);
        let registered: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM athlete_tests")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(registered, 0);
    }

    #[tokio::test]
    async fn test_concurrent_second_tests_admit_one_row() {
        let (_dir, pool) = test_pool().await;
        let gate = AdmissionGate::new(pool.clone(), 5000);
        let athlete = Uuid::new_v4();

        gate.consider(&hop_test(athlete, "t1", Some(PlayLevel::Youth), Some(1.5)))
            .await
            .unwrap();

        let a = hop_test(athlete, "t2", Some(PlayLevel::Youth), Some(1.6));
        let b = hop_test(athlete, "t3", Some(PlayLevel::Youth), Some(1.7));
        let (ra, rb) = tokio::join!(gate.consider(&a), gate.consider(&b));

        let admitted = [ra.unwrap(), rb.unwrap()].iter().filter(|d| d.admitted()).count();
        assert_eq!(admitted, 1);
        let count = ledger::count_for_pair(&pool, Metric::HjRsi, PlayLevel::Youth)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
