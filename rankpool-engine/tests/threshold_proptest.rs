//! Property tests for the nearest-rank threshold builder

use proptest::prelude::*;
use rankpool_common::{Cohort, Metric, PlayLevel};
use rankpool_engine::thresholds::{nearest_rank_index, ThresholdTable, TABLE_ROWS};

fn build(values: Vec<f64>) -> ThresholdTable {
    ThresholdTable::build(Metric::HjRsi, Cohort::Level(PlayLevel::College), values)
}

proptest! {
    #[test]
    fn thresholds_never_decrease(values in prop::collection::vec(-1.0e6f64..1.0e6, 1..400)) {
        let table = build(values.clone());
        let rows: Vec<(u8, Option<f64>)> = table.rows().collect();

        prop_assert_eq!(rows.len(), TABLE_ROWS);
        prop_assert_eq!(table.population(), values.len());
        for pair in rows.windows(2) {
            prop_assert!(pair[0].1.unwrap() <= pair[1].1.unwrap());
        }

        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        prop_assert_eq!(table.value_at(0), Some(min));
        prop_assert_eq!(table.value_at(100), Some(max));
    }

    #[test]
    fn lookup_is_monotonic_in_value(
        values in prop::collection::vec(0.0f64..500.0, 1..200),
        a in 0.0f64..600.0,
        b in 0.0f64..600.0,
    ) {
        let table = build(values);
        let (low, high) = if a <= b { (a, b) } else { (b, a) };

        let p_low = table.percentile_of(low).unwrap();
        let p_high = table.percentile_of(high).unwrap();
        prop_assert!(p_low <= p_high);
        prop_assert!(p_high <= 100);
    }

    #[test]
    fn adding_a_higher_value_never_raises_rank(
        values in prop::collection::vec(0.0f64..100.0, 1..200),
        candidate in 0.0f64..100.0,
    ) {
        let before = build(values.clone()).percentile_of(candidate).unwrap();

        let mut grown = values;
        grown.push(candidate + 1.0);
        let after = build(grown).percentile_of(candidate).unwrap();

        prop_assert!(after <= before);
    }

    #[test]
    fn rank_index_stays_in_bounds(p in 0u8..=100, n in 1usize..10_000) {
        let idx = nearest_rank_index(p, n);
        prop_assert!(idx < n);
        if p == 100 {
            prop_assert_eq!(idx, n - 1);
        }
    }
}

#[test]
fn empty_population_has_no_rank() {
    let table = build(Vec::new());
    assert_eq!(table.population(), 0);
    assert!(table.rows().all(|(_, v)| v.is_none()));
    assert_eq!(table.percentile_of(10.0), None);
}
