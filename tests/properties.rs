//! Property-based tests for the join / reconcile core.
//!
//! - coverage flags partition every joined row exactly once, for every join type
//! - `match_flag` is the AND of the per-rule `match_*` columns
//! - relative comparison of equal values always matches
//! - re-aggregating an aggregated table is a no-op

use proptest::prelude::*;

use rust_recon::engine::join::{join, JoinHow, JoinSpec, IN_BOTH, ONLY_IN_A, ONLY_IN_B};
use rust_recon::engine::reconcile::{reconcile, Comparator, ReconcileRule, MATCH_FLAG};
use rust_recon::processing::aggregate::{aggregate, AggregateSpec, Metric};
use rust_recon::processing::reduce::AggKind;
use rust_recon::types::{DataSet, DataType, Field, Schema, Value};

fn table(rows: &[(i64, f64, f64)]) -> DataSet {
    let schema = Schema::new(vec![
        Field::new("id", DataType::Int64),
        Field::new("x", DataType::Float64),
        Field::new("y", DataType::Float64),
    ]);
    let rows = rows
        .iter()
        .map(|(id, x, y)| vec![Value::Int64(*id), Value::Float64(*x), Value::Float64(*y)])
        .collect();
    DataSet::new(schema, rows)
}

fn rows_strategy() -> impl Strategy<Value = Vec<(i64, f64, f64)>> {
    prop::collection::vec((0i64..8, -100f64..100f64, -100f64..100f64), 0..20)
}

fn how_strategy() -> impl Strategy<Value = JoinHow> {
    prop_oneof![
        Just(JoinHow::Inner),
        Just(JoinHow::Left),
        Just(JoinHow::Right),
        Just(JoinHow::Outer),
    ]
}

fn flag(ds: &DataSet, row: usize, name: &str) -> bool {
    ds.value(row, name) == Some(&Value::Bool(true))
}

proptest! {
    #[test]
    fn coverage_flags_partition_rows(a in rows_strategy(), b in rows_strategy(), how in how_strategy()) {
        let out = join(&table(&a), &table(&b), &JoinSpec::new(vec!["id".into()], how)).unwrap();
        for r in 0..out.row_count() {
            let set = [ONLY_IN_A, ONLY_IN_B, IN_BOTH]
                .iter()
                .filter(|f| flag(&out, r, f))
                .count();
            prop_assert_eq!(set, 1);
        }
        if how == JoinHow::Inner {
            prop_assert!((0..out.row_count()).all(|r| flag(&out, r, IN_BOTH)));
        }
    }

    #[test]
    fn match_flag_is_and_of_rule_flags(
        a in rows_strategy(),
        b in rows_strategy(),
        tol_x in 0f64..50f64,
        tol_y in 0f64..1f64,
    ) {
        let joined = join(&table(&a), &table(&b), &JoinSpec::new(vec!["id".into()], JoinHow::Outer)).unwrap();
        let rules = vec![
            ReconcileRule::new("x", Comparator::Absolute).with_tol_abs(tol_x),
            ReconcileRule::new("y", Comparator::Relative).with_tol_pct(tol_y),
        ];
        let out = reconcile(&joined, &rules, &Default::default()).unwrap();
        for r in 0..out.row_count() {
            let expected = flag(&out, r, "match_x") && flag(&out, r, "match_y");
            prop_assert_eq!(flag(&out, r, MATCH_FLAG), expected);
        }
    }

    #[test]
    fn relative_equal_values_always_match(v in -1e12f64..1e12f64, tol in 0f64..1f64) {
        let rule = ReconcileRule::new("x", Comparator::Relative).with_tol_pct(tol);
        prop_assert!(rule.matches(v, v));
    }

    #[test]
    fn aggregation_is_idempotent(rows in rows_strategy()) {
        let spec = AggregateSpec::new(
            vec!["id".into()],
            vec![Metric::new("x", AggKind::Max), Metric::new("y", AggKind::Min)],
        );
        let once = aggregate(&table(&rows), Some(&spec)).unwrap();
        let twice = aggregate(&once, Some(&spec)).unwrap();
        prop_assert_eq!(once, twice);
    }
}

#[test]
fn no_rules_means_every_row_matches() {
    let joined = join(
        &table(&[(1, 1.0, 1.0)]),
        &table(&[(2, 2.0, 2.0)]),
        &JoinSpec::new(vec!["id".into()], JoinHow::Outer),
    )
    .unwrap();
    let out = reconcile(&joined, &[], &Default::default()).unwrap();
    assert_eq!(out.row_count(), 2);
    assert!((0..2).all(|r| flag(&out, r, MATCH_FLAG)));
}
