use proptest::prelude::*;
use std::sync::Arc;
use tally_core::{BuiltinOp, OpRegistry, StatAction, StatError, StatOp, Value};
use tally_test_utils::LongestOp;

fn add_all(op: &mut dyn StatOp, values: &[i64]) {
    for v in values {
        op.handle(StatAction::Add, &Value::Integer(*v)).unwrap();
    }
}

#[test]
fn test_global_registry_has_builtins() {
    let registry = OpRegistry::global();
    for op in BuiltinOp::ALL {
        assert!(registry.contains(op.name()));
    }
    assert!(Arc::ptr_eq(&registry, &OpRegistry::global()));
}

#[test]
fn test_user_operation_through_registry() {
    let registry = OpRegistry::new();
    assert_eq!(registry.register(LongestOp::constructor).unwrap(), LongestOp::NAME);
    assert!(registry.register(LongestOp::constructor).is_ok());

    let mut op = registry.create(LongestOp::NAME).unwrap();
    op.handle(StatAction::Add, &Value::from("Jessica")).unwrap();
    op.handle(StatAction::Add, &Value::from("John")).unwrap();
    assert_eq!(op.value(), Value::Integer(7));
    assert!(!op.handle(StatAction::Remove, &Value::from("John")).unwrap());
}

#[test]
fn test_unregistered_name_not_found() {
    let registry = OpRegistry::new();
    assert!(matches!(
        registry.create(LongestOp::NAME),
        Err(StatError::NotFound(_))
    ));
}

proptest! {
    #[test]
    fn prop_count_add_then_remove(n in 0usize..64, m_frac in 0.0f64..=1.0) {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let m = ((n as f64) * m_frac).floor() as usize;
        let mut count = BuiltinOp::Count.instantiate();
        for i in 0..n {
            count.handle(StatAction::Add, &Value::Integer(i as i64)).unwrap();
        }
        for i in 0..m {
            count.handle(StatAction::Remove, &Value::Integer(i as i64)).unwrap();
        }
        prop_assert_eq!(count.value(), Value::Integer((n - m) as i64));
    }

    #[test]
    fn prop_sum_matches_fold(values in prop::collection::vec(-1_000_000i64..1_000_000, 1..50)) {
        let mut sum = BuiltinOp::Sum.instantiate();
        add_all(sum.as_mut(), &values);
        prop_assert_eq!(sum.value(), Value::Integer(values.iter().sum()));
    }

    #[test]
    fn prop_min_max_match_iterator(values in prop::collection::vec(any::<i64>(), 1..50)) {
        let mut min = BuiltinOp::Min.instantiate();
        let mut max = BuiltinOp::Max.instantiate();
        add_all(min.as_mut(), &values);
        add_all(max.as_mut(), &values);
        prop_assert_eq!(min.value(), Value::Integer(*values.iter().min().unwrap()));
        prop_assert_eq!(max.value(), Value::Integer(*values.iter().max().unwrap()));
    }

    #[test]
    fn prop_average_remove_restores_prior(
        values in prop::collection::vec(-10_000i64..10_000, 1..30),
        extra in -10_000i64..10_000,
    ) {
        let mut avg = BuiltinOp::Average.instantiate();
        add_all(avg.as_mut(), &values);
        let before = avg.value();
        avg.handle(StatAction::Add, &Value::Integer(extra)).unwrap();
        avg.handle(StatAction::Remove, &Value::Integer(extra)).unwrap();
        prop_assert_eq!(avg.value(), before);
    }
}
