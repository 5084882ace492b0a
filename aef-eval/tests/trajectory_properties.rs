//! Property tests for the trajectory comparator.

use aef_eval::scoring::Divergence;
use aef_eval::{ToolCall, first_divergence, trajectory_exact_match};
use proptest::prelude::*;
use serde_json::{Map, Value, json};

fn arb_call() -> impl Strategy<Value = ToolCall> {
    (
        prop_oneof![Just("search"), Just("lookup"), Just("add_to_cart"), Just("checkout")],
        prop::collection::btree_map("[a-z]{1,6}", prop_oneof![
            any::<i16>().prop_map(|n| json!(n)),
            "[a-z ]{0,8}".prop_map(Value::String),
            any::<bool>().prop_map(Value::Bool),
        ], 0..4),
    )
        .prop_map(|(name, args)| {
            let input: Map<String, Value> = args.into_iter().collect();
            ToolCall::new(name).with_input(Value::Object(input))
        })
}

fn arb_trajectory() -> impl Strategy<Value = Vec<ToolCall>> {
    prop::collection::vec(arb_call(), 0..6)
}

proptest! {
    #[test]
    fn prop_reflexive(trajectory in arb_trajectory()) {
        prop_assert!(trajectory_exact_match(&trajectory, &trajectory));
        prop_assert_eq!(first_divergence(&trajectory, &trajectory), None);
    }

    #[test]
    fn prop_symmetric(a in arb_trajectory(), b in arb_trajectory()) {
        prop_assert_eq!(trajectory_exact_match(&a, &b), trajectory_exact_match(&b, &a));
    }

    #[test]
    fn prop_length_mismatch_never_matches(a in arb_trajectory(), extra in arb_call()) {
        let mut longer = a.clone();
        longer.push(extra);
        prop_assert!(!trajectory_exact_match(&a, &longer));
        prop_assert!(!trajectory_exact_match(&[], &longer));
        let is_length_divergence =
            matches!(first_divergence(&a, &longer), Some(Divergence::Length { .. }));
        prop_assert!(is_length_divergence);
    }

    #[test]
    fn prop_order_sensitive(x in arb_call(), y in arb_call()) {
        prop_assume!(x != y);
        let forward = vec![x.clone(), y.clone()];
        let swapped = vec![y, x];
        prop_assert!(!trajectory_exact_match(&forward, &swapped));
        prop_assert_eq!(first_divergence(&forward, &swapped), Some(Divergence::Call { position: 0 }));
    }

    #[test]
    fn prop_argument_key_order_irrelevant(
        name in "[a-z_]{1,8}",
        args in prop::collection::btree_map("[a-z]{1,6}", any::<i32>(), 0..5),
    ) {
        let mut forward = Map::new();
        for (k, v) in &args {
            forward.insert(k.clone(), json!(v));
        }
        let mut reversed = Map::new();
        for (k, v) in args.iter().rev() {
            reversed.insert(k.clone(), json!(v));
        }
        let a = vec![ToolCall::new(name.clone()).with_input(Value::Object(forward))];
        let b = vec![ToolCall::new(name).with_input(Value::Object(reversed))];
        prop_assert!(trajectory_exact_match(&a, &b));
    }
}

#[test]
fn test_empty_trajectories_match() {
    assert!(trajectory_exact_match(&[], &[]));
    assert!(!trajectory_exact_match(&[ToolCall::new("search")], &[]));
}
